//! Configuration Manager (cm)
//!
//! The Configuration Manager owns the registry:
//!
//! - **Hives**: Independent trees of cells (SYSTEM, SOFTWARE, etc.)
//! - **Cells**: Storage units addressed by a stable or volatile index
//! - **Keys**: Hierarchical containers, linked through per-class subkey indices
//! - **Values**: Named typed data, small data stored inline in the value cell
//! - **Callbacks**: Driver hooks notified before and after each operation
//!
//! # Registry Structure
//!
//! ```text
//! \
//! ├── SYSTEM
//! │   ├── ControlSet001
//! │   └── Select
//! ├── SOFTWARE
//! ├── HARDWARE (volatile)
//! └── SAM
//! ```
//!
//! # Value Types
//!
//! - REG_SZ: Null-terminated UTF-16 string
//! - REG_DWORD: 32-bit integer
//! - REG_QWORD: 64-bit integer
//! - REG_BINARY: Binary data
//! - REG_MULTI_SZ: Multiple strings
//! - REG_LINK: Symbolic link target

pub mod callback;
pub mod cell;
pub mod config;
pub mod hive;
pub mod index;
pub mod info;
pub mod key;
pub mod lock;
pub mod object;
pub mod parse;
pub mod registry;
pub mod status;
pub mod value;

pub use callback::{CmCallbackFunction, CmCallbackList, RegNotifyClass, RegNotifyInformation};

pub use cell::{CellIndex, HStorageType, HCELL_NIL};

pub use config::{CmConfig, SyncPolicy};

pub use hive::{
    CmHive,
    CreateOptions,
    HiveBackingStore,
    HiveFlags,
    HiveId,
    KeySnapshot,
    MemoryBackingStore,
    ValueSnapshot,
};

pub use info::{
    KeyInformationClass,
    KeyValueEntry,
    KeyValueInformationClass,
    Marshaled,
};

pub use key::{CmKeyNode, KeyNodeFlags};

pub use object::{KeyId, KeyObject};

pub use parse::{cm_parse_key, ParseProcedure, ParseResult};

pub use registry::{CreateDisposition, Registry, KEY_WRITE_TIME_INFORMATION};

pub use status::{CmErrorKind, CmStatus};

pub use value::{CmKeyValue, RegType};
