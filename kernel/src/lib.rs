//! NT Configuration Manager Core
//!
//! The registry half of an NT-style kernel, split along the usual subsystem
//! prefixes:
//!
//! - **ke** - Kernel primitives: critical regions, system time
//! - **ex** - Executive support: rundown protection
//! - **ob** - Object Manager seam: handle table and access masks
//! - **cm** - Configuration Manager: hive cells, keys, values, callbacks,
//!   query marshaling and the `Nt*Key` service layer
//!
//! # Layering
//!
//! ```text
//! Registry (Nt*Key services)
//! ├── CmCallbackList      pre/post notifications, rundown protected
//! ├── CmTreeLock          one reader/writer lock for the whole hive set
//! │   └── HiveSet
//! │       └── CmHive      key nodes, values, subkey indices
//! │           └── CellMap stable + volatile cell storage
//! └── info                information-class records into caller buffers
//! ```
//!
//! The crate is `no_std` + `alloc`; test builds link `std` for threads.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]

extern crate alloc;

pub mod cm;
pub mod ex;
pub mod ke;
pub mod ob;

pub use cm::{
    CmConfig,
    CmErrorKind,
    CmStatus,
    Registry,
};
