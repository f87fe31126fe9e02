//! Object Manager (ob)
//!
//! Only the handle table survives here: callers hold handles, the table
//! maps them to reference-counted object bodies and checks the access
//! mask that was granted when the handle was created.

pub mod handle;

pub use handle::{
    AccessMask,
    Handle,
    HandleTable,
    ObStatus,
    HANDLE_INCREMENT,
    INVALID_HANDLE_VALUE,
    NULL_HANDLE,
};
