//! Kernel Primitives (ke)
//!
//! The small slice of the kernel that the configuration manager leans on:
//!
//! - **Critical regions**: `KeEnterCriticalRegion` / `KeLeaveCriticalRegion`,
//!   held for as long as the registry tree lock is held
//! - **System time**: 100ns FILETIME clock used for key write times

pub mod critical;
pub mod time;

pub use critical::{CriticalRegion, KeCriticalRegion};
pub use time::{
    ke_query_system_time,
    ke_update_system_time,
    KE_MAXIMUM_INCREMENT,
};
