//! Executive (ex)
//!
//! Executive support routines shared by kernel components. The
//! configuration manager only needs rundown protection: the guarantee
//! that an object is not torn down while a caller is still using it.

pub mod rundown;

pub use rundown::{ExRundownRef, RundownGuard};
