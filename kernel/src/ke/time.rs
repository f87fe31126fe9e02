//! System Time
//!
//! System time is kept in Windows FILETIME units (100ns intervals since
//! January 1, 1601). The clock interrupt advances it with
//! `ke_update_system_time`.

use core::sync::atomic::{AtomicU64, Ordering};

/// Default clock increment: 15.625ms in 100ns units
pub const KE_MAXIMUM_INCREMENT: u64 = 156_250;

/// Current system time (FILETIME)
static SYSTEM_TIME: AtomicU64 = AtomicU64::new(0);

/// Read the current system time (KeQuerySystemTime)
#[inline]
pub fn ke_query_system_time() -> u64 {
    SYSTEM_TIME.load(Ordering::Acquire)
}

/// Advance the system time by one clock tick of `increment` 100ns units
///
/// Returns the new time.
pub fn ke_update_system_time(increment: u64) -> u64 {
    SYSTEM_TIME.fetch_add(increment, Ordering::AcqRel) + increment
}
