//! Configuration Manager Settings
//!
//! Limits and policies for one `Registry` instance. Built with `const fn`
//! so a kernel can keep its configuration in a static:
//!
//! ```
//! use ntcm::cm::{CmConfig, SyncPolicy};
//!
//! static CONFIG: CmConfig = CmConfig::new()
//!     .with_max_callbacks(16)
//!     .with_sync_policy(SyncPolicy::Explicit);
//! assert_eq!(CONFIG.max_callbacks, 16);
//! ```

use crate::ke::ke_query_system_time;

/// Maximum key name length (UTF-16 units)
pub const MAX_KEY_NAME_LENGTH: usize = 255;

/// Maximum value name length (UTF-16 units)
pub const MAX_VALUE_NAME_LENGTH: usize = 16383;

/// Registered callback limit (CMP_MAX_CALLBACKS)
pub const CM_MAX_CALLBACKS: usize = 100;

/// Default cell limit per storage class
pub const CM_DEFAULT_MAX_CELLS: usize = 1 << 20;

/// Default handle table size
pub const CM_DEFAULT_MAX_HANDLES: usize = 4096;

/// When dirty hives are written to the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Flush the touched hive after every successful mutation
    OnWrite,
    /// Only `flush_key` writes
    Explicit,
}

/// Registry configuration
#[derive(Debug, Clone, Copy)]
pub struct CmConfig {
    /// Cells per storage class (stable or volatile) in each hive
    pub max_cells_per_storage: usize,
    pub max_callbacks: usize,
    pub max_handles: usize,
    pub max_key_name_length: usize,
    pub max_value_name_length: usize,
    pub sync_policy: SyncPolicy,
    /// FILETIME source for key write times
    pub clock: fn() -> u64,
}

impl CmConfig {
    pub const fn new() -> Self {
        Self {
            max_cells_per_storage: CM_DEFAULT_MAX_CELLS,
            max_callbacks: CM_MAX_CALLBACKS,
            max_handles: CM_DEFAULT_MAX_HANDLES,
            max_key_name_length: MAX_KEY_NAME_LENGTH,
            max_value_name_length: MAX_VALUE_NAME_LENGTH,
            sync_policy: SyncPolicy::OnWrite,
            clock: ke_query_system_time,
        }
    }

    pub const fn with_max_cells_per_storage(mut self, cells: usize) -> Self {
        self.max_cells_per_storage = cells;
        self
    }

    pub const fn with_max_callbacks(mut self, callbacks: usize) -> Self {
        self.max_callbacks = callbacks;
        self
    }

    pub const fn with_max_handles(mut self, handles: usize) -> Self {
        self.max_handles = handles;
        self
    }

    pub const fn with_max_key_name_length(mut self, length: usize) -> Self {
        self.max_key_name_length = length;
        self
    }

    pub const fn with_max_value_name_length(mut self, length: usize) -> Self {
        self.max_value_name_length = length;
        self
    }

    pub const fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub const fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for CmConfig {
    fn default() -> Self {
        Self::new()
    }
}
