//! Registry Status Codes
//!
//! Every configuration manager routine returns `Result<T, CmStatus>`.
//! `CmStatus` names the precise condition; `CmErrorKind` folds those into
//! the coarse classes callers usually branch on, and `to_ntstatus` gives the
//! `STATUS_*` value an `Nt*Key` service would hand back.

use crate::ob::ObStatus;

/// Registry operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmStatus {
    /// Operation succeeded
    Success,
    /// Success, but variable-length output was truncated
    BufferOverflow,
    /// Key path does not resolve
    NameNotFound,
    /// Named value does not exist
    ValueNotFound,
    /// No callback registered under the cookie
    CookieNotFound,
    /// Enumeration ordinal out of range
    NoMoreEntries,
    /// A sibling with this name already exists
    NameConflict,
    /// Key name has more than one component
    PathHasSeparators,
    /// Stable key requested under a volatile parent
    ChildMustBeVolatile,
    /// Key still has subkeys
    HasSubkeys,
    /// Key is marked for deletion
    MarkedForDeletion,
    /// Hive still has open keys
    HiveInUse,
    /// Callback unregistration already in progress
    AlreadyPending,
    /// Buffer smaller than the fixed header
    BufferTooSmall,
    /// Allocation or table limit reached
    OutOfMemory,
    /// Information class recognised but unsupported
    NotImplemented,
    /// Information class unknown
    InvalidInfoClass,
    /// Input length wrong for the information class
    InfoLengthMismatch,
    /// Malformed argument (empty or oversized name, oversized data)
    InvalidParameter,
    /// Handle is null, stale or closed
    InvalidHandle,
    /// Handle lacks the required access, or the key is protected
    AccessDenied,
    /// Backing store failed
    IoError,
    /// Cell reference dangling or of the wrong kind
    RegistryCorrupt,
    /// A registered callback vetoed the operation with this NTSTATUS
    CallbackRejected(u32),
}

/// Coarse failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmErrorKind {
    Success,
    NotFound,
    Conflict,
    HasChildren,
    MarkedForDeletion,
    BufferTooSmall,
    /// Partial success
    BufferOverflow,
    ResourceExhausted,
    Unimplemented,
    InvalidRequest,
    Denied,
    Io,
}

// NTSTATUS values
pub const STATUS_SUCCESS: u32 = 0x0000_0000;
pub const STATUS_BUFFER_OVERFLOW: u32 = 0x8000_0005;
pub const STATUS_NO_MORE_ENTRIES: u32 = 0x8000_001A;
pub const STATUS_UNSUCCESSFUL: u32 = 0xC000_0001;
pub const STATUS_NOT_IMPLEMENTED: u32 = 0xC000_0002;
pub const STATUS_INVALID_INFO_CLASS: u32 = 0xC000_0003;
pub const STATUS_INFO_LENGTH_MISMATCH: u32 = 0xC000_0004;
pub const STATUS_INVALID_HANDLE: u32 = 0xC000_0008;
pub const STATUS_INVALID_PARAMETER: u32 = 0xC000_000D;
pub const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
pub const STATUS_BUFFER_TOO_SMALL: u32 = 0xC000_0023;
pub const STATUS_OBJECT_NAME_INVALID: u32 = 0xC000_0033;
pub const STATUS_OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
pub const STATUS_OBJECT_NAME_COLLISION: u32 = 0xC000_0035;
pub const STATUS_INSUFFICIENT_RESOURCES: u32 = 0xC000_009A;
pub const STATUS_CANNOT_DELETE: u32 = 0xC000_0121;
pub const STATUS_REGISTRY_CORRUPT: u32 = 0xC000_014C;
pub const STATUS_REGISTRY_IO_FAILED: u32 = 0xC000_014D;
pub const STATUS_KEY_DELETED: u32 = 0xC000_017C;
pub const STATUS_CHILD_MUST_BE_VOLATILE: u32 = 0xC000_0181;

impl CmStatus {
    /// NT_SUCCESS: success and informational truncation both count
    pub fn is_success(&self) -> bool {
        matches!(self, CmStatus::Success | CmStatus::BufferOverflow)
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    pub fn kind(&self) -> CmErrorKind {
        match self {
            CmStatus::Success => CmErrorKind::Success,
            CmStatus::BufferOverflow => CmErrorKind::BufferOverflow,
            CmStatus::NameNotFound | CmStatus::ValueNotFound | CmStatus::CookieNotFound | CmStatus::NoMoreEntries => {
                CmErrorKind::NotFound
            }
            CmStatus::NameConflict | CmStatus::AlreadyPending | CmStatus::HiveInUse => {
                CmErrorKind::Conflict
            }
            CmStatus::HasSubkeys => CmErrorKind::HasChildren,
            CmStatus::MarkedForDeletion => CmErrorKind::MarkedForDeletion,
            CmStatus::BufferTooSmall => CmErrorKind::BufferTooSmall,
            CmStatus::OutOfMemory => CmErrorKind::ResourceExhausted,
            CmStatus::NotImplemented => CmErrorKind::Unimplemented,
            CmStatus::PathHasSeparators
            | CmStatus::ChildMustBeVolatile
            | CmStatus::InvalidInfoClass
            | CmStatus::InfoLengthMismatch
            | CmStatus::InvalidParameter
            | CmStatus::InvalidHandle => CmErrorKind::InvalidRequest,
            CmStatus::AccessDenied | CmStatus::CallbackRejected(_) => CmErrorKind::Denied,
            CmStatus::IoError | CmStatus::RegistryCorrupt => CmErrorKind::Io,
        }
    }

    /// NTSTATUS equivalent
    pub fn to_ntstatus(&self) -> u32 {
        match self {
            CmStatus::Success => STATUS_SUCCESS,
            CmStatus::BufferOverflow => STATUS_BUFFER_OVERFLOW,
            CmStatus::NameNotFound | CmStatus::ValueNotFound => STATUS_OBJECT_NAME_NOT_FOUND,
            CmStatus::CookieNotFound | CmStatus::AlreadyPending => STATUS_UNSUCCESSFUL,
            CmStatus::NoMoreEntries => STATUS_NO_MORE_ENTRIES,
            CmStatus::NameConflict => STATUS_OBJECT_NAME_COLLISION,
            CmStatus::PathHasSeparators => STATUS_OBJECT_NAME_INVALID,
            CmStatus::ChildMustBeVolatile => STATUS_CHILD_MUST_BE_VOLATILE,
            CmStatus::HasSubkeys | CmStatus::HiveInUse => STATUS_CANNOT_DELETE,
            CmStatus::MarkedForDeletion => STATUS_KEY_DELETED,
            CmStatus::BufferTooSmall => STATUS_BUFFER_TOO_SMALL,
            CmStatus::OutOfMemory => STATUS_INSUFFICIENT_RESOURCES,
            CmStatus::NotImplemented => STATUS_NOT_IMPLEMENTED,
            CmStatus::InvalidInfoClass => STATUS_INVALID_INFO_CLASS,
            CmStatus::InfoLengthMismatch => STATUS_INFO_LENGTH_MISMATCH,
            CmStatus::InvalidParameter => STATUS_INVALID_PARAMETER,
            CmStatus::InvalidHandle => STATUS_INVALID_HANDLE,
            CmStatus::AccessDenied => STATUS_ACCESS_DENIED,
            CmStatus::IoError => STATUS_REGISTRY_IO_FAILED,
            CmStatus::RegistryCorrupt => STATUS_REGISTRY_CORRUPT,
            CmStatus::CallbackRejected(code) => *code,
        }
    }
}

impl From<ObStatus> for CmStatus {
    fn from(status: ObStatus) -> Self {
        match status {
            ObStatus::InvalidHandle => CmStatus::InvalidHandle,
            ObStatus::AccessDenied => CmStatus::AccessDenied,
            ObStatus::TableFull => CmStatus::OutOfMemory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_includes_overflow() {
        assert!(CmStatus::Success.is_success());
        assert!(CmStatus::BufferOverflow.is_success());
        assert!(CmStatus::BufferTooSmall.is_error());
        assert!(CmStatus::CallbackRejected(STATUS_ACCESS_DENIED).is_error());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(CmStatus::ValueNotFound.kind(), CmErrorKind::NotFound);
        assert_eq!(CmStatus::NameConflict.kind(), CmErrorKind::Conflict);
        assert_eq!(CmStatus::HiveInUse.kind(), CmErrorKind::Conflict);
        assert_eq!(CmStatus::HasSubkeys.kind(), CmErrorKind::HasChildren);
        assert_eq!(CmStatus::OutOfMemory.kind(), CmErrorKind::ResourceExhausted);
        assert_eq!(CmStatus::NotImplemented.kind(), CmErrorKind::Unimplemented);
    }

    #[test]
    fn test_ntstatus_codes() {
        assert_eq!(CmStatus::HasSubkeys.to_ntstatus(), 0xC000_0121);
        assert_eq!(CmStatus::MarkedForDeletion.to_ntstatus(), 0xC000_017C);
        assert_eq!(CmStatus::BufferOverflow.to_ntstatus(), 0x8000_0005);
        assert_eq!(CmStatus::CallbackRejected(0xC000_0022).to_ntstatus(), 0xC000_0022);
        assert_eq!(CmStatus::from(ObStatus::TableFull), CmStatus::OutOfMemory);
    }
}
