//! Error types for the CIFS operation library

use std::convert::TryFrom;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for CIFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CIFS client operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or truncated reply ("bad remote protocol")
    #[error("Protocol parsing error: {0}")]
    ParseError(String),

    /// Reply shorter than its fixed layout
    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// Transport reports the connection is gone
    #[error("Not connected")]
    NotConnected,

    /// Transport reports the share is being forcibly unmounted
    #[error("Forced unmount in progress")]
    ForcedUnmount,

    /// Node was revoked after a failed reopen; it stays unusable until reclaimed
    #[error("Handle revoked: {0}")]
    Revoked(String),

    /// Size or modification time changed across a reconnect
    #[error("Stale file state: {0}")]
    Stale(String),

    /// Access denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// File or directory already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Quota or disk space exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Byte range is locked by another open
    #[error("Lock conflict: {0}")]
    LockConflict(String),

    /// Open refused by the server's share-mode check
    #[error("Sharing violation: {0}")]
    SharingViolation(String),

    /// Directory is not empty
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Server does not support the request or info level
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Any other server status
    #[error("Server returned {0}")]
    Status(NtStatus),
}

impl Error {
    /// Map a failing server status onto an error kind
    pub fn from_status(status: NtStatus, context: &str) -> Self {
        let context = context.to_string();
        match status {
            NtStatus::AccessDenied | NtStatus::PrivilegeNotHeld | NtStatus::CannotDelete => {
                Error::AccessDenied(context)
            }
            NtStatus::ObjectNameNotFound
            | NtStatus::ObjectPathNotFound
            | NtStatus::NoSuchFile
            | NtStatus::DeletePending => Error::FileNotFound(context),
            NtStatus::ObjectNameCollision => Error::AlreadyExists(context),
            NtStatus::DiskFull | NtStatus::QuotaExceeded => Error::QuotaExceeded(context),
            NtStatus::LockNotGranted | NtStatus::FileLockConflict => Error::LockConflict(context),
            NtStatus::SharingViolation => Error::SharingViolation(context),
            NtStatus::DirectoryNotEmpty => Error::DirectoryNotEmpty(context),
            NtStatus::NotSupported
            | NtStatus::NotImplemented
            | NtStatus::InvalidLevel
            | NtStatus::InvalidInfoClass => Error::NotSupported(context),
            NtStatus::InvalidParameter => Error::InvalidParameter(context),
            NtStatus::NetworkNameDeleted => Error::NotConnected,
            other => Error::Status(other),
        }
    }

    /// Errors the transport raises when the connection itself is gone
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::NotConnected | Error::ForcedUnmount)
    }
}

/// SMB protocol status codes (subset of NTSTATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NtStatus {
    /// The operation completed successfully
    Success = 0x00000000,
    /// The data was too large to fit into the specified buffer
    BufferOverflow = 0x80000005,
    /// No more files
    NoMoreFiles = 0x80000006,
    /// The requested operation is not implemented
    NotImplemented = 0xC0000002,
    /// The info class is invalid
    InvalidInfoClass = 0xC0000003,
    /// The specified handle is invalid
    InvalidHandle = 0xC0000008,
    /// The parameter is incorrect
    InvalidParameter = 0xC000000D,
    /// The file does not exist
    NoSuchFile = 0xC000000F,
    /// Access denied
    AccessDenied = 0xC0000022,
    /// The buffer is too small
    BufferTooSmall = 0xC0000023,
    /// The object name is invalid
    ObjectNameInvalid = 0xC0000033,
    /// The object name is not found
    ObjectNameNotFound = 0xC0000034,
    /// Cannot create a file that already exists
    ObjectNameCollision = 0xC0000035,
    /// The path does not exist
    ObjectPathNotFound = 0xC000003A,
    /// Sharing violation
    SharingViolation = 0xC0000043,
    /// Quota exceeded
    QuotaExceeded = 0xC0000044,
    /// Lock request not granted
    LockNotGranted = 0xC0000054,
    /// Range conflicts with an existing lock
    FileLockConflict = 0xC0000055,
    /// A delete is pending on the file
    DeletePending = 0xC0000056,
    /// Required privilege is not held
    PrivilegeNotHeld = 0xC0000061,
    /// The range is not locked
    RangeNotLocked = 0xC000007E,
    /// Disk full
    DiskFull = 0xC000007F,
    /// The file is a directory
    FileIsADirectory = 0xC00000BA,
    /// The request is not supported
    NotSupported = 0xC00000BB,
    /// The specified network name is no longer available
    NetworkNameDeleted = 0xC00000C9,
    /// Directory not empty
    DirectoryNotEmpty = 0xC0000101,
    /// Not a directory
    NotADirectory = 0xC0000103,
    /// The file cannot be deleted
    CannotDelete = 0xC0000121,
    /// Invalid info level
    InvalidLevel = 0xC0000148,
    /// The file is not a reparse point
    NotAReparsePoint = 0xC0000275,
    /// Status the library does not model
    Unknown = 0xFFFFFFFF,
}

impl TryFrom<u32> for NtStatus {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(NtStatus::Success),
            0x80000005 => Ok(NtStatus::BufferOverflow),
            0x80000006 => Ok(NtStatus::NoMoreFiles),
            0xC0000002 => Ok(NtStatus::NotImplemented),
            0xC0000003 => Ok(NtStatus::InvalidInfoClass),
            0xC0000008 => Ok(NtStatus::InvalidHandle),
            0xC000000D => Ok(NtStatus::InvalidParameter),
            0xC000000F => Ok(NtStatus::NoSuchFile),
            0xC0000022 => Ok(NtStatus::AccessDenied),
            0xC0000023 => Ok(NtStatus::BufferTooSmall),
            0xC0000033 => Ok(NtStatus::ObjectNameInvalid),
            0xC0000034 => Ok(NtStatus::ObjectNameNotFound),
            0xC0000035 => Ok(NtStatus::ObjectNameCollision),
            0xC000003A => Ok(NtStatus::ObjectPathNotFound),
            0xC0000043 => Ok(NtStatus::SharingViolation),
            0xC0000044 => Ok(NtStatus::QuotaExceeded),
            0xC0000054 => Ok(NtStatus::LockNotGranted),
            0xC0000055 => Ok(NtStatus::FileLockConflict),
            0xC0000056 => Ok(NtStatus::DeletePending),
            0xC0000061 => Ok(NtStatus::PrivilegeNotHeld),
            0xC000007E => Ok(NtStatus::RangeNotLocked),
            0xC000007F => Ok(NtStatus::DiskFull),
            0xC00000BA => Ok(NtStatus::FileIsADirectory),
            0xC00000BB => Ok(NtStatus::NotSupported),
            0xC00000C9 => Ok(NtStatus::NetworkNameDeleted),
            0xC0000101 => Ok(NtStatus::DirectoryNotEmpty),
            0xC0000103 => Ok(NtStatus::NotADirectory),
            0xC0000121 => Ok(NtStatus::CannotDelete),
            0xC0000148 => Ok(NtStatus::InvalidLevel),
            0xC0000275 => Ok(NtStatus::NotAReparsePoint),
            _ => Err(()),
        }
    }
}

impl NtStatus {
    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        (self as u32) & 0xC0000000 == 0xC0000000
    }

    /// Check if this is a warning status
    pub fn is_warning(self) -> bool {
        (self as u32) & 0x80000000 == 0x80000000 && !self.is_error()
    }

    /// Create from a raw u32 value
    pub fn from_u32(value: u32) -> Self {
        value.try_into().unwrap_or(NtStatus::Unknown)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NtStatus::Success => "Success",
            NtStatus::BufferOverflow => "Buffer overflow",
            NtStatus::NoMoreFiles => "No more files",
            NtStatus::NotImplemented => "Not implemented",
            NtStatus::InvalidInfoClass => "Invalid info class",
            NtStatus::InvalidHandle => "Invalid handle",
            NtStatus::InvalidParameter => "Invalid parameter",
            NtStatus::NoSuchFile => "No such file",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::BufferTooSmall => "Buffer too small",
            NtStatus::ObjectNameInvalid => "Object name invalid",
            NtStatus::ObjectNameNotFound => "Object name not found",
            NtStatus::ObjectNameCollision => "Object name collision",
            NtStatus::ObjectPathNotFound => "Object path not found",
            NtStatus::SharingViolation => "Sharing violation",
            NtStatus::QuotaExceeded => "Quota exceeded",
            NtStatus::LockNotGranted => "Lock not granted",
            NtStatus::FileLockConflict => "File lock conflict",
            NtStatus::DeletePending => "Delete pending",
            NtStatus::PrivilegeNotHeld => "Privilege not held",
            NtStatus::RangeNotLocked => "Range not locked",
            NtStatus::DiskFull => "Disk full",
            NtStatus::FileIsADirectory => "File is a directory",
            NtStatus::NotSupported => "Not supported",
            NtStatus::NetworkNameDeleted => "Network name deleted",
            NtStatus::DirectoryNotEmpty => "Directory not empty",
            NtStatus::NotADirectory => "Not a directory",
            NtStatus::CannotDelete => "Cannot delete",
            NtStatus::InvalidLevel => "Invalid level",
            NtStatus::NotAReparsePoint => "Not a reparse point",
            NtStatus::Unknown => "Unknown status",
        };
        write!(f, "{} (0x{:08X})", msg, *self as u32)
    }
}
