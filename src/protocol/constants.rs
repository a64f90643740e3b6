//! SMB1/CIFS protocol constants

use bitflags::bitflags;
use std::convert::TryFrom;

/// SMB1 magic as bytes
pub const SMB1_MAGIC: [u8; 4] = [0xFF, b'S', b'M', b'B'];

/// SMB1 header size
pub const SMB1_HEADER_SIZE: usize = 32;

/// Default transmit budget when the negotiated value is unknown
pub const DEFAULT_TRANSMIT_MAX: u32 = 16644;

/// SMB1 commands used by the operation library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SmbCommand {
    Close = 0x04,
    Delete = 0x06,
    Rename = 0x07,
    QueryInformation = 0x08,
    LockingAndX = 0x24,
    ReadAndX = 0x2E,
    WriteAndX = 0x2F,
    Transaction2 = 0x32,
    FindClose2 = 0x34,
    NtTransact = 0xA0,
    NtCreateAndX = 0xA2,
}

impl TryFrom<u8> for SmbCommand {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x04 => Ok(Self::Close),
            0x06 => Ok(Self::Delete),
            0x07 => Ok(Self::Rename),
            0x08 => Ok(Self::QueryInformation),
            0x24 => Ok(Self::LockingAndX),
            0x2E => Ok(Self::ReadAndX),
            0x2F => Ok(Self::WriteAndX),
            0x32 => Ok(Self::Transaction2),
            0x34 => Ok(Self::FindClose2),
            0xA0 => Ok(Self::NtTransact),
            0xA2 => Ok(Self::NtCreateAndX),
            _ => Err(crate::Error::ParseError(format!(
                "Invalid SMB command: 0x{:02x}",
                value
            ))),
        }
    }
}

/// TRANSACTION2 subcommands
pub mod trans2 {
    pub const FIND_FIRST2: u16 = 0x0001;
    pub const FIND_NEXT2: u16 = 0x0002;
    pub const QUERY_FS_INFORMATION: u16 = 0x0003;
    pub const QUERY_PATH_INFORMATION: u16 = 0x0005;
    pub const SET_PATH_INFORMATION: u16 = 0x0006;
    pub const QUERY_FILE_INFORMATION: u16 = 0x0007;
    pub const SET_FILE_INFORMATION: u16 = 0x0008;
}

/// NT_TRANSACT functions
pub mod nt_transact {
    pub const IOCTL: u16 = 0x0002;
    pub const SET_SECURITY_DESC: u16 = 0x0003;
    pub const QUERY_SECURITY_DESC: u16 = 0x0006;
}

/// Info levels for QUERY/SET PATH/FILE information
pub mod info_level {
    pub const INFO_STANDARD: u16 = 0x0001;
    pub const QUERY_FILE_BASIC_INFO: u16 = 0x0101;
    pub const QUERY_FILE_ALL_INFO: u16 = 0x0107;
    pub const QUERY_FILE_STREAM_INFO: u16 = 0x0109;
    pub const QUERY_FILE_UNIX_BASIC: u16 = 0x0200;
    pub const QUERY_FILE_UNIX_LINK: u16 = 0x0201;
    pub const SET_FILE_BASIC_INFO: u16 = 0x0101;
    pub const SET_FILE_DISPOSITION_INFO: u16 = 0x0102;
    pub const SET_FILE_END_OF_FILE_INFO: u16 = 0x0104;
    pub const SET_FILE_UNIX_BASIC: u16 = 0x0200;
    pub const SET_FILE_UNIX_LINK: u16 = 0x0201;
    pub const POSIX_PATH_UNLINK: u16 = 0x020A;
    /// Pass-through FileRenameInformation
    pub const SET_FILE_RENAME_INFORMATION: u16 = 0x03F2;
}

/// Info levels for FIND_FIRST2 / FIND_NEXT2
pub mod find_level {
    pub const INFO_STANDARD: u16 = 0x0001;
    pub const FIND_FILE_BOTH_DIRECTORY_INFO: u16 = 0x0104;
    pub const FIND_FILE_UNIX: u16 = 0x0202;
}

/// Info levels for QUERY_FS_INFORMATION
pub mod fs_level {
    pub const QUERY_FS_ATTRIBUTE_INFO: u16 = 0x0105;
    pub const QUERY_CIFS_UNIX_INFO: u16 = 0x0200;
    pub const QUERY_POSIX_WHOAMI: u16 = 0x0202;
}

/// FIND_FIRST2 / FIND_NEXT2 flags
pub mod find_flags {
    pub const CLOSE_AFTER_REQUEST: u16 = 0x0001;
    pub const CLOSE_AT_EOS: u16 = 0x0002;
    pub const RETURN_RESUME_KEYS: u16 = 0x0004;
    pub const CONTINUE_FROM_LAST: u16 = 0x0008;
}

/// Device control codes
pub mod fsctl {
    pub const SET_REPARSE_POINT: u32 = 0x000900A4;
    pub const GET_REPARSE_POINT: u32 = 0x000900A8;
}

/// Reparse tag of a symbolic link
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000000C;

/// SID of BUILTIN\Administrators, the default holder of the symlink privilege
pub const ADMINISTRATORS_SID: &str = "S-1-5-32-544";

/// Server file type reported by NT_CREATE_ANDX for disk files
pub const FILE_TYPE_DISK: u16 = 0x0000;

/// LOCKING_ANDX lock type bits
pub mod locking_type {
    pub const SHARED_LOCK: u8 = 0x01;
    pub const LARGE_FILES: u8 = 0x10;
}

bitflags! {
    /// DOS / extended file attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DosAttributes: u32 {
        const READONLY            = 0x00000001;
        const HIDDEN              = 0x00000002;
        const SYSTEM              = 0x00000004;
        const DIRECTORY           = 0x00000010;
        const ARCHIVE             = 0x00000020;
        const NORMAL              = 0x00000080;
        const TEMPORARY           = 0x00000100;
        const SPARSE_FILE         = 0x00000200;
        const REPARSE_POINT       = 0x00000400;
        const COMPRESSED          = 0x00000800;
        const OFFLINE             = 0x00001000;
        const NOT_CONTENT_INDEXED = 0x00002000;
        const ENCRYPTED           = 0x00004000;
    }
}

bitflags! {
    /// File access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DesiredAccess: u32 {
        const DELETE                   = 0x00010000;
        const READ_CONTROL             = 0x00020000;
        const WRITE_DAC                = 0x00040000;
        const WRITE_OWNER              = 0x00080000;
        const SYNCHRONIZE              = 0x00100000;
        const ACCESS_SYSTEM_SECURITY   = 0x01000000;

        const FILE_READ_DATA           = 0x00000001;
        const FILE_WRITE_DATA          = 0x00000002;
        const FILE_APPEND_DATA         = 0x00000004;
        const FILE_READ_EA             = 0x00000008;
        const FILE_WRITE_EA            = 0x00000010;
        const FILE_EXECUTE             = 0x00000020;
        const FILE_DELETE_CHILD        = 0x00000040;
        const FILE_READ_ATTRIBUTES     = 0x00000080;
        const FILE_WRITE_ATTRIBUTES    = 0x00000100;

        const FILE_GENERIC_READ        = Self::SYNCHRONIZE.bits() |
                                         Self::FILE_READ_DATA.bits() |
                                         Self::FILE_READ_ATTRIBUTES.bits() |
                                         Self::FILE_READ_EA.bits() |
                                         Self::READ_CONTROL.bits();

        const FILE_GENERIC_WRITE       = Self::SYNCHRONIZE.bits() |
                                         Self::FILE_WRITE_DATA.bits() |
                                         Self::FILE_WRITE_ATTRIBUTES.bits() |
                                         Self::FILE_WRITE_EA.bits() |
                                         Self::FILE_APPEND_DATA.bits() |
                                         Self::READ_CONTROL.bits();

        const FILE_ALL_ACCESS          = 0x001F01FF;
    }
}

bitflags! {
    /// File share access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShareAccess: u32 {
        const FILE_SHARE_READ   = 0x00000001;
        const FILE_SHARE_WRITE  = 0x00000002;
        const FILE_SHARE_DELETE = 0x00000004;
        const FILE_SHARE_ALL    = 0x00000007;
    }
}

impl ShareAccess {
    /// A share mode that denies something to other opens
    pub fn is_deny_mode(self) -> bool {
        !self.contains(ShareAccess::FILE_SHARE_READ | ShareAccess::FILE_SHARE_WRITE)
    }
}

/// Create disposition values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    /// If file exists, supersede. If file doesn't exist, create.
    SUPERSEDE = 0x00000000,
    /// If file exists, open. If file doesn't exist, fail.
    OPEN = 0x00000001,
    /// If file exists, fail. If file doesn't exist, create.
    CREATE = 0x00000002,
    /// If file exists, open. If file doesn't exist, create.
    OpenIf = 0x00000003,
    /// If file exists, overwrite. If file doesn't exist, fail.
    OVERWRITE = 0x00000004,
    /// If file exists, overwrite. If file doesn't exist, create.
    OverwriteIf = 0x00000005,
}

impl TryFrom<u32> for CreateDisposition {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(CreateDisposition::SUPERSEDE),
            0x00000001 => Ok(CreateDisposition::OPEN),
            0x00000002 => Ok(CreateDisposition::CREATE),
            0x00000003 => Ok(CreateDisposition::OpenIf),
            0x00000004 => Ok(CreateDisposition::OVERWRITE),
            0x00000005 => Ok(CreateDisposition::OverwriteIf),
            _ => Err(crate::Error::ParseError(format!(
                "Invalid create disposition: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// File create options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u32 {
        const FILE_DIRECTORY_FILE            = 0x00000001;
        const FILE_WRITE_THROUGH             = 0x00000002;
        const FILE_NON_DIRECTORY_FILE        = 0x00000040;
        const FILE_DELETE_ON_CLOSE           = 0x00001000;
        const FILE_OPEN_REPARSE_POINT        = 0x00200000;
    }
}

/// Create action values returned by the server
pub mod create_action {
    pub const SUPERSEDED: u32 = 0x00000000;
    pub const OPENED_EXISTING: u32 = 0x00000001;
    pub const CREATED: u32 = 0x00000002;
    pub const OVERWRITTEN: u32 = 0x00000003;
}

/// SMB1 dialects the client can end up speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dialect {
    /// Pre-NT dialect without NT info levels
    LanMan21,
    /// "NT LM 0.12"
    NtLm012,
}

bitflags! {
    /// Negotiated server capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServerCapabilities: u32 {
        const UNICODE            = 0x00000004;
        const LARGE_FILES        = 0x00000008;
        const NT_SMBS            = 0x00000010;
        const STATUS32           = 0x00000040;
        const NT_FIND            = 0x00000200;
        const INFOLEVEL_PASSTHRU = 0x00002000;
        const UNIX               = 0x00800000;
    }
}

bitflags! {
    /// CIFS UNIX extension capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnixCapabilities: u64 {
        const FCNTL_LOCKS          = 0x0001;
        const POSIX_ACLS           = 0x0002;
        const XATTR                = 0x0004;
        const EXTATTR              = 0x0008;
        const POSIX_PATHNAMES      = 0x0010;
        const POSIX_PATH_OPERATIONS = 0x0020;
        const LARGE_READ           = 0x0040;
        const LARGE_WRITE          = 0x0080;
    }
}

bitflags! {
    /// Filesystem attribute flags from QUERY_FS_ATTRIBUTE_INFO
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsAttributes: u32 {
        const CASE_SENSITIVE_SEARCH = 0x00000001;
        const CASE_PRESERVED_NAMES  = 0x00000002;
        const UNICODE_ON_DISK       = 0x00000004;
        const PERSISTENT_ACLS       = 0x00000008;
        const SUPPORTS_REPARSE_POINTS = 0x00000080;
        const NAMED_STREAMS         = 0x00040000;
    }
}

bitflags! {
    /// Security information selector for security descriptor get/set
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityInformation: u32 {
        const OWNER = 0x00000001;
        const GROUP = 0x00000002;
        const DACL  = 0x00000004;
        const SACL  = 0x00000008;
    }
}

bitflags! {
    /// Security descriptor control bits
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SecurityControl: u16 {
        const OWNER_DEFAULTED = 0x0001;
        const GROUP_DEFAULTED = 0x0002;
        const DACL_PRESENT    = 0x0004;
        const DACL_DEFAULTED  = 0x0008;
        const SACL_PRESENT    = 0x0010;
        const SACL_DEFAULTED  = 0x0020;
        const SELF_RELATIVE   = 0x8000;
    }
}
