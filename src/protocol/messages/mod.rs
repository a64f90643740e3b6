//! SMB1 message bodies organized by category

pub mod common;
pub mod directory;
pub mod file_ops;
pub mod fs_info;
pub mod info;
pub mod ioctl;
pub mod legacy;
pub mod lock;
pub mod security;

// Re-export commonly used types
pub use common::{Fid, SmbMessage, TransRequest, TransResponse};
pub use directory::{
    FindClose2Request, FindEntry, FindFirst2Params, FindLevel, FindNext2Params,
    FindResponseParams,
};
pub use file_ops::{CloseRequest, NtCreateRequest, NtCreateResponse};
pub use file_ops::{ReadRequest, ReadResponse, WriteRequest, WriteResponse};
pub use fs_info::{FsAttributeInfo, QueryFsInfoParams, UnixInfo, WhoAmI};
pub use info::{FileInfoParams, PathInfoParams, RenameInformation, StreamEntry};
pub use ioctl::{IoctlSetup, SymlinkReparseBuffer};
pub use legacy::{DeleteRequest, QueryInformationRequest, RenameRequest};
pub use lock::{LockRange, LockingRequest};
pub use security::{Ace, Acl, SecurityDescParams, SecurityDescriptor, Sid};
