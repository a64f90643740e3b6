//! CIFS share operations
//!
//! [`Share`] is the mount-wide context. It owns the request channel, the negotiated
//! capabilities, the node registry and the reconnect gate; every operation in the
//! submodules is a method on it.

mod delete;
mod enumeration;
mod handles;
mod locks;
mod lookup;
pub mod node;
mod reconnect;
mod security;
mod symlink;

pub use enumeration::{DirEntry, EnumerationContext};
pub use handles::{ByteRangeLock, Handle, TmpHandle};
pub use lookup::{FINDER_INFO_STREAM, RESOURCE_FORK_STREAM};
pub use node::{NodeRegistry, RemoteNode, ReopenState};
pub use reconnect::ReconnectGate;
pub use symlink::{decode_xsym, encode_xsym, SymlinkScheme, XSYM_FILE_SIZE, XSYM_MAX_TARGET};

use crate::attributes::InfoLevel;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{
    fs_level, nt_transact, trans2, Dialect, FsAttributes, ServerCapabilities, SmbCommand,
    UnixCapabilities, ADMINISTRATORS_SID, DEFAULT_TRANSMIT_MAX,
};
use crate::protocol::messages::{
    CloseRequest, Fid, FileInfoParams, FindLevel, FsAttributeInfo, IoctlSetup, NtCreateRequest,
    NtCreateResponse, PathInfoParams, QueryFsInfoParams, Sid, SmbMessage, TransRequest,
    TransResponse, UnixInfo, WhoAmI,
};
use crate::transport::{Channel, SessionInfo, SmbReply, SmbRequest};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mount-wide tuning
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// How long a metadata snapshot answers `getattr` without a round trip
    pub attr_cache_ttl: Duration,
    /// How long a symlink target is trusted
    pub symlink_cache_ttl: Duration,
    /// How long a stream stays known-missing
    pub stream_cache_ttl: Duration,
    /// Name prefix of files renamed away by [`Share::delete_open_file`]
    pub silly_rename_prefix: String,
    /// Retry a silly rename with SMB_COM_RENAME when the pass-through rename says not-found
    pub rename_not_found_workaround: bool,
    /// Permit reparse-point symlinks when the server and user allow them
    pub allow_reparse_symlinks: bool,
    /// Transmit budget used when the channel reports none
    pub default_transmit_max: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            attr_cache_ttl: Duration::from_secs(2),
            symlink_cache_ttl: Duration::from_secs(30),
            stream_cache_ttl: Duration::from_secs(30),
            silly_rename_prefix: String::from(".smbdelete"),
            rename_not_found_workaround: true,
            allow_reparse_symlinks: true,
            default_transmit_max: DEFAULT_TRANSMIT_MAX,
        }
    }
}

/// What the server and the mounted filesystem turned out to support
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub dialect: Dialect,
    pub server: ServerCapabilities,
    /// CIFS UNIX extension capabilities; `None` when the extensions are off
    pub unix: Option<UnixCapabilities>,
    pub fs_attributes: FsAttributes,
    pub transmit_max: u32,
    pub whoami: Option<WhoAmI>,
}

impl Capabilities {
    fn from_session(session: SessionInfo, default_transmit_max: u32) -> Self {
        Self {
            dialect: session.dialect,
            server: session.capabilities,
            unix: None,
            fs_attributes: FsAttributes::empty(),
            transmit_max: if session.transmit_max == 0 {
                default_transmit_max
            } else {
                session.transmit_max
            },
            whoami: None,
        }
    }

    pub fn unix_extensions(&self) -> bool {
        self.unix.is_some()
    }

    pub fn posix_path_operations(&self) -> bool {
        self.unix
            .map(|u| u.contains(UnixCapabilities::POSIX_PATH_OPERATIONS))
            .unwrap_or(false)
    }

    /// The server accepts NT pass-through info levels
    pub fn passthrough(&self) -> bool {
        self.server.contains(ServerCapabilities::INFOLEVEL_PASSTHRU)
    }

    pub fn reparse_points(&self) -> bool {
        self.fs_attributes
            .contains(FsAttributes::SUPPORTS_REPARSE_POINTS)
    }

    pub fn named_streams(&self) -> bool {
        self.fs_attributes.contains(FsAttributes::NAMED_STREAMS)
    }

    /// Listing level for this server
    pub fn find_level(&self) -> FindLevel {
        if self.unix_extensions() {
            FindLevel::Unix
        } else if self.dialect >= Dialect::NtLm012 {
            FindLevel::BothDirectory
        } else {
            FindLevel::Standard
        }
    }

    /// Metadata query level for this server
    pub fn info_level(&self) -> InfoLevel {
        if self.unix_extensions() {
            InfoLevel::UnixBasic
        } else if self.dialect >= Dialect::NtLm012 {
            InfoLevel::All
        } else {
            InfoLevel::LegacyStandard
        }
    }

    /// The connected user holds the right to create reparse-point symlinks
    pub fn can_create_reparse_symlinks(&self) -> bool {
        let admins: Sid = match ADMINISTRATORS_SID.parse() {
            Ok(sid) => sid,
            Err(_) => return false,
        };
        self.whoami
            .as_ref()
            .map(|who| who.has_sid(&admins))
            .unwrap_or(false)
    }
}

/// Decoded reply of a TRANSACTION2 or NT_TRANSACT request
///
/// Error replies are kept rather than turned into errors so callers can look at the
/// status (and at parameters like LengthNeeded) before deciding.
#[derive(Debug, Clone)]
pub(crate) struct TransReply {
    pub status: NtStatus,
    raw_status: u32,
    pub params: Vec<u8>,
    pub data: Vec<u8>,
    pub retransmitted: bool,
}

impl TransReply {
    pub fn is_error(&self) -> bool {
        self.raw_status & 0xC000_0000 == 0xC000_0000
    }

    pub fn check(self, context: &str) -> Result<Self> {
        if self.is_error() {
            return Err(Error::from_status(self.status, context));
        }
        Ok(self)
    }
}

/// One mounted share
pub struct Share {
    channel: Arc<dyn Channel>,
    config: ShareConfig,
    caps: RwLock<Capabilities>,
    nodes: NodeRegistry,
    gate: ReconnectGate,
    posix_unlink_disabled: AtomicBool,
    /// Set once the server refused a reparse symlink; survives rediscovery
    reparse_symlinks_disabled: AtomicBool,
    symlink_scheme: Mutex<SymlinkScheme>,
    next_slot: AtomicU64,
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("config", &self.config)
            .field("caps", &self.capabilities())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Share {
    /// Share over an established session; capabilities start from what the
    /// session negotiated until [`Share::discover_capabilities`] runs
    pub fn new(channel: Arc<dyn Channel>, config: ShareConfig) -> Self {
        let caps = Capabilities::from_session(channel.session_info(), config.default_transmit_max);
        Self {
            channel,
            config,
            caps: RwLock::new(caps),
            nodes: NodeRegistry::new(),
            gate: ReconnectGate::new(),
            posix_unlink_disabled: AtomicBool::new(false),
            reparse_symlinks_disabled: AtomicBool::new(false),
            symlink_scheme: Mutex::new(SymlinkScheme::LegacyEmbedded),
            next_slot: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn symlink_scheme(&self) -> SymlinkScheme {
        *self.symlink_scheme.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_symlink_scheme(&self, scheme: SymlinkScheme) {
        *self.symlink_scheme.lock().unwrap_or_else(|e| e.into_inner()) = scheme;
    }

    /// POSIX unlink is negotiated and has not been turned off for this share
    pub fn posix_unlink_available(&self) -> bool {
        self.capabilities().posix_path_operations()
            && !self.posix_unlink_disabled.load(Ordering::Relaxed)
    }

    pub(crate) fn disable_posix_unlink(&self) {
        if !self.posix_unlink_disabled.swap(true, Ordering::Relaxed) {
            info!("POSIX unlink unsupported, using legacy delete from now on");
        }
    }

    /// Fall back to symlink files for the rest of the mount
    pub(crate) fn disable_reparse_symlinks(&self) {
        self.reparse_symlinks_disabled.store(true, Ordering::Relaxed);
        self.set_symlink_scheme(SymlinkScheme::LegacyEmbedded);
    }

    pub(crate) fn transmit_max(&self) -> u32 {
        self.caps.read().unwrap_or_else(|e| e.into_inner()).transmit_max
    }

    pub(crate) fn next_slot(&self) -> u64 {
        self.next_slot.fetch_add(1, Ordering::Relaxed)
    }

    /// Query the filesystem and extension levels, then pick the symlink scheme
    ///
    /// Levels the server rejects are skipped; only transport failures abort.
    pub async fn discover_capabilities(&self) -> Result<Capabilities> {
        let mut caps = Capabilities::from_session(
            self.channel.session_info(),
            self.config.default_transmit_max,
        );

        match self.query_fs(fs_level::QUERY_FS_ATTRIBUTE_INFO).await {
            Ok(data) => {
                let info = FsAttributeInfo::parse(&data)?;
                debug!("filesystem {} attributes {:?}", info.fs_name, info.attributes);
                caps.fs_attributes = info.attributes;
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!("filesystem attribute query failed: {}", e),
        }

        if caps.server.contains(ServerCapabilities::UNIX) {
            match self.query_fs(fs_level::QUERY_CIFS_UNIX_INFO).await {
                Ok(data) => {
                    let info = UnixInfo::parse(&data)?;
                    debug!(
                        "UNIX extensions {}.{} capabilities {:?}",
                        info.major, info.minor, info.capabilities
                    );
                    caps.unix = Some(info.capabilities);
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => debug!("UNIX extensions unavailable: {}", e),
            }
        }

        if caps.unix_extensions() || caps.reparse_points() {
            match self.query_fs(fs_level::QUERY_POSIX_WHOAMI).await {
                Ok(data) => caps.whoami = Some(WhoAmI::parse(&data)?),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => debug!("who-am-I unavailable: {}", e),
            }
        }

        let scheme = if caps.posix_path_operations() {
            SymlinkScheme::Unix
        } else if self.config.allow_reparse_symlinks
            && !self.reparse_symlinks_disabled.load(Ordering::Relaxed)
            && caps.reparse_points()
            && caps.can_create_reparse_symlinks()
        {
            SymlinkScheme::Reparse
        } else {
            SymlinkScheme::LegacyEmbedded
        };
        info!("share capabilities settled, symlinks use {:?}", scheme);

        *self.caps.write().unwrap_or_else(|e| e.into_inner()) = caps.clone();
        self.set_symlink_scheme(scheme);
        Ok(caps)
    }

    async fn query_fs(&self, level: u16) -> Result<Vec<u8>> {
        let params = QueryFsInfoParams { level }.serialize()?;
        let reply = self
            .trans2(trans2::QUERY_FS_INFORMATION, params, Vec::new())
            .await?
            .check("query filesystem information")?;
        Ok(reply.data)
    }

    /// Send one request once the reconnect gate is open
    pub(crate) async fn call(&self, request: SmbRequest) -> Result<SmbReply> {
        self.gate.wait().await;
        let command = request.command();
        let reply = self.channel.transact(request).await?;
        debug!("{:?} -> {}", command, reply.status());
        Ok(reply)
    }

    async fn transact(&self, command: SmbCommand, request: TransRequest) -> Result<TransReply> {
        let reply = self
            .call(SmbRequest::new(command, request.serialize()?))
            .await?;
        let raw_status = reply.header.status;
        let failed = raw_status & 0xC000_0000 == 0xC000_0000;
        let body = if reply.body.is_empty() {
            TransResponse::default()
        } else {
            match TransResponse::parse(&reply.body) {
                Ok(body) => body,
                // error replies may carry a partial body; the status is what matters
                Err(_) if failed => TransResponse::default(),
                Err(e) => return Err(e),
            }
        };
        Ok(TransReply {
            status: reply.status(),
            raw_status,
            params: body.params,
            data: body.data,
            retransmitted: reply.retransmitted,
        })
    }

    pub(crate) async fn trans2(
        &self,
        subcommand: u16,
        params: Vec<u8>,
        data: Vec<u8>,
    ) -> Result<TransReply> {
        let request = TransRequest::new(subcommand, params, data, self.transmit_max());
        self.transact(SmbCommand::Transaction2, request).await
    }

    pub(crate) async fn nt_transact(&self, request: TransRequest) -> Result<TransReply> {
        self.transact(SmbCommand::NtTransact, request).await
    }

    /// FSCTL on an open fid; returns the output data
    pub(crate) async fn fsctl(&self, fid: Fid, code: u32, input: Vec<u8>) -> Result<Vec<u8>> {
        let setup = IoctlSetup::fsctl(code, fid).serialize()?;
        let request = TransRequest::new(nt_transact::IOCTL, Vec::new(), input, self.transmit_max())
            .with_setup(setup);
        let reply = self
            .nt_transact(request)
            .await?
            .check(&format!("fsctl 0x{:08x}", code))?;
        Ok(reply.data)
    }

    pub(crate) async fn nt_create(&self, request: NtCreateRequest) -> Result<NtCreateResponse> {
        let body = self
            .call(SmbRequest::new(SmbCommand::NtCreateAndX, request.serialize()?))
            .await?
            .into_result(&request.file_name)?;
        NtCreateResponse::parse(&body)
    }

    /// Close a server fid; a vanished connection already closed it
    pub(crate) async fn close_fid(&self, fid: Fid) -> Result<()> {
        let request = CloseRequest {
            fid,
            last_write_time: 0,
        };
        match self
            .call(SmbRequest::new(SmbCommand::Close, request.serialize()?))
            .await
        {
            Ok(reply) => reply.into_result("close").map(|_| ()),
            Err(e) if e.is_transport() => {
                debug!("close of fid {} during {}", fid.0, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn query_path_raw(&self, path: &str, level: u16) -> Result<Vec<u8>> {
        let params = PathInfoParams {
            level,
            path: path.to_string(),
        }
        .serialize()?;
        let reply = self
            .trans2(trans2::QUERY_PATH_INFORMATION, params, Vec::new())
            .await?
            .check(path)?;
        Ok(reply.data)
    }

    pub(crate) async fn query_file_raw(&self, fid: Fid, level: u16) -> Result<Vec<u8>> {
        let params = FileInfoParams { fid, level }.serialize()?;
        let reply = self
            .trans2(trans2::QUERY_FILE_INFORMATION, params, Vec::new())
            .await?
            .check("query file information")?;
        Ok(reply.data)
    }

    pub(crate) async fn set_path_info(&self, path: &str, level: u16, data: Vec<u8>) -> Result<()> {
        let params = PathInfoParams {
            level,
            path: path.to_string(),
        }
        .serialize()?;
        self.trans2(trans2::SET_PATH_INFORMATION, params, data)
            .await?
            .check(path)?;
        Ok(())
    }

    pub(crate) async fn set_file_info(&self, fid: Fid, level: u16, data: Vec<u8>) -> Result<()> {
        let params = FileInfoParams { fid, level }.serialize()?;
        self.trans2(trans2::SET_FILE_INFORMATION, params, data)
            .await?
            .check("set file information")?;
        Ok(())
    }
}
