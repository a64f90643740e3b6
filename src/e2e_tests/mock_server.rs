//! In-memory SMB1 server behind the [`Channel`] trait
//!
//! Keeps a flat map of paths to files and answers the commands the client library
//! sends. Server quirks the client has to cope with are switched on through
//! [`MockConfig`] or the runtime toggles on [`MockServer`].

use crate::attributes::{encode, FileAttributes, FileKind, InfoLevel, UnixMetadata, UnixSetInfo};
use crate::client::node::{file_name, join, parent, ROOT};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::codec::{datetime_to_nt_time, nt_time_to_datetime, WireReader};
use crate::protocol::constants::{
    create_action, find_flags, fs_level, fsctl, info_level, nt_transact, trans2,
    CreateDisposition, CreateOptions, Dialect, DosAttributes, FsAttributes,
    ServerCapabilities, SmbCommand, UnixCapabilities, DEFAULT_TRANSMIT_MAX, FILE_TYPE_DISK,
};
use crate::protocol::messages::directory::encode_entries;
use crate::protocol::messages::info::{encode_stream_info, parse_unix_link_data, unix_link_data};
use crate::protocol::messages::{
    CloseRequest, DeleteRequest, Fid, FileInfoParams, FindClose2Request, FindEntry,
    FindFirst2Params, FindLevel, FindNext2Params, FindResponseParams, FsAttributeInfo,
    IoctlSetup, LockingRequest, NtCreateRequest, NtCreateResponse, PathInfoParams,
    QueryFsInfoParams, QueryInformationRequest, ReadRequest, ReadResponse, RenameInformation,
    RenameRequest, SecurityDescParams, SecurityDescriptor, Sid, SmbMessage, StreamEntry,
    TransRequest, TransResponse, UnixInfo, WhoAmI, WriteRequest, WriteResponse,
};
use crate::transport::{Channel, SessionInfo, SmbReply, SmbRequest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Server behavior fixed for the life of the mock
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub dialect: Dialect,
    pub transmit_max: u32,
    /// CIFS UNIX extensions with POSIX path operations
    pub unix: bool,
    /// SMB_POSIX_PATH_UNLINK actually works
    pub posix_unlink: bool,
    pub passthrough: bool,
    pub reparse_points: bool,
    pub named_streams: bool,
    /// SIDs reported by who-am-I; `None` rejects the query
    pub whoami_sids: Option<Vec<Sid>>,
    /// FSCTL_SET_REPARSE_POINT is refused
    pub reparse_denied: bool,
    /// Entries per find reply regardless of the requested count
    pub page_size: usize,
    /// FIND_NEXT2 positions by resume name instead of resume key
    pub resume_by_name: bool,
    /// The pass-through rename answers not-found
    pub rename_info_not_found: bool,
    /// SET_FILE_DISPOSITION_INFO is refused
    pub refuse_disposition: bool,
    /// The first FIND_NEXT2 reply claims entries but carries no data
    pub empty_payload_bug: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::NtLm012,
            transmit_max: DEFAULT_TRANSMIT_MAX,
            unix: false,
            posix_unlink: true,
            passthrough: true,
            reparse_points: false,
            named_streams: false,
            whoami_sids: None,
            reparse_denied: false,
            page_size: usize::MAX,
            resume_by_name: false,
            rename_info_not_found: false,
            refuse_disposition: false,
            empty_payload_bug: false,
        }
    }
}

/// One file or directory on the mock share
#[derive(Debug, Clone)]
pub struct MockFile {
    pub attrs: FileAttributes,
    pub data: Vec<u8>,
    /// Target of a UNIX extension symlink
    pub link_target: Option<String>,
    /// Reparse buffer stored by FSCTL_SET_REPARSE_POINT
    pub reparse: Option<Vec<u8>>,
    pub security: Option<SecurityDescriptor>,
    /// Named streams besides the default data stream
    pub streams: Vec<String>,
}

impl MockFile {
    fn new(kind: FileKind, unique_id: u64) -> Self {
        let mut attrs = FileAttributes::new(kind);
        let base = base_time();
        attrs.create_time = base;
        attrs.access_time = base;
        attrs.write_time = base;
        attrs.change_time = base;
        attrs.dos_attributes = match kind {
            FileKind::Directory => DosAttributes::DIRECTORY,
            _ => DosAttributes::ARCHIVE,
        };
        attrs.unix = Some(UnixMetadata {
            mode: if kind == FileKind::Directory { 0o755 } else { 0o644 },
            uid: 1000,
            gid: 1000,
            nlinks: 1,
            unique_id,
        });
        Self {
            attrs,
            data: Vec::new(),
            link_target: None,
            reparse: None,
            security: None,
            streams: Vec::new(),
        }
    }

    fn set_data(&mut self, data: Vec<u8>) {
        self.attrs.size = data.len() as u64;
        self.attrs.allocation_size = (data.len() as u64 + 4095) & !4095;
        self.data = data;
    }

    fn set_reparse(&mut self, buffer: Vec<u8>) {
        let tag = buffer
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0);
        self.attrs.reparse_tag = tag;
        self.attrs.dos_attributes.insert(DosAttributes::REPARSE_POINT);
        self.reparse = Some(buffer);
    }

    pub fn is_dir(&self) -> bool {
        self.attrs.is_dir()
    }

    pub fn mode(&self) -> u32 {
        self.attrs.unix.map(|u| u.mode).unwrap_or(0)
    }
}

/// Timestamp every new file starts with
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
}

/// One request as the server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logged {
    pub command: SmbCommand,
    /// TRANS2 / NT_TRANSACT subcommand
    pub function: Option<u16>,
    pub level: Option<u16>,
    pub pid: u32,
}

#[derive(Debug, Clone)]
struct OpenFid {
    path: String,
    delete_on_close: bool,
}

#[derive(Debug, Clone)]
struct HeldLock {
    path: String,
    fid: u16,
    pid: u16,
    offset: u64,
    length: u64,
    shared: bool,
}

impl HeldLock {
    fn overlaps(&self, offset: u64, length: u64) -> bool {
        offset < self.offset.saturating_add(self.length) && self.offset < offset.saturating_add(length)
    }
}

#[derive(Debug)]
struct Search {
    level: FindLevel,
    entries: Vec<FindEntry>,
    position: usize,
}

impl Search {
    fn take_page(&mut self, requested: u16, page_size: usize) -> (Vec<FindEntry>, bool) {
        let n = (requested as usize)
            .min(page_size)
            .min(self.entries.len() - self.position);
        let page = self.entries[self.position..self.position + n].to_vec();
        self.position += n;
        (page, self.position >= self.entries.len())
    }
}

/// A failed request: the status plus any response parameters that go with it
#[derive(Debug)]
struct Failure {
    status: NtStatus,
    params: Vec<u8>,
}

impl From<NtStatus> for Failure {
    fn from(status: NtStatus) -> Self {
        Self {
            status,
            params: Vec::new(),
        }
    }
}

impl From<Error> for Failure {
    fn from(_: Error) -> Self {
        NtStatus::InvalidParameter.into()
    }
}

type Handled<T> = std::result::Result<T, Failure>;

#[derive(Debug)]
struct ServerState {
    files: BTreeMap<String, MockFile>,
    fids: HashMap<u16, OpenFid>,
    next_fid: u16,
    searches: HashMap<u16, Search>,
    next_sid: u16,
    locks: Vec<HeldLock>,
    next_unique_id: u64,
    connected: bool,
    lose_next_rename_reply: bool,
    payload_bug_armed: bool,
    log: Vec<Logged>,
    resumes: Vec<(u32, String)>,
}

/// Scriptable in-memory server
#[derive(Debug)]
pub struct MockServer {
    config: MockConfig,
    state: Mutex<ServerState>,
}

impl MockServer {
    pub fn new(config: MockConfig) -> Self {
        let mut files = BTreeMap::new();
        files.insert(ROOT.to_string(), MockFile::new(FileKind::Directory, 1));
        let payload_bug_armed = config.empty_payload_bug;
        Self {
            config,
            state: Mutex::new(ServerState {
                files,
                fids: HashMap::new(),
                next_fid: 1,
                searches: HashMap::new(),
                next_sid: 1,
                locks: Vec::new(),
                next_unique_id: 2,
                connected: true,
                lose_next_rename_reply: false,
                payload_bug_armed,
                log: Vec::new(),
                resumes: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.state();
        let file = state.new_file(FileKind::Directory);
        state.files.insert(path.to_string(), file);
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let mut state = self.state();
        let mut file = state.new_file(FileKind::Regular);
        file.set_data(data.to_vec());
        state.files.insert(path.to_string(), file);
    }

    pub fn file(&self, path: &str) -> Option<MockFile> {
        self.state().files.get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    /// Paths directly inside `dir`
    pub fn children(&self, dir: &str) -> Vec<String> {
        self.state().children(dir)
    }

    /// Change a file behind the client's back
    pub fn touch(&self, path: &str, data: &[u8]) {
        let mut state = self.state();
        if let Some(file) = state.files.get_mut(path) {
            file.set_data(data.to_vec());
            file.attrs.write_time = file.attrs.write_time + Duration::minutes(1);
        }
    }

    pub fn set_mode(&self, path: &str, mode: u32) {
        let mut state = self.state();
        if let Some(unix) = state.files.get_mut(path).and_then(|f| f.attrs.unix.as_mut()) {
            unix.mode = mode;
        }
    }

    pub fn set_security(&self, path: &str, descriptor: SecurityDescriptor) {
        if let Some(file) = self.state().files.get_mut(path) {
            file.security = Some(descriptor);
        }
    }

    /// Store a raw reparse buffer on an existing file
    pub fn set_reparse(&self, path: &str, buffer: &[u8]) {
        if let Some(file) = self.state().files.get_mut(path) {
            file.set_reparse(buffer.to_vec());
        }
    }

    pub fn set_streams(&self, path: &str, streams: &[&str]) {
        if let Some(file) = self.state().files.get_mut(path) {
            file.streams = streams.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Forget the session: fids, searches and locks vanish and requests fail
    pub fn drop_connection(&self) {
        let mut state = self.state();
        state.connected = false;
        state.fids.clear();
        state.searches.clear();
        state.locks.clear();
    }

    pub fn restore_connection(&self) {
        self.state().connected = true;
    }

    /// Perform the next rename but answer as if the reply was lost and the request
    /// resent
    pub fn lose_next_rename_reply(&self) {
        self.state().lose_next_rename_reply = true;
    }

    pub fn open_fids(&self) -> usize {
        self.state().fids.len()
    }

    pub fn open_searches(&self) -> usize {
        self.state().searches.len()
    }

    pub fn held_locks(&self, path: &str) -> usize {
        self.state().locks.iter().filter(|l| l.path == path).count()
    }

    pub fn requests(&self) -> Vec<Logged> {
        self.state().log.clone()
    }

    pub fn count(&self, command: SmbCommand) -> usize {
        self.state().log.iter().filter(|l| l.command == command).count()
    }

    /// Requests of a TRANS2 subcommand, optionally at one level
    pub fn count_trans2(&self, function: u16, level: Option<u16>) -> usize {
        self.state()
            .log
            .iter()
            .filter(|l| l.command == SmbCommand::Transaction2 && l.function == Some(function))
            .filter(|l| level.is_none() || l.level == level)
            .count()
    }

    /// Resume key and name of every FIND_NEXT2 received
    pub fn find_next_resumes(&self) -> Vec<(u32, String)> {
        self.state().resumes.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }
}

#[async_trait]
impl Channel for MockServer {
    async fn transact(&self, request: SmbRequest) -> Result<SmbReply> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        let command = request.command();
        let mut retransmitted = false;
        if command == SmbCommand::Rename && state.lose_next_rename_reply {
            state.lose_next_rename_reply = false;
            // the first copy does the work; its reply never arrives
            let _ = state.dispatch(&self.config, &request);
            retransmitted = true;
        }
        let mut reply = match state.dispatch(&self.config, &request) {
            Ok(body) => SmbReply::new(command, NtStatus::Success, body),
            Err(failure) => {
                let body = if failure.params.is_empty() {
                    Vec::new()
                } else {
                    TransResponse {
                        params: failure.params,
                        data: Vec::new(),
                    }
                    .serialize()?
                };
                SmbReply::new(command, failure.status, body)
            }
        };
        reply.retransmitted = retransmitted;
        Ok(reply)
    }

    fn session_info(&self) -> SessionInfo {
        let mut capabilities = SessionInfo::default().capabilities;
        if self.config.unix {
            capabilities |= ServerCapabilities::UNIX;
        }
        if self.config.passthrough {
            capabilities |= ServerCapabilities::INFOLEVEL_PASSTHRU;
        }
        SessionInfo {
            dialect: self.config.dialect,
            capabilities,
            transmit_max: self.config.transmit_max,
        }
    }
}

impl ServerState {
    fn new_file(&mut self, kind: FileKind) -> MockFile {
        self.next_unique_id += 1;
        MockFile::new(kind, self.next_unique_id)
    }

    fn children(&self, dir: &str) -> Vec<String> {
        self.files
            .keys()
            .filter(|p| p.as_str() != ROOT && parent(p) == dir)
            .cloned()
            .collect()
    }

    fn note(&mut self, function: u16, level: Option<u16>) {
        if let Some(entry) = self.log.last_mut() {
            entry.function = Some(function);
            entry.level = level;
        }
    }

    fn fid_path(&self, fid: Fid) -> Handled<String> {
        self.fids
            .get(&fid.0)
            .map(|open| open.path.clone())
            .ok_or_else(|| NtStatus::InvalidHandle.into())
    }

    fn file_mut(&mut self, path: &str) -> Handled<&mut MockFile> {
        self.files
            .get_mut(path)
            .ok_or_else(|| NtStatus::ObjectNameNotFound.into())
    }

    fn check_parent(&self, path: &str) -> Handled<()> {
        match self.files.get(parent(path)) {
            Some(dir) if dir.is_dir() => Ok(()),
            _ => Err(NtStatus::ObjectPathNotFound.into()),
        }
    }

    fn dispatch(&mut self, config: &MockConfig, request: &SmbRequest) -> Handled<Vec<u8>> {
        self.log.push(Logged {
            command: request.command(),
            function: None,
            level: None,
            pid: request.header.pid,
        });
        let body = &request.body[..];
        match request.command() {
            SmbCommand::NtCreateAndX => self.nt_create(NtCreateRequest::parse(body)?),
            SmbCommand::Close => self.close(CloseRequest::parse(body)?.fid),
            SmbCommand::ReadAndX => self.read(ReadRequest::parse(body)?),
            SmbCommand::WriteAndX => self.write(WriteRequest::parse(body)?),
            SmbCommand::LockingAndX => self.locking(LockingRequest::parse(body)?),
            SmbCommand::Transaction2 => {
                let response = self.trans2(config, &TransRequest::parse(body)?)?;
                Ok(response.serialize()?)
            }
            SmbCommand::NtTransact => {
                let response = self.nt_transact(config, &TransRequest::parse(body)?)?;
                Ok(response.serialize()?)
            }
            SmbCommand::FindClose2 => {
                let request = FindClose2Request::parse(body)?;
                self.searches
                    .remove(&request.sid)
                    .ok_or(NtStatus::InvalidHandle)?;
                Ok(Vec::new())
            }
            SmbCommand::Delete => self.delete(DeleteRequest::parse(body)?),
            SmbCommand::Rename => {
                let request = RenameRequest::parse(body)?;
                self.move_path(&request.old_name, &request.new_name, false)?;
                Ok(Vec::new())
            }
            SmbCommand::QueryInformation => {
                let request = QueryInformationRequest::parse(body)?;
                let file = self
                    .files
                    .get(&request.file_name)
                    .ok_or(NtStatus::ObjectNameNotFound)?;
                Ok(encode(InfoLevel::LegacyStandard, &file.attrs)?)
            }
            _ => Err(NtStatus::NotImplemented.into()),
        }
    }

    fn nt_create(&mut self, request: NtCreateRequest) -> Handled<Vec<u8>> {
        let path = request.file_name.clone();
        let want_dir = request
            .create_options
            .contains(CreateOptions::FILE_DIRECTORY_FILE);
        let action = match (self.files.get(&path), request.create_disposition) {
            (Some(_), CreateDisposition::CREATE) => {
                return Err(NtStatus::ObjectNameCollision.into())
            }
            (Some(file), _) if file.attrs.delete_pending => {
                return Err(NtStatus::DeletePending.into())
            }
            (Some(file), _) if want_dir && !file.is_dir() => {
                return Err(NtStatus::NotADirectory.into())
            }
            (Some(file), _)
                if file.is_dir()
                    && request
                        .create_options
                        .contains(CreateOptions::FILE_NON_DIRECTORY_FILE) =>
            {
                return Err(NtStatus::FileIsADirectory.into())
            }
            (Some(_), CreateDisposition::OPEN | CreateDisposition::OpenIf) => {
                create_action::OPENED_EXISTING
            }
            (Some(_), _) => {
                let file = self.file_mut(&path)?;
                file.set_data(Vec::new());
                file.reparse = None;
                file.attrs.reparse_tag = 0;
                file.attrs.dos_attributes.remove(DosAttributes::REPARSE_POINT);
                create_action::OVERWRITTEN
            }
            (None, CreateDisposition::OPEN | CreateDisposition::OVERWRITE) => {
                return Err(NtStatus::ObjectNameNotFound.into())
            }
            (None, _) => {
                self.check_parent(&path)?;
                let kind = if want_dir {
                    FileKind::Directory
                } else {
                    FileKind::Regular
                };
                let file = self.new_file(kind);
                self.files.insert(path.clone(), file);
                create_action::CREATED
            }
        };

        let fid = self.next_fid;
        self.next_fid = self.next_fid.wrapping_add(1).max(1);
        self.fids.insert(
            fid,
            OpenFid {
                path: path.clone(),
                delete_on_close: request
                    .create_options
                    .contains(CreateOptions::FILE_DELETE_ON_CLOSE),
            },
        );

        let attrs = &self.file_mut(&path)?.attrs;
        let response = NtCreateResponse {
            oplock_level: 0,
            fid: Fid(fid),
            create_action: action,
            creation_time: datetime_to_nt_time(&attrs.create_time),
            last_access_time: datetime_to_nt_time(&attrs.access_time),
            last_write_time: datetime_to_nt_time(&attrs.write_time),
            change_time: datetime_to_nt_time(&attrs.change_time),
            file_attributes: if attrs.dos_attributes.is_empty() {
                DosAttributes::NORMAL
            } else {
                attrs.dos_attributes
            },
            allocation_size: attrs.allocation_size,
            end_of_file: attrs.size,
            file_type: FILE_TYPE_DISK,
            device_state: 0,
            directory: attrs.is_dir(),
        };
        Ok(response.serialize()?)
    }

    fn close(&mut self, fid: Fid) -> Handled<Vec<u8>> {
        let open = self.fids.remove(&fid.0).ok_or(NtStatus::InvalidHandle)?;
        self.locks.retain(|l| l.fid != fid.0);
        if open.delete_on_close {
            if let Some(file) = self.files.get_mut(&open.path) {
                file.attrs.delete_pending = true;
            }
        }
        let still_open = self.fids.values().any(|o| o.path == open.path);
        let pending = self
            .files
            .get(&open.path)
            .map(|f| f.attrs.delete_pending)
            .unwrap_or(false);
        if pending && !still_open {
            self.files.remove(&open.path);
        }
        Ok(Vec::new())
    }

    fn read(&mut self, request: ReadRequest) -> Handled<Vec<u8>> {
        let path = self.fid_path(request.fid)?;
        let file = self.file_mut(&path)?;
        let start = (request.offset as usize).min(file.data.len());
        let end = (start + request.max_count as usize).min(file.data.len());
        Ok(ReadResponse {
            data: file.data[start..end].to_vec(),
        }
        .serialize()?)
    }

    fn write(&mut self, request: WriteRequest) -> Handled<Vec<u8>> {
        let path = self.fid_path(request.fid)?;
        let file = self.file_mut(&path)?;
        let offset = request.offset as usize;
        let mut data = std::mem::take(&mut file.data);
        if data.len() < offset + request.data.len() {
            data.resize(offset + request.data.len(), 0);
        }
        data[offset..offset + request.data.len()].copy_from_slice(&request.data);
        file.set_data(data);
        Ok(WriteResponse {
            count: request.data.len() as u32,
        }
        .serialize()?)
    }

    fn locking(&mut self, request: LockingRequest) -> Handled<Vec<u8>> {
        let path = self.fid_path(request.fid)?;
        for range in &request.unlocks {
            let at = self
                .locks
                .iter()
                .position(|l| {
                    l.fid == request.fid.0
                        && l.pid == range.pid
                        && l.offset == range.offset
                        && l.length == range.length
                })
                .ok_or(NtStatus::RangeNotLocked)?;
            self.locks.remove(at);
        }
        let shared = request.is_shared();
        for range in &request.locks {
            let conflict = self.locks.iter().any(|l| {
                l.path == path
                    && l.overlaps(range.offset, range.length)
                    && !(l.shared && shared)
                    && !(l.fid == request.fid.0 && l.pid == range.pid)
            });
            if conflict {
                return Err(NtStatus::LockNotGranted.into());
            }
            self.locks.push(HeldLock {
                path: path.clone(),
                fid: request.fid.0,
                pid: range.pid,
                offset: range.offset,
                length: range.length,
                shared,
            });
        }
        Ok(Vec::new())
    }

    fn delete(&mut self, request: DeleteRequest) -> Handled<Vec<u8>> {
        let path = request.file_name;
        let file = self.files.get(&path).ok_or(NtStatus::ObjectNameNotFound)?;
        if file.is_dir() {
            return Err(NtStatus::FileIsADirectory.into());
        }
        if self.fids.values().any(|o| o.path == path) {
            return Err(NtStatus::SharingViolation.into());
        }
        self.files.remove(&path);
        Ok(Vec::new())
    }

    fn move_path(&mut self, old: &str, new: &str, replace: bool) -> Handled<()> {
        if !self.files.contains_key(old) {
            return Err(NtStatus::ObjectNameNotFound.into());
        }
        if self.files.contains_key(new) && !replace {
            return Err(NtStatus::ObjectNameCollision.into());
        }
        self.check_parent(new)?;

        let prefix = format!("{}\\", old);
        let moved: Vec<String> = self
            .files
            .keys()
            .filter(|p| p.as_str() == old || p.starts_with(&prefix))
            .cloned()
            .collect();
        let rename = |p: &str| format!("{}{}", new, &p[old.len()..]);
        for path in moved {
            if let Some(file) = self.files.remove(&path) {
                self.files.insert(rename(&path), file);
            }
        }
        for open in self.fids.values_mut() {
            if open.path == old || open.path.starts_with(&prefix) {
                open.path = rename(&open.path);
            }
        }
        for lock in &mut self.locks {
            if lock.path == old {
                lock.path = new.to_string();
            }
        }
        Ok(())
    }

    fn trans2(&mut self, config: &MockConfig, request: &TransRequest) -> Handled<TransResponse> {
        match request.function {
            trans2::QUERY_FS_INFORMATION => {
                let params = QueryFsInfoParams::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                Ok(TransResponse {
                    params: Vec::new(),
                    data: query_fs(config, params.level)?,
                })
            }
            trans2::QUERY_PATH_INFORMATION => {
                let params = PathInfoParams::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                let data = self.query_info(config, &params.path, params.level)?;
                Ok(TransResponse {
                    params: vec![0, 0],
                    data,
                })
            }
            trans2::QUERY_FILE_INFORMATION => {
                let params = FileInfoParams::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                let path = self.fid_path(params.fid)?;
                let data = self.query_info(config, &path, params.level)?;
                Ok(TransResponse {
                    params: vec![0, 0],
                    data,
                })
            }
            trans2::SET_PATH_INFORMATION => {
                let params = PathInfoParams::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                self.set_path_info(config, &params.path, params.level, &request.data)?;
                Ok(TransResponse::default())
            }
            trans2::SET_FILE_INFORMATION => {
                let params = FileInfoParams::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                self.set_file_info(config, params.fid, params.level, &request.data)?;
                Ok(TransResponse::default())
            }
            trans2::FIND_FIRST2 => {
                let params = FindFirst2Params::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                self.find_first(config, params)
            }
            trans2::FIND_NEXT2 => {
                let params = FindNext2Params::parse(&request.params)?;
                self.note(request.function, Some(params.level));
                self.find_next(config, params)
            }
            _ => Err(NtStatus::NotImplemented.into()),
        }
    }

    fn query_info(&self, config: &MockConfig, path: &str, level: u16) -> Handled<Vec<u8>> {
        let file = self.files.get(path).ok_or(NtStatus::ObjectNameNotFound)?;
        match level {
            info_level::QUERY_FILE_BASIC_INFO => Ok(encode(InfoLevel::Basic, &file.attrs)?),
            info_level::QUERY_FILE_ALL_INFO => Ok(encode(InfoLevel::All, &file.attrs)?),
            info_level::QUERY_FILE_UNIX_BASIC if config.unix => {
                Ok(encode(InfoLevel::UnixBasic, &file.attrs)?)
            }
            info_level::QUERY_FILE_UNIX_LINK if config.unix => match &file.link_target {
                Some(target) => Ok(unix_link_data(target)?),
                None => Err(NtStatus::InvalidParameter.into()),
            },
            info_level::QUERY_FILE_STREAM_INFO if config.named_streams => {
                let mut entries = vec![StreamEntry {
                    name: "::$DATA".into(),
                    size: file.attrs.size,
                    allocation_size: file.attrs.allocation_size,
                }];
                entries.extend(file.streams.iter().map(|s| StreamEntry {
                    name: format!(":{}:$DATA", s),
                    size: 0,
                    allocation_size: 0,
                }));
                Ok(encode_stream_info(&entries)?)
            }
            _ => Err(NtStatus::InvalidLevel.into()),
        }
    }

    fn set_path_info(
        &mut self,
        config: &MockConfig,
        path: &str,
        level: u16,
        data: &[u8],
    ) -> Handled<()> {
        match level {
            info_level::SET_FILE_BASIC_INFO => apply_basic(self.file_mut(path)?, data),
            info_level::SET_FILE_UNIX_BASIC if config.unix => {
                let info = UnixSetInfo::decode(data)?;
                let file = self.file_mut(path)?;
                if let Some(size) = info.size {
                    let mut bytes = std::mem::take(&mut file.data);
                    bytes.resize(size as usize, 0);
                    file.set_data(bytes);
                }
                if let Some(unix) = file.attrs.unix.as_mut() {
                    if let Some(mode) = info.mode {
                        unix.mode = mode;
                    }
                    if let Some(uid) = info.uid {
                        unix.uid = uid;
                    }
                    if let Some(gid) = info.gid {
                        unix.gid = gid;
                    }
                }
                if let Some(t) = info.write_time {
                    file.attrs.write_time = t;
                }
                Ok(())
            }
            info_level::SET_FILE_UNIX_LINK if config.unix => {
                let target = parse_unix_link_data(data)?;
                if self.files.contains_key(path) {
                    return Err(NtStatus::ObjectNameCollision.into());
                }
                self.check_parent(path)?;
                let mut file = self.new_file(FileKind::Symlink);
                file.attrs.size = target.len() as u64;
                file.link_target = Some(target);
                self.files.insert(path.to_string(), file);
                Ok(())
            }
            info_level::POSIX_PATH_UNLINK if config.unix => {
                if !config.posix_unlink {
                    return Err(NtStatus::NotSupported.into());
                }
                let file = self.files.get(path).ok_or(NtStatus::ObjectNameNotFound)?;
                if file.mode() & 0o200 == 0 {
                    return Err(NtStatus::CannotDelete.into());
                }
                if file.is_dir() && !self.children(path).is_empty() {
                    return Err(NtStatus::DirectoryNotEmpty.into());
                }
                self.files.remove(path);
                Ok(())
            }
            _ => Err(NtStatus::InvalidLevel.into()),
        }
    }

    fn set_file_info(
        &mut self,
        config: &MockConfig,
        fid: Fid,
        level: u16,
        data: &[u8],
    ) -> Handled<()> {
        let path = self.fid_path(fid)?;
        match level {
            info_level::SET_FILE_BASIC_INFO => apply_basic(self.file_mut(&path)?, data),
            info_level::SET_FILE_END_OF_FILE_INFO => {
                let size = WireReader::new(data).u64()?;
                let file = self.file_mut(&path)?;
                let mut bytes = std::mem::take(&mut file.data);
                bytes.resize(size as usize, 0);
                file.set_data(bytes);
                Ok(())
            }
            info_level::SET_FILE_DISPOSITION_INFO => {
                if config.refuse_disposition {
                    return Err(NtStatus::AccessDenied.into());
                }
                let pending = WireReader::new(data).u8()? != 0;
                if pending && !self.children(&path).is_empty() {
                    return Err(NtStatus::DirectoryNotEmpty.into());
                }
                self.file_mut(&path)?.attrs.delete_pending = pending;
                Ok(())
            }
            info_level::SET_FILE_RENAME_INFORMATION if config.passthrough => {
                if config.rename_info_not_found {
                    return Err(NtStatus::ObjectNameNotFound.into());
                }
                let info = RenameInformation::parse(data)?;
                let new_path = join(parent(&path), &info.file_name);
                self.move_path(&path, &new_path, info.replace_if_exists)
            }
            _ => Err(NtStatus::InvalidLevel.into()),
        }
    }

    fn find_first(
        &mut self,
        config: &MockConfig,
        params: FindFirst2Params,
    ) -> Handled<TransResponse> {
        let level = FindLevel::from_code(params.level)?;
        let dir = parent(&params.pattern).to_string();
        let pattern = file_name(&params.pattern).to_string();

        let mut listed: Vec<(String, FileAttributes)> = Vec::new();
        if pattern.contains('*') {
            let dir_file = self.files.get(&dir).ok_or(NtStatus::ObjectPathNotFound)?;
            listed.push((".".into(), dir_file.attrs.clone()));
            listed.push(("..".into(), dir_file.attrs.clone()));
            for path in self.children(&dir) {
                if let Some(file) = self.files.get(&path) {
                    listed.push((file_name(&path).to_string(), file.attrs.clone()));
                }
            }
        } else if let Some(file) = self.files.get(&params.pattern) {
            listed.push((pattern.clone(), file.attrs.clone()));
        }
        if listed.is_empty() {
            return Err(NtStatus::NoSuchFile.into());
        }

        let mut search = Search {
            level,
            entries: listed
                .into_iter()
                .enumerate()
                .map(|(i, (name, attrs))| FindEntry {
                    resume_key: i as u32 + 1,
                    name,
                    attrs,
                })
                .collect(),
            position: 0,
        };
        let (page, eos) = search.take_page(params.search_count, config.page_size);
        let sid = self.next_sid;
        self.next_sid += 1;
        let close = params.flags & find_flags::CLOSE_AFTER_REQUEST != 0
            || (eos && params.flags & find_flags::CLOSE_AT_EOS != 0);
        if !close {
            self.searches.insert(sid, search);
        }

        let encoded = encode_entries(level, &page)?;
        let response = FindResponseParams {
            sid: Some(sid),
            search_count: page.len() as u16,
            end_of_search: eos,
            ea_error_offset: 0,
            last_name_offset: encoded.last_name_offset,
        };
        Ok(TransResponse {
            params: response.serialize()?,
            data: encoded.data,
        })
    }

    fn find_next(&mut self, config: &MockConfig, params: FindNext2Params) -> Handled<TransResponse> {
        self.resumes
            .push((params.resume_key, params.resume_name.clone()));
        let bug = std::mem::take(&mut self.payload_bug_armed);
        let search = self
            .searches
            .get_mut(&params.sid)
            .ok_or(NtStatus::InvalidHandle)?;

        let resumed_at = if config.resume_by_name {
            if params.resume_name.is_empty() {
                return Err(NtStatus::InvalidParameter.into());
            }
            search
                .entries
                .iter()
                .position(|e| e.name == params.resume_name)
        } else {
            search
                .entries
                .iter()
                .position(|e| e.resume_key == params.resume_key)
        };
        search.position = resumed_at.ok_or(NtStatus::InvalidParameter)? + 1;

        let level = search.level;
        let (page, eos) = search.take_page(params.search_count, config.page_size);
        if bug {
            let response = FindResponseParams {
                sid: None,
                search_count: page.len().max(1) as u16,
                end_of_search: false,
                ea_error_offset: 0,
                last_name_offset: 0,
            };
            return Ok(TransResponse {
                params: response.serialize()?,
                data: Vec::new(),
            });
        }
        if eos && params.flags & find_flags::CLOSE_AT_EOS != 0 {
            self.searches.remove(&params.sid);
        }

        let encoded = encode_entries(level, &page)?;
        let response = FindResponseParams {
            sid: None,
            search_count: page.len() as u16,
            end_of_search: eos,
            ea_error_offset: 0,
            last_name_offset: encoded.last_name_offset,
        };
        Ok(TransResponse {
            params: response.serialize()?,
            data: encoded.data,
        })
    }

    fn nt_transact(&mut self, config: &MockConfig, request: &TransRequest) -> Handled<TransResponse> {
        self.note(request.function, None);
        match request.function {
            nt_transact::IOCTL => {
                let setup = IoctlSetup::parse(&request.setup)?;
                let path = self.fid_path(setup.fid)?;
                match setup.function_code {
                    fsctl::SET_REPARSE_POINT => {
                        if !config.reparse_points || config.reparse_denied {
                            return Err(NtStatus::AccessDenied.into());
                        }
                        self.file_mut(&path)?.set_reparse(request.data.clone());
                        Ok(TransResponse::default())
                    }
                    fsctl::GET_REPARSE_POINT => {
                        let file = self.file_mut(&path)?;
                        let data = file.reparse.clone().ok_or(NtStatus::NotAReparsePoint)?;
                        Ok(TransResponse {
                            params: Vec::new(),
                            data,
                        })
                    }
                    _ => Err(NtStatus::NotSupported.into()),
                }
            }
            nt_transact::QUERY_SECURITY_DESC => {
                let params = SecurityDescParams::parse(&request.params)?;
                let path = self.fid_path(params.fid)?;
                let descriptor = self.file_mut(&path)?.security.clone().unwrap_or_default();
                let bytes = descriptor.serialize()?;
                let length = (bytes.len() as u32).to_le_bytes().to_vec();
                if bytes.len() > request.max_data_count as usize {
                    return Err(Failure {
                        status: NtStatus::BufferTooSmall,
                        params: length,
                    });
                }
                Ok(TransResponse {
                    params: length,
                    data: bytes,
                })
            }
            nt_transact::SET_SECURITY_DESC => {
                let params = SecurityDescParams::parse(&request.params)?;
                let path = self.fid_path(params.fid)?;
                let descriptor = SecurityDescriptor::parse(&request.data)?;
                self.file_mut(&path)?.security = Some(descriptor);
                Ok(TransResponse::default())
            }
            _ => Err(NtStatus::NotImplemented.into()),
        }
    }
}

fn query_fs(config: &MockConfig, level: u16) -> Handled<Vec<u8>> {
    match level {
        fs_level::QUERY_FS_ATTRIBUTE_INFO => {
            let mut attributes = FsAttributes::CASE_PRESERVED_NAMES | FsAttributes::UNICODE_ON_DISK;
            attributes.set(FsAttributes::SUPPORTS_REPARSE_POINTS, config.reparse_points);
            attributes.set(FsAttributes::NAMED_STREAMS, config.named_streams);
            Ok(FsAttributeInfo {
                attributes,
                max_name_length: 255,
                fs_name: "NTFS".into(),
            }
            .serialize()?)
        }
        fs_level::QUERY_CIFS_UNIX_INFO if config.unix => Ok(UnixInfo {
            major: 1,
            minor: 0,
            capabilities: UnixCapabilities::POSIX_PATH_OPERATIONS
                | UnixCapabilities::FCNTL_LOCKS,
        }
        .serialize()?),
        fs_level::QUERY_POSIX_WHOAMI => match &config.whoami_sids {
            Some(sids) => Ok(WhoAmI {
                uid: 1000,
                gid: 1000,
                sids: sids.clone(),
                ..Default::default()
            }
            .serialize()?),
            None => Err(NtStatus::NotSupported.into()),
        },
        _ => Err(NtStatus::InvalidLevel.into()),
    }
}

fn apply_basic(file: &mut MockFile, data: &[u8]) -> Handled<()> {
    let mut r = WireReader::new(data);
    let times = [r.u64()?, r.u64()?, r.u64()?, r.u64()?];
    let attributes = r.u32()?;
    let targets = [
        &mut file.attrs.create_time,
        &mut file.attrs.access_time,
        &mut file.attrs.write_time,
        &mut file.attrs.change_time,
    ];
    for (value, slot) in times.into_iter().zip(targets) {
        if value != 0 {
            *slot = nt_time_to_datetime(value);
        }
    }
    if attributes != 0 {
        let mut dos = DosAttributes::from_bits_retain(attributes) - DosAttributes::NORMAL;
        dos.set(DosAttributes::DIRECTORY, file.is_dir());
        file.attrs.dos_attributes = dos;
    }
    Ok(())
}
