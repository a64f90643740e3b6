//! Path lookup, metadata caching, set-attribute requests and data transfer

use super::handles::Handle;
use super::node::{RemoteNode, Snapshot};
use super::Share;
use crate::attributes::{translate, BasicSetInfo, FileAttributes, FileKind, UnixSetInfo};
use crate::error::{Error, Result};
use crate::protocol::codec::nt_time_to_datetime;
use crate::protocol::constants::{info_level, DosAttributes, SmbCommand};
use crate::protocol::messages::info::{end_of_file_info, parse_stream_info};
use crate::protocol::messages::{
    Fid, NtCreateResponse, QueryInformationRequest, ReadRequest, ReadResponse, SmbMessage,
    WriteRequest, WriteResponse,
};
use crate::transport::SmbRequest;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Stream holding a Mac resource fork
pub const RESOURCE_FORK_STREAM: &str = "AFP_Resource";

/// Stream holding Finder info
pub const FINDER_INFO_STREAM: &str = "AFP_AfpInfo";

/// Metadata carried by an NT_CREATE_ANDX reply
pub(crate) fn attrs_from_create(response: &NtCreateResponse) -> FileAttributes {
    let kind = if response.directory || response.file_attributes.contains(DosAttributes::DIRECTORY)
    {
        FileKind::Directory
    } else {
        FileKind::Regular
    };
    let mut attrs = FileAttributes::new(kind);
    attrs.size = response.end_of_file;
    attrs.allocation_size = response.allocation_size;
    attrs.create_time = nt_time_to_datetime(response.creation_time);
    attrs.access_time = nt_time_to_datetime(response.last_access_time);
    attrs.write_time = nt_time_to_datetime(response.last_write_time);
    attrs.change_time = nt_time_to_datetime(response.change_time);
    attrs.dos_attributes = response.file_attributes;
    attrs
}

impl Share {
    /// Node for an existing path, with freshly queried attributes
    pub async fn lookup(&self, path: &str) -> Result<Arc<RemoteNode>> {
        let attrs = self.query_path_info(path).await?;
        let node = self.nodes.get_or_insert(path);
        node.set_attrs(attrs);
        Ok(node)
    }

    /// Attributes of a node, from the cache while it is fresh
    pub async fn getattr(&self, node: &Arc<RemoteNode>) -> Result<FileAttributes> {
        self.ensure_usable(node).await?;
        if let Some(attrs) = node.lock().fresh_attrs(self.config.attr_cache_ttl) {
            return Ok(attrs);
        }
        let attrs = self.query_path_info(&node.path()).await?;
        node.set_attrs(attrs.clone());
        Ok(attrs)
    }

    /// Query a path at the richest level the server speaks
    pub async fn query_path_info(&self, path: &str) -> Result<FileAttributes> {
        let caps = self.capabilities();
        let level = caps.info_level();
        let raw = match level.code() {
            Some(code) => self.query_path_raw(path, code).await?,
            None => {
                let request = QueryInformationRequest {
                    file_name: path.to_string(),
                };
                self.call(SmbRequest::new(
                    SmbCommand::QueryInformation,
                    request.serialize()?,
                ))
                .await?
                .into_result(path)?
                .to_vec()
            }
        };
        translate(level, &raw, caps.dialect)
    }

    /// Query through an open handle
    pub async fn query_file_info(&self, handle: &Handle) -> Result<FileAttributes> {
        let caps = self.capabilities();
        let level = caps.info_level();
        let attrs = match level.code() {
            Some(code) => {
                let fid = self.usable_fid(handle).await?;
                let raw = self.query_file_raw(fid, code).await?;
                translate(level, &raw, caps.dialect)?
            }
            // no handle-based query before NT
            None => self.query_path_info(&handle.node().path()).await?,
        };
        handle.node().set_attrs(attrs.clone());
        Ok(attrs)
    }

    pub async fn set_basic_info(&self, node: &Arc<RemoteNode>, info: &BasicSetInfo) -> Result<()> {
        self.ensure_usable(node).await?;
        self.set_path_info(&node.path(), info_level::SET_FILE_BASIC_INFO, info.encode()?)
            .await?;
        node.invalidate_attrs();
        self.refresh_observed(node, None).await;
        Ok(())
    }

    pub async fn set_size(&self, handle: &Handle, size: u64) -> Result<()> {
        let fid = self.usable_fid(handle).await?;
        self.set_file_info(fid, info_level::SET_FILE_END_OF_FILE_INFO, end_of_file_info(size))
            .await?;
        handle.node().invalidate_attrs();
        self.refresh_observed(handle.node(), Some(fid)).await;
        Ok(())
    }

    /// Change POSIX ownership, permissions, size or times
    pub async fn set_unix_metadata(&self, node: &Arc<RemoteNode>, info: &UnixSetInfo) -> Result<()> {
        if !self.capabilities().unix_extensions() {
            return Err(Error::NotSupported("UNIX extensions are not negotiated".into()));
        }
        self.ensure_usable(node).await?;
        self.set_path_info(&node.path(), info_level::SET_FILE_UNIX_BASIC, info.encode()?)
            .await?;
        node.invalidate_attrs();
        self.refresh_observed(node, None).await;
        Ok(())
    }

    /// Read up to `count` bytes; a short result means end of file
    pub async fn read(&self, handle: &Handle, offset: u64, count: u32) -> Result<Vec<u8>> {
        let fid = self.usable_fid(handle).await?;
        self.read_fid(fid, offset, count).await
    }

    pub async fn write(&self, handle: &Handle, offset: u64, data: &[u8]) -> Result<usize> {
        let fid = self.usable_fid(handle).await?;
        let written = self.write_fid(fid, offset, data).await?;
        handle.node().invalidate_attrs();
        self.refresh_observed(handle.node(), Some(fid)).await;
        Ok(written)
    }

    /// Re-read size and mtime after a change of our own
    ///
    /// Only nodes with open handles are reopened after a reconnect, so idle nodes
    /// just forget what they saw. An unknown size or mtime revokes the next reopen.
    async fn refresh_observed(&self, node: &Arc<RemoteNode>, fid: Option<Fid>) {
        if node.refcount() == 0 {
            node.lock().observed = None;
            return;
        }
        let caps = self.capabilities();
        let level = caps.info_level();
        let queried = match (level.code(), fid) {
            (Some(code), Some(fid)) => self
                .query_file_raw(fid, code)
                .await
                .and_then(|raw| translate(level, &raw, caps.dialect)),
            _ => self.query_path_info(&node.path()).await,
        };
        let mut state = node.lock();
        match queried {
            Ok(attrs) => state.observed = Some(Snapshot::of(&attrs)),
            Err(e) => {
                warn!("{}: size and mtime unknown after update: {}", state.path, e);
                state.observed = None;
            }
        }
    }

    pub(crate) async fn read_fid(&self, fid: Fid, offset: u64, count: u32) -> Result<Vec<u8>> {
        let max = self.transmit_max().max(1) as usize;
        let count = count as usize;
        let mut data = Vec::with_capacity(count);
        while data.len() < count {
            let want = (count - data.len()).min(max);
            let request = ReadRequest {
                fid,
                offset: offset + data.len() as u64,
                max_count: want as u32,
            };
            let body = self
                .call(SmbRequest::new(SmbCommand::ReadAndX, request.serialize()?))
                .await?
                .into_result("read")?;
            let chunk = ReadResponse::parse(&body)?.data;
            let short = chunk.len() < want;
            data.extend_from_slice(&chunk);
            if short {
                break;
            }
        }
        Ok(data)
    }

    pub(crate) async fn write_fid(&self, fid: Fid, offset: u64, data: &[u8]) -> Result<usize> {
        let max = self.transmit_max().max(1) as usize;
        let mut written = 0usize;
        while written < data.len() {
            let end = (written + max).min(data.len());
            let request = WriteRequest {
                fid,
                offset: offset + written as u64,
                data: data[written..end].to_vec(),
            };
            let body = self
                .call(SmbRequest::new(SmbCommand::WriteAndX, request.serialize()?))
                .await?
                .into_result("write")?;
            let count = WriteResponse::parse(&body)?.count as usize;
            if count == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "server accepted no bytes",
                )));
            }
            written += count;
        }
        Ok(written)
    }

    /// Whether a named stream exists
    ///
    /// Misses are remembered for the stream cache TTL so repeated checks for a
    /// resource fork or Finder info stay off the wire.
    pub async fn has_stream(&self, node: &Arc<RemoteNode>, stream: &str) -> Result<bool> {
        if !self.capabilities().named_streams() {
            return Ok(false);
        }
        self.ensure_usable(node).await?;
        {
            let mut state = node.lock();
            let fresh = state
                .stream_misses
                .get(stream)
                .map(|at| at.elapsed() < self.config.stream_cache_ttl);
            match fresh {
                Some(true) => return Ok(false),
                Some(false) => {
                    state.stream_misses.remove(stream);
                }
                None => {}
            }
        }

        let raw = match self
            .query_path_raw(&node.path(), info_level::QUERY_FILE_STREAM_INFO)
            .await
        {
            Ok(raw) => raw,
            Err(Error::NotSupported(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let wanted = format!(":{}:$DATA", stream);
        let found = parse_stream_info(&raw)?
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case(&wanted));
        if !found {
            debug!("{}: no {} stream", node.path(), stream);
            node.lock()
                .stream_misses
                .insert(stream.to_string(), Instant::now());
        }
        Ok(found)
    }
}
