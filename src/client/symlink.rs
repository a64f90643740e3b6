//! Symbolic links in the three forms a CIFS server can hold them
//!
//! UNIX extension links, NTFS reparse points, and the legacy "XSym" text file:
//!
//! ```text
//! XSym\n
//! 0011\n                              target length, 4 digits
//! 5d41402abc4b2a76b9719d911017c592\n  MD5 of the target, lower-case hex
//! /some/where\n                       target, newline only if shorter than 1024
//! <spaces up to 1067 bytes>
//! ```

use super::node::{join, CachedTarget, RemoteNode};
use super::Share;
use crate::error::{Error, Result};
use crate::protocol::constants::{
    fsctl, info_level, CreateDisposition, CreateOptions, DesiredAccess, DosAttributes,
    ShareAccess, IO_REPARSE_TAG_SYMLINK,
};
use crate::protocol::messages::info::{parse_unix_link_data, unix_link_data};
use crate::protocol::messages::ioctl::reparse_tag;
use crate::protocol::messages::{NtCreateRequest, SymlinkReparseBuffer};
use md5::{Digest, Md5};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Size of every legacy symlink file
pub const XSYM_FILE_SIZE: usize = 1067;

/// Longest target a legacy symlink file holds
pub const XSYM_MAX_TARGET: usize = 1024;

const XSYM_MAGIC: &[u8] = b"XSym\n";
const XSYM_HEADER: usize = 43;

/// How symlinks are created on this share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkScheme {
    /// SMB_SET_FILE_UNIX_LINK
    Unix,
    /// IO_REPARSE_TAG_SYMLINK through FSCTL_SET_REPARSE_POINT
    Reparse,
    /// A regular file in XSym format
    LegacyEmbedded,
}

/// Lay out the legacy symlink file for `target`
pub fn encode_xsym(target: &str) -> Result<Vec<u8>> {
    let bytes = target.as_bytes();
    if bytes.len() > XSYM_MAX_TARGET {
        return Err(Error::InvalidParameter(format!(
            "symlink target of {} bytes exceeds {}",
            bytes.len(),
            XSYM_MAX_TARGET
        )));
    }
    let mut buf = Vec::with_capacity(XSYM_FILE_SIZE);
    buf.extend_from_slice(XSYM_MAGIC);
    buf.extend_from_slice(format!("{:04}\n", bytes.len()).as_bytes());
    buf.extend_from_slice(hex::encode(Md5::digest(bytes)).as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(bytes);
    if bytes.len() < XSYM_MAX_TARGET {
        buf.push(b'\n');
    }
    buf.resize(XSYM_FILE_SIZE, b' ');
    Ok(buf)
}

/// Target of a legacy symlink file; any malformed field rejects the file
pub fn decode_xsym(buf: &[u8]) -> Result<String> {
    if buf.len() != XSYM_FILE_SIZE {
        return Err(Error::ParseError(format!(
            "symlink file is {} bytes, expected {}",
            buf.len(),
            XSYM_FILE_SIZE
        )));
    }
    if !buf.starts_with(XSYM_MAGIC) {
        return Err(Error::ParseError("missing XSym signature".into()));
    }

    let digits = &buf[5..9];
    if buf[9] != b'\n' || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::ParseError("malformed XSym length".into()));
    }
    let len = digits
        .iter()
        .fold(0usize, |n, d| n * 10 + (d - b'0') as usize);
    if len > XSYM_MAX_TARGET {
        return Err(Error::ParseError(format!("XSym length {} out of range", len)));
    }

    let digest = &buf[10..42];
    if buf[42] != b'\n' || !digest.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::ParseError("malformed XSym digest".into()));
    }
    let target = &buf[XSYM_HEADER..XSYM_HEADER + len];
    let expected = hex::encode(Md5::digest(target));
    if !expected.as_bytes().eq_ignore_ascii_case(digest) {
        return Err(Error::ParseError("XSym digest does not match target".into()));
    }

    String::from_utf8(target.to_vec())
        .map_err(|_| Error::ParseError("XSym target is not UTF-8".into()))
}

impl Share {
    /// Create `name` in `dir` pointing at `target`, using the share's scheme
    ///
    /// A server that refuses the reparse point demotes the share to legacy
    /// symlink files for good.
    pub async fn create_symlink(
        &self,
        dir: &str,
        name: &str,
        target: &str,
    ) -> Result<Arc<RemoteNode>> {
        let path = join(dir, name);
        match self.symlink_scheme() {
            SymlinkScheme::Unix => {
                self.set_path_info(&path, info_level::SET_FILE_UNIX_LINK, unix_link_data(target)?)
                    .await?;
            }
            SymlinkScheme::Reparse => match self.create_reparse_symlink(&path, target).await {
                Err(Error::AccessDenied(reason)) => {
                    info!(
                        "{}: reparse symlink refused ({}), using symlink files",
                        path, reason
                    );
                    self.disable_reparse_symlinks();
                    self.create_legacy_symlink(&path, target, CreateDisposition::OverwriteIf)
                        .await?;
                }
                other => other?,
            },
            SymlinkScheme::LegacyEmbedded => {
                self.create_legacy_symlink(&path, target, CreateDisposition::CREATE)
                    .await?;
            }
        }

        let node = self.nodes.get_or_insert(&path);
        {
            let mut state = node.lock();
            state.attrs = None;
            state.symlink = Some(CachedTarget {
                target: target.to_string(),
                captured_at: Instant::now(),
            });
        }
        debug!("{} -> {}", path, target);
        Ok(node)
    }

    async fn create_reparse_symlink(&self, path: &str, target: &str) -> Result<()> {
        let buffer = SymlinkReparseBuffer::new(target).serialize()?;
        let request = NtCreateRequest::new(path, DesiredAccess::FILE_GENERIC_WRITE, ShareAccess::empty())
            .disposition(CreateDisposition::CREATE)
            .options(CreateOptions::FILE_NON_DIRECTORY_FILE | CreateOptions::FILE_OPEN_REPARSE_POINT);
        let fid = self.nt_create(request).await?.fid;
        let set = self.fsctl(fid, fsctl::SET_REPARSE_POINT, buffer).await;
        let closed = self.close_fid(fid).await;
        set?;
        closed
    }

    async fn create_legacy_symlink(
        &self,
        path: &str,
        target: &str,
        disposition: CreateDisposition,
    ) -> Result<()> {
        let contents = encode_xsym(target)?;
        let request = NtCreateRequest::new(path, DesiredAccess::FILE_GENERIC_WRITE, ShareAccess::empty())
            .disposition(disposition)
            .options(CreateOptions::FILE_NON_DIRECTORY_FILE);
        let fid = self.nt_create(request).await?.fid;
        let written = self.write_fid(fid, 0, &contents).await;
        let closed = self.close_fid(fid).await;
        written?;
        closed
    }

    /// Target of a symlink node
    pub async fn read_symlink(&self, node: &Arc<RemoteNode>) -> Result<String> {
        self.ensure_usable(node).await?;
        let cached = node
            .lock()
            .symlink
            .as_ref()
            .filter(|c| c.captured_at.elapsed() < self.config.symlink_cache_ttl)
            .map(|c| c.target.clone());
        if let Some(target) = cached {
            return Ok(target);
        }

        let attrs = self.getattr(node).await?;
        let path = node.path();
        let reparse =
            attrs.dos_attributes.contains(DosAttributes::REPARSE_POINT) || attrs.reparse_tag != 0;
        if reparse && attrs.reparse_tag != 0 && attrs.reparse_tag != IO_REPARSE_TAG_SYMLINK {
            return Err(Error::InvalidParameter(format!(
                "{} is a reparse point with tag 0x{:08x}, not a symbolic link",
                path, attrs.reparse_tag
            )));
        }
        let target = if reparse {
            self.read_reparse_symlink(node).await?
        } else if self.capabilities().unix_extensions() && attrs.is_symlink() {
            let raw = self
                .query_path_raw(&path, info_level::QUERY_FILE_UNIX_LINK)
                .await?;
            parse_unix_link_data(&raw)?
        } else if attrs.size == XSYM_FILE_SIZE as u64 && !attrs.is_dir() {
            self.read_legacy_symlink(node).await?
        } else {
            return Err(Error::InvalidParameter(format!(
                "{} is not a symbolic link",
                path
            )));
        };

        node.lock().symlink = Some(CachedTarget {
            target: target.clone(),
            captured_at: Instant::now(),
        });
        Ok(target)
    }

    async fn read_reparse_symlink(&self, node: &Arc<RemoteNode>) -> Result<String> {
        let tmp = self
            .tmp_open_with(
                node,
                DesiredAccess::FILE_GENERIC_READ,
                CreateOptions::FILE_OPEN_REPARSE_POINT,
            )
            .await?;
        let data = match tmp.fid() {
            Ok(fid) => self.fsctl(fid, fsctl::GET_REPARSE_POINT, Vec::new()).await,
            Err(e) => Err(e),
        };
        let closed = self.tmp_close(tmp).await;
        let data = data?;

        let tag = reparse_tag(&data)?;
        if let Some(attrs) = node.lock().attrs.as_mut() {
            attrs.reparse_tag = tag;
        }
        if tag != IO_REPARSE_TAG_SYMLINK {
            return Err(Error::InvalidParameter(format!(
                "{} is a reparse point with tag 0x{:08x}, not a symbolic link",
                node.path(),
                tag
            )));
        }
        let target = SymlinkReparseBuffer::parse(&data)?.target();
        closed?;
        Ok(target)
    }

    async fn read_legacy_symlink(&self, node: &Arc<RemoteNode>) -> Result<String> {
        let tmp = self.tmp_open(node, DesiredAccess::FILE_READ_DATA).await?;
        let data = match tmp.fid() {
            Ok(fid) => self.read_fid(fid, 0, XSYM_FILE_SIZE as u32).await,
            Err(e) => Err(e),
        };
        let closed = self.tmp_close(tmp).await;
        let target = decode_xsym(&data?)?;
        closed?;
        Ok(target)
    }
}
