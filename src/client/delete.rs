//! Delete, rename, and the silly rename of files that are still open

use super::node::{join, parent, RemoteNode};
use super::Share;
use crate::attributes::{translate, BasicSetInfo, InfoLevel, UnixSetInfo};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{
    info_level, trans2, CreateOptions, DesiredAccess, DosAttributes, ShareAccess, SmbCommand,
};
use crate::protocol::messages::info::{disposition_info, posix_unlink_info};
use crate::protocol::messages::legacy::search_all;
use crate::protocol::messages::{
    DeleteRequest, Fid, FileInfoParams, NtCreateRequest, PathInfoParams, RenameInformation,
    RenameRequest, SmbMessage,
};
use crate::transport::SmbRequest;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owner write permission
const OWNER_WRITE: u32 = 0o200;

/// `AAA`, `AAB`, ... `ZZZ`
fn suffixes() -> impl Iterator<Item = String> {
    (0..26u32 * 26 * 26).map(|n| {
        let letter = |k: u32| char::from(b'A' + (k % 26) as u8);
        [letter(n / 676), letter(n / 26), letter(n)].iter().collect()
    })
}

impl Share {
    /// Delete the file or directory behind a node
    ///
    /// POSIX unlink is preferred while the server supports it; a read-only target
    /// gets owner write once and is retried.
    pub async fn delete(&self, node: &Arc<RemoteNode>) -> Result<()> {
        self.ensure_usable(node).await?;
        let path = node.path();
        let is_dir = self.getattr(node).await?.is_dir();

        let unlinked = self.posix_unlink_available() && self.posix_unlink(&path, is_dir).await?;
        if !unlinked {
            self.legacy_delete(node, &path, is_dir).await?;
        }

        node.invalidate_attrs();
        self.nodes.remove(node);
        debug!("{}: deleted", path);
        Ok(())
    }

    /// `Ok(false)` when the server turns out not to implement POSIX unlink
    async fn posix_unlink(&self, path: &str, is_dir: bool) -> Result<bool> {
        let mut granted_write = false;
        loop {
            let params = PathInfoParams {
                level: info_level::POSIX_PATH_UNLINK,
                path: path.to_string(),
            }
            .serialize()?;
            let reply = self
                .trans2(trans2::SET_PATH_INFORMATION, params, posix_unlink_info(is_dir))
                .await?;
            if !reply.is_error() {
                return Ok(true);
            }
            match reply.status {
                NtStatus::CannotDelete if !granted_write => {
                    debug!("{}: read-only, adding owner write", path);
                    granted_write = true;
                    self.grant_owner_write(path).await?;
                }
                NtStatus::NotSupported | NtStatus::InvalidLevel | NtStatus::NotImplemented => {
                    self.disable_posix_unlink();
                    return Ok(false);
                }
                status => return Err(Error::from_status(status, path)),
            }
        }
    }

    async fn grant_owner_write(&self, path: &str) -> Result<()> {
        let raw = self
            .query_path_raw(path, info_level::QUERY_FILE_UNIX_BASIC)
            .await?;
        let attrs = translate(InfoLevel::UnixBasic, &raw, self.capabilities().dialect)?;
        let mode = attrs.unix.map(|u| u.mode).unwrap_or(0);
        let info = UnixSetInfo {
            mode: Some(mode | OWNER_WRITE),
            ..Default::default()
        };
        self.set_path_info(path, info_level::SET_FILE_UNIX_BASIC, info.encode()?)
            .await
    }

    async fn legacy_delete(&self, node: &Arc<RemoteNode>, path: &str, is_dir: bool) -> Result<()> {
        if is_dir {
            let tmp = self
                .tmp_open_with(node, DesiredAccess::DELETE, CreateOptions::FILE_DIRECTORY_FILE)
                .await?;
            let marked = match tmp.fid() {
                Ok(fid) => {
                    let disposition = disposition_info(true);
                    self.set_file_info(fid, info_level::SET_FILE_DISPOSITION_INFO, disposition)
                        .await
                }
                Err(e) => Err(e),
            };
            let closed = self.tmp_close(tmp).await;
            marked?;
            return closed;
        }
        let request = DeleteRequest {
            search_attributes: search_all(),
            file_name: path.to_string(),
        };
        self.call(SmbRequest::new(SmbCommand::Delete, request.serialize()?))
            .await?
            .into_result(path)?;
        Ok(())
    }

    /// Unlink a node, renaming it out of the way if anyone still has it open
    pub async fn remove(&self, node: &Arc<RemoteNode>) -> Result<()> {
        if node.refcount() > 0 {
            self.delete_open_file(node).await
        } else {
            self.delete(node).await
        }
    }

    /// Rename an open file to a hidden scratch name and mark it for deletion
    ///
    /// The scratch name is the silly-rename prefix, the node id in hex and a
    /// three-letter suffix. If the server refuses delete-pending, the file is
    /// deleted by the client when its last handle closes.
    pub async fn delete_open_file(&self, node: &Arc<RemoteNode>) -> Result<()> {
        self.ensure_usable(node).await?;
        let path = node.path();
        let rights =
            DesiredAccess::DELETE | DesiredAccess::FILE_WRITE_ATTRIBUTES | DesiredAccess::SYNCHRONIZE;
        let response = self
            .nt_create(NtCreateRequest::new(&path, rights, ShareAccess::FILE_SHARE_ALL))
            .await?;
        let fid = response.fid;

        let renamed = self.silly_rename(node, fid, &path).await;
        let new_path = match renamed {
            Ok(new_path) => new_path,
            Err(e) => {
                if let Err(close_err) = self.close_fid(fid).await {
                    warn!("{}: close after failed rename: {}", path, close_err);
                }
                return Err(e);
            }
        };
        self.nodes.rename(node, &new_path);
        node.invalidate_attrs();

        let hidden = BasicSetInfo {
            attributes: Some(
                (response.file_attributes - DosAttributes::NORMAL) | DosAttributes::HIDDEN,
            ),
            ..Default::default()
        };
        if let Err(e) = self
            .set_file_info(fid, info_level::SET_FILE_BASIC_INFO, hidden.encode()?)
            .await
        {
            warn!("{}: could not hide: {}", new_path, e);
        }

        match self
            .set_file_info(fid, info_level::SET_FILE_DISPOSITION_INFO, disposition_info(true))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                info!(
                    "{}: delete-pending refused ({}), deleting on last close",
                    new_path, e
                );
                node.lock().delete_on_close = true;
            }
        }

        self.close_fid(fid).await?;
        info!("{}: still open, renamed to {}", path, new_path);
        Ok(())
    }

    async fn silly_rename(&self, node: &RemoteNode, fid: Fid, path: &str) -> Result<String> {
        let dir = parent(path);
        let stem = format!("{}{:x}", self.config.silly_rename_prefix, node.id());
        for suffix in suffixes() {
            let name = format!("{}{}", stem, suffix);
            let new_path = join(dir, &name);
            match self.rename_open_file(fid, path, &new_path, &name).await {
                Ok(()) => return Ok(new_path),
                Err(Error::AlreadyExists(_)) => debug!("{}: {} taken", path, name),
                Err(e) => return Err(e),
            }
        }
        Err(Error::AlreadyExists(format!(
            "{}: every {}XXX name is taken",
            path, stem
        )))
    }

    async fn rename_open_file(&self, fid: Fid, path: &str, new_path: &str, name: &str) -> Result<()> {
        if self.capabilities().passthrough() {
            let params = FileInfoParams {
                fid,
                level: info_level::SET_FILE_RENAME_INFORMATION,
            }
            .serialize()?;
            let data = RenameInformation {
                replace_if_exists: false,
                file_name: name.to_string(),
            }
            .serialize()?;
            let reply = self
                .trans2(trans2::SET_FILE_INFORMATION, params, data)
                .await?;
            if !reply.is_error() {
                return Ok(());
            }
            let err = Error::from_status(reply.status, path);
            if !(matches!(err, Error::FileNotFound(_)) && self.config.rename_not_found_workaround) {
                return Err(err);
            }
            debug!("{}: rename by handle not found, retrying by path", path);
        }
        self.legacy_rename(path, new_path).await
    }

    async fn legacy_rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let request = RenameRequest {
            search_attributes: search_all(),
            old_name: old_path.to_string(),
            new_name: new_path.to_string(),
        };
        self.call(SmbRequest::new(SmbCommand::Rename, request.serialize()?))
            .await?
            .into_result(old_path)?;
        Ok(())
    }

    /// Move a node to `new_name` inside `new_parent`
    ///
    /// A not-found answer to a request the transport had to resend may just mean
    /// the first copy already did the work; the rename counts as done when the
    /// source is gone and the destination exists.
    pub async fn rename(
        &self,
        node: &Arc<RemoteNode>,
        new_parent: &str,
        new_name: &str,
    ) -> Result<()> {
        self.ensure_usable(node).await?;
        let old_path = node.path();
        let new_path = join(new_parent, new_name);
        let request = RenameRequest {
            search_attributes: search_all(),
            old_name: old_path.clone(),
            new_name: new_path.clone(),
        };
        let reply = self
            .call(SmbRequest::new(SmbCommand::Rename, request.serialize()?))
            .await?;
        let retransmitted = reply.retransmitted;
        if let Err(e) = reply.into_result(&old_path) {
            if !(retransmitted && matches!(e, Error::FileNotFound(_))) {
                return Err(e);
            }
            if !self.rename_took_effect(&old_path, &new_path).await {
                return Err(e);
            }
            info!("{}: resent rename had already completed", old_path);
        }

        self.nodes.rename(node, &new_path);
        node.invalidate_attrs();
        debug!("{} -> {}", old_path, new_path);
        Ok(())
    }

    async fn rename_took_effect(&self, old_path: &str, new_path: &str) -> bool {
        let source_gone = matches!(
            self.query_path_info(old_path).await,
            Err(Error::FileNotFound(_))
        );
        source_gone && self.query_path_info(new_path).await.is_ok()
    }
}
