//! Open-handle manager
//!
//! Every node keeps at most one *common* handle, shared by all opens that deny
//! nothing, plus an ordered *deny list* of handles that deny something to others or
//! must never be shared. A common handle holding byte-range locks is never
//! reopened for wider rights; the wider open goes on the deny list instead.
//! Callers hold a [`Handle`] naming the node and a local slot; the fid behind a
//! slot may change when the handle is reopened after a reconnect.

use super::lookup::attrs_from_create;
use super::node::{NodeState, RemoteNode, ReopenState};
use super::Share;
use crate::error::{Error, Result};
use crate::protocol::constants::{
    info_level, CreateDisposition, CreateOptions, DesiredAccess, ShareAccess,
};
use crate::protocol::messages::info::disposition_info;
use crate::protocol::messages::{Fid, NtCreateRequest, NtCreateResponse};
use std::sync::Arc;
use tracing::{debug, warn};

/// A byte-range lock held through one server handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeLock {
    pub pid: u32,
    pub offset: u64,
    pub length: u64,
    pub shared: bool,
}

/// One server handle and the opens sharing it
#[derive(Debug, Clone)]
pub(crate) struct OpenHandle {
    pub slot: u64,
    pub fid: Fid,
    pub rights: DesiredAccess,
    pub share: ShareAccess,
    pub options: CreateOptions,
    pub refcount: u32,
    /// Later compatible opens may join this handle
    pub shareable: bool,
    /// Locks taken through this handle, in acquisition order
    pub locks: Vec<ByteRangeLock>,
}

/// A caller's reference to an open file
#[derive(Debug)]
pub struct Handle {
    node: Arc<RemoteNode>,
    slot: u64,
}

impl Handle {
    pub fn node(&self) -> &Arc<RemoteNode> {
        &self.node
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// Server fid currently behind this handle
    pub fn fid(&self) -> Option<Fid> {
        self.node.lock().handle_by_slot(self.slot).map(|h| h.fid)
    }

    pub fn rights(&self) -> Option<DesiredAccess> {
        self.node.lock().handle_by_slot(self.slot).map(|h| h.rights)
    }

    pub(crate) fn resolve_fid(&self) -> Result<Fid> {
        self.fid().ok_or_else(|| {
            Error::InvalidState(format!("{}: handle {} is closed", self.node.path(), self.slot))
        })
    }
}

/// Short-lived open used internally for a single operation
#[derive(Debug)]
pub enum TmpHandle {
    /// Borrowed from an existing open of the node
    Shared(Handle),
    /// Opened for this operation only and never recorded on the node
    Private { node: Arc<RemoteNode>, fid: Fid },
}

impl TmpHandle {
    pub fn fid(&self) -> Result<Fid> {
        match self {
            TmpHandle::Shared(handle) => handle.resolve_fid(),
            TmpHandle::Private { fid, .. } => Ok(*fid),
        }
    }

    pub fn node(&self) -> &Arc<RemoteNode> {
        match self {
            TmpHandle::Shared(handle) => handle.node(),
            TmpHandle::Private { node, .. } => node,
        }
    }
}

/// Opens that always get a server handle of their own
fn never_shared(rights: DesiredAccess, passthrough: bool) -> bool {
    rights.intersects(DesiredAccess::DELETE | DesiredAccess::WRITE_OWNER | DesiredAccess::WRITE_DAC)
        || (passthrough && rights.contains(DesiredAccess::FILE_WRITE_ATTRIBUTES))
}

/// Slot of any handle an internal open may borrow
///
/// Never-shared entries stay private to their opener.
fn find_borrowable(state: &NodeState, rights: DesiredAccess, options: CreateOptions) -> Option<u64> {
    state
        .common
        .iter()
        .chain(state.deny_list.iter().filter(|h| h.shareable))
        .find(|h| h.rights.contains(rights) && h.options.contains(options))
        .map(|h| h.slot)
}

/// Slot of an existing handle the request can join
fn find_reusable(state: &NodeState, rights: DesiredAccess, share: ShareAccess) -> Option<u64> {
    if share.is_deny_mode() {
        return state
            .deny_list
            .iter()
            .find(|h| h.shareable && h.share == share && h.rights.contains(rights))
            .map(|h| h.slot);
    }
    state
        .common
        .iter()
        .filter(|h| h.rights.contains(rights))
        .chain(
            state
                .deny_list
                .iter()
                .filter(|h| h.shareable && h.rights.contains(rights)),
        )
        .map(|h| h.slot)
        .next()
}

impl Share {
    /// Open a node, joining an existing handle when one already carries the rights
    pub async fn open(
        &self,
        node: &Arc<RemoteNode>,
        rights: DesiredAccess,
        share: ShareAccess,
    ) -> Result<Handle> {
        self.ensure_usable(node).await?;
        let exclusive = never_shared(rights, self.capabilities().passthrough());
        let deny = share.is_deny_mode();

        let common = {
            let mut state = node.lock();
            if !exclusive {
                if let Some(slot) = find_reusable(&state, rights, share) {
                    let refcount = state.handle_by_slot_mut(slot).map(|h| {
                        h.refcount += 1;
                        h.refcount
                    });
                    debug!("{}: open joins slot {} (refcount {:?})", state.path, slot, refcount);
                    return Ok(Handle {
                        node: node.clone(),
                        slot,
                    });
                }
            }
            state
                .common
                .as_ref()
                .map(|h| (h.rights, h.share, !h.locks.is_empty()))
        };

        let path = node.path();
        if deny || exclusive {
            let response = self
                .nt_create(NtCreateRequest::new(&path, rights, share))
                .await?;
            return Ok(self.install(
                node,
                &response,
                rights,
                share,
                CreateOptions::empty(),
                !exclusive,
                true,
            ));
        }

        match common {
            Some((common_rights, common_share, false)) => {
                self.upgrade_common(node, &path, common_rights | rights, common_share & share)
                    .await
            }
            Some((_, _, true)) => {
                // swapping the fid would release the locks held through it
                debug!("{}: common handle holds locks, opening alongside", path);
                let response = self
                    .nt_create(NtCreateRequest::new(&path, rights, share))
                    .await?;
                Ok(self.install(
                    node,
                    &response,
                    rights,
                    share,
                    CreateOptions::empty(),
                    true,
                    true,
                ))
            }
            None => {
                let response = self
                    .nt_create(NtCreateRequest::new(&path, rights, share))
                    .await?;
                Ok(self.install(
                    node,
                    &response,
                    rights,
                    share,
                    CreateOptions::empty(),
                    true,
                    false,
                ))
            }
        }
    }

    /// Create or open a path with an explicit disposition; always goes to the wire
    pub async fn create(
        &self,
        path: &str,
        rights: DesiredAccess,
        share: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> Result<Handle> {
        let node = self.nodes.get_or_insert(path);
        self.ensure_usable(&node).await?;
        let request = NtCreateRequest::new(&node.path(), rights, share)
            .disposition(disposition)
            .options(options);
        let response = self.nt_create(request).await?;
        let exclusive = never_shared(rights, self.capabilities().passthrough());
        Ok(self.install(
            &node,
            &response,
            rights,
            share,
            options,
            !exclusive,
            exclusive || share.is_deny_mode(),
        ))
    }

    /// Replace the common handle with one opened for the union of rights
    async fn upgrade_common(
        &self,
        node: &Arc<RemoteNode>,
        path: &str,
        rights: DesiredAccess,
        share: ShareAccess,
    ) -> Result<Handle> {
        let response = self
            .nt_create(NtCreateRequest::new(path, rights, share))
            .await?;
        let swapped = {
            let mut state = node.lock();
            state.set_attrs(attrs_from_create(&response));
            match state.common.as_mut() {
                // a concurrent upgrade may have widened the common handle further,
                // or a lock may have been taken through it meanwhile
                Some(common) if rights.contains(common.rights) && common.locks.is_empty() => {
                    let old = std::mem::replace(&mut common.fid, response.fid);
                    common.rights = rights;
                    common.share = share;
                    common.refcount += 1;
                    Some((common.slot, old))
                }
                _ => None,
            }
        };
        match swapped {
            Some((slot, old_fid)) => {
                debug!(
                    "{}: common handle upgraded to {:?}, fid {} -> {}",
                    path, rights, old_fid.0, response.fid.0
                );
                if let Err(e) = self.close_fid(old_fid).await {
                    warn!("{}: close of replaced fid {}: {}", path, old_fid.0, e);
                }
                Ok(Handle {
                    node: node.clone(),
                    slot,
                })
            }
            None => Ok(self.install(
                node,
                &response,
                rights,
                share,
                CreateOptions::empty(),
                true,
                false,
            )),
        }
    }

    /// Record a fresh server handle on the node
    #[allow(clippy::too_many_arguments)]
    fn install(
        &self,
        node: &Arc<RemoteNode>,
        response: &NtCreateResponse,
        rights: DesiredAccess,
        share: ShareAccess,
        options: CreateOptions,
        shareable: bool,
        deny_entry: bool,
    ) -> Handle {
        let slot = self.next_slot();
        let entry = OpenHandle {
            slot,
            fid: response.fid,
            rights,
            share,
            options,
            refcount: 1,
            shareable,
            locks: Vec::new(),
        };
        let mut state = node.lock();
        if !deny_entry && state.common.is_none() {
            state.common = Some(entry);
        } else {
            state.deny_list.push(entry);
        }
        state.set_attrs(attrs_from_create(response));
        debug!(
            "{}: fid {} in slot {} ({} handle(s))",
            state.path,
            response.fid.0,
            slot,
            state.common.iter().count() + state.deny_list.len()
        );
        Handle {
            node: node.clone(),
            slot,
        }
    }

    /// Open for one internal operation, borrowing an existing handle if possible
    pub async fn tmp_open(&self, node: &Arc<RemoteNode>, rights: DesiredAccess) -> Result<TmpHandle> {
        self.tmp_open_with(node, rights, CreateOptions::empty()).await
    }

    /// [`Share::tmp_open`] with create options a borrowed handle must also carry
    pub(crate) async fn tmp_open_with(
        &self,
        node: &Arc<RemoteNode>,
        rights: DesiredAccess,
        options: CreateOptions,
    ) -> Result<TmpHandle> {
        self.ensure_usable(node).await?;
        let exclusive = never_shared(rights, self.capabilities().passthrough());
        {
            let mut state = node.lock();
            let slot = if exclusive {
                None
            } else {
                find_borrowable(&state, rights, options)
            };
            if let Some(slot) = slot {
                if let Some(handle) = state.handle_by_slot_mut(slot) {
                    handle.refcount += 1;
                }
                return Ok(TmpHandle::Shared(Handle {
                    node: node.clone(),
                    slot,
                }));
            }
        }
        let request = NtCreateRequest::new(&node.path(), rights, ShareAccess::FILE_SHARE_ALL)
            .options(options);
        let response = self.nt_create(request).await?;
        Ok(TmpHandle::Private {
            node: node.clone(),
            fid: response.fid,
        })
    }

    pub async fn tmp_close(&self, tmp: TmpHandle) -> Result<()> {
        match tmp {
            TmpHandle::Shared(handle) => self.close(handle).await,
            TmpHandle::Private { fid, .. } => self.close_fid(fid).await,
        }
    }

    /// Drop one reference; the server handle closes with the last one
    ///
    /// A lost connection counts as a successful close. The last close of a node
    /// flagged delete-on-close deletes the file.
    pub async fn close(&self, handle: Handle) -> Result<()> {
        let Handle { node, slot } = handle;
        let (wire_fid, delete_now, reclaim) = {
            let mut state = node.lock();
            let (refcount, fid) = {
                let entry = state.handle_by_slot_mut(slot).ok_or_else(|| {
                    Error::InvalidState(format!("handle {} is not open", slot))
                })?;
                entry.refcount = entry.refcount.saturating_sub(1);
                (entry.refcount, entry.fid)
            };
            if refcount > 0 {
                return Ok(());
            }
            if state.common.as_ref().map(|h| h.slot) == Some(slot) {
                state.common = None;
            } else {
                state.deny_list.retain(|h| h.slot != slot);
            }

            let idle = state.refcount() == 0;
            let stable = state.reopen == ReopenState::Stable;
            if idle && state.reopen == ReopenState::NeedReopen {
                // nothing left to reopen
                state.reopen = ReopenState::Stable;
                state.snapshot = None;
            }
            let delete_now = idle && stable && std::mem::take(&mut state.delete_on_close);
            let reclaim = idle && state.reopen == ReopenState::NeedRevoke;
            (stable.then_some(fid), delete_now, reclaim)
        };

        if reclaim {
            debug!("{}: reclaiming revoked node", node.path());
            self.nodes.reclaim(&node);
        }
        let mut result = match wire_fid {
            Some(fid) => self.close_fid(fid).await,
            None => Ok(()),
        };
        if delete_now {
            if let Err(e) = Box::pin(self.delete(&node)).await {
                warn!("{}: delete on last close failed: {}", node.path(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Set delete-pending on the open file
    pub async fn mark_for_delete(&self, handle: &Handle) -> Result<()> {
        let fid = self.usable_fid(handle).await?;
        self.set_file_info(
            fid,
            info_level::SET_FILE_DISPOSITION_INFO,
            disposition_info(true),
        )
        .await?;
        handle.node.invalidate_attrs();
        Ok(())
    }

    /// Fid behind a handle once the node is known to be usable
    pub(crate) async fn usable_fid(&self, handle: &Handle) -> Result<Fid> {
        self.ensure_usable(&handle.node).await?;
        handle.resolve_fid()
    }

}
