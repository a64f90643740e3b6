//! Reconnect gate and reopen-after-reconnect

use super::handles::ByteRangeLock;
use super::node::{RemoteNode, ReopenState, Snapshot};
use super::Share;
use crate::error::{Error, Result};
use crate::protocol::codec::nt_time_to_datetime;
use crate::protocol::constants::{CreateOptions, DesiredAccess, ShareAccess};
use crate::protocol::messages::{Fid, NtCreateRequest};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Share-wide barrier raised while the session is being re-established
#[derive(Debug)]
pub struct ReconnectGate {
    tx: watch::Sender<bool>,
}

impl Default for ReconnectGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn open(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate is open
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as the gate, so this only returns once open.
        let _ = rx.wait_for(|closed| !*closed).await;
    }
}

/// One handle to reopen, copied out of the node so no lock is held on the wire
struct ReopenEntry {
    slot: u64,
    rights: DesiredAccess,
    share: ShareAccess,
    options: CreateOptions,
    locks: Vec<ByteRangeLock>,
}

impl Share {
    /// Close the gate and mark every node holding handles for reopen
    ///
    /// Called by the session layer when the connection dropped.
    pub fn begin_reconnect(&self) {
        self.gate.close();
        for node in self.nodes.all() {
            let mut state = node.lock();
            if state.common.is_none() && state.deny_list.is_empty() {
                continue;
            }
            if state.reopen == ReopenState::NeedRevoke {
                continue;
            }
            state.reopen = ReopenState::NeedReopen;
            state.snapshot = state.observed;
            debug!("{}: marked for reopen", state.path);
        }
        info!("reconnect started, operations wait for the session");
    }

    /// Open the gate once the session is back
    pub fn end_reconnect(&self) {
        self.gate.open();
        info!("reconnect finished");
    }

    pub fn reconnecting(&self) -> bool {
        self.gate.is_closed()
    }

    /// Wait out a reconnect, then make sure the node's handles are valid
    pub(crate) async fn ensure_usable(&self, node: &Arc<RemoteNode>) -> Result<()> {
        self.gate.wait().await;
        match node.reopen_state() {
            ReopenState::Stable => Ok(()),
            ReopenState::NeedReopen => self.reopen_after_reconnect(node).await,
            ReopenState::NeedRevoke => Err(revoked(node)),
        }
    }

    /// Reopen the common handle and each deny-mode handle, in order, and replay
    /// their byte-range locks
    ///
    /// A size or modification time that moved while disconnected, one that was
    /// never known, or any failed reopen revokes the node after closing what was
    /// already reopened.
    pub async fn reopen_after_reconnect(&self, node: &Arc<RemoteNode>) -> Result<()> {
        let _serial = node.reopen_lock.lock().await;

        let (path, plan, snapshot) = {
            let state = node.lock();
            match state.reopen {
                ReopenState::Stable => return Ok(()),
                ReopenState::NeedRevoke => return Err(revoked(node)),
                ReopenState::NeedReopen => {}
            }
            let plan: Vec<ReopenEntry> = state
                .common
                .iter()
                .chain(state.deny_list.iter())
                .map(|h| ReopenEntry {
                    slot: h.slot,
                    rights: h.rights,
                    share: h.share,
                    options: h.options,
                    locks: h.locks.clone(),
                })
                .collect();
            (state.path.clone(), plan, state.snapshot)
        };

        let mut reopened: Vec<(u64, Fid)> = Vec::with_capacity(plan.len());
        match self.replay(&path, &plan, snapshot, &mut reopened).await {
            Ok(()) => {
                let orphans: Vec<Fid> = {
                    let mut state = node.lock();
                    let mut orphans = Vec::new();
                    for (slot, fid) in &reopened {
                        match state.handle_by_slot_mut(*slot) {
                            Some(handle) => handle.fid = *fid,
                            // closed while we were reopening
                            None => orphans.push(*fid),
                        }
                    }
                    state.reopen = ReopenState::Stable;
                    state.snapshot = None;
                    orphans
                };
                for fid in orphans {
                    if let Err(e) = self.close_fid(fid).await {
                        warn!("{}: close of orphaned fid {}: {}", path, fid.0, e);
                    }
                }
                info!("{}: reopened {} handle(s)", path, reopened.len());
                Ok(())
            }
            Err(e) => {
                for (_, fid) in reopened {
                    if let Err(close_err) = self.close_fid(fid).await {
                        warn!("{}: close after failed reopen: {}", path, close_err);
                    }
                }
                {
                    let mut state = node.lock();
                    state.reopen = ReopenState::NeedRevoke;
                    state.snapshot = None;
                    state.revoke_reason = Some(e.to_string());
                }
                info!("{}: revoked: {}", path, e);
                Err(Error::Revoked(format!("{}: {}", path, e)))
            }
        }
    }

    async fn replay(
        &self,
        path: &str,
        plan: &[ReopenEntry],
        snapshot: Option<Snapshot>,
        reopened: &mut Vec<(u64, Fid)>,
    ) -> Result<()> {
        for entry in plan {
            let request = NtCreateRequest::new(path, entry.rights, entry.share).options(entry.options);
            let response = self.nt_create(request).await?;
            reopened.push((entry.slot, response.fid));

            let snapshot = snapshot.ok_or_else(|| {
                Error::Stale(format!("{}: size and mtime before the disconnect are unknown", path))
            })?;
            let write_time = nt_time_to_datetime(response.last_write_time);
            if response.end_of_file != snapshot.size || write_time != snapshot.write_time {
                return Err(Error::Stale(format!(
                    "{} changed while disconnected (size {} -> {}, mtime {} -> {})",
                    path, snapshot.size, response.end_of_file, snapshot.write_time, write_time
                )));
            }

            for lock in &entry.locks {
                self.send_lock(response.fid, lock).await?;
            }
            debug!(
                "{}: slot {} reopened as fid {} with {} lock(s)",
                path,
                entry.slot,
                response.fid.0,
                entry.locks.len()
            );
        }
        Ok(())
    }
}

fn revoked(node: &RemoteNode) -> Error {
    let state = node.lock();
    match &state.revoke_reason {
        Some(reason) => Error::Revoked(format!("{}: {}", state.path, reason)),
        None => Error::Revoked(state.path.clone()),
    }
}
