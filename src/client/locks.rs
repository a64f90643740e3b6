//! Byte-range locking over LOCKING_ANDX

use super::handles::{ByteRangeLock, Handle};
use super::Share;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::SmbCommand;
use crate::protocol::messages::{Fid, LockRange, LockingRequest, SmbMessage};
use crate::transport::SmbRequest;
use tracing::debug;

impl Share {
    /// Lock `length` bytes at `offset` for process `pid`
    ///
    /// A conflicting lock held elsewhere is reported as access denied. Every granted
    /// lock is remembered on its server handle and replayed after a reconnect.
    pub async fn lock(
        &self,
        handle: &Handle,
        pid: u32,
        offset: u64,
        length: u64,
        shared: bool,
    ) -> Result<()> {
        let fid = self.usable_fid(handle).await?;
        let lock = ByteRangeLock {
            pid,
            offset,
            length,
            shared,
        };
        self.send_lock(fid, &lock).await?;

        let mut state = handle.node().lock();
        if let Some(entry) = state.handle_by_slot_mut(handle.slot()) {
            entry.locks.push(lock);
        }
        Ok(())
    }

    pub async fn unlock(&self, handle: &Handle, pid: u32, offset: u64, length: u64) -> Result<()> {
        let fid = self.usable_fid(handle).await?;
        let request = LockingRequest::unlock(fid, range(pid, offset, length));
        self.call(SmbRequest::new(SmbCommand::LockingAndX, request.serialize()?).with_pid(pid))
            .await?
            .into_result("unlock")?;

        let mut state = handle.node().lock();
        if let Some(entry) = state.handle_by_slot_mut(handle.slot()) {
            if let Some(i) = entry
                .locks
                .iter()
                .position(|l| l.pid == pid && l.offset == offset && l.length == length)
            {
                entry.locks.remove(i);
            }
        }
        Ok(())
    }

    pub(crate) async fn send_lock(&self, fid: Fid, lock: &ByteRangeLock) -> Result<()> {
        let request = LockingRequest::lock(
            fid,
            range(lock.pid, lock.offset, lock.length),
            lock.shared,
        );
        let reply = self
            .call(SmbRequest::new(SmbCommand::LockingAndX, request.serialize()?).with_pid(lock.pid))
            .await?;
        match reply.status() {
            NtStatus::LockNotGranted | NtStatus::FileLockConflict => {
                debug!("lock {}+{} on fid {} refused", lock.offset, lock.length, fid.0);
                Err(Error::AccessDenied(format!(
                    "bytes {}..{} are locked",
                    lock.offset,
                    lock.offset.saturating_add(lock.length)
                )))
            }
            _ => reply.into_result("lock").map(|_| ()),
        }
    }
}

fn range(pid: u32, offset: u64, length: u64) -> LockRange {
    LockRange {
        // LOCKING_ANDX carries the low 16 bits of the process id
        pid: pid as u16,
        offset,
        length,
    }
}
