//! LOCKING_ANDX request

use super::common::{Fid, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::codec::WireReader;
use crate::protocol::constants::locking_type;
use byteorder::{LittleEndian, WriteBytesExt};

/// One byte range in a LOCKING_ANDX request (large-file layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRange {
    pub pid: u16,
    pub offset: u64,
    pub length: u64,
}

const RANGE_SIZE: usize = 20;

/// LOCKING_ANDX request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockingRequest {
    pub fid: Fid,
    pub lock_type: u8,
    /// Milliseconds to wait for a conflicting lock; zero fails immediately
    pub timeout: u32,
    pub unlocks: Vec<LockRange>,
    pub locks: Vec<LockRange>,
}

impl LockingRequest {
    pub fn lock(fid: Fid, range: LockRange, shared: bool) -> Self {
        let mut lock_type = locking_type::LARGE_FILES;
        if shared {
            lock_type |= locking_type::SHARED_LOCK;
        }
        Self {
            fid,
            lock_type,
            timeout: 0,
            unlocks: Vec::new(),
            locks: vec![range],
        }
    }

    pub fn unlock(fid: Fid, range: LockRange) -> Self {
        Self {
            fid,
            lock_type: locking_type::LARGE_FILES,
            timeout: 0,
            unlocks: vec![range],
            locks: Vec::new(),
        }
    }

    pub fn is_shared(&self) -> bool {
        self.lock_type & locking_type::SHARED_LOCK != 0
    }
}

fn write_range(buf: &mut Vec<u8>, range: &LockRange) -> Result<()> {
    buf.write_u16::<LittleEndian>(range.pid)?;
    buf.write_u16::<LittleEndian>(0)?; // pad
    buf.write_u32::<LittleEndian>((range.offset >> 32) as u32)?;
    buf.write_u32::<LittleEndian>(range.offset as u32)?;
    buf.write_u32::<LittleEndian>((range.length >> 32) as u32)?;
    buf.write_u32::<LittleEndian>(range.length as u32)?;
    Ok(())
}

fn read_range(r: &mut WireReader<'_>) -> Result<LockRange> {
    let pid = r.u16()?;
    let _pad = r.u16()?;
    let offset_high = r.u32()? as u64;
    let offset_low = r.u32()? as u64;
    let length_high = r.u32()? as u64;
    let length_low = r.u32()? as u64;
    Ok(LockRange {
        pid,
        offset: (offset_high << 32) | offset_low,
        length: (length_high << 32) | length_low,
    })
}

impl SmbMessage for LockingRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let fid = Fid(r.u16()?);
        let lock_type = r.u8()?;
        let _oplock_level = r.u8()?;
        let timeout = r.u32()?;
        let unlock_count = r.u16()? as usize;
        let lock_count = r.u16()? as usize;
        if lock_type & locking_type::LARGE_FILES == 0 {
            return Err(Error::NotSupported("32-bit lock ranges".into()));
        }
        if r.remaining() < (unlock_count + lock_count) * RANGE_SIZE {
            return Err(Error::ParseError("lock ranges truncated".into()));
        }
        let unlocks = (0..unlock_count)
            .map(|_| read_range(&mut r))
            .collect::<Result<Vec<_>>>()?;
        let locks = (0..lock_count)
            .map(|_| read_range(&mut r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            fid,
            lock_type,
            timeout,
            unlocks,
            locks,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u8(self.lock_type)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.timeout)?;
        buf.write_u16::<LittleEndian>(self.unlocks.len() as u16)?;
        buf.write_u16::<LittleEndian>(self.locks.len() as u16)?;
        for range in self.unlocks.iter().chain(self.locks.iter()) {
            write_range(&mut buf, range)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        12 + (self.unlocks.len() + self.locks.len()) * RANGE_SIZE
    }
}
