//! SMB1 protocol header

use super::codec::WireReader;
use super::constants::{SmbCommand, SMB1_HEADER_SIZE, SMB1_MAGIC};
use crate::error::{Error, NtStatus, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::convert::TryFrom;

/// Header flags2 bits the library sets
pub mod flags2 {
    pub const LONG_NAMES: u16 = 0x0001;
    pub const NT_STATUS: u16 = 0x4000;
    pub const UNICODE: u16 = 0x8000;
}

/// SMB1 header (32 bytes)
///
/// The transport owns tree, user and multiplex ids; the operation library only
/// chooses the command and the process id (which scopes byte-range locks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbHeader {
    pub command: SmbCommand,
    pub status: u32,
    pub flags: u8,
    pub flags2: u16,
    pub pid: u32,
    pub tid: u16,
    pub uid: u16,
    pub mid: u16,
}

impl SmbHeader {
    pub const SIZE: usize = SMB1_HEADER_SIZE;

    pub fn new(command: SmbCommand) -> Self {
        Self {
            command,
            status: 0,
            flags: 0,
            flags2: flags2::LONG_NAMES | flags2::NT_STATUS | flags2::UNICODE,
            pid: 0,
            tid: 0,
            uid: 0,
            mid: 0,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Status as the library's enum
    pub fn nt_status(&self) -> NtStatus {
        NtStatus::from_u32(self.status)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }

        if buf[0..4] != SMB1_MAGIC {
            return Err(Error::ParseError("Invalid SMB1 magic".into()));
        }

        let mut r = WireReader::new(&buf[4..Self::SIZE]);
        let command = SmbCommand::try_from(r.u8()?)?;
        let status = r.u32()?;
        let flags = r.u8()?;
        let flags2 = r.u16()?;
        let pid_high = r.u16()?;
        r.skip(8)?; // security features
        r.skip(2)?; // reserved
        let tid = r.u16()?;
        let pid_low = r.u16()?;
        let uid = r.u16()?;
        let mid = r.u16()?;

        Ok(Self {
            command,
            status,
            flags,
            flags2,
            pid: ((pid_high as u32) << 16) | pid_low as u32,
            tid,
            uid,
            mid,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&SMB1_MAGIC);
        buf.write_u8(self.command as u8)?;
        buf.write_u32::<LittleEndian>(self.status)?;
        buf.write_u8(self.flags)?;
        buf.write_u16::<LittleEndian>(self.flags2)?;
        buf.write_u16::<LittleEndian>((self.pid >> 16) as u16)?;
        buf.extend_from_slice(&[0u8; 8]);
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(self.tid)?;
        buf.write_u16::<LittleEndian>(self.pid as u16)?;
        buf.write_u16::<LittleEndian>(self.uid)?;
        buf.write_u16::<LittleEndian>(self.mid)?;
        Ok(buf)
    }
}
