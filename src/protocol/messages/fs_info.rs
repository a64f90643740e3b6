//! TRANS2 QUERY_FS_INFORMATION levels used for capability discovery

use super::common::SmbMessage;
use super::security::Sid;
use crate::error::{Error, Result};
use crate::protocol::codec::{utf16_bytes, WireReader};
use crate::protocol::constants::{FsAttributes, UnixCapabilities};
use byteorder::{LittleEndian, WriteBytesExt};

/// QUERY_FS_INFORMATION parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryFsInfoParams {
    pub level: u16,
}

impl SmbMessage for QueryFsInfoParams {
    fn parse(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            level: WireReader::new(buf).u16()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.level.to_le_bytes().to_vec())
    }

    fn size(&self) -> usize {
        2
    }
}

/// SMB_QUERY_FS_ATTRIBUTE_INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsAttributeInfo {
    pub attributes: FsAttributes,
    pub max_name_length: u32,
    pub fs_name: String,
}

impl SmbMessage for FsAttributeInfo {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let attributes = FsAttributes::from_bits_retain(r.u32()?);
        let max_name_length = r.u32()?;
        let name_len = r.u32()? as usize;
        let fs_name = r.utf16(name_len)?;
        Ok(Self {
            attributes,
            max_name_length,
            fs_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16_bytes(&self.fs_name);
        let mut buf = Vec::with_capacity(12 + name.len());
        buf.write_u32::<LittleEndian>(self.attributes.bits())?;
        buf.write_u32::<LittleEndian>(self.max_name_length)?;
        buf.write_u32::<LittleEndian>(name.len() as u32)?;
        buf.extend_from_slice(&name);
        Ok(buf)
    }

    fn size(&self) -> usize {
        12 + self.fs_name.encode_utf16().count() * 2
    }
}

/// SMB_QUERY_CIFS_UNIX_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixInfo {
    pub major: u16,
    pub minor: u16,
    pub capabilities: UnixCapabilities,
}

impl SmbMessage for UnixInfo {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            major: r.u16()?,
            minor: r.u16()?,
            capabilities: UnixCapabilities::from_bits_retain(r.u64()?),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(12);
        buf.write_u16::<LittleEndian>(self.major)?;
        buf.write_u16::<LittleEndian>(self.minor)?;
        buf.write_u64::<LittleEndian>(self.capabilities.bits())?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        12
    }
}

/// SMB_QUERY_POSIX_WHOAMI: the server's view of the connected user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhoAmI {
    pub mapping_flags: u32,
    pub mapping_mask: u32,
    pub uid: u64,
    pub gid: u64,
    pub gids: Vec<u64>,
    pub sids: Vec<Sid>,
}

impl WhoAmI {
    /// Whether the user's token carries `sid`
    pub fn has_sid(&self, sid: &Sid) -> bool {
        self.sids.iter().any(|s| s == sid)
    }
}

impl SmbMessage for WhoAmI {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let mapping_flags = r.u32()?;
        let mapping_mask = r.u32()?;
        let uid = r.u64()?;
        let gid = r.u64()?;
        let num_gids = r.u32()? as usize;
        let num_sids = r.u32()? as usize;
        let sid_bytes = r.u32()? as usize;
        let _reserved = r.u32()?;
        if r.remaining() < num_gids * 8 + sid_bytes {
            return Err(Error::ParseError(format!(
                "who-am-I reply truncated: {} gids and {} SID bytes in {} bytes",
                num_gids,
                sid_bytes,
                r.remaining()
            )));
        }
        let gids = (0..num_gids).map(|_| r.u64()).collect::<Result<Vec<_>>>()?;
        let sid_start = r.position();
        let mut sids = Vec::with_capacity(num_sids);
        for _ in 0..num_sids {
            sids.push(Sid::parse(&mut r)?);
        }
        if r.position() - sid_start > sid_bytes {
            return Err(Error::ParseError("who-am-I SIDs overrun their length".into()));
        }
        Ok(Self {
            mapping_flags,
            mapping_mask,
            uid,
            gid,
            gids,
            sids,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut sid_buf = Vec::new();
        for sid in &self.sids {
            sid.write(&mut sid_buf)?;
        }
        let mut buf = Vec::with_capacity(40 + self.gids.len() * 8 + sid_buf.len());
        buf.write_u32::<LittleEndian>(self.mapping_flags)?;
        buf.write_u32::<LittleEndian>(self.mapping_mask)?;
        buf.write_u64::<LittleEndian>(self.uid)?;
        buf.write_u64::<LittleEndian>(self.gid)?;
        buf.write_u32::<LittleEndian>(self.gids.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.sids.len() as u32)?;
        buf.write_u32::<LittleEndian>(sid_buf.len() as u32)?;
        buf.write_u32::<LittleEndian>(0)?;
        for gid in &self.gids {
            buf.write_u64::<LittleEndian>(*gid)?;
        }
        buf.extend_from_slice(&sid_buf);
        Ok(buf)
    }

    fn size(&self) -> usize {
        40 + self.gids.len() * 8 + self.sids.iter().map(Sid::size).sum::<usize>()
    }
}
