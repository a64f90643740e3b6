//! Security descriptors and the NT_TRANSACT query/set parameters that carry them

use super::common::{Fid, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::codec::WireReader;
use crate::protocol::constants::{SecurityControl, SecurityInformation};
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::fmt;
use std::str::FromStr;

/// Self-relative header: revision, sbz1, control, four offsets
pub const SD_HEADER_SIZE: usize = 20;

const SD_REVISION: u8 = 1;
const ACL_REVISION: u8 = 2;

/// Parameters of QUERY_SECURITY_DESC and SET_SECURITY_DESC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityDescParams {
    pub fid: Fid,
    pub security_information: SecurityInformation,
}

impl SmbMessage for SecurityDescParams {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let fid = Fid(r.u16()?);
        let _reserved = r.u16()?;
        let security_information = SecurityInformation::from_bits_retain(r.u32()?);
        Ok(Self {
            fid,
            security_information,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.security_information.bits())?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        8
    }
}

/// Response parameters of QUERY_SECURITY_DESC: the size the full descriptor needs
pub fn parse_length_needed(params: &[u8]) -> Result<u32> {
    WireReader::new(params).u32()
}

/// Security identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    pub revision: u8,
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn size(&self) -> usize {
        8 + self.sub_authorities.len() * 4
    }

    pub fn parse(r: &mut WireReader<'_>) -> Result<Self> {
        let revision = r.u8()?;
        let count = r.u8()? as usize;
        let raw = r.bytes(6)?;
        let authority = raw.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        let sub_authorities = (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        if self.sub_authorities.len() > 15 {
            return Err(Error::InvalidParameter("SID has too many sub-authorities".into()));
        }
        buf.write_u8(self.revision)?;
        buf.write_u8(self.sub_authorities.len() as u8)?;
        buf.write_u48::<BigEndian>(self.authority)?;
        for sub in &self.sub_authorities {
            buf.write_u32::<LittleEndian>(*sub)?;
        }
        Ok(())
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidParameter(format!("malformed SID {:?}", s));
        let mut parts = s.split('-');
        if parts.next() != Some("S") {
            return Err(bad());
        }
        let revision = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let authority = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| bad()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }
}

/// Access control entry carrying a mask and a SID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    pub ace_type: u8,
    pub flags: u8,
    pub mask: u32,
    pub sid: Sid,
}

impl Ace {
    pub const ACCESS_ALLOWED: u8 = 0x00;
    pub const ACCESS_DENIED: u8 = 0x01;
    pub const SYSTEM_AUDIT: u8 = 0x02;

    pub fn size(&self) -> usize {
        8 + self.sid.size()
    }
}

/// Access control list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    pub aces: Vec<Ace>,
}

impl Acl {
    pub fn size(&self) -> usize {
        8 + self.aces.iter().map(Ace::size).sum::<usize>()
    }

    pub fn parse(r: &mut WireReader<'_>) -> Result<Self> {
        let start = r.position();
        let _revision = r.u8()?;
        let _sbz1 = r.u8()?;
        let acl_size = r.u16()? as usize;
        let count = r.u16()? as usize;
        let _sbz2 = r.u16()?;
        let mut aces = Vec::with_capacity(count);
        for _ in 0..count {
            let ace_start = r.position();
            let ace_type = r.u8()?;
            let flags = r.u8()?;
            let ace_size = r.u16()? as usize;
            if ace_type > Ace::SYSTEM_AUDIT {
                return Err(Error::NotSupported(format!("ACE type {}", ace_type)));
            }
            let mask = r.u32()?;
            let sid = Sid::parse(r)?;
            if ace_size < r.position() - ace_start {
                return Err(Error::ParseError("ACE size smaller than its SID".into()));
            }
            r.seek(ace_start + ace_size)?;
            aces.push(Ace {
                ace_type,
                flags,
                mask,
                sid,
            });
        }
        if r.position() - start > acl_size {
            return Err(Error::ParseError("ACEs overrun the ACL".into()));
        }
        Ok(Self { aces })
    }

    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        let size = u16::try_from(self.size())
            .map_err(|_| Error::InvalidParameter("ACL larger than 64k".into()))?;
        buf.write_u8(ACL_REVISION)?;
        buf.write_u8(0)?;
        buf.write_u16::<LittleEndian>(size)?;
        buf.write_u16::<LittleEndian>(self.aces.len() as u16)?;
        buf.write_u16::<LittleEndian>(0)?;
        for ace in &self.aces {
            buf.write_u8(ace.ace_type)?;
            buf.write_u8(ace.flags)?;
            buf.write_u16::<LittleEndian>(ace.size() as u16)?;
            buf.write_u32::<LittleEndian>(ace.mask)?;
            ace.sid.write(buf)?;
        }
        Ok(())
    }
}

/// Self-relative security descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityDescriptor {
    pub control: SecurityControl,
    pub owner: Option<Sid>,
    pub group: Option<Sid>,
    pub sacl: Option<Acl>,
    pub dacl: Option<Acl>,
}

impl SecurityDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SD_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                need: SD_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let mut r = WireReader::new(buf);
        let _revision = r.u8()?;
        let _sbz1 = r.u8()?;
        let control = SecurityControl::from_bits_retain(r.u16()?);
        let owner_offset = r.u32()? as usize;
        let group_offset = r.u32()? as usize;
        let sacl_offset = r.u32()? as usize;
        let dacl_offset = r.u32()? as usize;

        let sid_at = |offset: usize| -> Result<Option<Sid>> {
            if offset == 0 {
                return Ok(None);
            }
            let mut r = WireReader::new(buf);
            r.seek(offset)?;
            Sid::parse(&mut r).map(Some)
        };
        let acl_at = |offset: usize, present: bool| -> Result<Option<Acl>> {
            if offset == 0 || !present {
                return Ok(None);
            }
            let mut r = WireReader::new(buf);
            r.seek(offset)?;
            Acl::parse(&mut r).map(Some)
        };

        Ok(Self {
            control,
            owner: sid_at(owner_offset)?,
            group: sid_at(group_offset)?,
            sacl: acl_at(sacl_offset, control.contains(SecurityControl::SACL_PRESENT))?,
            dacl: acl_at(dacl_offset, control.contains(SecurityControl::DACL_PRESENT))?,
        })
    }

    /// Self-relative layout; components follow the header in owner, group, SACL, DACL order
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut control = self.control | SecurityControl::SELF_RELATIVE;
        control.set(SecurityControl::SACL_PRESENT, self.sacl.is_some());
        control.set(SecurityControl::DACL_PRESENT, self.dacl.is_some());

        let mut body = Vec::new();
        let mut offsets = [0u32; 4];
        if let Some(owner) = &self.owner {
            offsets[0] = (SD_HEADER_SIZE + body.len()) as u32;
            owner.write(&mut body)?;
        }
        if let Some(group) = &self.group {
            offsets[1] = (SD_HEADER_SIZE + body.len()) as u32;
            group.write(&mut body)?;
        }
        if let Some(sacl) = &self.sacl {
            offsets[2] = (SD_HEADER_SIZE + body.len()) as u32;
            sacl.write(&mut body)?;
        }
        if let Some(dacl) = &self.dacl {
            offsets[3] = (SD_HEADER_SIZE + body.len()) as u32;
            dacl.write(&mut body)?;
        }

        let mut buf = Vec::with_capacity(SD_HEADER_SIZE + body.len());
        buf.write_u8(SD_REVISION)?;
        buf.write_u8(0)?;
        buf.write_u16::<LittleEndian>(control.bits())?;
        for offset in offsets {
            buf.write_u32::<LittleEndian>(offset)?;
        }
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Which parts of the descriptor are present
    pub fn selector(&self) -> SecurityInformation {
        let mut info = SecurityInformation::empty();
        info.set(SecurityInformation::OWNER, self.owner.is_some());
        info.set(SecurityInformation::GROUP, self.group.is_some());
        info.set(SecurityInformation::SACL, self.sacl.is_some());
        info.set(SecurityInformation::DACL, self.dacl.is_some());
        info
    }
}
