//! Path-based core commands (Delete, Rename, Query Information)

use super::common::SmbMessage;
use crate::error::Result;
use crate::protocol::codec::{write_utf16z, WireReader};
use crate::protocol::constants::DosAttributes;
use byteorder::{LittleEndian, WriteBytesExt};

/// Search attributes that let delete/rename match hidden and system files
pub fn search_all() -> DosAttributes {
    DosAttributes::HIDDEN | DosAttributes::SYSTEM
}

/// SMB_COM_DELETE request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub search_attributes: DosAttributes,
    pub file_name: String,
}

impl SmbMessage for DeleteRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let search_attributes = DosAttributes::from_bits_retain(r.u16()? as u32);
        let file_name = r.utf16z()?;
        Ok(Self {
            search_attributes,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.search_attributes.bits() as u16)?;
        write_utf16z(&mut buf, &self.file_name)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        2 + (self.file_name.encode_utf16().count() + 1) * 2
    }
}

/// SMB_COM_RENAME request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub search_attributes: DosAttributes,
    pub old_name: String,
    pub new_name: String,
}

impl SmbMessage for RenameRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let search_attributes = DosAttributes::from_bits_retain(r.u16()? as u32);
        let old_name = r.utf16z()?;
        let new_name = r.utf16z()?;
        Ok(Self {
            search_attributes,
            old_name,
            new_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.search_attributes.bits() as u16)?;
        write_utf16z(&mut buf, &self.old_name)?;
        write_utf16z(&mut buf, &self.new_name)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        2 + (self.old_name.encode_utf16().count() + 1) * 2
            + (self.new_name.encode_utf16().count() + 1) * 2
    }
}

/// SMB_COM_QUERY_INFORMATION request; the reply body is the legacy attribute layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInformationRequest {
    pub file_name: String,
}

impl SmbMessage for QueryInformationRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            file_name: r.utf16z()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        write_utf16z(&mut buf, &self.file_name)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        (self.file_name.encode_utf16().count() + 1) * 2
    }
}
