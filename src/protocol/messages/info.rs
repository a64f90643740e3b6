//! TRANS2 query/set path and file information parameters, plus the small
//! fixed-layout data blocks those requests carry

use super::common::{Fid, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::codec::{utf16_bytes, write_utf16z, WireReader};
use byteorder::{LittleEndian, WriteBytesExt};

/// Parameters of QUERY_PATH_INFORMATION and SET_PATH_INFORMATION
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfoParams {
    pub level: u16,
    pub path: String,
}

impl SmbMessage for PathInfoParams {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let level = r.u16()?;
        let _reserved = r.u32()?;
        let path = r.utf16z()?;
        Ok(Self { level, path })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.level)?;
        buf.write_u32::<LittleEndian>(0)?;
        write_utf16z(&mut buf, &self.path)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        6 + (self.path.encode_utf16().count() + 1) * 2
    }
}

/// Parameters of QUERY_FILE_INFORMATION and SET_FILE_INFORMATION
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfoParams {
    pub fid: Fid,
    pub level: u16,
}

impl SmbMessage for FileInfoParams {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let fid = Fid(r.u16()?);
        let level = r.u16()?;
        Ok(Self { fid, level })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(6);
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u16::<LittleEndian>(self.level)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        6
    }
}

/// SET_FILE_DISPOSITION_INFO data
pub fn disposition_info(delete_pending: bool) -> Vec<u8> {
    vec![delete_pending as u8]
}

/// SET_FILE_END_OF_FILE_INFO data
pub fn end_of_file_info(size: u64) -> Vec<u8> {
    size.to_le_bytes().to_vec()
}

/// SMB_POSIX_PATH_UNLINK data
pub fn posix_unlink_info(directory: bool) -> Vec<u8> {
    (directory as u16).to_le_bytes().to_vec()
}

/// UNIX link target data (set and query)
pub fn unix_link_data(target: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((target.len() + 1) * 2);
    write_utf16z(&mut buf, target)?;
    Ok(buf)
}

pub fn parse_unix_link_data(buf: &[u8]) -> Result<String> {
    WireReader::new(buf).utf16z()
}

/// Pass-through FileRenameInformation data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameInformation {
    pub replace_if_exists: bool,
    pub file_name: String,
}

impl SmbMessage for RenameInformation {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let replace_if_exists = r.u8()? != 0;
        r.skip(3)?;
        let _root_fid = r.u32()?;
        let name_len = r.u32()? as usize;
        let file_name = r.utf16(name_len)?;
        Ok(Self {
            replace_if_exists,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16_bytes(&self.file_name);
        let mut buf = Vec::with_capacity(12 + name.len());
        buf.write_u8(self.replace_if_exists as u8)?;
        buf.extend_from_slice(&[0u8; 3]);
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(name.len() as u32)?;
        buf.extend_from_slice(&name);
        Ok(buf)
    }

    fn size(&self) -> usize {
        12 + self.file_name.encode_utf16().count() * 2
    }
}

/// One entry of QUERY_FILE_STREAM_INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub name: String,
    pub size: u64,
    pub allocation_size: u64,
}

pub fn parse_stream_info(buf: &[u8]) -> Result<Vec<StreamEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    if buf.is_empty() {
        return Ok(entries);
    }
    loop {
        let mut r = WireReader::new(buf);
        r.seek(offset)?;
        let next = r.u32()? as usize;
        let name_len = r.u32()? as usize;
        let size = r.u64()?;
        let allocation_size = r.u64()?;
        let name = r.utf16(name_len)?;
        entries.push(StreamEntry {
            name,
            size,
            allocation_size,
        });
        if next == 0 {
            break;
        }
        offset = offset
            .checked_add(next)
            .ok_or_else(|| Error::ParseError("stream entry offset overflow".into()))?;
    }
    Ok(entries)
}

pub fn encode_stream_info(entries: &[StreamEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let name = utf16_bytes(&entry.name);
        let len = 24 + name.len();
        let next = if i + 1 < entries.len() { len } else { 0 };
        buf.write_u32::<LittleEndian>(next as u32)?;
        buf.write_u32::<LittleEndian>(name.len() as u32)?;
        buf.write_u64::<LittleEndian>(entry.size)?;
        buf.write_u64::<LittleEndian>(entry.allocation_size)?;
        buf.extend_from_slice(&name);
    }
    Ok(buf)
}
