//! TRANS2 FIND_FIRST2 / FIND_NEXT2 parameters, FIND_CLOSE2, and the find entry layouts

use super::common::SmbMessage;
use crate::attributes::{
    decode_directory_block, decode_standard_block, decode_unix_basic, encode_directory_block,
    encode_standard_block, encode_unix_basic, FileAttributes, UNIX_BASIC_SIZE,
};
use crate::error::{Error, Result};
use crate::protocol::codec::{utf16_bytes, write_utf16z, WireReader};
use crate::protocol::constants::{find_level, DosAttributes};
use byteorder::{LittleEndian, WriteBytesExt};

/// Info levels a listing can be requested with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindLevel {
    /// SMB_INFO_STANDARD with resume keys
    Standard,
    /// SMB_FIND_FILE_BOTH_DIRECTORY_INFO
    BothDirectory,
    /// SMB_FIND_FILE_UNIX
    Unix,
}

impl FindLevel {
    pub fn code(self) -> u16 {
        match self {
            FindLevel::Standard => find_level::INFO_STANDARD,
            FindLevel::BothDirectory => find_level::FIND_FILE_BOTH_DIRECTORY_INFO,
            FindLevel::Unix => find_level::FIND_FILE_UNIX,
        }
    }

    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            find_level::INFO_STANDARD => Ok(FindLevel::Standard),
            find_level::FIND_FILE_BOTH_DIRECTORY_INFO => Ok(FindLevel::BothDirectory),
            find_level::FIND_FILE_UNIX => Ok(FindLevel::Unix),
            other => Err(Error::NotSupported(format!("find level 0x{:04x}", other))),
        }
    }

    /// Fixed bytes of one entry, before the name
    pub fn fixed_entry_size(self) -> usize {
        match self {
            FindLevel::Standard => STANDARD_FIXED,
            FindLevel::BothDirectory => BOTH_DIRECTORY_FIXED,
            FindLevel::Unix => UNIX_FIXED,
        }
    }

    /// Smallest plausible entry, used to size the search count
    pub fn min_entry_size(self) -> usize {
        // fixed part plus a short name and its terminator
        self.fixed_entry_size() + 2 * 4
    }
}

// resume key + standard block + name length byte
const STANDARD_FIXED: usize = 4 + 22 + 1;
// next offset + index + 52-byte block + name len + ea size + short len + reserved + short name
const BOTH_DIRECTORY_FIXED: usize = 4 + 4 + 52 + 4 + 4 + 1 + 1 + 24;
// next offset + resume key + UNIX basic
const UNIX_FIXED: usize = 4 + 4 + UNIX_BASIC_SIZE;

/// One decoded directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct FindEntry {
    pub resume_key: u32,
    pub name: String,
    pub attrs: FileAttributes,
}

/// Where an entry sits inside a reply's data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySpan {
    pub start: usize,
    /// One past the last byte of the entry
    pub end: usize,
    /// Offset of the next entry, or `None` if this entry ends the buffer
    pub next: Option<usize>,
}

impl EntrySpan {
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// Decode the entry starting at `offset`
pub fn decode_entry(level: FindLevel, buf: &[u8], offset: usize) -> Result<(FindEntry, EntrySpan)> {
    let mut r = WireReader::new(buf);
    r.seek(offset)?;
    if r.remaining() < level.fixed_entry_size() {
        return Err(Error::ParseError(format!(
            "find entry at {} truncated: {} bytes left",
            offset,
            r.remaining()
        )));
    }

    let (entry, next_offset) = match level {
        FindLevel::Standard => {
            let resume_key = r.u32()?;
            let attrs = decode_standard_block(&mut r)?;
            let name_len = r.u8()? as usize;
            let name = r.utf16(name_len)?;
            // NUL terminator after the name
            r.skip(2)?;
            let next = r.position() - offset;
            (
                FindEntry {
                    resume_key,
                    name,
                    attrs,
                },
                next,
            )
        }
        FindLevel::BothDirectory => {
            let next = r.u32()? as usize;
            let resume_key = r.u32()?;
            let mut attrs = decode_directory_block(&mut r)?;
            let name_len = r.u32()? as usize;
            // reparse points carry their tag where the EA size would be
            let ea_size = r.u32()?;
            if attrs.dos_attributes.contains(DosAttributes::REPARSE_POINT) {
                attrs.reparse_tag = ea_size;
            }
            let _short_len = r.u8()?;
            r.skip(1 + 24)?;
            let name = r.utf16(name_len)?;
            (
                FindEntry {
                    resume_key,
                    name,
                    attrs,
                },
                next,
            )
        }
        FindLevel::Unix => {
            let next = r.u32()? as usize;
            let resume_key = r.u32()?;
            let attrs = decode_unix_basic(&mut r)?;
            let name = r.utf16z()?;
            (
                FindEntry {
                    resume_key,
                    name,
                    attrs,
                },
                next,
            )
        }
    };

    let end = r.position();
    let next = match next_offset {
        0 => None,
        n if offset + n < end => {
            return Err(Error::ParseError(format!(
                "find entry at {} overlaps its successor",
                offset
            )))
        }
        n => Some(offset + n),
    };
    Ok((
        entry,
        EntrySpan {
            start: offset,
            end,
            next,
        },
    ))
}

/// Encoded entries plus the offset of the last entry's name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedEntries {
    pub data: Vec<u8>,
    pub last_name_offset: u16,
}

/// Lay out entries the way a server answers a find request
pub fn encode_entries(level: FindLevel, entries: &[FindEntry]) -> Result<EncodedEntries> {
    let mut data = Vec::new();
    let mut last_name_offset = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        let start = data.len();
        let last = i + 1 == entries.len();
        let name = utf16_bytes(&entry.name);
        match level {
            FindLevel::Standard => {
                if name.len() > u8::MAX as usize {
                    return Err(Error::InvalidParameter("name too long for INFO_STANDARD".into()));
                }
                data.write_u32::<LittleEndian>(entry.resume_key)?;
                encode_standard_block(&mut data, &entry.attrs)?;
                data.write_u8(name.len() as u8)?;
                last_name_offset = data.len();
                data.extend_from_slice(&name);
                data.write_u16::<LittleEndian>(0)?;
            }
            FindLevel::BothDirectory => {
                // Entries are 8-byte aligned
                let len = (BOTH_DIRECTORY_FIXED + name.len() + 7) & !7;
                data.write_u32::<LittleEndian>(if last { 0 } else { len as u32 })?;
                data.write_u32::<LittleEndian>(entry.resume_key)?;
                encode_directory_block(&mut data, &entry.attrs)?;
                data.write_u32::<LittleEndian>(name.len() as u32)?;
                let ea_size = if entry.attrs.dos_attributes.contains(DosAttributes::REPARSE_POINT) {
                    entry.attrs.reparse_tag
                } else {
                    0
                };
                data.write_u32::<LittleEndian>(ea_size)?;
                data.write_u8(0)?;
                data.write_u8(0)?;
                data.extend_from_slice(&[0u8; 24]);
                last_name_offset = data.len();
                data.extend_from_slice(&name);
                if !last {
                    data.resize(start + len, 0);
                }
            }
            FindLevel::Unix => {
                let len = (UNIX_FIXED + name.len() + 2 + 7) & !7;
                data.write_u32::<LittleEndian>(if last { 0 } else { len as u32 })?;
                data.write_u32::<LittleEndian>(entry.resume_key)?;
                encode_unix_basic(&mut data, &entry.attrs)?;
                last_name_offset = data.len();
                write_utf16z(&mut data, &entry.name)?;
                if !last {
                    data.resize(start + len, 0);
                }
            }
        }
    }
    let last_name_offset = u16::try_from(last_name_offset)
        .map_err(|_| Error::InvalidParameter("find reply larger than 64k".into()))?;
    Ok(EncodedEntries {
        data,
        last_name_offset,
    })
}

/// TRANS2_FIND_FIRST2 parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindFirst2Params {
    pub search_attributes: DosAttributes,
    pub search_count: u16,
    pub flags: u16,
    pub level: u16,
    pub storage_type: u32,
    pub pattern: String,
}

impl SmbMessage for FindFirst2Params {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            search_attributes: DosAttributes::from_bits_retain(r.u16()? as u32),
            search_count: r.u16()?,
            flags: r.u16()?,
            level: r.u16()?,
            storage_type: r.u32()?,
            pattern: r.utf16z()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.search_attributes.bits() as u16)?;
        buf.write_u16::<LittleEndian>(self.search_count)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.level)?;
        buf.write_u32::<LittleEndian>(self.storage_type)?;
        write_utf16z(&mut buf, &self.pattern)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        12 + (self.pattern.encode_utf16().count() + 1) * 2
    }
}

/// TRANS2_FIND_NEXT2 parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNext2Params {
    pub sid: u16,
    pub search_count: u16,
    pub level: u16,
    pub resume_key: u32,
    pub flags: u16,
    /// Empty when no resume name was captured
    pub resume_name: String,
}

impl SmbMessage for FindNext2Params {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            sid: r.u16()?,
            search_count: r.u16()?,
            level: r.u16()?,
            resume_key: r.u32()?,
            flags: r.u16()?,
            resume_name: r.utf16z()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.sid)?;
        buf.write_u16::<LittleEndian>(self.search_count)?;
        buf.write_u16::<LittleEndian>(self.level)?;
        buf.write_u32::<LittleEndian>(self.resume_key)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        write_utf16z(&mut buf, &self.resume_name)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        12 + (self.resume_name.encode_utf16().count() + 1) * 2
    }
}

/// Response parameters of FIND_FIRST2 and FIND_NEXT2
///
/// FIND_NEXT2 replies carry no search id; `sid` is `None` for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResponseParams {
    pub sid: Option<u16>,
    pub search_count: u16,
    pub end_of_search: bool,
    pub ea_error_offset: u16,
    pub last_name_offset: u16,
}

impl FindResponseParams {
    pub fn parse_first(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let sid = r.u16()?;
        let mut params = Self::parse_rest(&mut r)?;
        params.sid = Some(sid);
        Ok(params)
    }

    pub fn parse_next(buf: &[u8]) -> Result<Self> {
        Self::parse_rest(&mut WireReader::new(buf))
    }

    fn parse_rest(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sid: None,
            search_count: r.u16()?,
            end_of_search: r.u16()? != 0,
            ea_error_offset: r.u16()?,
            last_name_offset: r.u16()?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(10);
        if let Some(sid) = self.sid {
            buf.write_u16::<LittleEndian>(sid)?;
        }
        buf.write_u16::<LittleEndian>(self.search_count)?;
        buf.write_u16::<LittleEndian>(self.end_of_search as u16)?;
        buf.write_u16::<LittleEndian>(self.ea_error_offset)?;
        buf.write_u16::<LittleEndian>(self.last_name_offset)?;
        Ok(buf)
    }
}

/// SMB_COM_FIND_CLOSE2 request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindClose2Request {
    pub sid: u16,
}

impl SmbMessage for FindClose2Request {
    fn parse(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            sid: WireReader::new(buf).u16()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.sid.to_le_bytes().to_vec())
    }

    fn size(&self) -> usize {
        2
    }
}
