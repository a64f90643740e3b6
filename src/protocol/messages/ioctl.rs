//! NT_TRANSACT IOCTL setup and the symbolic-link reparse buffer

use crate::error::{Error, Result};
use crate::protocol::codec::{utf16_bytes, WireReader};
use crate::protocol::constants::IO_REPARSE_TAG_SYMLINK;
use byteorder::{LittleEndian, WriteBytesExt};

use super::common::Fid;

/// Flag in the symlink reparse buffer marking a relative target
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x00000001;

/// Prefix NT puts in front of absolute substitute names
const NT_PATH_PREFIX: &str = "\\??\\";

/// Setup words of an NT_TRANSACT IOCTL request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoctlSetup {
    pub function_code: u32,
    pub fid: Fid,
    pub is_fsctl: bool,
    pub flags: u8,
}

impl IoctlSetup {
    pub const SIZE: usize = 8;

    pub fn fsctl(function_code: u32, fid: Fid) -> Self {
        Self {
            function_code,
            fid,
            is_fsctl: true,
            flags: 0,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            function_code: r.u32()?,
            fid: Fid(r.u16()?),
            is_fsctl: r.u8()? != 0,
            flags: r.u8()?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u32::<LittleEndian>(self.function_code)?;
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u8(self.is_fsctl as u8)?;
        buf.write_u8(self.flags)?;
        Ok(buf)
    }
}

/// REPARSE_DATA_BUFFER for IO_REPARSE_TAG_SYMLINK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkReparseBuffer {
    pub substitute_name: String,
    pub print_name: String,
    pub flags: u32,
}

impl SymlinkReparseBuffer {
    /// Buffer for a link pointing at `target`
    pub fn new(target: &str) -> Self {
        let relative = !(target.starts_with('\\') || target.starts_with('/'));
        let substitute_name = if relative {
            target.to_string()
        } else {
            format!("{}{}", NT_PATH_PREFIX, target.trim_start_matches(['\\', '/']))
        };
        Self {
            substitute_name,
            print_name: target.to_string(),
            flags: if relative { SYMLINK_FLAG_RELATIVE } else { 0 },
        }
    }

    pub fn is_relative(&self) -> bool {
        self.flags & SYMLINK_FLAG_RELATIVE != 0
    }

    /// The link target as the user wrote it
    pub fn target(&self) -> String {
        if !self.print_name.is_empty() {
            return self.print_name.clone();
        }
        self.substitute_name
            .strip_prefix(NT_PATH_PREFIX)
            .unwrap_or(&self.substitute_name)
            .to_string()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let subst = utf16_bytes(&self.substitute_name);
        let print = utf16_bytes(&self.print_name);
        let data_len = 12 + subst.len() + print.len();
        if data_len > u16::MAX as usize {
            return Err(Error::InvalidParameter("symlink target too long".into()));
        }
        let mut buf = Vec::with_capacity(8 + data_len);
        buf.write_u32::<LittleEndian>(IO_REPARSE_TAG_SYMLINK)?;
        buf.write_u16::<LittleEndian>(data_len as u16)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(subst.len() as u16)?;
        buf.write_u16::<LittleEndian>(subst.len() as u16)?;
        buf.write_u16::<LittleEndian>(print.len() as u16)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        buf.extend_from_slice(&subst);
        buf.extend_from_slice(&print);
        Ok(buf)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let tag = r.u32()?;
        if tag != IO_REPARSE_TAG_SYMLINK {
            return Err(Error::InvalidParameter(format!(
                "reparse tag 0x{:08x} is not a symlink",
                tag
            )));
        }
        let data_len = r.u16()? as usize;
        let _reserved = r.u16()?;
        let subst_offset = r.u16()? as usize;
        let subst_len = r.u16()? as usize;
        let print_offset = r.u16()? as usize;
        let print_len = r.u16()? as usize;
        let flags = r.u32()?;

        let path_buffer = r.rest();
        let path_len = data_len
            .checked_sub(12)
            .ok_or_else(|| Error::ParseError("reparse data length too small".into()))?;
        if path_buffer.len() < path_len {
            return Err(Error::ParseError(format!(
                "reparse buffer truncated: {} of {} bytes",
                path_buffer.len(),
                path_len
            )));
        }
        let path_buffer = &path_buffer[..path_len];
        let name_at = |offset: usize, len: usize| -> Result<String> {
            let mut pr = WireReader::new(path_buffer);
            pr.seek(offset)?;
            pr.utf16(len)
        };
        Ok(Self {
            substitute_name: name_at(subst_offset, subst_len)?,
            print_name: name_at(print_offset, print_len)?,
            flags,
        })
    }
}

/// Reparse tag at the start of any reparse buffer
pub fn reparse_tag(buf: &[u8]) -> Result<u32> {
    WireReader::new(buf).u32()
}
