//! SMB1 file operation messages (NT Create, Close, Read, Write)

use super::common::{Fid, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::codec::{utf16_bytes, WireReader};
use crate::protocol::constants::{
    CreateDisposition, CreateOptions, DesiredAccess, DosAttributes, ShareAccess,
};
use byteorder::{LittleEndian, WriteBytesExt};
use std::convert::TryFrom;

/// Impersonation level sent with every create
const IMPERSONATION_IMPERSONATE: u32 = 0x00000002;

/// NT_CREATE_ANDX request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtCreateRequest {
    pub desired_access: DesiredAccess,
    pub file_attributes: DosAttributes,
    pub share_access: ShareAccess,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    pub file_name: String,
}

impl NtCreateRequest {
    pub fn new(file_name: &str, desired_access: DesiredAccess, share_access: ShareAccess) -> Self {
        Self {
            desired_access,
            file_attributes: DosAttributes::NORMAL,
            share_access,
            create_disposition: CreateDisposition::OPEN,
            create_options: CreateOptions::empty(),
            file_name: file_name.to_string(),
        }
    }

    pub fn disposition(mut self, disposition: CreateDisposition) -> Self {
        self.create_disposition = disposition;
        self
    }

    pub fn options(mut self, options: CreateOptions) -> Self {
        self.create_options = options;
        self
    }
}

impl SmbMessage for NtCreateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let _flags = r.u32()?;
        let _root_fid = r.u32()?;
        let desired_access = DesiredAccess::from_bits_retain(r.u32()?);
        let _allocation_size = r.u64()?;
        let file_attributes = DosAttributes::from_bits_retain(r.u32()?);
        let share_access = ShareAccess::from_bits_retain(r.u32()?);
        let create_disposition = CreateDisposition::try_from(r.u32()?)?;
        let create_options = CreateOptions::from_bits_retain(r.u32()?);
        let _impersonation = r.u32()?;
        let _security_flags = r.u8()?;
        let name_len = r.u16()? as usize;
        let file_name = r.utf16(name_len)?;

        Ok(Self {
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16_bytes(&self.file_name);
        if name.len() > u16::MAX as usize {
            return Err(Error::InvalidParameter("file name too long".into()));
        }
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u32::<LittleEndian>(0)?; // flags
        buf.write_u32::<LittleEndian>(0)?; // root directory fid
        buf.write_u32::<LittleEndian>(self.desired_access.bits())?;
        buf.write_u64::<LittleEndian>(0)?; // allocation size
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(self.share_access.bits())?;
        buf.write_u32::<LittleEndian>(self.create_disposition as u32)?;
        buf.write_u32::<LittleEndian>(self.create_options.bits())?;
        buf.write_u32::<LittleEndian>(IMPERSONATION_IMPERSONATE)?;
        buf.write_u8(0)?; // security flags
        buf.write_u16::<LittleEndian>(name.len() as u16)?;
        buf.extend_from_slice(&name);
        Ok(buf)
    }

    fn size(&self) -> usize {
        43 + self.file_name.encode_utf16().count() * 2
    }
}

/// NT_CREATE_ANDX response: the new fid plus the full metadata of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtCreateResponse {
    pub oplock_level: u8,
    pub fid: Fid,
    pub create_action: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub file_attributes: DosAttributes,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_type: u16,
    pub device_state: u16,
    pub directory: bool,
}

impl NtCreateResponse {
    pub const SIZE: usize = 64;
}

impl SmbMessage for NtCreateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut r = WireReader::new(buf);
        Ok(Self {
            oplock_level: r.u8()?,
            fid: Fid(r.u16()?),
            create_action: r.u32()?,
            creation_time: r.u64()?,
            last_access_time: r.u64()?,
            last_write_time: r.u64()?,
            change_time: r.u64()?,
            file_attributes: DosAttributes::from_bits_retain(r.u32()?),
            allocation_size: r.u64()?,
            end_of_file: r.u64()?,
            file_type: r.u16()?,
            device_state: r.u16()?,
            directory: r.u8()? != 0,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u8(self.oplock_level)?;
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u32::<LittleEndian>(self.create_action)?;
        buf.write_u64::<LittleEndian>(self.creation_time)?;
        buf.write_u64::<LittleEndian>(self.last_access_time)?;
        buf.write_u64::<LittleEndian>(self.last_write_time)?;
        buf.write_u64::<LittleEndian>(self.change_time)?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u64::<LittleEndian>(self.allocation_size)?;
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u16::<LittleEndian>(self.file_type)?;
        buf.write_u16::<LittleEndian>(self.device_state)?;
        buf.write_u8(self.directory as u8)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        Self::SIZE
    }
}

/// SMB_COM_CLOSE request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub fid: Fid,
    /// Seconds since 1970; zero leaves the server's value alone
    pub last_write_time: u32,
}

impl SmbMessage for CloseRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            fid: Fid(r.u16()?),
            last_write_time: r.u32()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(6);
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u32::<LittleEndian>(self.last_write_time)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        6
    }
}

/// READ_ANDX request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub fid: Fid,
    pub offset: u64,
    pub max_count: u32,
}

impl SmbMessage for ReadRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            fid: Fid(r.u16()?),
            offset: r.u64()?,
            max_count: r.u32()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(14);
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        buf.write_u32::<LittleEndian>(self.max_count)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        14
    }
}

/// READ_ANDX response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub data: Vec<u8>,
}

impl SmbMessage for ReadResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let len = r.u32()? as usize;
        Ok(Self {
            data: r.bytes(len)?.to_vec(),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    fn size(&self) -> usize {
        4 + self.data.len()
    }
}

/// WRITE_ANDX request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub fid: Fid,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl SmbMessage for WriteRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let fid = Fid(r.u16()?);
        let offset = r.u64()?;
        let len = r.u32()? as usize;
        Ok(Self {
            fid,
            offset,
            data: r.bytes(len)?.to_vec(),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.fid.0)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    fn size(&self) -> usize {
        14 + self.data.len()
    }
}

/// WRITE_ANDX response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub count: u32,
}

impl SmbMessage for WriteResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self { count: r.u32()? })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<LittleEndian>(self.count)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        4
    }
}
