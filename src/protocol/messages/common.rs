//! Common types and traits for SMB1 messages

use crate::error::{Error, Result};
use crate::protocol::codec::WireReader;
use byteorder::{LittleEndian, WriteBytesExt};

/// Trait for SMB message bodies that can be parsed from and serialized to bytes
pub trait SmbMessage: Sized {
    /// Parse message from bytes
    fn parse(buf: &[u8]) -> Result<Self>;

    /// Serialize message to bytes
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Get the size of the message when serialized
    fn size(&self) -> usize;
}

/// Server-assigned file id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fid(pub u16);

/// Transaction request shared by TRANSACTION2 and NT_TRANSACT
///
/// `function` is the TRANS2 subcommand or the NT_TRANSACT function; `setup` carries
/// any extra setup words (the IOCTL descriptor for NT_TRANSACT IOCTL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransRequest {
    pub function: u16,
    pub setup: Vec<u8>,
    pub max_param_count: u32,
    pub max_data_count: u32,
    pub params: Vec<u8>,
    pub data: Vec<u8>,
}

impl TransRequest {
    pub fn new(function: u16, params: Vec<u8>, data: Vec<u8>, max_data_count: u32) -> Self {
        Self {
            function,
            setup: Vec::new(),
            max_param_count: 64,
            max_data_count,
            params,
            data,
        }
    }

    pub fn with_setup(mut self, setup: Vec<u8>) -> Self {
        self.setup = setup;
        self
    }
}

impl SmbMessage for TransRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let function = r.u16()?;
        let setup_len = r.u8()? as usize;
        let max_param_count = r.u32()?;
        let max_data_count = r.u32()?;
        let param_count = r.u32()? as usize;
        let data_count = r.u32()? as usize;
        let setup = r.bytes(setup_len)?.to_vec();
        let params = r.bytes(param_count)?.to_vec();
        let data = r.bytes(data_count)?.to_vec();
        Ok(Self {
            function,
            setup,
            max_param_count,
            max_data_count,
            params,
            data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        if self.setup.len() > u8::MAX as usize {
            return Err(Error::InvalidParameter("setup too long".into()));
        }
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.function)?;
        buf.write_u8(self.setup.len() as u8)?;
        buf.write_u32::<LittleEndian>(self.max_param_count)?;
        buf.write_u32::<LittleEndian>(self.max_data_count)?;
        buf.write_u32::<LittleEndian>(self.params.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.extend_from_slice(&self.setup);
        buf.extend_from_slice(&self.params);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    fn size(&self) -> usize {
        19 + self.setup.len() + self.params.len() + self.data.len()
    }
}

/// Transaction response: parameter and data blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransResponse {
    pub params: Vec<u8>,
    pub data: Vec<u8>,
}

impl SmbMessage for TransResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let param_count = r.u32()? as usize;
        let data_count = r.u32()? as usize;
        let params = r.bytes(param_count)?.to_vec();
        let data = r.bytes(data_count)?.to_vec();
        Ok(Self { params, data })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u32::<LittleEndian>(self.params.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.extend_from_slice(&self.params);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    fn size(&self) -> usize {
        8 + self.params.len() + self.data.len()
    }
}
