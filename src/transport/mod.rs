//! Request/reply channel the operation library talks through
//!
//! Framing, session setup and single-request retransmission belong to the
//! implementation of [`Channel`]; the library only builds request bodies, hands
//! them over and reacts to the reply (or to the transport error that replaced it).

use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{Dialect, ServerCapabilities, SmbCommand, DEFAULT_TRANSMIT_MAX};
use crate::protocol::header::SmbHeader;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

/// Negotiated session parameters the channel reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub dialect: Dialect,
    pub capabilities: ServerCapabilities,
    /// Largest reply the server will send
    pub transmit_max: u32,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            dialect: Dialect::NtLm012,
            capabilities: ServerCapabilities::UNICODE
                | ServerCapabilities::LARGE_FILES
                | ServerCapabilities::NT_SMBS
                | ServerCapabilities::STATUS32
                | ServerCapabilities::NT_FIND,
            transmit_max: DEFAULT_TRANSMIT_MAX,
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbRequest {
    pub header: SmbHeader,
    pub body: Bytes,
}

impl SmbRequest {
    pub fn new(command: SmbCommand, body: Vec<u8>) -> Self {
        Self {
            header: SmbHeader::new(command),
            body: Bytes::from(body),
        }
    }

    /// Process id the server scopes byte-range locks by
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.header = self.header.with_pid(pid);
        self
    }

    pub fn command(&self) -> SmbCommand {
        self.header.command
    }

    /// Header followed by body, as it goes on the wire
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(SmbHeader::SIZE + self.body.len());
        buf.put_slice(&self.header.serialize()?);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = SmbHeader::parse(buf)?;
        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&buf[SmbHeader::SIZE..]),
        })
    }
}

/// Incoming reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbReply {
    pub header: SmbHeader,
    pub body: Bytes,
    /// The channel had to resend the request after a reconnect before this reply arrived
    pub retransmitted: bool,
}

impl SmbReply {
    pub fn new(command: SmbCommand, status: NtStatus, body: Vec<u8>) -> Self {
        let mut header = SmbHeader::new(command);
        header.status = status as u32;
        Self {
            header,
            body: Bytes::from(body),
            retransmitted: false,
        }
    }

    pub fn status(&self) -> NtStatus {
        self.header.nt_status()
    }

    /// Body of a successful reply, or the mapped status error
    pub fn into_result(self, context: &str) -> Result<Bytes> {
        // Classify on the raw value so unmodeled warnings still pass.
        if self.header.status & 0xC000_0000 == 0xC000_0000 {
            return Err(Error::from_status(self.status(), context));
        }
        Ok(self.body)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(SmbHeader::SIZE + self.body.len());
        buf.put_slice(&self.header.serialize()?);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    pub fn from_bytes(buf: &[u8], retransmitted: bool) -> Result<Self> {
        let header = SmbHeader::parse(buf)?;
        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&buf[SmbHeader::SIZE..]),
            retransmitted,
        })
    }
}

/// Trait for request/reply channels
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one request and wait for its reply
    ///
    /// Connection loss is reported as [`Error::NotConnected`], a forced unmount as
    /// [`Error::ForcedUnmount`]. Server statuses come back inside the reply.
    async fn transact(&self, request: SmbRequest) -> Result<SmbReply>;

    /// Parameters negotiated for the current session
    fn session_info(&self) -> SessionInfo {
        SessionInfo::default()
    }
}
