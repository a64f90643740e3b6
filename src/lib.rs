//! SMB1/CIFS client operations in Rust
//!
//! Request building, reply decoding and open-handle bookkeeping for a CIFS mount,
//! written against an abstract request/reply [`transport::Channel`].

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod attributes;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(feature = "client")]
pub mod client;


pub use error::{Error, Result};
