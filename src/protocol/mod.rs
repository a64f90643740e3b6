//! SMB1/CIFS protocol definitions

pub mod codec;
pub mod constants;
pub mod header;
pub mod messages;

pub use header::*;
