//! Attribute translation
//!
//! Every info level the server can answer a metadata query with is decoded into the
//! same [`FileAttributes`] record. Decoding is pure; nothing here touches a node.

use crate::error::{Error, Result};
use crate::protocol::codec::{
    datetime_to_dos, datetime_to_nt_time, datetime_to_utime, dos_to_datetime, fixed_epoch,
    nt_time_to_datetime, utime_to_datetime, WireReader,
};
use crate::protocol::constants::{info_level, Dialect, DosAttributes};
use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::time::Instant;

/// "No change" sentinel for 64-bit fields of SMB_SET_FILE_UNIX_BASIC
pub const UNIX_NO_CHANGE: u64 = u64::MAX;

/// "No change" sentinel for the permission field of SMB_SET_FILE_UNIX_BASIC
pub const UNIX_MODE_NO_CHANGE: u32 = u32::MAX;

/// Info levels the translator understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoLevel {
    /// SMB_QUERY_FILE_BASIC_INFO: times and attributes
    Basic,
    /// SMB_QUERY_FILE_ALL_INFO: basic + standard + name
    All,
    /// SMB_QUERY_FILE_UNIX_BASIC
    UnixBasic,
    /// SMB_COM_QUERY_INFORMATION reply
    LegacyStandard,
}

impl InfoLevel {
    /// TRANS2 level code, if the level is queried through TRANS2
    pub fn code(self) -> Option<u16> {
        match self {
            InfoLevel::Basic => Some(info_level::QUERY_FILE_BASIC_INFO),
            InfoLevel::All => Some(info_level::QUERY_FILE_ALL_INFO),
            InfoLevel::UnixBasic => Some(info_level::QUERY_FILE_UNIX_BASIC),
            InfoLevel::LegacyStandard => None,
        }
    }

    /// Fixed part of the layout; shorter replies are rejected
    pub fn min_size(self) -> usize {
        match self {
            InfoLevel::Basic => BASIC_SIZE,
            InfoLevel::All => ALL_FIXED_SIZE,
            InfoLevel::UnixBasic => UNIX_BASIC_SIZE,
            InfoLevel::LegacyStandard => LEGACY_SIZE,
        }
    }
}

const BASIC_SIZE: usize = 40;
const ALL_FIXED_SIZE: usize = 72;
pub(crate) const UNIX_BASIC_SIZE: usize = 100;
const LEGACY_SIZE: usize = 20;

/// File type of a remote node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    fn from_unix(value: u32) -> Result<Self> {
        Ok(match value {
            0 => FileKind::Regular,
            1 => FileKind::Directory,
            2 => FileKind::Symlink,
            3 => FileKind::CharDevice,
            4 => FileKind::BlockDevice,
            5 => FileKind::Fifo,
            6 => FileKind::Socket,
            other => {
                return Err(Error::ParseError(format!("unknown UNIX file type {}", other)));
            }
        })
    }

    fn to_unix(self) -> u32 {
        match self {
            FileKind::Regular => 0,
            FileKind::Directory => 1,
            FileKind::Symlink => 2,
            FileKind::CharDevice => 3,
            FileKind::BlockDevice => 4,
            FileKind::Fifo => 5,
            FileKind::Socket => 6,
        }
    }

    fn from_dos(attrs: DosAttributes) -> Self {
        if attrs.contains(DosAttributes::DIRECTORY) {
            FileKind::Directory
        } else {
            FileKind::Regular
        }
    }
}

/// POSIX metadata reported by the UNIX extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixMetadata {
    /// Permission bits (0o7777)
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub nlinks: u64,
    pub unique_id: u64,
}

/// Normalized snapshot of a remote file's metadata
#[derive(Debug, Clone)]
pub struct FileAttributes {
    pub kind: FileKind,
    pub size: u64,
    pub allocation_size: u64,
    pub create_time: DateTime<Utc>,
    pub access_time: DateTime<Utc>,
    pub write_time: DateTime<Utc>,
    pub change_time: DateTime<Utc>,
    pub dos_attributes: DosAttributes,
    pub unix: Option<UnixMetadata>,
    /// Zero when the file is not a reparse point
    pub reparse_tag: u32,
    pub delete_pending: bool,
    /// When the record was decoded
    pub captured_at: Instant,
}

// Two snapshots are equal when they describe the same file state.
impl PartialEq for FileAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.size == other.size
            && self.allocation_size == other.allocation_size
            && self.create_time == other.create_time
            && self.access_time == other.access_time
            && self.write_time == other.write_time
            && self.change_time == other.change_time
            && self.dos_attributes == other.dos_attributes
            && self.unix == other.unix
            && self.reparse_tag == other.reparse_tag
            && self.delete_pending == other.delete_pending
    }
}

impl FileAttributes {
    /// Empty record of the given kind with every timestamp at the fixed epoch
    pub fn new(kind: FileKind) -> Self {
        let epoch = fixed_epoch();
        Self {
            kind,
            size: 0,
            allocation_size: 0,
            create_time: epoch,
            access_time: epoch,
            write_time: epoch,
            change_time: epoch,
            dos_attributes: DosAttributes::empty(),
            unix: None,
            reparse_tag: 0,
            delete_pending: false,
            captured_at: Instant::now(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Age of the snapshot
    pub fn age(&self) -> std::time::Duration {
        self.captured_at.elapsed()
    }
}

/// Decode a metadata reply of the given level
pub fn translate(level: InfoLevel, raw: &[u8], dialect: Dialect) -> Result<FileAttributes> {
    if raw.len() < level.min_size() {
        return Err(Error::ParseError(format!(
            "{:?} reply is {} bytes, need {}",
            level,
            raw.len(),
            level.min_size()
        )));
    }
    let mut r = WireReader::new(raw);
    let mut attrs = match level {
        InfoLevel::Basic => decode_basic(&mut r)?,
        InfoLevel::All => decode_all(&mut r)?,
        InfoLevel::UnixBasic => decode_unix_basic(&mut r)?,
        InfoLevel::LegacyStandard => decode_legacy(&mut r)?,
    };
    if dialect < Dialect::NtLm012 {
        // Old servers only keep a write time.
        attrs.access_time = attrs.write_time;
        attrs.change_time = attrs.write_time;
    }
    Ok(attrs)
}

/// Encode a record in the layout of the given level
///
/// Fields the level cannot carry are dropped.
pub fn encode(level: InfoLevel, attrs: &FileAttributes) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(level.min_size());
    match level {
        InfoLevel::Basic => encode_basic(&mut buf, attrs)?,
        InfoLevel::All => {
            encode_basic(&mut buf, attrs)?;
            buf.write_u64::<LittleEndian>(attrs.allocation_size)?;
            buf.write_u64::<LittleEndian>(attrs.size)?;
            let nlinks = attrs.unix.map(|u| u.nlinks).unwrap_or(1);
            buf.write_u32::<LittleEndian>(nlinks as u32)?;
            buf.write_u8(attrs.delete_pending as u8)?;
            buf.write_u8(attrs.is_dir() as u8)?;
            buf.write_u16::<LittleEndian>(0)?;
            buf.write_u32::<LittleEndian>(0)?; // EA size
            buf.write_u32::<LittleEndian>(0)?; // name length
        }
        InfoLevel::UnixBasic => encode_unix_basic(&mut buf, attrs)?,
        InfoLevel::LegacyStandard => {
            buf.write_u16::<LittleEndian>(attrs.dos_attributes.bits() as u16)?;
            buf.write_u32::<LittleEndian>(datetime_to_utime(&attrs.write_time))?;
            buf.write_u32::<LittleEndian>(attrs.size.min(u32::MAX as u64) as u32)?;
            buf.extend_from_slice(&[0u8; 10]);
        }
    }
    Ok(buf)
}

fn decode_times(r: &mut WireReader<'_>, attrs: &mut FileAttributes) -> Result<()> {
    attrs.create_time = nt_time_to_datetime(r.u64()?);
    attrs.access_time = nt_time_to_datetime(r.u64()?);
    attrs.write_time = nt_time_to_datetime(r.u64()?);
    attrs.change_time = nt_time_to_datetime(r.u64()?);
    Ok(())
}

fn encode_times(buf: &mut Vec<u8>, attrs: &FileAttributes) -> Result<()> {
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.create_time))?;
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.access_time))?;
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.write_time))?;
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.change_time))?;
    Ok(())
}

fn decode_basic(r: &mut WireReader<'_>) -> Result<FileAttributes> {
    let mut attrs = FileAttributes::new(FileKind::Regular);
    decode_times(r, &mut attrs)?;
    attrs.dos_attributes = DosAttributes::from_bits_retain(r.u32()?);
    let _reserved = r.u32()?;
    attrs.kind = FileKind::from_dos(attrs.dos_attributes);
    Ok(attrs)
}

fn encode_basic(buf: &mut Vec<u8>, attrs: &FileAttributes) -> Result<()> {
    encode_times(buf, attrs)?;
    buf.write_u32::<LittleEndian>(attrs.dos_attributes.bits())?;
    buf.write_u32::<LittleEndian>(0)?;
    Ok(())
}

fn decode_all(r: &mut WireReader<'_>) -> Result<FileAttributes> {
    let mut attrs = decode_basic(r)?;
    attrs.allocation_size = r.u64()?;
    attrs.size = r.u64()?;
    let _nlinks = r.u32()?;
    attrs.delete_pending = r.u8()? != 0;
    let _directory = r.u8()?;
    r.skip(2)?;
    let _ea_size = r.u32()?;
    let name_len = r.u32()? as usize;
    // The trailing name is not kept but must be present in full.
    if name_len > r.remaining() {
        return Err(Error::ParseError(format!(
            "all-info name length {} exceeds reply",
            name_len
        )));
    }
    Ok(attrs)
}

pub(crate) fn decode_unix_basic(r: &mut WireReader<'_>) -> Result<FileAttributes> {
    let mut attrs = FileAttributes::new(FileKind::Regular);
    attrs.size = r.u64()?;
    attrs.allocation_size = r.u64()?;
    attrs.change_time = nt_time_to_datetime(r.u64()?);
    attrs.access_time = nt_time_to_datetime(r.u64()?);
    attrs.write_time = nt_time_to_datetime(r.u64()?);
    let uid = r.u64()?;
    let gid = r.u64()?;
    attrs.kind = FileKind::from_unix(r.u32()?)?;
    let _dev_major = r.u64()?;
    let _dev_minor = r.u64()?;
    let unique_id = r.u64()?;
    let mode = r.u32()? & 0o7777;
    let nlinks = r.u64()?;
    attrs.unix = Some(UnixMetadata {
        mode,
        uid,
        gid,
        nlinks,
        unique_id,
    });
    if attrs.kind == FileKind::Directory {
        attrs.dos_attributes = DosAttributes::DIRECTORY;
    }
    Ok(attrs)
}

pub(crate) fn encode_unix_basic(buf: &mut Vec<u8>, attrs: &FileAttributes) -> Result<()> {
    let unix = attrs.unix.unwrap_or(UnixMetadata {
        mode: 0o644,
        uid: 0,
        gid: 0,
        nlinks: 1,
        unique_id: 0,
    });
    buf.write_u64::<LittleEndian>(attrs.size)?;
    buf.write_u64::<LittleEndian>(attrs.allocation_size)?;
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.change_time))?;
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.access_time))?;
    buf.write_u64::<LittleEndian>(datetime_to_nt_time(&attrs.write_time))?;
    buf.write_u64::<LittleEndian>(unix.uid)?;
    buf.write_u64::<LittleEndian>(unix.gid)?;
    buf.write_u32::<LittleEndian>(attrs.kind.to_unix())?;
    buf.write_u64::<LittleEndian>(0)?;
    buf.write_u64::<LittleEndian>(0)?;
    buf.write_u64::<LittleEndian>(unix.unique_id)?;
    buf.write_u32::<LittleEndian>(unix.mode)?;
    buf.write_u64::<LittleEndian>(unix.nlinks)?;
    Ok(())
}

fn decode_legacy(r: &mut WireReader<'_>) -> Result<FileAttributes> {
    let dos = DosAttributes::from_bits_retain(r.u16()? as u32);
    let mut attrs = FileAttributes::new(FileKind::from_dos(dos));
    attrs.dos_attributes = dos;
    attrs.write_time = utime_to_datetime(r.u32()?);
    attrs.size = r.u32()? as u64;
    r.skip(10)?;
    Ok(attrs)
}

/// Decode the time/size/attribute block shared by the INFO_STANDARD find entries
pub(crate) fn decode_standard_block(r: &mut WireReader<'_>) -> Result<FileAttributes> {
    let mut attrs = FileAttributes::new(FileKind::Regular);
    let (d, t) = (r.u16()?, r.u16()?);
    attrs.create_time = dos_to_datetime(d, t);
    let (d, t) = (r.u16()?, r.u16()?);
    attrs.access_time = dos_to_datetime(d, t);
    let (d, t) = (r.u16()?, r.u16()?);
    attrs.write_time = dos_to_datetime(d, t);
    attrs.change_time = attrs.write_time;
    attrs.size = r.u32()? as u64;
    attrs.allocation_size = r.u32()? as u64;
    attrs.dos_attributes = DosAttributes::from_bits_retain(r.u16()? as u32);
    attrs.kind = FileKind::from_dos(attrs.dos_attributes);
    Ok(attrs)
}

pub(crate) fn encode_standard_block(buf: &mut Vec<u8>, attrs: &FileAttributes) -> Result<()> {
    for time in [&attrs.create_time, &attrs.access_time, &attrs.write_time] {
        let (d, t) = datetime_to_dos(time);
        buf.write_u16::<LittleEndian>(d)?;
        buf.write_u16::<LittleEndian>(t)?;
    }
    buf.write_u32::<LittleEndian>(attrs.size.min(u32::MAX as u64) as u32)?;
    buf.write_u32::<LittleEndian>(attrs.allocation_size.min(u32::MAX as u64) as u32)?;
    buf.write_u16::<LittleEndian>(attrs.dos_attributes.bits() as u16)?;
    Ok(())
}

/// Decode the 52 bytes of times, sizes and attributes of a both-directory entry
pub(crate) fn decode_directory_block(r: &mut WireReader<'_>) -> Result<FileAttributes> {
    let mut attrs = FileAttributes::new(FileKind::Regular);
    decode_times(r, &mut attrs)?;
    attrs.size = r.u64()?;
    attrs.allocation_size = r.u64()?;
    attrs.dos_attributes = DosAttributes::from_bits_retain(r.u32()?);
    attrs.kind = FileKind::from_dos(attrs.dos_attributes);
    Ok(attrs)
}

pub(crate) fn encode_directory_block(buf: &mut Vec<u8>, attrs: &FileAttributes) -> Result<()> {
    encode_times(buf, attrs)?;
    buf.write_u64::<LittleEndian>(attrs.size)?;
    buf.write_u64::<LittleEndian>(attrs.allocation_size)?;
    buf.write_u32::<LittleEndian>(attrs.dos_attributes.bits())?;
    Ok(())
}

/// SMB_SET_FILE_BASIC_INFO payload; `None` leaves the server's value alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicSetInfo {
    pub create_time: Option<DateTime<Utc>>,
    pub access_time: Option<DateTime<Utc>>,
    pub write_time: Option<DateTime<Utc>>,
    pub change_time: Option<DateTime<Utc>>,
    pub attributes: Option<DosAttributes>,
}

impl BasicSetInfo {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BASIC_SIZE);
        for time in [
            &self.create_time,
            &self.access_time,
            &self.write_time,
            &self.change_time,
        ] {
            buf.write_u64::<LittleEndian>(time.as_ref().map(datetime_to_nt_time).unwrap_or(0))?;
        }
        let attributes = match self.attributes {
            // An all-zero mask means "unchanged", so an empty set goes out as NORMAL.
            Some(a) if a.is_empty() => DosAttributes::NORMAL.bits(),
            Some(a) => a.bits(),
            None => 0,
        };
        buf.write_u32::<LittleEndian>(attributes)?;
        buf.write_u32::<LittleEndian>(0)?;
        Ok(buf)
    }
}

/// SMB_SET_FILE_UNIX_BASIC payload; `None` leaves the server's value alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnixSetInfo {
    pub size: Option<u64>,
    pub access_time: Option<DateTime<Utc>>,
    pub write_time: Option<DateTime<Utc>>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mode: Option<u32>,
}

impl UnixSetInfo {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(UNIX_BASIC_SIZE);
        buf.write_u64::<LittleEndian>(self.size.unwrap_or(UNIX_NO_CHANGE))?;
        buf.write_u64::<LittleEndian>(UNIX_NO_CHANGE)?; // allocation size
        buf.write_u64::<LittleEndian>(0)?; // change time is server-maintained
        buf.write_u64::<LittleEndian>(self.access_time.as_ref().map(datetime_to_nt_time).unwrap_or(0))?;
        buf.write_u64::<LittleEndian>(self.write_time.as_ref().map(datetime_to_nt_time).unwrap_or(0))?;
        buf.write_u64::<LittleEndian>(self.uid.unwrap_or(UNIX_NO_CHANGE))?;
        buf.write_u64::<LittleEndian>(self.gid.unwrap_or(UNIX_NO_CHANGE))?;
        buf.write_u32::<LittleEndian>(0)?; // type is ignored on set
        buf.write_u64::<LittleEndian>(UNIX_NO_CHANGE)?;
        buf.write_u64::<LittleEndian>(UNIX_NO_CHANGE)?;
        buf.write_u64::<LittleEndian>(UNIX_NO_CHANGE)?;
        buf.write_u32::<LittleEndian>(self.mode.unwrap_or(UNIX_MODE_NO_CHANGE))?;
        buf.write_u64::<LittleEndian>(UNIX_NO_CHANGE)?;
        Ok(buf)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < UNIX_BASIC_SIZE {
            return Err(Error::BufferTooSmall {
                need: UNIX_BASIC_SIZE,
                have: raw.len(),
            });
        }
        let mut r = WireReader::new(raw);
        let opt = |v: u64| (v != UNIX_NO_CHANGE).then_some(v);
        let opt_time = |v: u64| (v != 0).then(|| nt_time_to_datetime(v));
        let size = opt(r.u64()?);
        let _alloc = r.u64()?;
        let _change = r.u64()?;
        let access_time = opt_time(r.u64()?);
        let write_time = opt_time(r.u64()?);
        let uid = opt(r.u64()?);
        let gid = opt(r.u64()?);
        r.skip(4 + 8 + 8 + 8)?;
        let mode = r.u32()?;
        Ok(Self {
            size,
            access_time,
            write_time,
            uid,
            gid,
            mode: (mode != UNIX_MODE_NO_CHANGE).then_some(mode),
        })
    }
}
