//! Checked field reader/writer helpers shared by every message
//!
//! Every read is bounds checked: running off the end of a reply is a protocol
//! error, never a panic or a silently shortened value.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::io::Cursor;

/// Seconds between 1601-01-01 and 1970-01-01
const NT_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;
const NT_TICKS_PER_SEC: u64 = 10_000_000;

/// Cursor over a reply buffer that tracks the remaining length
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(buf),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self, want: usize) -> Error {
        Error::ParseError(format!(
            "truncated field: need {} bytes at offset {}, {} remain",
            want,
            self.position(),
            self.remaining()
        ))
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|_| self.truncated(1))
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| self.truncated(2))
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated(4))
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| self.truncated(8))
    }

    /// Borrow the next `n` bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.truncated(n));
        }
        let start = self.position();
        let buf: &'a [u8] = self.cursor.get_ref();
        self.cursor.set_position((start + n) as u64);
        Ok(&buf[start..start + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Jump to an absolute offset within the buffer
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.len() {
            return Err(Error::ParseError(format!(
                "offset {} beyond buffer of {} bytes",
                offset,
                self.len()
            )));
        }
        self.cursor.set_position(offset as u64);
        Ok(())
    }

    /// Everything not yet consumed
    pub fn rest(&mut self) -> &'a [u8] {
        let n = self.remaining();
        // cannot fail: n is exactly what remains
        self.bytes(n).unwrap_or(&[])
    }

    /// UTF-16LE string of exactly `byte_len` bytes; a trailing NUL is dropped
    pub fn utf16(&mut self, byte_len: usize) -> Result<String> {
        if byte_len % 2 != 0 {
            return Err(Error::ParseError(format!(
                "odd UTF-16 length {}",
                byte_len
            )));
        }
        let raw = self.bytes(byte_len)?;
        decode_utf16(raw)
    }

    /// NUL-terminated UTF-16LE string; an unterminated string ends at the buffer end
    pub fn utf16z(&mut self) -> Result<String> {
        let mut units = Vec::new();
        while self.remaining() >= 2 {
            let unit = self.u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|e| Error::ParseError(format!("bad UTF-16 name: {}", e)))
    }
}

fn decode_utf16(raw: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|e| Error::ParseError(format!("bad UTF-16 name: {}", e)))
}

/// UTF-16LE encoding of `s` without terminator
pub fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

pub fn write_utf16(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    for unit in s.encode_utf16() {
        buf.write_u16::<LittleEndian>(unit)?;
    }
    Ok(())
}

pub fn write_utf16z(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    write_utf16(buf, s)?;
    buf.write_u16::<LittleEndian>(0)?;
    Ok(())
}

/// The fixed epoch every zero timestamp decodes to
pub fn fixed_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// NT FILETIME (100ns ticks since 1601) to UTC
pub fn nt_time_to_datetime(value: u64) -> DateTime<Utc> {
    if value == 0 {
        return fixed_epoch();
    }
    let secs = (value / NT_TICKS_PER_SEC) as i64 - NT_EPOCH_OFFSET_SECS;
    let nanos = ((value % NT_TICKS_PER_SEC) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_else(fixed_epoch)
}

pub fn datetime_to_nt_time(t: &DateTime<Utc>) -> u64 {
    let secs = t.timestamp() + NT_EPOCH_OFFSET_SECS;
    if secs < 0 {
        return 0;
    }
    secs as u64 * NT_TICKS_PER_SEC + (t.timestamp_subsec_nanos() / 100) as u64
}

/// Seconds since 1970 as used by SMB_COM_QUERY_INFORMATION
pub fn utime_to_datetime(secs: u32) -> DateTime<Utc> {
    if secs == 0 {
        return fixed_epoch();
    }
    DateTime::<Utc>::from_timestamp(secs as i64, 0).unwrap_or_else(fixed_epoch)
}

pub fn datetime_to_utime(t: &DateTime<Utc>) -> u32 {
    t.timestamp().clamp(0, u32::MAX as i64) as u32
}

/// DOS date and time words (two-second resolution)
pub fn dos_to_datetime(date: u16, time: u16) -> DateTime<Utc> {
    if date == 0 && time == 0 {
        return fixed_epoch();
    }
    let day = (date & 0x1F) as u32;
    let month = ((date >> 5) & 0x0F) as u32;
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let sec = ((time & 0x1F) * 2) as u32;
    let min = ((time >> 5) & 0x3F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, min, sec))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(fixed_epoch)
}

pub fn datetime_to_dos(t: &DateTime<Utc>) -> (u16, u16) {
    if t.year() < 1980 {
        return (0, 0);
    }
    let date = (((t.year() - 1980) as u16) << 9) | ((t.month() as u16) << 5) | t.day() as u16;
    let time = ((t.hour() as u16) << 11) | ((t.minute() as u16) << 5) | (t.second() as u16 / 2);
    (date, time)
}
