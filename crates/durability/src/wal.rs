//! Log records of the file backend
//!
//! The file backend keeps a single append-only log. Each record is framed
//! as:
//!
//! ```text
//! len: u32 LE | crc32: u32 LE | bincode(LogRecord)
//! ```
//!
//! A record whose frame is incomplete or whose checksum does not match ends
//! the readable log: everything from its first byte on is a torn tail.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use versa_core::{ChangeSet, ClassId, ClassRecord, CommitNumber, Error, Result};

/// File name of the log inside the data directory
pub const LOG_FILE_NAME: &str = "changes.log";

/// Bytes of framing before each payload
pub const FRAME_HEADER_LEN: usize = 8;

/// Durable log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// One persisted commit
    ChangeSet(ChangeSet),
    /// Class id assignment
    Class(ClassRecord),
    /// Internal id handed out for a class
    InternalId {
        /// Class the id belongs to
        class_id: ClassId,
        /// Allocated id
        id: u32,
    },
    /// Change-log rows below `below` were deleted
    Prune {
        /// Exclusive upper bound of the deleted rows
        below: CommitNumber,
    },
}

impl LogRecord {
    /// Commit number of change-set records
    pub fn commit_number(&self) -> Option<CommitNumber> {
        match self {
            LogRecord::ChangeSet(change_set) => Some(change_set.commit_number),
            _ => None,
        }
    }
}

/// Frame and append one record
pub fn write_record<W: Write>(writer: &mut W, record: &LogRecord) -> Result<usize> {
    let payload = bincode::serialize(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Storage(format!("log record of {} bytes is too large", payload.len())))?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    writer.write_all(&payload)?;
    Ok(FRAME_HEADER_LEN + payload.len())
}

/// Result of scanning a log image
#[derive(Debug)]
pub struct LogScan {
    /// Records decoded in order
    pub records: Vec<LogRecord>,
    /// Length of the valid prefix
    pub valid_len: u64,
    /// Why the scan stopped early, if it did
    pub torn: Option<String>,
}

/// Decode every complete record of a log image
pub fn read_records(data: &[u8]) -> LogScan {
    let mut records = Vec::new();
    let mut offset = 0usize;
    let torn = loop {
        if offset == data.len() {
            break None;
        }
        match decode_frame(&data[offset..]) {
            Ok((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            Err(reason) => break Some(format!("offset {}: {}", offset, reason)),
        }
    };
    LogScan {
        records,
        valid_len: offset as u64,
        torn,
    }
}

fn decode_frame(data: &[u8]) -> Result<(LogRecord, usize)> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(Error::Corruption(format!(
            "incomplete frame header ({} bytes)",
            data.len()
        )));
    }
    let mut header = Cursor::new(&data[..FRAME_HEADER_LEN]);
    let len = header.read_u32::<LittleEndian>()? as usize;
    let expected_crc = header.read_u32::<LittleEndian>()?;
    let end = FRAME_HEADER_LEN + len;
    if data.len() < end {
        return Err(Error::Corruption(format!(
            "incomplete payload: need {} bytes, have {}",
            len,
            data.len() - FRAME_HEADER_LEN
        )));
    }
    let payload = &data[FRAME_HEADER_LEN..end];
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected_crc, actual_crc
        )));
    }
    let record = bincode::deserialize(payload)
        .map_err(|e| Error::Corruption(format!("undecodable record: {}", e)))?;
    Ok((record, end))
}
