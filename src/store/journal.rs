//! On-disk layout of a store file.
//!
//! A store is a fixed header followed by an append-only log of records.
//! Every record is a little-endian `u64` length prefix and a bincode body.
//! Opening a store replays the log; removals are tombstones, so their
//! bytes stay in the file until a repack rewrites a compacted snapshot.

use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::{Array, AttrValue};
use crate::error::{Error, Result};

/// Magic bytes at the start of every store file.
pub const MAGIC: &[u8; 8] = b"LINEAGE1";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Fixed header: magic, version, and reserved padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: FORMAT_VERSION,
        }
    }
}

impl Header {
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..8].copy_from_slice(MAGIC);
        bytes[8..10].copy_from_slice(&self.version.to_le_bytes());
        bytes
    }

    pub fn from_bytes(path: &Path, bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &bytes[..8] != MAGIC {
            return Err(Error::Format {
                path: path.to_path_buf(),
                reason: "not a lineage store (bad magic bytes)".into(),
            });
        }
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version != FORMAT_VERSION {
            return Err(Error::Format {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {version}"),
            });
        }
        Ok(Header { version })
    }
}

/// One mutation of the node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    CreateGroup { path: String },
    WriteDataset { path: String, array: Array },
    SetAttr {
        path: String,
        key: String,
        value: AttrValue,
    },
    Remove { path: String },
}

/// Append one length-prefixed record to `writer`. Returns the bytes written.
pub fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<u64> {
    let body = bincode::serialize(record)?;
    let len = body.len() as u64;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    Ok(8 + len)
}

/// Streams records back out of a log positioned just after the header.
pub struct RecordReader<R> {
    reader: R,
    consumed: u64,
    truncated: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader {
            reader,
            consumed: 0,
            truncated: false,
        }
    }

    /// Whether reading stopped at a partially written trailing record.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes taken up by the complete records read so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn read_next(&mut self) -> Result<Option<Record>> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        match read_frame(&mut self.reader) {
            Ok(body) => {
                self.consumed += 8 + body.len() as u64;
                Ok(Some(bincode::deserialize(&body)?))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.truncated = true;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    let mut body = Vec::new();
    reader.take(len).read_to_end(&mut body)?;
    if (body.len() as u64) < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(body)
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
