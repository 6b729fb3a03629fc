//! Snapshot codec for the key/value store.
//!
//! ## Format
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Header (24 bytes)                    │
//! │ ├─ magic: u32 (0x4B565353 "KVSS")    │
//! │ ├─ checksum: u32 (CRC32 of body)     │
//! │ ├─ last_index: u64                   │
//! │ ├─ data_len: u32                     │
//! │ └─ sessions_len: u32                 │
//! ├──────────────────────────────────────┤
//! │ data: bincode HashMap<String,String> │
//! │ sessions: bincode HashMap<u64,u64>   │
//! └──────────────────────────────────────┘
//! ```
//!
//! The format is private to this crate; it only has to read back what it wrote.

use crate::store::KvStore;
use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{ClientId, LogIndex, SerialNum};
use std::collections::HashMap;
use thiserror::Error;

/// Magic bytes for snapshot validation: "KVSS" in ASCII
const SNAPSHOT_MAGIC: u32 = 0x4B565353;

/// Size of the snapshot header in bytes
const HEADER_SIZE: usize = 24;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot truncated: {0} bytes")]
    Truncated(usize),
    #[error("bad snapshot magic {0:#010x}")]
    BadMagic(u32),
    #[error("snapshot checksum mismatch")]
    Checksum,
    #[error("snapshot section of {0} bytes is too large")]
    TooLarge(usize),
    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

fn bincode_config() -> impl Config {
    config::standard()
}

fn section_len(bytes: &[u8]) -> Result<u32, SnapshotError> {
    u32::try_from(bytes.len()).map_err(|_| SnapshotError::TooLarge(bytes.len()))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}

/// Encode `store` as of `last_index`.
pub fn encode(store: &KvStore, last_index: LogIndex) -> Result<Vec<u8>, SnapshotError> {
    let data = encode_to_vec(store.data(), bincode_config())?;
    let sessions = encode_to_vec(store.sessions(), bincode_config())?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data);
    hasher.update(&sessions);

    let mut buf = Vec::with_capacity(HEADER_SIZE + data.len() + sessions.len());
    buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf.extend_from_slice(&last_index.to_le_bytes());
    buf.extend_from_slice(&section_len(&data)?.to_le_bytes());
    buf.extend_from_slice(&section_len(&sessions)?.to_le_bytes());
    buf.extend_from_slice(&data);
    buf.extend_from_slice(&sessions);
    Ok(buf)
}

/// Decode a snapshot produced by [`encode`], returning the store and the
/// index it was taken at.
pub fn decode(bytes: &[u8]) -> Result<(KvStore, LogIndex), SnapshotError> {
    if bytes.len() < HEADER_SIZE {
        return Err(SnapshotError::Truncated(bytes.len()));
    }

    let magic = read_u32(bytes, 0);
    if magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic(magic));
    }
    let checksum = read_u32(bytes, 4);
    let last_index = read_u64(bytes, 8);
    let data_len = read_u32(bytes, 16) as usize;
    let sessions_len = read_u32(bytes, 20) as usize;

    let body = &bytes[HEADER_SIZE..];
    if body.len() != data_len + sessions_len {
        return Err(SnapshotError::Truncated(bytes.len()));
    }
    if crc32fast::hash(body) != checksum {
        return Err(SnapshotError::Checksum);
    }

    let (data_bytes, session_bytes) = body.split_at(data_len);
    let (data, _): (HashMap<String, String>, _) = decode_from_slice(data_bytes, bincode_config())?;
    let (sessions, _): (HashMap<ClientId, SerialNum>, _) =
        decode_from_slice(session_bytes, bincode_config())?;

    Ok((KvStore::from_parts(data, sessions), last_index))
}
