//! Durable, file-backed persister.
//!
//! ## File Layout
//!
//! ```text
//! {data_dir}/
//! └── raft.bin      # raft state + latest snapshot, rewritten atomically
//! ```
//!
//! ## File Format
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Header (16 bytes)                    │
//! │ ├─ magic: u32 (0x4B565253 "KVRS")    │
//! │ ├─ checksum: u32 (CRC32 of body)     │
//! │ ├─ state_len: u32                    │
//! │ └─ snapshot_len: u32                 │
//! ├──────────────────────────────────────┤
//! │ Body: raft state ‖ snapshot          │
//! └──────────────────────────────────────┘
//! ```
//!
//! Both halves live in one file so `save_state_and_snapshot` is a single
//! rename. The previous file stays intact until the rename lands.

use crate::persister::Persister;
use crate::{RaftError, RaftResult};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for file validation: "KVRS" in ASCII
const PERSIST_MAGIC: u32 = 0x4B565253;

/// Size of the file header in bytes
const HEADER_SIZE: usize = 16;

const FILE_NAME: &str = "raft.bin";
const TEMP_FILE_NAME: &str = "raft.bin.tmp";

#[derive(Clone, Debug)]
struct PersistHeader {
    magic: u32,
    checksum: u32,
    state_len: u32,
    snapshot_len: u32,
}

impl PersistHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.state_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.snapshot_len.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: read_u32(buf, 0),
            checksum: read_u32(buf, 4),
            state_len: read_u32(buf, 8),
            snapshot_len: read_u32(buf, 12),
        }
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

fn checksum(state: &[u8], snapshot: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(state);
    hasher.update(snapshot);
    hasher.finalize()
}

fn section_len(bytes: &[u8], what: &str) -> RaftResult<u32> {
    u32::try_from(bytes.len())
        .map_err(|_| RaftError::Corrupt(format!("{what} of {} bytes is too large", bytes.len())))
}

#[derive(Debug, Default)]
struct Cached {
    raft_state: Vec<u8>,
    snapshot: Vec<u8>,
}

/// Persister that survives process restarts.
///
/// Reads are served from an in-memory copy loaded on open; every save
/// rewrites the file through a temp file, fsync and rename.
#[derive(Debug)]
pub struct FilePersister {
    data_dir: PathBuf,
    cached: RwLock<Cached>,
}

impl FilePersister {
    /// Open or create persistent storage in `data_dir`.
    ///
    /// # Errors
    /// Returns `RaftError::Io` if the directory cannot be created or read, and
    /// `RaftError::Corrupt` if an existing file fails validation.
    pub fn open(data_dir: impl AsRef<Path>) -> RaftResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let path = data_dir.join(FILE_NAME);
        let cached = if path.exists() {
            Self::load(&path)?
        } else {
            Cached::default()
        };
        debug!(
            path = %path.display(),
            state_len = cached.raft_state.len(),
            snapshot_len = cached.snapshot.len(),
            "opened file persister"
        );

        Ok(Self {
            data_dir,
            cached: RwLock::new(cached),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(FILE_NAME)
    }

    fn load(path: &Path) -> RaftResult<Cached> {
        let bytes = fs::read(path)?;
        if bytes.len() < HEADER_SIZE {
            return Err(RaftError::Corrupt(format!(
                "{} is {} bytes, shorter than its header",
                path.display(),
                bytes.len()
            )));
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        header_buf.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = PersistHeader::from_bytes(&header_buf);

        if header.magic != PERSIST_MAGIC {
            return Err(RaftError::Corrupt(format!(
                "bad magic {:#010x} in {}",
                header.magic,
                path.display()
            )));
        }

        let body = &bytes[HEADER_SIZE..];
        let state_len = header.state_len as usize;
        let snapshot_len = header.snapshot_len as usize;
        if body.len() != state_len + snapshot_len {
            // Torn write
            return Err(RaftError::Corrupt(format!(
                "expected {} body bytes, found {}",
                state_len + snapshot_len,
                body.len()
            )));
        }

        let (state, snapshot) = body.split_at(state_len);
        if checksum(state, snapshot) != header.checksum {
            return Err(RaftError::Corrupt("checksum mismatch".into()));
        }

        Ok(Cached {
            raft_state: state.to_vec(),
            snapshot: snapshot.to_vec(),
        })
    }

    /// Write both halves to disk atomically.
    fn write_file(&self, state: &[u8], snapshot: &[u8]) -> RaftResult<()> {
        let header = PersistHeader {
            magic: PERSIST_MAGIC,
            checksum: checksum(state, snapshot),
            state_len: section_len(state, "raft state")?,
            snapshot_len: section_len(snapshot, "snapshot")?,
        };

        let temp_path = self.data_dir.join(TEMP_FILE_NAME);
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&header.to_bytes())?;
            file.write_all(state)?;
            file.write_all(snapshot)?;
            file.sync_all()?;
        }

        // Atomic rename
        fs::rename(&temp_path, self.path())?;

        // Fsync directory
        let dir = File::open(&self.data_dir)?;
        dir.sync_all()?;

        Ok(())
    }
}

impl Persister for FilePersister {
    fn raft_state_size(&self) -> usize {
        self.cached.read().raft_state.len()
    }

    fn read_raft_state(&self) -> Vec<u8> {
        self.cached.read().raft_state.clone()
    }

    fn read_snapshot(&self) -> Vec<u8> {
        self.cached.read().snapshot.clone()
    }

    fn save_raft_state(&self, state: Vec<u8>) -> RaftResult<()> {
        let mut cached = self.cached.write();
        self.write_file(&state, &cached.snapshot)?;
        cached.raft_state = state;
        Ok(())
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> RaftResult<()> {
        let mut cached = self.cached.write();
        self.write_file(&state, &snapshot)?;
        cached.raft_state = state;
        cached.snapshot = snapshot;
        Ok(())
    }
}
