//! The replicated state: key/value data plus per-client dedup watermarks.
//!
//! Mutation depends only on the operation and the prior state, so every
//! replica that applies the same log prefix ends with identical content.

use crate::command::{Op, OpKind};
use crate::snapshot::{self, SnapshotError};
use common::{ClientId, LogIndex, SerialNum};
use std::collections::HashMap;

/// Outcome of applying one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// First delivery of this `(client_id, serial_num)`; the store was updated.
    Fresh,
    /// Already applied for this client; the store is unchanged.
    Duplicate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvStore {
    data: HashMap<String, String>,
    last_serial: HashMap<ClientId, SerialNum>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        data: HashMap<String, String>,
        last_serial: HashMap<ClientId, SerialNum>,
    ) -> Self {
        Self { data, last_serial }
    }

    pub(crate) fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    pub(crate) fn sessions(&self) -> &HashMap<ClientId, SerialNum> {
        &self.last_serial
    }

    /// Apply `op` at most once per `(client_id, serial_num)`.
    ///
    /// A serial number at or below the client's watermark is a duplicate and
    /// leaves the store untouched, even if key or value differ.
    pub fn apply(&mut self, op: &Op) -> Applied {
        if let Some(&last) = self.last_serial.get(&op.client_id) {
            if op.serial_num <= last {
                return Applied::Duplicate;
            }
        }

        match op.kind {
            OpKind::Get => {}
            OpKind::Put => {
                self.data.insert(op.key.clone(), op.value.clone());
            }
            OpKind::Append => {
                self.data
                    .entry(op.key.clone())
                    .or_default()
                    .push_str(&op.value);
            }
        }
        self.last_serial.insert(op.client_id, op.serial_num);
        Applied::Fresh
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Highest serial number applied for `client_id`.
    pub fn last_serial(&self, client_id: ClientId) -> Option<SerialNum> {
        self.last_serial.get(&client_id).copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode the store as of `last_index`.
    pub fn serialize(&self, last_index: LogIndex) -> Result<Vec<u8>, SnapshotError> {
        snapshot::encode(self, last_index)
    }

    /// Replace the whole store with the content of `bytes`.
    ///
    /// Decoding completes before anything is replaced, so on error the store
    /// is exactly as it was. Returns the index the snapshot was taken at.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<LogIndex, SnapshotError> {
        let (store, last_index) = snapshot::decode(bytes)?;
        *self = store;
        Ok(last_index)
    }
}
