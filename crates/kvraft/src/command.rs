//! Operations replicated through the consensus log.
//!
//! One `Op` is one client attempt. Retries of the same attempt carry the same
//! `(client_id, serial_num)`, which is what the apply loop deduplicates on.

use common::{ClientId, PutAppendKind, SerialNum};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Get,
    Put,
    Append,
}

impl From<PutAppendKind> for OpKind {
    fn from(kind: PutAppendKind) -> Self {
        match kind {
            PutAppendKind::Put => OpKind::Put,
            PutAppendKind::Append => OpKind::Append,
        }
    }
}

/// A client operation as it travels through the log.
///
/// Compared by full value: the request handler only accepts a delivered
/// entry as its own if every field matches what it submitted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Op {
    pub kind: OpKind,
    pub key: String,
    /// Empty for `Get`.
    pub value: String,
    pub client_id: ClientId,
    pub serial_num: SerialNum,
}

impl Op {
    pub fn get(key: impl Into<String>, client_id: ClientId, serial_num: SerialNum) -> Self {
        Self {
            kind: OpKind::Get,
            key: key.into(),
            value: String::new(),
            client_id,
            serial_num,
        }
    }

    pub fn put(
        key: impl Into<String>,
        value: impl Into<String>,
        client_id: ClientId,
        serial_num: SerialNum,
    ) -> Self {
        Self::put_append(key, value, PutAppendKind::Put, client_id, serial_num)
    }

    pub fn append(
        key: impl Into<String>,
        value: impl Into<String>,
        client_id: ClientId,
        serial_num: SerialNum,
    ) -> Self {
        Self::put_append(key, value, PutAppendKind::Append, client_id, serial_num)
    }

    pub fn put_append(
        key: impl Into<String>,
        value: impl Into<String>,
        kind: PutAppendKind,
        client_id: ClientId,
        serial_num: SerialNum,
    ) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            value: value.into(),
            client_id,
            serial_num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(Op::get("k", 1, 1).kind, OpKind::Get);
        assert_eq!(Op::put("k", "v", 1, 2).kind, OpKind::Put);
        assert_eq!(Op::append("k", "v", 1, 3).kind, OpKind::Append);
    }

    #[test]
    fn get_carries_no_value() {
        let op = Op::get("k", 9, 4);
        assert!(op.value.is_empty());
    }

    #[test]
    fn equality_covers_every_field() {
        let op = Op::put("k", "v", 1, 1);
        assert_eq!(op, Op::put("k", "v", 1, 1));
        assert_ne!(op, Op::put("k", "v", 1, 2));
        assert_ne!(op, Op::put("k", "w", 1, 1));
        assert_ne!(op, Op::append("k", "v", 1, 1));
        assert_ne!(op, Op::put("k", "v", 2, 1));
    }
}
