//! Property tests for the replicated store.

use kvraft::{Applied, KvStore, Op, OpKind};
use proptest::prelude::*;
use std::collections::HashMap;
use testsupport::proptest_generators::{arb_log, arb_op};

fn apply_all(ops: &[Op]) -> KvStore {
    let mut store = KvStore::new();
    for op in ops {
        store.apply(op);
    }
    store
}

proptest! {
    #[test]
    fn same_log_same_store(log in arb_log(64)) {
        prop_assert_eq!(apply_all(&log), apply_all(&log));
    }

    #[test]
    fn matches_reference_model(log in arb_log(64)) {
        let mut store = KvStore::new();
        let mut data: HashMap<String, String> = HashMap::new();
        let mut watermark: HashMap<u64, u64> = HashMap::new();

        for op in &log {
            let fresh = watermark
                .get(&op.client_id)
                .map_or(true, |&last| op.serial_num > last);
            let expected = if fresh { Applied::Fresh } else { Applied::Duplicate };
            prop_assert_eq!(store.apply(op), expected);

            if fresh {
                watermark.insert(op.client_id, op.serial_num);
                match op.kind {
                    OpKind::Get => {}
                    OpKind::Put => {
                        data.insert(op.key.clone(), op.value.clone());
                    }
                    OpKind::Append => data.entry(op.key.clone()).or_default().push_str(&op.value),
                }
            }
        }

        for (key, value) in &data {
            prop_assert_eq!(store.get(key), Some(value.as_str()));
        }
        prop_assert_eq!(store.len(), data.len());
        for (client, serial) in &watermark {
            prop_assert_eq!(store.last_serial(*client), Some(*serial));
        }
    }

    #[test]
    fn reapplying_is_a_no_op(log in arb_log(32), op in arb_op()) {
        let mut store = apply_all(&log);
        store.apply(&op);
        let before = store.clone();

        prop_assert_eq!(store.apply(&op), Applied::Duplicate);
        prop_assert_eq!(store, before);
    }

    #[test]
    fn watermarks_never_decrease(log in arb_log(64)) {
        let mut store = KvStore::new();
        for op in &log {
            let before = store.last_serial(op.client_id);
            store.apply(op);
            let after = store.last_serial(op.client_id);
            prop_assert!(after >= before);
            prop_assert!(after >= Some(op.serial_num));
        }
    }

    #[test]
    fn snapshot_restores_identical_store(log in arb_log(64), last_index in 0u64..10_000) {
        let store = apply_all(&log);
        let bytes = store.serialize(last_index).unwrap();

        let mut restored = KvStore::new();
        restored.apply(&Op::put("leftover", "x", 99, 1));
        prop_assert_eq!(restored.restore(&bytes).unwrap(), last_index);
        prop_assert_eq!(restored, store);
    }

    #[test]
    fn snapshot_then_suffix_equals_full_replay(log in arb_log(64), split in 0usize..64) {
        let split = split.min(log.len());
        let (prefix, suffix) = log.split_at(split);

        let mut resumed = KvStore::new();
        resumed
            .restore(&apply_all(prefix).serialize(split as u64).unwrap())
            .unwrap();
        for op in suffix {
            resumed.apply(op);
        }

        prop_assert_eq!(resumed, apply_all(&log));
    }
}
