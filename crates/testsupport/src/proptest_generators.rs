//! Property-based test generators using proptest.
//!
//! Keys and client ids are drawn from small domains so generated sequences
//! collide on keys and repeat serial numbers often.

use common::{ClientId, SerialNum};
use kvraft::Op;
use proptest::prelude::*;

/// Strategy for a key from a small alphabet.
pub fn arb_key() -> impl Strategy<Value = String> {
    "[a-d]{1,2}"
}

/// Strategy for a client id from a handful of sessions.
pub fn arb_client() -> impl Strategy<Value = ClientId> {
    0u64..4
}

/// Strategy for a serial number with frequent repeats.
pub fn arb_serial() -> impl Strategy<Value = SerialNum> {
    1u64..12
}

/// Strategy for a single operation of any kind.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_op;
///
/// proptest! {
///     #[test]
///     fn ops_have_keys(op in arb_op()) {
///         prop_assert!(!op.key.is_empty());
///     }
/// }
/// ```
pub fn arb_op() -> impl Strategy<Value = Op> {
    (
        0u8..3,
        arb_key(),
        "[a-z0-9]{0,4}",
        arb_client(),
        arb_serial(),
    )
        .prop_map(|(kind, key, value, client, serial)| match kind {
            0 => Op::get(key, client, serial),
            1 => Op::put(key, value, client, serial),
            _ => Op::append(key, value, client, serial),
        })
}

/// Strategy for a sequence of operations, as a committed log would carry.
pub fn arb_log(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(), 0..max_len)
}
