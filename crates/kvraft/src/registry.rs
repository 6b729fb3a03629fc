//! Rendezvous between request handlers and the apply loop.
//!
//! A handler that got a log index registers a one-shot slot for it; the
//! apply loop fills the slot when that index is applied. Whichever side acts
//! first removes the slot. Delivery never blocks: if the handler already gave
//! up, the operation is dropped.
//!
//! Submission happens outside the server lock, so the apply loop may reach
//! an index before its handler registers. While any handler is between
//! [`NotifyRegistry::begin`] and [`NotifyRegistry::register`], applied
//! operations without a slot are kept so that handler can still claim its
//! own. They are released once no submission could need them.

use crate::command::Op;
use common::LogIndex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::oneshot;

/// Handle held by a waiting request handler.
#[derive(Debug)]
pub struct Waiter {
    pub index: LogIndex,
    token: u64,
    pub rx: oneshot::Receiver<Op>,
}

impl Waiter {
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// A submission to the consensus layer that has not been registered yet.
#[derive(Debug)]
#[must_use = "a submission must be registered or abandoned"]
pub struct Submission {
    ticket: u64,
}

/// Outcome of registering an index.
#[derive(Debug)]
pub enum Registered {
    /// Not applied yet; wait on the slot.
    Waiting(Waiter),
    /// Applied before registration; this is what landed at the index.
    Applied(Op),
    /// Applied before registration without being kept, either as a follower
    /// or underneath an installed snapshot.
    Missed,
}

#[derive(Debug, Default)]
pub struct NotifyRegistry {
    slots: HashMap<LogIndex, (u64, oneshot::Sender<Op>)>,
    /// In-flight submissions, with the applied index observed when each began.
    submitting: HashMap<u64, LogIndex>,
    /// Applied operations that found no slot while a submission was in flight.
    early: BTreeMap<LogIndex, Op>,
    next_token: u64,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Announce a submission about to be made while `last_applied` is the
    /// newest applied index.
    pub fn begin(&mut self, last_applied: LogIndex) -> Submission {
        let ticket = self.token();
        self.submitting.insert(ticket, last_applied);
        Submission { ticket }
    }

    /// The consensus layer refused the submission.
    pub fn abandon(&mut self, submission: Submission) {
        self.submitting.remove(&submission.ticket);
        self.release_early();
    }

    /// Register the index `submission` was given.
    ///
    /// An older slot for the same index (left by a handler from a previous
    /// leadership term) is replaced; its waiter sees the channel close.
    pub fn register(
        &mut self,
        submission: Submission,
        index: LogIndex,
        last_applied: LogIndex,
    ) -> Registered {
        self.submitting.remove(&submission.ticket);
        let registered = if let Some(op) = self.early.remove(&index) {
            Registered::Applied(op)
        } else if index <= last_applied {
            Registered::Missed
        } else {
            let (tx, rx) = oneshot::channel();
            let token = self.token();
            self.slots.insert(index, (token, tx));
            Registered::Waiting(Waiter { index, token, rx })
        };
        self.release_early();
        registered
    }

    /// Hand `op` to whoever waits on `index`. Returns whether a live waiter
    /// received it.
    pub fn notify(&mut self, index: LogIndex, op: Op) -> bool {
        if let Some((_, tx)) = self.slots.remove(&index) {
            return tx.send(op).is_ok();
        }
        if self.submitting.values().any(|&floor| floor < index) {
            self.early.insert(index, op);
        }
        false
    }

    /// Remove the slot for `index` if it still belongs to `token`.
    pub fn deregister(&mut self, index: LogIndex, token: u64) {
        if self
            .slots
            .get(&index)
            .is_some_and(|(owner, _)| *owner == token)
        {
            self.slots.remove(&index);
        }
    }

    /// Close every slot at or below `index`, which a snapshot has covered.
    /// Returns how many waiters were released.
    pub fn close_through(&mut self, index: LogIndex) -> usize {
        let before = self.slots.len();
        self.slots.retain(|&slot, _| slot > index);
        before - self.slots.len()
    }

    /// Drop kept operations no in-flight submission can claim.
    fn release_early(&mut self) {
        match self.submitting.values().min() {
            None => self.early.clear(),
            Some(&floor) => self.early = self.early.split_off(&(floor + 1)),
        }
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
