//! One replica of the key/value service.
//!
//! ```text
//!  client ─▶ get / put_append ─▶ consensus.start(op) ─▶ (commit)
//!                 │                                        │
//!                 │ register(index)                        ▼
//!                 ▼                                   apply loop
//!           Waiter (oneshot) ◀──── notify(index, op) ── store.apply(op)
//! ```
//!
//! One lock guards the store, the dedup watermarks and the registry. It is
//! only held for short synchronous sections; handlers wait on their own
//! one-shot slot with a deadline, outside the lock.

use crate::command::Op;
use crate::registry::{NotifyRegistry, Registered};
use crate::store::{Applied, KvStore};

use common::{
    ClientId, GetArgs, GetReply, KvError, KvResult, LogIndex, PutAppendArgs, PutAppendKind,
    PutAppendReply, SerialNum, ServerConfig,
};
use parking_lot::Mutex;
use raft::{ApplyMsg, ApplyReceiver, Consensus, EntryPayload, Persister};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State guarded by the server's single lock.
#[derive(Debug, Default)]
struct Shared {
    store: KvStore,
    registry: NotifyRegistry,
    /// Index of the last command or snapshot the apply loop processed.
    last_applied: LogIndex,
}

pub struct KvServer {
    config: ServerConfig,
    consensus: Arc<dyn Consensus<Op>>,
    persister: Arc<dyn Persister>,
    shared: Mutex<Shared>,
    dead: AtomicBool,
    apply_task: Mutex<Option<JoinHandle<()>>>,
}

impl KvServer {
    /// Start a replica.
    ///
    /// Restores the snapshot found in `persister`, then spawns the apply loop
    /// draining `apply_rx`. Must be called from within a tokio runtime.
    pub fn start(
        config: ServerConfig,
        persister: Arc<dyn Persister>,
        consensus: Arc<dyn Consensus<Op>>,
        apply_rx: ApplyReceiver<Op>,
    ) -> Arc<Self> {
        let server = Arc::new(Self {
            config,
            consensus,
            persister,
            shared: Mutex::new(Shared::default()),
            dead: AtomicBool::new(false),
            apply_task: Mutex::new(None),
        });

        let snapshot = server.persister.read_snapshot();
        if !snapshot.is_empty() {
            server.restore_snapshot(&snapshot);
        }

        let task = tokio::spawn(Arc::clone(&server).apply_loop(apply_rx));
        *server.apply_task.lock() = Some(task);

        info!(
            me = server.config.me,
            name = %server.config.name(),
            max_raft_state = ?server.config.max_raft_state,
            last_applied = server.last_applied(),
            "kv server started"
        );
        server
    }

    pub fn me(&self) -> usize {
        self.config.me
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Read `key` as of a point after every write committed before this call.
    pub async fn get(
        &self,
        key: &str,
        client_id: ClientId,
        serial_num: SerialNum,
    ) -> KvResult<String> {
        debug!(me = self.config.me, key, client_id, serial_num, "get");
        self.replicate(Op::get(key, client_id, serial_num)).await?;

        let shared = self.shared.lock();
        shared
            .store
            .get(key)
            .map(str::to_owned)
            .ok_or(KvError::NoKey)
    }

    /// Put or append `value` at `key`. Safe to resend with the same
    /// `(client_id, serial_num)`: the write is applied at most once.
    pub async fn put_append(
        &self,
        key: &str,
        value: &str,
        kind: PutAppendKind,
        client_id: ClientId,
        serial_num: SerialNum,
    ) -> KvResult<()> {
        debug!(me = self.config.me, key, ?kind, client_id, serial_num, "put_append");
        self.replicate(Op::put_append(key, value, kind, client_id, serial_num))
            .await
    }

    pub async fn get_rpc(&self, args: &GetArgs) -> GetReply {
        self.get(&args.key, args.client_id, args.serial_num)
            .await
            .into()
    }

    pub async fn put_append_rpc(&self, args: &PutAppendArgs) -> PutAppendReply {
        self.put_append(
            &args.key,
            &args.value,
            args.kind,
            args.client_id,
            args.serial_num,
        )
        .await
        .into()
    }

    /// Submit `op` and wait until it is applied at the index it was given.
    async fn replicate(&self, op: Op) -> KvResult<()> {
        if self.killed() || !self.consensus.is_leader() {
            return Err(KvError::WrongLeader);
        }

        let submission = {
            let mut shared = self.shared.lock();
            let last_applied = shared.last_applied;
            shared.registry.begin(last_applied)
        };
        // `start` may persist the log, so it runs outside the lock.
        let Some(started) = self.consensus.start(op.clone()) else {
            self.shared.lock().registry.abandon(submission);
            return Err(KvError::WrongLeader);
        };
        let index = started.index;

        let registered = {
            let mut shared = self.shared.lock();
            let last_applied = shared.last_applied;
            shared.registry.register(submission, index, last_applied)
        };
        let waiter = match registered {
            Registered::Waiting(waiter) => waiter,
            Registered::Applied(applied) => return self.check_applied(index, &op, &applied),
            Registered::Missed => {
                debug!(me = self.config.me, index, "index applied before registration");
                return Err(KvError::Timeout);
            }
        };
        let token = waiter.token();

        match tokio::time::timeout(self.config.request_timeout, waiter.rx).await {
            Ok(Ok(applied)) => self.check_applied(index, &op, &applied),
            Ok(Err(_)) => {
                debug!(me = self.config.me, index, "slot closed before delivery");
                Err(KvError::Timeout)
            }
            Err(_) => {
                self.shared.lock().registry.deregister(index, token);
                debug!(me = self.config.me, index, "request timed out");
                Err(KvError::Timeout)
            }
        }
    }

    fn check_applied(&self, index: LogIndex, submitted: &Op, applied: &Op) -> KvResult<()> {
        if applied == submitted {
            return Ok(());
        }
        // Another leader's entry took this index.
        debug!(
            me = self.config.me,
            index,
            client_id = applied.client_id,
            serial_num = applied.serial_num,
            "index taken by a different operation"
        );
        Err(KvError::Timeout)
    }

    async fn apply_loop(self: Arc<Self>, mut apply_rx: ApplyReceiver<Op>) {
        while let Some(msg) = apply_rx.recv().await {
            if self.killed() {
                break;
            }
            self.apply(msg);
        }
        debug!(me = self.config.me, "apply loop stopped");
    }

    fn apply(&self, msg: ApplyMsg<Op>) {
        match msg {
            ApplyMsg::Snapshot { index, data, .. } => self.install_snapshot(index, &data),
            ApplyMsg::Command {
                payload: EntryPayload::Blank,
                ..
            } => {}
            ApplyMsg::Command {
                index,
                payload: EntryPayload::Normal(op),
                ..
            } => {
                self.apply_command(index, op);
                self.maybe_snapshot(index);
            }
        }
    }

    fn apply_command(&self, index: LogIndex, op: Op) {
        let is_leader = self.consensus.is_leader();

        let mut shared = self.shared.lock();
        if shared.store.apply(&op) == Applied::Duplicate {
            debug!(
                me = self.config.me,
                index,
                client_id = op.client_id,
                serial_num = op.serial_num,
                "duplicate operation, skipping mutation"
            );
        }
        shared.last_applied = index;

        if is_leader && !shared.registry.notify(index, op) {
            debug!(me = self.config.me, index, "no waiter for applied index");
        }
    }

    /// Runs on the apply task. With a durable persister `discard_entries`
    /// blocks this worker for the write and fsync; entries queue meanwhile.
    fn maybe_snapshot(&self, index: LogIndex) {
        let Some(max) = self.config.max_raft_state else {
            return;
        };
        let size = self.persister.raft_state_size();
        if size < max {
            return;
        }

        let encoded = self.shared.lock().store.serialize(index);
        match encoded {
            Ok(bytes) => {
                info!(me = self.config.me, index, size, snapshot_len = bytes.len(), "taking snapshot");
                if let Err(e) = self.consensus.discard_entries(index, bytes) {
                    warn!(me = self.config.me, index, error = %e, "failed to persist snapshot");
                }
            }
            Err(e) => error!(me = self.config.me, index, error = %e, "failed to encode snapshot"),
        }
    }

    /// Replace the state with an out-of-band snapshot taken at `index`.
    fn install_snapshot(&self, index: LogIndex, data: &[u8]) {
        let mut shared = self.shared.lock();
        if index <= shared.last_applied {
            debug!(
                me = self.config.me,
                index,
                last_applied = shared.last_applied,
                "ignoring snapshot older than applied state"
            );
            return;
        }
        match shared.store.restore(data) {
            Ok(_) => {
                shared.last_applied = index;
                let released = shared.registry.close_through(index);
                info!(
                    me = self.config.me,
                    index,
                    keys = shared.store.len(),
                    released,
                    "installed snapshot"
                );
            }
            Err(e) => error!(me = self.config.me, index, error = %e, "failed to decode snapshot"),
        }
    }

    fn restore_snapshot(&self, data: &[u8]) {
        let mut shared = self.shared.lock();
        match shared.store.restore(data) {
            Ok(index) => {
                shared.last_applied = index;
                info!(me = self.config.me, index, keys = shared.store.len(), "restored snapshot");
            }
            Err(e) => error!(me = self.config.me, error = %e, "failed to decode persisted snapshot"),
        }
    }

    /// Stop this replica. Outstanding requests run out their deadline.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.consensus.kill();
        if let Some(task) = self.apply_task.lock().take() {
            task.abort();
        }
        info!(me = self.config.me, "kv server killed");
    }

    pub fn killed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Index of the last entry the apply loop processed.
    pub fn last_applied(&self) -> LogIndex {
        self.shared.lock().last_applied
    }

    /// Number of requests waiting for their index to be applied.
    pub fn pending_requests(&self) -> usize {
        self.shared.lock().registry.len()
    }
}
