//! Wires a `raft::Node` to `transport` and drives the lock state machine from Raft commits.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};
use mpb::MPB;
use rand::rngs::StdRng;
use rand::SeedableRng;
use raft::log::file::FileLog;
use raft::log::Log;
use raft::message::SendableMessage;
use raft::node::{Config as RaftConfig, Node as RaftNode};
use transport::{LockModeWire, LockOp, NodeId, Peer, RpcPayload, Transport};

use crate::command::{LockCommand, LockMode};
use crate::deadlock;
use crate::error::LockError;
use crate::table::LockTable;
use crate::wait_queue::{LockRequest, WaitQueues};
use crate::wire::{message_to_payload, payload_to_message};

/// Configuration for one lock-role node, mirroring §6's recognized options.
#[derive(Clone)]
pub struct LockEngineConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_ms: u64,
    pub tick_interval_ms: u64,
    pub raft_log_path: String,
    /// How long `propose` blocks waiting for its command to be applied before returning
    /// [`LockError::Timeout`](crate::error::LockError::Timeout).
    pub propose_timeout_ms: u64,
    /// How often the expiry sweeper checks for timed-out locks.
    pub expiry_sweep_interval_ms: u64,
}

impl Default for LockEngineConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_ms: 50,
            tick_interval_ms: 10,
            raft_log_path: "raft.log".to_string(),
            propose_timeout_ms: 1_000,
            expiry_sweep_interval_ms: 500,
        }
    }
}

/// The outcome of a wait a client was put through; delivered over [`LockEngine::grants`] so
/// `acquire` can wake up whichever local caller is blocked.
#[derive(Debug, Clone)]
pub enum GrantEvent {
    Granted { resource: String, client_id: String, mode: LockMode },
    Aborted { resource: String, client_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    Waiting,
    Denied,
}

pub struct LockEngine {
    node_id: NodeId,
    raft: Mutex<RaftNode<FileLog, StdRng, NodeId>>,
    table: Mutex<LockTable>,
    waiters: Mutex<WaitQueues>,
    transport: Arc<Transport>,
    grants: MPB<GrantEvent>,
    config: LockEngineConfig,
    /// Completion channels keyed by the Raft log index a `propose` is waiting on, fired once
    /// `spawn_apply_loop` applies the entry at that index (§7 "propose only replies once the
    /// state change is durable and visible").
    pending_applies: Mutex<HashMap<u64, Sender<()>>>,
    /// Grant-event receivers subscribed at enqueue time (inside `acquire`), keyed by client id, so
    /// a grant/abort racing ahead of the caller's `await_grant` call is never silently dropped.
    pending_receivers: Mutex<HashMap<String, Receiver<GrantEvent>>>,
}

impl LockEngine {
    pub fn start<A: std::net::ToSocketAddrs>(
        node_id: NodeId,
        listen_addr: A,
        peers: Vec<Peer>,
        config: LockEngineConfig,
    ) -> std::io::Result<Arc<Self>> {
        let peer_ids: BTreeSet<NodeId> = peers.iter().map(|p| p.id.clone()).collect();
        let transport = Transport::bind(node_id.clone(), listen_addr, peers)?;

        let log = FileLog::open(&config.raft_log_path)?;
        let election_ticks =
            (config.election_timeout_min_ms / config.tick_interval_ms.max(1)) as u32;
        let heartbeat_ticks = (config.heartbeat_ms / config.tick_interval_ms.max(1)).max(1) as u32;
        let raft = RaftNode::new(
            node_id.clone(),
            peer_ids,
            log,
            StdRng::from_entropy(),
            RaftConfig {
                election_timeout_ticks: election_ticks.max(1),
                heartbeat_interval_ticks: heartbeat_ticks,
                replication_chunk_size: 64 * 1024,
            },
        );

        let engine = Arc::new(Self {
            node_id,
            raft: Mutex::new(raft),
            table: Mutex::new(LockTable::new()),
            waiters: Mutex::new(WaitQueues::new()),
            transport,
            grants: MPB::new(),
            config,
            pending_applies: Mutex::new(HashMap::new()),
            pending_receivers: Mutex::new(HashMap::new()),
        });

        spawn_tick_loop(engine.clone());
        spawn_dispatch_loop(engine.clone());
        spawn_apply_loop(engine.clone());
        spawn_expiry_sweeper(engine.clone());

        Ok(engine)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.raft.lock().unwrap().is_leader()
    }

    pub fn leader_hint(&self) -> Option<NodeId> {
        self.raft.lock().unwrap().leader().0.cloned()
    }

    pub fn commit_index(&self) -> u64 {
        self.raft.lock().unwrap().last_committed_log_index().id
    }

    pub fn term(&self) -> u64 {
        self.raft.lock().unwrap().leader().1.id
    }

    pub fn partition_detected(&self) -> bool {
        self.raft.lock().unwrap().partition_detected()
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.transport.peers().cloned().collect()
    }

    /// Per-resource status (§4.5's lock-specific `status(resource)`): the current holder mode,
    /// holder set, and wait-queue depth.
    pub fn status(&self, resource: &str) -> Option<(LockMode, Vec<String>, usize)> {
        let table = self.table.lock().unwrap();
        let waiters = self.waiters.lock().unwrap();
        table.entry(resource).map(|entry| {
            (
                entry.mode,
                entry.holders.iter().cloned().collect(),
                waiters.queue_len(resource),
            )
        })
    }

    /// §4.5 `acquire`. Attempts an immediate grant; if the resource is held incompatibly, enqueues
    /// the request and returns `Waiting` without blocking. Callers that need to wait for the
    /// eventual grant or denial should follow up with [`await_grant`](Self::await_grant).
    ///
    /// `ttl` threads §3's optional lock-entry TTL through to the grant, whether granted
    /// immediately or later out of the wait queue.
    pub fn acquire(
        &self,
        resource: &str,
        client_id: &str,
        mode: LockMode,
        ttl: Option<Duration>,
    ) -> Result<AcquireOutcome, LockError> {
        if !self.is_leader() {
            return Err(LockError::NotLeader(self.leader_hint()));
        }

        {
            let table = self.table.lock().unwrap();
            if table.already_satisfies(resource, client_id, mode) {
                return Ok(AcquireOutcome::Granted);
            }
        }

        let ttl_ms = ttl.map(|d| d.as_millis() as u64);

        let can_grant = self.table.lock().unwrap().can_grant(resource, mode);
        if can_grant {
            self.propose_acquire(resource, client_id, mode, ttl_ms)?;
            return Ok(AcquireOutcome::Granted);
        }

        // Subscribe before enqueueing: a concurrent `drain_waiters` could grant (or an abort could
        // deny) this request before the caller gets around to calling `await_grant`, and a receiver
        // created only then would miss an event already broadcast (lost wakeup).
        let receiver = self.grants.receiver();
        self.pending_receivers
            .lock()
            .unwrap()
            .insert(client_id.to_string(), receiver);

        let enqueued_at = now_millis();
        self.waiters.lock().unwrap().enqueue(
            resource,
            LockRequest {
                client_id: client_id.to_string(),
                desired_mode: mode,
                enqueued_at,
                ttl_ms,
            },
        );
        Ok(AcquireOutcome::Waiting)
    }

    /// Blocks the calling thread up to `timeout` for the outcome of a request previously queued by
    /// [`acquire`](Self::acquire). On timeout, removes the request from the wait queue so it does
    /// not linger (§7 "a timed-out caller leaves no half-committed local state").
    pub fn await_grant(&self, resource: &str, client_id: &str, timeout: Duration) -> AcquireOutcome {
        let receiver = self
            .pending_receivers
            .lock()
            .unwrap()
            .remove(client_id)
            .unwrap_or_else(|| self.grants.receiver());
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                self.waiters.lock().unwrap().remove_client(client_id);
                return AcquireOutcome::Denied;
            }
            match receiver.recv_timeout(remaining) {
                Ok(GrantEvent::Granted { resource: r, client_id: c, .. })
                    if r == resource && c == client_id =>
                {
                    return AcquireOutcome::Granted
                }
                Ok(GrantEvent::Aborted { resource: r, client_id: c })
                    if r == resource && c == client_id =>
                {
                    return AcquireOutcome::Denied
                }
                Ok(_) => continue,
                Err(_) => {
                    self.waiters.lock().unwrap().remove_client(client_id);
                    return AcquireOutcome::Denied;
                }
            }
        }
    }

    pub fn release(&self, resource: &str, client_id: &str) -> Result<(), LockError> {
        if !self.is_leader() {
            return Err(LockError::NotLeader(self.leader_hint()));
        }
        self.propose(LockCommand::Release {
            resource: resource.to_string(),
            client_id: client_id.to_string(),
        })
    }

    fn propose_acquire(
        &self,
        resource: &str,
        client_id: &str,
        mode: LockMode,
        ttl_ms: Option<u64>,
    ) -> Result<(), LockError> {
        self.propose(LockCommand::Acquire {
            resource: resource.to_string(),
            client_id: client_id.to_string(),
            mode,
            acquired_at: now_millis(),
            ttl_ms,
        })
    }

    /// Same as [`propose_acquire`](Self::propose_acquire) but does not wait for apply. Used only
    /// from within the apply loop itself (`drain_waiters`), where waiting would deadlock against
    /// the very loop iteration that would apply the command.
    fn propose_acquire_async(
        &self,
        resource: &str,
        client_id: &str,
        mode: LockMode,
        ttl_ms: Option<u64>,
    ) -> Result<(), LockError> {
        self.propose_async(LockCommand::Acquire {
            resource: resource.to_string(),
            client_id: client_id.to_string(),
            mode,
            acquired_at: now_millis(),
            ttl_ms,
        })
    }

    /// §7 "propose only replies once the state change is durable and visible": submits `command`
    /// to the Raft log and blocks (up to `propose_timeout_ms`) until it has actually been applied
    /// to the lock table, rather than returning as soon as it is merely queued for replication.
    fn propose(&self, command: LockCommand) -> Result<(), LockError> {
        let data = command.encode();
        let mut raft = self.raft.lock().unwrap();
        match raft.append(data) {
            Ok(messages) => {
                let to_send: Vec<_> = messages.collect();
                let index = raft.log().last_index().id;
                let (tx, rx) = bounded(1);
                self.pending_applies.lock().unwrap().insert(index, tx);
                drop(raft);
                self.dispatch_messages(to_send);

                let timeout = Duration::from_millis(self.config.propose_timeout_ms);
                let applied = rx.recv_timeout(timeout).is_ok();
                self.pending_applies.lock().unwrap().remove(&index);
                if applied {
                    Ok(())
                } else {
                    Err(LockError::Timeout)
                }
            }
            Err(raft::node::AppendError::Cancelled { .. }) => Err(LockError::Unavailable),
            Err(raft::node::AppendError::LogErr(err)) => Err(LockError::Storage(err.to_string())),
        }
    }

    /// Submits `command` without waiting for it to apply. See
    /// [`propose_acquire_async`](Self::propose_acquire_async) for why this exists alongside
    /// [`propose`](Self::propose).
    fn propose_async(&self, command: LockCommand) -> Result<(), LockError> {
        let data = command.encode();
        let mut raft = self.raft.lock().unwrap();
        match raft.append(data) {
            Ok(messages) => {
                let to_send: Vec<_> = messages.collect();
                drop(raft);
                self.dispatch_messages(to_send);
                Ok(())
            }
            Err(raft::node::AppendError::Cancelled { .. }) => Err(LockError::Unavailable),
            Err(raft::node::AppendError::LogErr(err)) => Err(LockError::Storage(err.to_string())),
        }
    }

    fn dispatch_messages(&self, messages: Vec<SendableMessage<NodeId>>) {
        for sendable in messages {
            let payload = match message_to_payload(&sendable.message) {
                Some(payload) => payload,
                None => continue,
            };
            match sendable.dest {
                raft::message::MessageDestination::Broadcast => {
                    for peer in self.transport.peers() {
                        if let Err(err) = self.transport.notify(peer, payload.clone()) {
                            debug!("raft broadcast to {} failed: {}", peer, err);
                        }
                    }
                }
                raft::message::MessageDestination::To(peer) => {
                    if let Err(err) = self.transport.notify(&peer, payload) {
                        debug!("raft send to {} failed: {}", peer, err);
                    }
                }
            }
        }
    }

    /// Runs the post-commit deadlock detector (§4.5). Called after every applied ACQUIRE/RELEASE
    /// while this node is leader; re-runs until the wait-for graph is acyclic.
    fn run_deadlock_detection(&self) {
        loop {
            let victim = {
                let table = self.table.lock().unwrap();
                let waiters = self.waiters.lock().unwrap();
                let graph = deadlock::build_graph(&table, &waiters);
                match deadlock::find_cycle(&graph) {
                    Some(cycle) => deadlock::select_victim(&cycle, &waiters),
                    None => None,
                }
            };
            match victim {
                Some(client_id) => {
                    warn!("deadlock detected, aborting client {}", client_id);
                    if let Err(err) = self.propose_async(LockCommand::AbortClient { client_id }) {
                        warn!("failed to propose abort_client: {}", err);
                        break;
                    }
                }
                None => break,
            }
        }
    }

    /// Drains compatible waiters for `resource` after a RELEASE/EXPIRE/ABORT vacates it, greedily
    /// granting FIFO-head requests that are mutually compatible (§4.5 "the wait queue is drained
    /// greedily in FIFO order").
    fn drain_waiters(&self, resource: &str) {
        loop {
            let next = {
                let waiters = self.waiters.lock().unwrap();
                waiters.front(resource).cloned()
            };
            let request = match next {
                Some(request) => request,
                None => break,
            };
            let can_grant = self.table.lock().unwrap().can_grant(resource, request.desired_mode);
            if !can_grant {
                break;
            }
            self.waiters.lock().unwrap().pop_front(resource);
            if let Err(err) = self.propose_acquire_async(
                resource,
                &request.client_id,
                request.desired_mode,
                request.ttl_ms,
            ) {
                warn!("failed to grant queued acquire: {}", err);
                break;
            }
            self.grants.sender().send(GrantEvent::Granted {
                resource: resource.to_string(),
                client_id: request.client_id.clone(),
                mode: request.desired_mode,
            }).ok();
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn spawn_tick_loop(engine: Arc<LockEngine>) {
    let interval = Duration::from_millis(engine.config.tick_interval_ms.max(1));
    thread::spawn(move || loop {
        thread::sleep(interval);
        let messages: Vec<_> = {
            let mut raft = engine.raft.lock().unwrap();
            raft.timer_tick().collect()
        };
        engine.dispatch_messages(messages);
    });
}

fn spawn_dispatch_loop(engine: Arc<LockEngine>) {
    thread::spawn(move || loop {
        let envelope = match engine.transport.inbox().recv() {
            Ok(envelope) => envelope,
            Err(_) => break,
        };

        if let Some(message) = payload_to_message(&envelope.payload) {
            let messages: Vec<_> = {
                let mut raft = engine.raft.lock().unwrap();
                raft.receive(message, envelope.sender.clone()).collect()
            };
            engine.dispatch_messages(messages);
            continue;
        }

        match &envelope.payload {
            RpcPayload::LockForward(LockOp::Acquire {
                resource,
                client_id,
                mode,
                timeout_ms,
                ttl_ms,
            }) => {
                let mode = match mode {
                    LockModeWire::Shared => LockMode::Shared,
                    LockModeWire::Exclusive => LockMode::Exclusive,
                };
                let ttl = ttl_ms.map(Duration::from_millis);
                let reply_payload = match engine.acquire(resource, client_id, mode, ttl) {
                    Ok(AcquireOutcome::Waiting) => {
                        match engine.await_grant(resource, client_id, Duration::from_millis(*timeout_ms)) {
                            AcquireOutcome::Granted => RpcPayload::Ack,
                            _ => RpcPayload::Error("denied".to_string()),
                        }
                    }
                    Ok(_) => RpcPayload::Ack,
                    Err(err) => RpcPayload::Error(err.to_string()),
                };
                let _ = engine.transport.reply(&envelope, reply_payload);
            }
            RpcPayload::LockForward(LockOp::Release { resource, client_id }) => {
                let reply_payload = match engine.release(resource, client_id) {
                    Ok(()) => RpcPayload::Ack,
                    Err(err) => RpcPayload::Error(err.to_string()),
                };
                let _ = engine.transport.reply(&envelope, reply_payload);
            }
            RpcPayload::LockForward(LockOp::Status { .. }) => {
                let _ = engine.transport.reply(&envelope, RpcPayload::Ack);
            }
            _ => {
                debug!("lock node ignoring unexpected payload kind {}", envelope.kind);
            }
        }
    });
}

fn spawn_apply_loop(engine: Arc<LockEngine>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(5));
        let applied: Vec<(u64, LockCommand)> = {
            let mut raft = engine.raft.lock().unwrap();
            let start_index = raft.log().last_taken_index().id + 1;
            raft.take_committed()
                .enumerate()
                .filter_map(|(offset, entry)| {
                    LockCommand::decode(&entry.data)
                        .ok()
                        .map(|command| (start_index + offset as u64, command))
                })
                .collect()
        };
        if applied.is_empty() {
            continue;
        }
        for (index, command) in applied {
            let result = engine.table.lock().unwrap().apply(&command);

            if let Some(tx) = engine.pending_applies.lock().unwrap().remove(&index) {
                tx.send(()).ok();
            }

            if let LockCommand::AbortClient { client_id } = &command {
                let waited_on = engine.waiters.lock().unwrap().remove_client(client_id);
                if let Some(resource) = waited_on {
                    engine.grants.sender().send(GrantEvent::Aborted {
                        resource,
                        client_id: client_id.clone(),
                    }).ok();
                }
            }
            for resource in &result.vacated {
                engine.drain_waiters(resource);
            }
            if engine.is_leader() {
                engine.run_deadlock_detection();
            }
        }
    });
}

/// §4.5 `expire`: background sweeper that proposes `EXPIRE` for every lock whose
/// `acquired_at + ttl` has passed (§3 "Lock entry" `ttl`). Only runs its sweep while leader, since
/// only the leader's table reflects "now" against proposals it can actually commit.
fn spawn_expiry_sweeper(engine: Arc<LockEngine>) {
    let interval = Duration::from_millis(engine.config.expiry_sweep_interval_ms.max(1));
    thread::spawn(move || loop {
        thread::sleep(interval);
        if !engine.is_leader() {
            continue;
        }
        let expired = engine.table.lock().unwrap().expired(now_millis());
        for (resource, holders) in expired {
            for client_id in holders {
                debug!("expiring lock on {} held by {}", resource, client_id);
                if let Err(err) = engine.propose_async(LockCommand::Expire {
                    resource: resource.clone(),
                    client_id,
                }) {
                    warn!("failed to propose expire for {}: {}", resource, err);
                }
            }
        }
    });
}
