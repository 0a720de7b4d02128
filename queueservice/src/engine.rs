//! Wires the hash ring, WAL, and in-memory queue state to a [`Transport`] (§4.6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use transport::{NodeId, Peer, QueueOp, RpcPayload, Transport};

use crate::error::QueueError;
use crate::message::{QueueMessage, WalRecord};
use crate::ring::HashRing;
use crate::state::{InFlight, QueueState};
use crate::wal::Wal;

const DEFAULT_FORWARD_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone)]
pub struct QueueEngineConfig {
    pub wal_path: String,
    pub visibility_timeout_ms: u64,
    pub virtual_nodes: usize,
    pub forward_max_attempts: u32,
    pub sweep_interval_ms: u64,
    pub call_deadline_ms: u64,
}

impl Default for QueueEngineConfig {
    fn default() -> Self {
        Self {
            wal_path: "queue.wal".to_string(),
            visibility_timeout_ms: DEFAULT_VISIBILITY_TIMEOUT_MS,
            virtual_nodes: 150,
            forward_max_attempts: DEFAULT_FORWARD_MAX_ATTEMPTS,
            sweep_interval_ms: 1_000,
            call_deadline_ms: 2_000,
        }
    }
}

pub struct QueueEngine {
    node_id: NodeId,
    seq: AtomicU64,
    ring: Mutex<HashRing>,
    state: Mutex<QueueState>,
    wal: Mutex<Wal>,
    transport: Arc<Transport>,
    config: QueueEngineConfig,
}

impl QueueEngine {
    pub fn start<A: std::net::ToSocketAddrs>(
        node_id: NodeId,
        listen_addr: A,
        peers: Vec<Peer>,
        config: QueueEngineConfig,
    ) -> std::io::Result<Arc<Self>> {
        let mut ring_nodes: Vec<String> = peers.iter().map(|p| p.id.clone()).collect();
        ring_nodes.push(node_id.clone());
        let ring = HashRing::with_nodes(config.virtual_nodes, ring_nodes);

        let wal = Wal::open(&config.wal_path)?;
        let records = Wal::recover(&config.wal_path)?;
        let mut state = QueueState::new();
        for record in &records {
            state.apply(record);
        }

        let transport = Transport::bind(node_id.clone(), listen_addr, peers)?;

        let engine = Arc::new(Self {
            node_id,
            seq: AtomicU64::new(0),
            ring: Mutex::new(ring),
            state: Mutex::new(state),
            wal: Mutex::new(wal),
            transport,
            config,
        });

        spawn_dispatch_loop(engine.clone());
        spawn_redelivery_sweeper(engine.clone());

        Ok(engine)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.transport.peers().cloned().collect()
    }

    pub fn owns(&self, queue_name: &str) -> bool {
        self.ring.lock().unwrap().owner(queue_name) == Some(self.node_id.as_str())
    }

    pub fn queue_len(&self, queue_name: &str) -> usize {
        self.state.lock().unwrap().queue_len(queue_name)
    }

    /// §4.6 `enqueue`. Local when this node owns `queue_name`'s hash slot; otherwise forwards to
    /// the owner, falling back to the next clockwise owner after `forward_max_attempts` failures.
    pub fn enqueue(&self, queue_name: &str, payload: Vec<u8>) -> Result<String, QueueError> {
        if self.owns(queue_name) {
            return self.local_enqueue(queue_name, payload);
        }

        let mut excluded: Vec<String> = Vec::new();
        for _ in 0..self.config.forward_max_attempts.max(1) {
            let owner = {
                let ring = self.ring.lock().unwrap();
                ring.next_owner_excluding(queue_name, &excluded)
                    .map(str::to_string)
            };
            let owner = match owner {
                Some(owner) => owner,
                None => break,
            };
            if owner == self.node_id {
                return self.local_enqueue(queue_name, payload);
            }

            let payload_clone = payload.clone();
            let result = self.transport.call(
                &owner,
                RpcPayload::QueueForward(QueueOp::Enqueue {
                    queue_name: queue_name.to_string(),
                    payload: payload_clone,
                }),
                Duration::from_millis(self.config.call_deadline_ms),
            );
            match result {
                Ok(RpcPayload::QueueForwardAck { msg_id }) => return Ok(msg_id),
                Ok(_) | Err(_) => {
                    warn!("forwarding enqueue to {} failed, trying next owner", owner);
                    excluded.push(owner);
                    continue;
                }
            }
        }
        Err(QueueError::WrongNode(excluded.last().cloned()))
    }

    fn local_enqueue(&self, queue_name: &str, payload: Vec<u8>) -> Result<String, QueueError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let msg = QueueMessage {
            msg_id: format!("{}-{}", self.node_id, seq),
            queue_name: queue_name.to_string(),
            payload,
            enqueued_at: now_millis(),
            attempt_count: 1,
        };
        self.wal
            .lock()
            .unwrap()
            .append(&WalRecord::Enqueue(msg.clone()))
            .map_err(|err| QueueError::Storage(err.to_string()))?;
        self.state.lock().unwrap().apply(&WalRecord::Enqueue(msg.clone()));
        Ok(msg.msg_id)
    }

    /// §4.6 `dequeue`. Rejects with `WrongNode` if this node is not `queue_name`'s owner.
    pub fn dequeue(&self, queue_name: &str) -> Result<Option<QueueMessage>, QueueError> {
        if !self.owns(queue_name) {
            let hint = self.ring.lock().unwrap().owner(queue_name).map(str::to_string);
            return Err(QueueError::WrongNode(hint));
        }

        let message = match self.state.lock().unwrap().pop_ready(queue_name) {
            Some(message) => message,
            None => return Ok(None),
        };

        self.wal
            .lock()
            .unwrap()
            .append(&WalRecord::Dequeue(message.msg_id.clone()))
            .map_err(|err| QueueError::Storage(err.to_string()))?;

        let now = now_millis();
        self.state.lock().unwrap().insert_in_flight(
            message.msg_id.clone(),
            InFlight {
                message: message.clone(),
                delivered_at: now,
                visibility_deadline: now + self.config.visibility_timeout_ms,
            },
        );
        Ok(Some(message))
    }

    /// §4.6 `ack`. Unknown `msg_id` is treated as success; the caller cannot distinguish a
    /// double-ack from an unknown id (§4.6 "Acknowledge").
    pub fn ack(&self, msg_id: &str) -> Result<(), QueueError> {
        self.wal
            .lock()
            .unwrap()
            .append(&WalRecord::Ack(msg_id.to_string()))
            .map_err(|err| QueueError::Storage(err.to_string()))?;
        self.state.lock().unwrap().remove_in_flight(msg_id);
        Ok(())
    }

    fn redeliver_expired(&self) {
        let now = now_millis();
        let expired = self.state.lock().unwrap().expired_in_flight(now);
        for msg_id in expired {
            let in_flight = match self.state.lock().unwrap().remove_in_flight(&msg_id) {
                Some(in_flight) => in_flight,
                None => continue,
            };
            if let Err(err) = self
                .wal
                .lock()
                .unwrap()
                .append(&WalRecord::Redeliver(msg_id.clone()))
            {
                warn!("failed to record redelivery of {}: {}", msg_id, err);
                continue;
            }
            self.state.lock().unwrap().requeue_front(in_flight.message);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn spawn_dispatch_loop(engine: Arc<QueueEngine>) {
    thread::spawn(move || loop {
        let envelope = match engine.transport.inbox().recv() {
            Ok(envelope) => envelope,
            Err(_) => break,
        };
        match &envelope.payload {
            RpcPayload::QueueForward(QueueOp::Enqueue { queue_name, payload }) => {
                let reply = if engine.owns(queue_name) {
                    match engine.local_enqueue(queue_name, payload.clone()) {
                        Ok(msg_id) => RpcPayload::QueueForwardAck { msg_id },
                        Err(err) => RpcPayload::Error(err.to_string()),
                    }
                } else {
                    RpcPayload::Error("wrong node".to_string())
                };
                let _ = engine.transport.reply(&envelope, reply);
            }
            _ => debug!("queue node ignoring unexpected payload kind {}", envelope.kind),
        }
    });
}

fn spawn_redelivery_sweeper(engine: Arc<QueueEngine>) {
    let interval = Duration::from_millis(engine.config.sweep_interval_ms.max(1));
    thread::spawn(move || loop {
        thread::sleep(interval);
        engine.redeliver_expired();
    });
}
