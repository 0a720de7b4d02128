//! MESI coherence engine (§4.7). There is no leader; every node answers `cache_read` and
//! `cache_invalidate` requests from any peer and drives its own local transitions off the replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::bounded;
use log::debug;
use transport::{CacheStateWire, NodeId, Peer, RpcPayload, Transport};

use crate::line::{CacheLine, CacheState};
use crate::store::CacheStore;

#[derive(Clone)]
pub struct CacheEngineConfig {
    pub capacity: usize,
    pub call_deadline_ms: u64,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            call_deadline_ms: 1_000,
        }
    }
}

pub struct CacheEngine {
    node_id: NodeId,
    store: Mutex<CacheStore>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    transport: Arc<Transport>,
    config: CacheEngineConfig,
    write_back_count: AtomicU64,
}

impl CacheEngine {
    pub fn start<A: std::net::ToSocketAddrs>(
        node_id: NodeId,
        listen_addr: A,
        peers: Vec<Peer>,
        config: CacheEngineConfig,
    ) -> std::io::Result<Arc<Self>> {
        let transport = Transport::bind(node_id.clone(), listen_addr, peers)?;
        let engine = Arc::new(Self {
            node_id,
            store: Mutex::new(CacheStore::new(config.capacity)),
            key_locks: Mutex::new(HashMap::new()),
            transport,
            config,
            write_back_count: AtomicU64::new(0),
        });

        spawn_dispatch_loop(engine.clone());
        Ok(engine)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.transport.peers().cloned().collect()
    }

    /// Number of `Modified` lines written back (here: logged) on eviction or remote invalidation,
    /// exposed so tests and `status` can observe the documented durability limit of the cache.
    pub fn write_back_count(&self) -> u64 {
        self.write_back_count.load(Ordering::Relaxed)
    }

    /// §4.7/§6 `get`. Returns the value together with the coherence state the caller now observes
    /// for `key` (`None` on a miss, i.e. `Invalid`). Local hit returns immediately; a miss
    /// broadcasts `cache_read` and installs the first peer-supplied value as `Shared`, or reports
    /// a miss if no peer has it (no external store is configured in this deployment; see
    /// `DESIGN.md`).
    pub fn get(&self, key: &str) -> (Option<Vec<u8>>, CacheState) {
        let now = now_millis();
        if let Some(line) = self.store.lock().unwrap().get(key, now) {
            return (Some(line.value.clone()), line.state);
        }

        let peers: Vec<NodeId> = self.transport.peers().cloned().collect();
        if peers.is_empty() {
            return (None, CacheState::Invalid);
        }

        let (tx, rx) = bounded(peers.len());
        for peer in peers.iter().cloned() {
            let transport = self.transport.clone();
            let key = key.to_string();
            let deadline = Duration::from_millis(self.config.call_deadline_ms);
            let tx = tx.clone();
            thread::spawn(move || {
                let result = transport.call(&peer, RpcPayload::CacheRead { key }, deadline);
                tx.send(result).ok();
            });
        }
        drop(tx);

        let mut found = None;
        for _ in 0..peers.len() {
            match rx.recv() {
                Ok(Ok(RpcPayload::CacheReadResponse { value: Some(value), .. })) => {
                    found = Some(value);
                    break;
                }
                _ => continue,
            }
        }

        match found {
            Some(value) => {
                self.store
                    .lock()
                    .unwrap()
                    .install(key, CacheLine::new(value.clone(), CacheState::Shared, now));
                (Some(value), CacheState::Shared)
            }
            None => (None, CacheState::Invalid),
        }
    }

    /// §4.7 `put`. Invalidates every reachable peer's line for `key`, then installs the local line
    /// as `Modified`. Writes to the same key are serialized through a per-key lock (§5).
    pub fn put(&self, key: &str, value: Vec<u8>) {
        let key_lock = self.key_lock(key);
        let _guard = key_lock.lock().unwrap();

        self.broadcast_invalidate(key);

        let now = now_millis();
        let evicted = self
            .store
            .lock()
            .unwrap()
            .install(key, CacheLine::new(value, CacheState::Modified, now));
        if let Some((evicted_key, line)) = evicted {
            self.write_back_if_modified(&evicted_key, &line);
        }
    }

    /// §6 `delete`. Invalidates every peer, then drops the local line entirely.
    pub fn delete(&self, key: &str) {
        let key_lock = self.key_lock(key);
        let _guard = key_lock.lock().unwrap();

        self.broadcast_invalidate(key);
        let removed = self.store.lock().unwrap().remove(key);
        if let Some(line) = removed {
            self.write_back_if_modified(key, &line);
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Broadcasts `cache_invalidate(key)` to every peer, waiting up to `call_deadline_ms` per
    /// peer. A peer that fails to acknowledge in time is treated as invalidated (§4.7 "Failure
    /// semantics").
    fn broadcast_invalidate(&self, key: &str) {
        let peers: Vec<NodeId> = self.transport.peers().cloned().collect();
        if peers.is_empty() {
            return;
        }
        let (tx, rx) = bounded(peers.len());
        for peer in peers.iter().cloned() {
            let transport = self.transport.clone();
            let key = key.to_string();
            let deadline = Duration::from_millis(self.config.call_deadline_ms);
            let tx = tx.clone();
            thread::spawn(move || {
                let result = transport.call(&peer, RpcPayload::CacheInvalidate { key }, deadline);
                tx.send((peer, result)).ok();
            });
        }
        drop(tx);
        for _ in 0..peers.len() {
            if let Ok((peer, result)) = rx.recv() {
                if result.is_err() {
                    debug!("peer {} did not ack invalidate in time, treating as invalidated", peer);
                }
            }
        }
    }

    fn write_back_if_modified(&self, key: &str, line: &CacheLine) {
        if line.state == CacheState::Modified {
            self.write_back_count.fetch_add(1, Ordering::Relaxed);
            debug!("writing back modified line for {} (no external store configured)", key);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn state_to_wire(state: CacheState) -> CacheStateWire {
    match state {
        CacheState::Modified => CacheStateWire::Modified,
        CacheState::Exclusive => CacheStateWire::Exclusive,
        CacheState::Shared => CacheStateWire::Shared,
        CacheState::Invalid => CacheStateWire::Invalid,
    }
}

fn spawn_dispatch_loop(engine: Arc<CacheEngine>) {
    thread::spawn(move || loop {
        let envelope = match engine.transport.inbox().recv() {
            Ok(envelope) => envelope,
            Err(_) => break,
        };
        match &envelope.payload {
            RpcPayload::CacheRead { key } => {
                let now = now_millis();
                let mut store = engine.store.lock().unwrap();
                let response = match store.peek(key).cloned() {
                    Some(line) if line.state != CacheState::Invalid => {
                        let responded_state = match line.state {
                            CacheState::Modified => {
                                engine.write_back_count.fetch_add(1, Ordering::Relaxed);
                                CacheState::Shared
                            }
                            CacheState::Exclusive => CacheState::Shared,
                            other => other,
                        };
                        store.set_state(key, responded_state);
                        RpcPayload::CacheReadResponse {
                            key: key.clone(),
                            value: Some(line.value.clone()),
                            state: state_to_wire(responded_state),
                        }
                    }
                    _ => RpcPayload::CacheReadResponse {
                        key: key.clone(),
                        value: None,
                        state: CacheStateWire::Invalid,
                    },
                };
                drop(store);
                let _ = engine.transport.reply(&envelope, response);
            }
            RpcPayload::CacheInvalidate { key } => {
                let mut store = engine.store.lock().unwrap();
                if let Some(line) = store.peek(key).cloned() {
                    if line.state == CacheState::Modified {
                        engine.write_back_count.fetch_add(1, Ordering::Relaxed);
                    }
                    store.set_state(key, CacheState::Invalid);
                }
                drop(store);
                let _ = engine
                    .transport
                    .reply(&envelope, RpcPayload::CacheInvalidateAck { key: key.clone() });
            }
            _ => debug!("cache node ignoring unexpected payload kind {}", envelope.kind),
        }
    });
}
