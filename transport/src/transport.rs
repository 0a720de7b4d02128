use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace, warn};

use crate::envelope::{Envelope, NodeId, RpcPayload};
use crate::error::TransportError;

/// A peer this transport knows how to reach.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: NodeId,
    pub address: String,
}

enum ConnState {
    Connected(TcpStream),
    Unreachable,
}

/// Best-effort RPC between named peers, built on length-prefixed bincode-encoded [`Envelope`]s
/// over TCP. Guarantees delivery-or-timeout per call, not ordering across peers; a peer that
/// fails to connect presents as [`TransportError::Unreachable`] until a subsequent call succeeds
/// in re-establishing the connection.
pub struct Transport {
    node_id: NodeId,
    peer_addrs: HashMap<NodeId, String>,
    conns: Mutex<HashMap<NodeId, ConnState>>,
    next_msg_id: AtomicU64,
    /// Keyed by `(peer we expect the reply from, msg_id)`, not bare `msg_id` — two different
    /// peers can independently pick the same counter value, and a fresh inbound request sharing
    /// a pending call's `msg_id` would otherwise be misrouted as that call's reply.
    pending: Mutex<HashMap<(NodeId, u64), Sender<Envelope>>>,
    inbox_tx: Sender<Envelope>,
    inbox_rx: Receiver<Envelope>,
    self_weak: Weak<Transport>,
}

impl Transport {
    /// Binds `listen_addr` and starts the accept loop in a background thread. `peers` need not
    /// all be reachable yet; connections are established lazily on first use.
    pub fn bind<A: ToSocketAddrs>(
        node_id: NodeId,
        listen_addr: A,
        peers: Vec<Peer>,
    ) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind(listen_addr)?;
        listener.set_nonblocking(true)?;

        let (inbox_tx, inbox_rx) = bounded(1024);
        let transport = Arc::new_cyclic(|weak| Self {
            node_id,
            peer_addrs: peers.into_iter().map(|p| (p.id, p.address)).collect(),
            conns: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            inbox_tx,
            inbox_rx,
            self_weak: weak.clone(),
        });

        let accept_transport = transport.clone();
        thread::spawn(move || accept_loop(listener, accept_transport));

        Ok(transport)
    }

    fn arc(&self) -> Arc<Transport> {
        self.self_weak
            .upgrade()
            .expect("Transport always outlives its own handles")
    }

    /// This node's own id, as given to [`bind`](Self::bind).
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peers(&self) -> impl Iterator<Item = &NodeId> {
        self.peer_addrs.keys()
    }

    /// Receiver for envelopes addressed to this node that are not replies to an outstanding
    /// [`call`](Self::call) — i.e. requests a dispatcher loop should handle and answer via
    /// [`reply`](Self::reply).
    pub fn inbox(&self) -> &Receiver<Envelope> {
        &self.inbox_rx
    }

    /// Sends `payload` to `receiver` and blocks for a reply until `deadline` elapses.
    pub fn call(
        &self,
        receiver: &NodeId,
        payload: RpcPayload,
        deadline: Duration,
    ) -> Result<RpcPayload, TransportError> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(msg_id, self.node_id.clone(), receiver.clone(), payload, now_millis());

        let key = (receiver.clone(), msg_id);
        let (tx, rx) = bounded(1);
        self.pending.lock().unwrap().insert(key.clone(), tx);

        if let Err(err) = self.send_envelope(receiver, &envelope) {
            self.pending.lock().unwrap().remove(&key);
            return Err(err);
        }

        let result = rx
            .recv_timeout(deadline)
            .map(|reply| reply.payload)
            .map_err(|_| TransportError::Timeout);
        self.pending.lock().unwrap().remove(&key);
        result
    }

    /// Sends `payload` to `receiver` without waiting for a reply. Used for Raft's own messages,
    /// which are asynchronous gossip rather than request/response calls.
    pub fn notify(&self, receiver: &NodeId, payload: RpcPayload) -> Result<(), TransportError> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(msg_id, self.node_id.clone(), receiver.clone(), payload, now_millis());
        self.send_envelope(receiver, &envelope)
    }

    /// Replies to a previously received request, reusing its `msg_id` so the original caller's
    /// [`call`](Self::call) can correlate it.
    pub fn reply(&self, request: &Envelope, payload: RpcPayload) -> Result<(), TransportError> {
        let envelope = Envelope::new(
            request.msg_id,
            self.node_id.clone(),
            request.sender.clone(),
            payload,
            now_millis(),
        );
        self.send_envelope(&request.sender, &envelope)
    }

    fn send_envelope(&self, receiver: &NodeId, envelope: &Envelope) -> Result<(), TransportError> {
        let encoded = bincode::serialize(envelope)?;

        {
            let mut conns = self.conns.lock().unwrap();
            if let Some(ConnState::Connected(stream)) = conns.get_mut(receiver) {
                if write_frame(stream, &encoded).is_ok() {
                    return Ok(());
                }
                conns.remove(receiver);
            }
        }

        let addr = self
            .peer_addrs
            .get(receiver)
            .ok_or_else(|| TransportError::UnknownPeer(receiver.clone()))?;

        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                write_frame(&mut stream, &encoded)?;
                let reader_stream = stream.try_clone()?;
                self.conns
                    .lock()
                    .unwrap()
                    .insert(receiver.clone(), ConnState::Connected(stream));

                let transport = self.arc();
                let peer = receiver.clone();
                thread::spawn(move || read_loop(reader_stream, transport, Some(peer)));
                Ok(())
            }
            Err(err) => {
                warn!("peer {} unreachable: {}", receiver, err);
                self.conns
                    .lock()
                    .unwrap()
                    .insert(receiver.clone(), ConnState::Unreachable);
                Err(TransportError::Unreachable(receiver.clone()))
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()
}

fn read_frame(reader: &mut BufReader<&TcpStream>) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn accept_loop(listener: TcpListener, transport: Arc<Transport>) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                trace!("accepted connection from {}", addr);
                let transport = transport.clone();
                thread::spawn(move || read_loop(stream, transport, None));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                warn!("accept failed: {}", err);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Reads envelopes off `stream` until it closes, routing each to either the caller waiting on its
/// `msg_id` or to the inbox for the dispatch loop to handle. `known_peer` is `Some` for
/// connections this node initiated (where the peer id is already known); `None` for accepted
/// connections, where the peer registers itself via the `sender` field of its first envelope.
fn read_loop(stream: TcpStream, transport: Arc<Transport>, known_peer: Option<NodeId>) {
    let mut registered = known_peer;
    let mut reader = BufReader::new(&stream);

    loop {
        let frame = match read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let envelope: Envelope = match bincode::deserialize(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("dropping malformed envelope: {}", err);
                continue;
            }
        };

        if registered.is_none() {
            if let Ok(cloned) = stream.try_clone() {
                transport
                    .conns
                    .lock()
                    .unwrap()
                    .entry(envelope.sender.clone())
                    .or_insert(ConnState::Connected(cloned));
            }
            registered = Some(envelope.sender.clone());
        }

        route_envelope(&transport, envelope);
    }

    if let Some(peer) = registered {
        let mut conns = transport.conns.lock().unwrap();
        if let Some(ConnState::Connected(_)) = conns.get(&peer) {
            conns.insert(peer, ConnState::Unreachable);
        }
    }
}

fn route_envelope(transport: &Arc<Transport>, envelope: Envelope) {
    let key = (envelope.sender.clone(), envelope.msg_id);
    let mut pending = transport.pending.lock().unwrap();
    if let Some(sender) = pending.remove(&key) {
        drop(pending);
        let _ = sender.send(envelope);
    } else {
        drop(pending);
        if transport.inbox_tx.send(envelope).is_err() {
            debug!("inbox closed, dropping envelope");
        }
    }
}
