//! Length-prefixed message queue transport (§4.3): a client and server side
//! sharing one peer-connection abstraction over a cancellable stream.
//!
//! Unlike the DAP stdio/socket framing in [`crate::dap`], this transport
//! carries the broker's own internal messages between the adapter process
//! and the debuggee process over a plain TCP or UDS socket: a 4-byte
//! little-endian length prefix followed by a JSON payload.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::socket::{Addr, CancellableStream, CancellationToken, Listener, RawStream};

/// Callbacks invoked by a queue's background receive thread. Mirrors
/// `MPProtocol`'s `on_msg_received`/`connection_closed`/`connection_made`.
pub trait TransportHandler<T>: Send + Sync {
    fn on_msg_received(&self, peer: PeerId, msg: T);
    fn connection_made(&self, peer: PeerId);
    fn connection_closed(&self, peer: PeerId, err: Option<Error>);
}

/// Identifies one peer connection on a [`ServerQueue`]; always `0` on a
/// [`ClientQueue`], which has exactly one peer (the server it connected to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

fn write_frame(stream: &mut CancellableStream, payload: &[u8], token: &CancellationToken) -> Result<()> {
    let len = (payload.len() as u32).to_le_bytes();
    stream.send_all(&len, token)?;
    stream.send_all(payload, token)
}

fn read_frame(stream: &mut CancellableStream, token: &CancellationToken) -> Result<Vec<u8>> {
    let len_buf = stream.recv_exact(4, token)?;
    let len = u32::from_le_bytes(len_buf.try_into().expect("4 bytes")) as usize;
    stream.recv_exact(len, token)
}

struct Peer {
    stream: Mutex<CancellableStream>,
    token: CancellationToken,
    send_lock: Mutex<()>,
}

/// A single outbound connection to a [`ServerQueue`], mirroring
/// `ClientMPQueue`.
pub struct ClientQueue<T> {
    peer: Arc<Peer>,
    recv_thread: Option<JoinHandle<()>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ClientQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn connect(addr: &Addr, handler: Arc<dyn TransportHandler<T>>) -> Result<Self> {
        let token = CancellationToken::new();
        let raw = RawStream::connect(addr, &token)?;
        Self::from_stream(CancellableStream::plain(raw), token, handler)
    }

    /// Like [`Self::connect`], but takes an already-connected (and possibly
    /// TLS-wrapped) stream instead of dialing `addr` itself. Used for
    /// attach-over-TLS, where the handshake has to happen before the framed
    /// queue protocol takes over the same socket.
    pub fn from_stream(
        stream: CancellableStream,
        token: CancellationToken,
        handler: Arc<dyn TransportHandler<T>>,
    ) -> Result<Self> {
        let peer = Arc::new(Peer {
            stream: Mutex::new(stream),
            token,
            send_lock: Mutex::new(()),
        });

        handler.connection_made(PeerId(0));
        let recv_thread = spawn_recv_thread(Arc::clone(&peer), PeerId(0), handler);

        Ok(ClientQueue {
            peer,
            recv_thread: Some(recv_thread),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn send(&self, msg: &T) -> Result<()> {
        send_to_peer(&self.peer, msg)
    }

    /// Cancels the in-flight read/write and joins the receive thread.
    pub fn stop(mut self) {
        self.peer.token.cancel();
        if let Some(t) = self.recv_thread.take() {
            let _ = t.join();
        }
    }
}

/// A bound endpoint accepting connections from potentially many debuggees
/// (multiple concurrent playbook runs attached to one `ansibug listen`
/// session — §11), mirroring `ServerMPQueue`.
pub struct ServerQueue<T> {
    listener: Arc<Listener>,
    accept_token: CancellationToken,
    next_peer_id: AtomicU64,
    peers: Mutex<HashMap<PeerId, Arc<Peer>>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ServerQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn bind(addr: &Addr) -> Result<(Arc<Self>, Addr)> {
        let listener = Listener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let queue = Arc::new(ServerQueue {
            listener: Arc::new(listener),
            accept_token: CancellationToken::new(),
            next_peer_id: AtomicU64::new(0),
            peers: Mutex::new(HashMap::new()),
            accept_thread: Mutex::new(None),
            _marker: std::marker::PhantomData,
        });
        Ok((queue, local_addr))
    }

    /// Spawns the accept loop. Each accepted connection gets its own
    /// recv thread; `handler` is shared across all peers.
    pub fn serve(self: &Arc<Self>, handler: Arc<dyn TransportHandler<T>>) {
        let this = Arc::clone(self);
        let thread = std::thread::spawn(move || this.accept_loop(handler));
        *self.accept_thread.lock().unwrap() = Some(thread);
    }

    fn accept_loop(self: Arc<Self>, handler: Arc<dyn TransportHandler<T>>) {
        loop {
            let raw = match self.listener.accept(&self.accept_token) {
                Ok(raw) => raw,
                Err(Error::Cancelled) => return,
                Err(_) => continue,
            };

            let id = PeerId(self.next_peer_id.fetch_add(1, Ordering::SeqCst));
            let stream = CancellableStream::plain(raw);
            self.register_peer(id, stream, &handler);
        }
    }

    /// Like [`Self::serve`], but upgrades each accepted connection to TLS
    /// before registering it, for a `listen --wrap-tls` server.
    pub fn serve_tls(self: &Arc<Self>, config: Arc<rustls::ServerConfig>, handler: Arc<dyn TransportHandler<T>>) {
        let this = Arc::clone(self);
        let thread = std::thread::spawn(move || this.accept_tls_loop(config, handler));
        *self.accept_thread.lock().unwrap() = Some(thread);
    }

    fn accept_tls_loop(
        self: Arc<Self>,
        config: Arc<rustls::ServerConfig>,
        handler: Arc<dyn TransportHandler<T>>,
    ) {
        loop {
            let raw = match self.listener.accept(&self.accept_token) {
                Ok(raw) => raw,
                Err(Error::Cancelled) => return,
                Err(_) => continue,
            };

            let handshake_token = CancellationToken::new();
            let stream = match CancellableStream::wrap_tls_server(raw, config.clone(), &handshake_token) {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("TLS handshake with debuggee peer failed: {e}");
                    continue;
                }
            };

            let id = PeerId(self.next_peer_id.fetch_add(1, Ordering::SeqCst));
            self.register_peer(id, stream, &handler);
        }
    }

    fn register_peer(&self, id: PeerId, stream: CancellableStream, handler: &Arc<dyn TransportHandler<T>>) {
        let peer = Arc::new(Peer {
            stream: Mutex::new(stream),
            token: CancellationToken::new(),
            send_lock: Mutex::new(()),
        });
        self.peers.lock().unwrap().insert(id, Arc::clone(&peer));

        handler.connection_made(id);
        spawn_recv_thread(peer, id, Arc::clone(handler));
    }

    pub fn send(&self, peer: PeerId, msg: &T) -> Result<()> {
        let peer_handle = self
            .peers
            .lock()
            .unwrap()
            .get(&peer)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown peer {}", peer.0)))?;
        send_to_peer(&peer_handle, msg)
    }

    pub fn broadcast(&self, msg: &T) -> Result<()> {
        let peers: Vec<_> = self.peers.lock().unwrap().values().cloned().collect();
        for peer in peers {
            send_to_peer(&peer, msg)?;
        }
        Ok(())
    }

    /// Number of currently connected peers, for `listen --no-wait`'s
    /// "has an adapter attached yet?" poll.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn stop(&self) {
        self.accept_token.cancel();
        let peers = std::mem::take(&mut *self.peers.lock().unwrap());
        for peer in peers.values() {
            peer.token.cancel();
        }
        if let Some(t) = self.accept_thread.lock().unwrap().take() {
            let _ = t.join();
        }
    }
}

fn send_to_peer<T: Serialize>(peer: &Peer, msg: &T) -> Result<()> {
    let payload = serde_json::to_vec(msg)?;
    let _guard = peer.send_lock.lock().unwrap();
    let mut stream = peer.stream.lock().unwrap();
    write_frame(&mut stream, &payload, &peer.token)
}

fn spawn_recv_thread<T>(
    peer: Arc<Peer>,
    id: PeerId,
    handler: Arc<dyn TransportHandler<T>>,
) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
{
    std::thread::spawn(move || loop {
        let frame = {
            let mut stream = peer.stream.lock().unwrap();
            read_frame(&mut stream, &peer.token)
        };

        match frame {
            Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(msg) => handler.on_msg_received(id, msg),
                Err(e) => {
                    handler.connection_closed(id, Some(Error::Json(e)));
                    return;
                }
            },
            Err(Error::Cancelled) => {
                handler.connection_closed(id, None);
                return;
            }
            Err(e) => {
                handler.connection_closed(id, Some(e));
                return;
            }
        }
    })
}
