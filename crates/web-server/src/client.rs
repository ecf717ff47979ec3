//! WebSocket client registry and per-client receive loop.
//!
//! Every upgraded connection becomes a [`WsClient`]: the write half sits
//! behind a send lock so frames from a broadcast pass and from direct sends
//! (initial snapshot, pong, close echo) never interleave on the socket. The
//! read half is owned by exactly one receive loop, which unregisters and
//! closes the client when it exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServerError;
use crate::frame::{self, Opcode};

/// Unique id assigned at upgrade time.
pub type ClientId = Uuid;

/// Outbound half of a client connection.
pub type ClientSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A registered WebSocket client.
pub struct WsClient {
    id: ClientId,
    peer: String,
    /// Send lock. `None` once the socket has been shut down.
    sink: Mutex<Option<ClientSink>>,
    lifetime: CancellationToken,
}

impl WsClient {
    /// Creates a client whose lifetime is linked to `parent`.
    pub fn new(sink: ClientSink, peer: impl Into<String>, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            sink: Mutex::new(Some(sink)),
            lifetime: parent.child_token(),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Cancelled when the client is removed or the server stops.
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Writes one frame while holding the send lock.
    ///
    /// `payload` runs only once the lock is held.
    async fn write<F, P>(&self, opcode: Opcode, payload: F, timeout: Duration) -> Result<(), ServerError>
    where
        F: FnOnce() -> P,
        P: AsRef<[u8]>,
    {
        let send = async {
            let mut sink = self.sink.lock().await;
            let sink = sink.as_mut().ok_or(ServerError::ClientGone)?;
            let payload = payload();
            frame::write_frame(sink, opcode, payload.as_ref()).await?;
            Ok(())
        };

        tokio::select! {
            biased;
            _ = self.lifetime.cancelled() => Err(ServerError::ClientGone),
            result = tokio::time::timeout(timeout, send) => {
                result.unwrap_or(Err(ServerError::Timeout))
            }
        }
    }

    /// Shuts down and drops the write half. Safe to call more than once.
    async fn shutdown(&self, timeout: Duration) {
        let close = async {
            let sink = self.sink.lock().await.take();
            if let Some(mut sink) = sink {
                let _ = sink.shutdown().await;
            }
        };
        if tokio::time::timeout(timeout, close).await.is_err() {
            tracing::debug!(client_id = %self.id, "timed out closing client socket");
        }
    }
}

/// Live WebSocket clients keyed by id.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<WsClient>>>,
    send_timeout: Duration,
}

impl ClientRegistry {
    /// Creates an empty registry. Every send is bounded by `send_timeout`.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Adds a client. Returns `false` if the id is already taken.
    pub async fn register(&self, client: Arc<WsClient>) -> bool {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.id) {
            return false;
        }
        tracing::debug!(client_id = %client.id, peer = %client.peer, "client registered");
        clients.insert(client.id, client);
        true
    }

    /// Unregisters a client and cancels its lifetime.
    ///
    /// Returns `false` if it was already gone.
    pub async fn remove(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id);
        match removed {
            Some(client) => {
                client.lifetime.cancel();
                tracing::debug!(client_id = %id, peer = %client.peer, "client removed");
                true
            }
            None => false,
        }
    }

    /// Removes every client. Returns how many were removed.
    pub async fn remove_all(&self) -> usize {
        let drained: Vec<Arc<WsClient>> = self.clients.write().await.drain().map(|(_, c)| c).collect();
        for client in &drained {
            client.lifetime.cancel();
        }
        drained.len()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Returns the clients registered right now.
    pub async fn snapshot(&self) -> Vec<Arc<WsClient>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Sends one frame to `client`.
    ///
    /// On any failure the client is removed before the error is returned.
    pub async fn send_to(
        &self,
        client: &WsClient,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), ServerError> {
        self.send_to_with(client, opcode, || payload).await
    }

    /// Like [`send_to`](Self::send_to), but builds the payload after the
    /// client's send lock is taken.
    pub async fn send_to_with<F, P>(
        &self,
        client: &WsClient,
        opcode: Opcode,
        payload: F,
    ) -> Result<(), ServerError>
    where
        F: FnOnce() -> P,
        P: AsRef<[u8]>,
    {
        match client.write(opcode, payload, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.remove(client.id).await;
                Err(e)
            }
        }
    }
}

/// Reads client frames until close, error, or cancellation, then
/// unregisters and closes the client.
pub async fn run_receive_loop<R>(registry: Arc<ClientRegistry>, client: Arc<WsClient>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = client.lifetime.cancelled() => break,
            frame = frame::read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(frame)) => match frame.opcode {
                Opcode::Close => {
                    let _ = registry.send_to(&client, Opcode::Close, &frame.payload).await;
                    tracing::debug!(client_id = %client.id, "close frame received");
                    break;
                }
                Opcode::Ping => {
                    if let Err(e) = registry.send_to(&client, Opcode::Pong, &frame.payload).await {
                        tracing::debug!(client_id = %client.id, "pong failed: {e}");
                        break;
                    }
                }
                // Server push only: client data frames and pongs are ignored.
                _ => {}
            },
            Ok(None) => {
                tracing::debug!(client_id = %client.id, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::debug!(client_id = %client.id, "receive error: {e}");
                break;
            }
        }
    }

    registry.remove(client.id).await;
    client.shutdown(registry.send_timeout).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_masked_frame, read_frame};
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    const KEY: [u8; 4] = [1, 2, 3, 4];
    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Reads one server frame (unmasked) from the peer side.
    async fn read_server_frame(peer: &mut DuplexStream) -> (u8, Vec<u8>) {
        let mut head = [0u8; 2];
        peer.read_exact(&mut head).await.unwrap();
        let len = match head[1] & 0x7F {
            126 => peer.read_u16().await.unwrap() as usize,
            127 => peer.read_u64().await.unwrap() as usize,
            n => n as usize,
        };
        let mut payload = vec![0u8; len];
        peer.read_exact(&mut payload).await.unwrap();
        (head[0], payload)
    }

    fn client_pair(root: &CancellationToken) -> (Arc<WsClient>, DuplexStream) {
        let (server_side, peer) = duplex(64 * 1024);
        let client = WsClient::new(Box::new(server_side), "test", root);
        (client, peer)
    }

    #[tokio::test]
    async fn register_and_remove_is_idempotent() {
        let root = CancellationToken::new();
        let registry = ClientRegistry::new(TIMEOUT);
        let (client, _peer) = client_pair(&root);
        let id = client.id();

        assert!(registry.register(Arc::clone(&client)).await);
        assert!(!registry.register(Arc::clone(&client)).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(id).await);
        assert!(client.lifetime().is_cancelled());
        assert!(!registry.remove(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn client_lifetime_follows_root() {
        let root = CancellationToken::new();
        let (client, _peer) = client_pair(&root);
        root.cancel();
        assert!(client.lifetime().is_cancelled());
    }

    #[tokio::test]
    async fn send_writes_unmasked_frame() {
        let root = CancellationToken::new();
        let registry = ClientRegistry::new(TIMEOUT);
        let (client, mut peer) = client_pair(&root);
        registry.register(Arc::clone(&client)).await;

        registry.send_to(&client, Opcode::Text, b"{\"a\":1}").await.unwrap();
        let (head, payload) = read_server_frame(&mut peer).await;
        assert_eq!(head, 0x81);
        assert_eq!(payload, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn failed_send_removes_client() {
        let root = CancellationToken::new();
        let registry = ClientRegistry::new(TIMEOUT);
        let (client, peer) = client_pair(&root);
        registry.register(Arc::clone(&client)).await;

        drop(peer);
        let result = registry.send_to(&client, Opcode::Text, b"x").await;
        assert!(result.is_err());
        assert!(!registry.contains(client.id()).await);
        assert!(client.lifetime().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_send_times_out_and_removes_client() {
        let root = CancellationToken::new();
        let registry = ClientRegistry::new(Duration::from_millis(500));
        let (server_side, _peer) = duplex(8);
        let client = WsClient::new(Box::new(server_side), "slow", &root);
        registry.register(Arc::clone(&client)).await;

        let result = registry.send_to(&client, Opcode::Text, &[b'x'; 64]).await;
        assert!(matches!(result, Err(ServerError::Timeout)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn deferred_payload_is_built_under_send_lock() {
        let root = CancellationToken::new();
        let registry = Arc::new(ClientRegistry::new(TIMEOUT));
        let (server_side, mut peer) = duplex(16);
        let client = WsClient::new(Box::new(server_side), "slow", &root);
        registry.register(Arc::clone(&client)).await;

        // First send stalls on the small buffer while holding the lock.
        let first = {
            let (registry, client) = (Arc::clone(&registry), Arc::clone(&client));
            tokio::spawn(async move { registry.send_to(&client, Opcode::Text, &[b'x'; 100]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = Arc::new(std::sync::Mutex::new("p1"));
        let second = {
            let (registry, client, state) =
                (Arc::clone(&registry), Arc::clone(&client), Arc::clone(&state));
            tokio::spawn(async move {
                registry
                    .send_to_with(&client, Opcode::Text, move || state.lock().unwrap().to_string())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        *state.lock().unwrap() = "p2";

        let (_, payload) = read_server_frame(&mut peer).await;
        assert_eq!(payload.len(), 100);
        let (head, payload) = read_server_frame(&mut peer).await;
        assert_eq!(head, 0x81);
        assert_eq!(payload, b"p2");

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receive_loop_answers_ping_and_echoes_close() {
        let root = CancellationToken::new();
        let registry = Arc::new(ClientRegistry::new(TIMEOUT));
        let (server_side, mut peer) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let client = WsClient::new(Box::new(write_half), "peer", &root);
        registry.register(Arc::clone(&client)).await;

        let task = tokio::spawn(run_receive_loop(
            Arc::clone(&registry),
            Arc::clone(&client),
            read_half,
        ));

        use tokio::io::AsyncWriteExt;
        peer.write_all(&encode_masked_frame(Opcode::Text, b"ignored", KEY))
            .await
            .unwrap();
        peer.write_all(&encode_masked_frame(Opcode::Ping, b"hb", KEY))
            .await
            .unwrap();
        let (head, payload) = read_server_frame(&mut peer).await;
        assert_eq!(head, 0x8A);
        assert_eq!(payload, b"hb");

        peer.write_all(&encode_masked_frame(Opcode::Close, &[0x03, 0xE8], KEY))
            .await
            .unwrap();
        let (head, payload) = read_server_frame(&mut peer).await;
        assert_eq!(head, 0x88);
        assert_eq!(payload, [0x03, 0xE8]);

        task.await.unwrap();
        assert!(registry.is_empty().await);

        // Socket shut down: the peer sees end of stream.
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn receive_loop_fails_on_unmasked_frame() {
        let root = CancellationToken::new();
        let registry = Arc::new(ClientRegistry::new(TIMEOUT));
        let (server_side, mut peer) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let client = WsClient::new(Box::new(write_half), "peer", &root);
        registry.register(Arc::clone(&client)).await;

        let task = tokio::spawn(run_receive_loop(
            Arc::clone(&registry),
            Arc::clone(&client),
            read_half,
        ));

        use tokio::io::AsyncWriteExt;
        peer.write_all(&crate::frame::encode_frame(Opcode::Text, b"bad"))
            .await
            .unwrap();

        task.await.unwrap();
        assert!(!registry.contains(client.id()).await);
    }

    #[tokio::test]
    async fn receive_loop_stops_on_root_cancel() {
        let root = CancellationToken::new();
        let registry = Arc::new(ClientRegistry::new(TIMEOUT));
        let (server_side, _peer) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let client = WsClient::new(Box::new(write_half), "peer", &root);
        registry.register(Arc::clone(&client)).await;

        let task = tokio::spawn(run_receive_loop(
            Arc::clone(&registry),
            Arc::clone(&client),
            read_half,
        ));

        root.cancel();
        task.await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn masked_frames_from_peer_decode() {
        // Sanity check of the test helpers against the codec.
        let (mut a, mut b) = duplex(1024);
        use tokio::io::AsyncWriteExt;
        a.write_all(&encode_masked_frame(Opcode::Binary, b"xyz", KEY))
            .await
            .unwrap();
        let frame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(frame.payload, b"xyz");
    }
}
