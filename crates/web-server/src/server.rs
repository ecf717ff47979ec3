//! Embedded HTTP + WebSocket server.
//!
//! Listens on a TCP port and answers each connection once over plain HTTP,
//! unless it is a WebSocket upgrade for `/ws`, in which case it is promoted
//! to a registered push client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use minimap_protocol::StateSnapshot;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::{AssetStore, EmbeddedAssets, Resolved};
use crate::broadcast::{BroadcastStats, Broadcaster};
use crate::client::{ClientRegistry, WsClient, run_receive_loop};
use crate::error::ServerError;
use crate::frame::Opcode;
use crate::handshake;
use crate::http::{self, Headers, Status};
use crate::router::{self, Route};
use crate::{DEFAULT_IO_TIMEOUT, DEFAULT_PORT, DEFAULT_STOP_TIMEOUT};

const JSON: &str = "application/json; charset=utf-8";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Directory holding map images.
    pub content_root: PathBuf,
    /// Directory holding the browser client.
    pub web_root: PathBuf,
    /// Bound on reading a request and on every frame send.
    pub io_timeout: Duration,
    /// How long `stop` waits for the accept loop to exit.
    pub stop_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            content_root: PathBuf::from("."),
            web_root: PathBuf::from(".").join("WebAssets"),
            io_timeout: DEFAULT_IO_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Supplies the current state for `/state` and for newly connected clients.
pub trait SnapshotProvider: Send + Sync + 'static {
    fn snapshot(&self) -> StateSnapshot;
}

impl<F> SnapshotProvider for F
where
    F: Fn() -> StateSnapshot + Send + Sync + 'static,
{
    fn snapshot(&self) -> StateSnapshot {
        self()
    }
}

struct Running {
    root: CancellationToken,
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// The minimap web server.
///
/// Owns the client registry and the broadcaster. Nothing is global, so any
/// number of instances can run side by side.
pub struct WebServer {
    config: ServerConfig,
    assets: Arc<AssetStore>,
    provider: Arc<dyn SnapshotProvider>,
    latest: Arc<Mutex<StateSnapshot>>,
    registry: Arc<ClientRegistry>,
    broadcaster: Arc<Broadcaster>,
    running: tokio::sync::Mutex<Option<Running>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl WebServer {
    /// Creates a server that serves the most recently published snapshot.
    pub fn new(config: ServerConfig) -> Self {
        let latest = Arc::new(Mutex::new(StateSnapshot::default()));
        let source = Arc::clone(&latest);
        let mut server = Self::with_provider(config, move || lock(&source).clone());
        server.latest = latest;
        server
    }

    /// Creates a server that asks `provider` for the current state.
    pub fn with_provider(config: ServerConfig, provider: impl SnapshotProvider) -> Self {
        let registry = Arc::new(ClientRegistry::new(config.io_timeout));
        let assets = AssetStore::new(config.content_root.clone(), config.web_root.clone());
        Self {
            assets: Arc::new(assets),
            provider: Arc::new(provider),
            latest: Arc::new(Mutex::new(StateSnapshot::default())),
            broadcaster: Arc::new(Broadcaster::new(Arc::clone(&registry))),
            registry,
            running: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
            config,
        }
    }

    /// Adds a fallback source for images missing from the content root.
    pub fn with_embedded_assets(mut self, embedded: Arc<dyn EmbeddedAssets>) -> Self {
        let assets = AssetStore::new(
            self.config.content_root.clone(),
            self.config.web_root.clone(),
        )
        .with_embedded(embedded);
        self.assets = Arc::new(assets);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Calling it again while running returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.addr);
        }

        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let root = CancellationToken::new();
        self.broadcaster.attach(root.clone());

        let ctx = Arc::new(ConnectionContext {
            assets: Arc::clone(&self.assets),
            provider: Arc::clone(&self.provider),
            registry: Arc::clone(&self.registry),
            io_timeout: self.config.io_timeout,
        });
        let accept_task = tokio::spawn(accept_loop(listener, ctx, root.clone()));

        *lock(&self.local_addr) = Some(local_addr);
        *running = Some(Running {
            root,
            addr: local_addr,
            accept_task,
        });
        tracing::info!("web server listening on {local_addr}");
        Ok(local_addr)
    }

    /// Stops accepting, then disconnects every client.
    ///
    /// Does nothing if the server is not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.root.cancel();
        self.broadcaster.detach();

        let abort = running.accept_task.abort_handle();
        if tokio::time::timeout(self.config.stop_timeout, running.accept_task)
            .await
            .is_err()
        {
            tracing::warn!("accept loop did not exit in time, aborting it");
            abort.abort();
        }

        let removed = self.registry.remove_all().await;
        lock(&self.local_addr).take();
        tracing::info!(clients = removed, "web server stopped");
    }

    /// Records `snapshot` as the current state and pushes it to every
    /// client. Never waits on the network.
    pub fn publish(&self, snapshot: StateSnapshot) {
        let json = snapshot.to_json();
        *lock(&self.latest) = snapshot;
        self.broadcaster.publish(Arc::from(json));
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.local_addr().is_some()
    }

    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.broadcaster.stats()
    }
}

/// Everything a connection task needs, shared by all of them.
struct ConnectionContext {
    assets: Arc<AssetStore>,
    provider: Arc<dyn SnapshotProvider>,
    registry: Arc<ClientRegistry>,
    io_timeout: Duration,
}

struct Request {
    line: String,
    headers: Headers,
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>, root: CancellationToken) {
    loop {
        tokio::select! {
            _ = root.cancelled() => break,

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let ctx = Arc::clone(&ctx);
                        let root = root.clone();
                        tokio::spawn(async move {
                            if let Err(e) = ctx.handle_connection(stream, peer_addr, &root).await {
                                tracing::debug!(%peer_addr, "connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("accept error: {e}");
                    }
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>, ServerError> {
    let Some(line) = http::read_line(reader).await? else {
        return Ok(None);
    };
    let headers = http::read_headers(reader).await?;
    Ok(Some(Request { line, headers }))
}

impl ConnectionContext {
    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        root: &CancellationToken,
    ) -> Result<(), ServerError> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(%peer_addr, "could not set TCP_NODELAY: {e}");
        }

        let request = tokio::time::timeout(self.io_timeout, read_request(&mut stream))
            .await
            .map_err(|_| ServerError::Timeout)??;
        let Some(request) = request else {
            tracing::trace!(%peer_addr, "empty request");
            return Ok(());
        };

        let Some(path) = http::parse_request_line(&request.line) else {
            http::write_text(&mut stream, Status::BadRequest, "Bad Request").await?;
            return Ok(());
        };

        if handshake::is_upgrade_request(&request.headers) {
            return self.upgrade(stream, peer_addr, &path, &request.headers, root).await;
        }

        self.respond(&mut stream, &path).await?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    async fn respond(&self, stream: &mut TcpStream, path: &str) -> Result<(), ServerError> {
        match router::route(path) {
            Route::Index => match self.assets.index().await {
                Resolved::Found { body, content_type } => {
                    http::write_response(stream, Status::Ok, content_type, &body).await?
                }
                Resolved::Unavailable => {
                    http::write_text(stream, Status::ServiceUnavailable, "File unavailable").await?
                }
                _ => http::write_text(stream, Status::NotFound, "Index not found").await?,
            },
            Route::State => {
                let json = self.provider.snapshot().to_json();
                http::write_response(stream, Status::Ok, JSON, json.as_bytes()).await?
            }
            Route::Image(name) => {
                let resolved = self.assets.image(&name).await;
                write_resolved(stream, resolved).await?
            }
            Route::Asset(path) => {
                let resolved = self.assets.web_asset(&path).await;
                write_resolved(stream, resolved).await?
            }
        }
        Ok(())
    }

    async fn upgrade(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        path: &str,
        headers: &Headers,
        root: &CancellationToken,
    ) -> Result<(), ServerError> {
        if !router::is_ws_path(path) {
            http::write_text(&mut stream, Status::NotFound, "WebSocket endpoint not found").await?;
            return Ok(());
        }
        let Some(key) = headers
            .get("sec-websocket-key")
            .filter(|key| !key.trim().is_empty())
        else {
            http::write_text(&mut stream, Status::BadRequest, "Missing Sec-WebSocket-Key").await?;
            return Ok(());
        };

        let accept = handshake::compute_accept(key);
        handshake::write_switching_protocols(&mut stream, &accept).await?;

        let (reader, writer) = stream.into_split();
        let client = WsClient::new(Box::new(writer), peer_addr.to_string(), root);
        self.registry.register(Arc::clone(&client)).await;
        tracing::info!(%peer_addr, client_id = %client.id(), "websocket client connected");

        tokio::spawn(run_receive_loop(
            Arc::clone(&self.registry),
            Arc::clone(&client),
            reader,
        ));

        // Read under the send lock so a broadcast that got in first is never
        // followed by an older snapshot.
        let provider = Arc::clone(&self.provider);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let initial = || provider.snapshot().to_json();
            if let Err(e) = registry.send_to_with(&client, Opcode::Text, initial).await {
                tracing::debug!(client_id = %client.id(), "initial snapshot not delivered: {e}");
            }
        });
        Ok(())
    }
}

async fn write_resolved(stream: &mut TcpStream, resolved: Resolved) -> std::io::Result<()> {
    match resolved {
        Resolved::Found { body, content_type } => {
            http::write_response(stream, Status::Ok, content_type, &body).await
        }
        Resolved::NotFound => http::write_text(stream, Status::NotFound, "Not Found").await,
        Resolved::Forbidden => http::write_text(stream, Status::Forbidden, "Forbidden").await,
        Resolved::Unavailable => {
            http::write_text(stream, Status::ServiceUnavailable, "File unavailable").await
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
