//! Embedded HTTP + WebSocket server for the minimap.
//!
//! Serves the browser client and map images over plain HTTP, answers
//! `GET /state` with the current [`StateSnapshot`](minimap_protocol::StateSnapshot)
//! and pushes every published snapshot to all clients connected on `/ws`.
//! The WebSocket handshake and framing are implemented directly on the TCP
//! stream.
//!
//! Publishing is coalescing: a slow client delays only the next broadcast
//! pass, and snapshots published during that pass collapse into the newest
//! one.

mod assets;
mod broadcast;
mod client;
mod error;
pub mod frame;
mod handshake;
mod http;
mod router;
mod server;

use std::time::Duration;

pub use assets::{AssetStore, EmbeddedAssets, NoEmbeddedAssets, Resolved, StaticAssets};
pub use broadcast::BroadcastStats;
pub use client::ClientId;
pub use error::{FrameError, ServerError};
pub use handshake::compute_accept;
pub use server::{ServerConfig, SnapshotProvider, WebServer};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bound on reading a request and on each frame send.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time `stop` waits for the accept loop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);
