//! Error types for the web server.

use std::net::SocketAddr;

/// Errors produced while decoding client frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload of {0} bytes exceeds the frame size limit")]
    PayloadTooLarge(u64),

    #[error("client frame is not masked")]
    Unmasked,

    #[error("stream ended inside a frame")]
    UnexpectedEof,
}

/// Errors produced by the web server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("malformed request: {0}")]
    Http(String),

    #[error("timed out")]
    Timeout,

    #[error("client disconnected")]
    ClientGone,
}
