//! WebSocket opening handshake.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::Headers;

/// GUID appended to the client key (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Returns `true` if the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &Headers) -> bool {
    headers
        .get("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        && headers.has_token("connection", "upgrade")
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.trim().as_bytes());
    sha.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(sha.finalize())
}

/// Writes the `101 Switching Protocols` response.
pub async fn write_switching_protocols<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accept: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}
