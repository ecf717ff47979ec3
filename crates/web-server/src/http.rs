//! Minimal HTTP/1.1 request reader and response writer.
//!
//! Requests are read straight off the socket one byte at a time. This never
//! consumes bytes past the blank line that ends the header block, so after a
//! WebSocket upgrade the same stream continues with the first frame intact.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ServerError;

/// Longest accepted request or header line.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Most header lines accepted in one request.
pub const MAX_HEADERS: usize = 100;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Response status codes used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    map: HashMap<String, String>,
}

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` if the comma-separated header `name` lists `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.map
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Reads one line terminated by `\n`, dropping any `\r`.
///
/// Returns `None` if the stream ends before any byte is read; a final
/// unterminated line is returned as-is.
pub async fn read_line<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, ServerError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }
        match byte[0] {
            b'\n' => break,
            b'\r' => {}
            b => {
                if line.len() >= MAX_LINE_LEN {
                    return Err(ServerError::Http("line too long".into()));
                }
                line.push(b);
            }
        }
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Reads header lines up to the blank line (or end of stream).
///
/// Lines without a `name:` prefix are skipped. A repeated header keeps its
/// last value.
pub async fn read_headers<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Headers, ServerError> {
    let mut headers = Headers::default();
    let mut lines = 0usize;
    while let Some(line) = read_line(reader).await? {
        if line.is_empty() {
            break;
        }
        lines += 1;
        if lines > MAX_HEADERS {
            return Err(ServerError::Http("too many headers".into()));
        }
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => headers.insert(name, value),
            _ => tracing::trace!(%line, "skipping malformed header line"),
        }
    }
    Ok(headers)
}

/// Extracts the routing path from a request line.
///
/// Only `GET` is accepted. The query string and the leading `/` are removed
/// and the rest is percent-decoded. Returns `None` for anything else.
pub fn parse_request_line(line: &str) -> Option<String> {
    let mut parts = line.split(' ');
    let method = parts.next()?;
    let target = parts.next()?;
    if !method.eq_ignore_ascii_case("GET") {
        return None;
    }

    let raw = target.split_once('?').map_or(target, |(path, _)| path);
    let raw = raw.strip_prefix('/').unwrap_or(raw);
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|p| p.into_owned())
}

/// Writes a complete response. The connection is always closed afterwards.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: Status,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Access-Control-Allow-Origin: *\r\n\r\n",
        status.code(),
        status.reason(),
        body.len(),
    );
    writer.write_all(head.as_bytes()).await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await
}

/// Writes a plain-text response.
pub async fn write_text<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: Status,
    text: &str,
) -> std::io::Result<()> {
    write_response(writer, status, TEXT_PLAIN, text.as_bytes()).await
}
