//! WebSocket frame codec (RFC 6455 subset).
//!
//! # Wire format
//!
//! ```text
//! byte 0:  [FIN:1][RSV:3][OPCODE:4]
//! byte 1:  [MASK:1][LEN:7]
//!   LEN == 126  -> 2 bytes BE extended length
//!   LEN == 127  -> 8 bytes BE extended length
//! [4 bytes masking key]   (client -> server only)
//! [payload]               (XOR key[i % 4] when masked)
//! ```
//!
//! The server only ever emits single, unfragmented, unmasked frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Largest payload accepted from a client (4 MiB).
pub const MAX_PAYLOAD_LEN: u64 = 4 * 1024 * 1024;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any opcode this server does not know about.
    Reserved(u8),
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(b) => b & 0x0F,
        }
    }
}

impl From<u8> for Opcode {
    fn from(b: u8) -> Self {
        match b & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Reads one client frame.
///
/// Returns `None` if the peer closed the stream before the first header byte.
/// A stream ending anywhere inside a frame is [`FrameError::UnexpectedEof`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, FrameError> {
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }
    let second = reader.read_u8().await.map_err(eof)?;

    let fin = first[0] & 0x80 != 0;
    let opcode = Opcode::from(first[0]);
    let masked = second & 0x80 != 0;
    let len = match second & 0x7F {
        126 => u64::from(reader.read_u16().await.map_err(eof)?),
        127 => reader.read_u64().await.map_err(eof)?,
        n => u64::from(n),
    };

    // Checked before anything else is read so an oversized declaration
    // never causes an allocation.
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(len));
    }
    if !masked {
        return Err(FrameError::Unmasked);
    }

    let mut key = [0u8; 4];
    reader.read_exact(&mut key).await.map_err(eof)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(eof)?;
    apply_mask(&mut payload, key);

    Ok(Some(Frame {
        fin,
        opcode,
        payload,
    }))
}

/// Writes one unmasked frame with FIN set and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
    payload: &[u8],
) -> std::io::Result<()> {
    writer.write_all(&encode_frame(opcode, payload)).await?;
    writer.flush().await
}

/// Encodes a server → client frame.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    encode(opcode, payload, None)
}

/// Encodes a client → server frame masked with `key`.
pub fn encode_masked_frame(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    encode(opcode, payload, Some(key))
}

fn encode(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 14);
    buf.push(0x80 | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len <= 125 {
        buf.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(mask_bit | 126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | 127);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(payload),
    }
    buf
}

fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
}

fn eof(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::UnexpectedEof
    } else {
        FrameError::Io(e)
    }
}
