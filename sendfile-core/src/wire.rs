//! Records on the socket: 4-byte LE length, then the body. A record body carries one
//! bincode-encoded frame (sealed, except for the hello).

use std::io;

use bincode::Options;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::PublicKey;

const LEN_SIZE: usize = 4;
/// Upper bound for a record body, and for the frame inside it.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Everything the transport exchanges. Only `Hello` travels in clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Handshake: protocol version and ephemeral public key.
    Hello {
        protocol_version: u8,
        public_key: PublicKey,
    },
    /// One JSON-encoded application message.
    Message(Vec<u8>),
    /// Starts a file body of `len` bytes.
    FileHeader { len: u64 },
    /// A piece of the current file body.
    FileChunk(Vec<u8>),
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FRAME_LEN as u64)
        .reject_trailing_bytes()
}

/// Serialize a frame into the plaintext of one record.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    Ok(codec().serialize(frame)?)
}

/// Parse the plaintext of one record. The whole buffer must be a single frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    Ok(codec().deserialize(bytes)?)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// Read one length-prefixed record. `Ok(None)` when the peer closed cleanly on a record boundary.
pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LEN_SIZE];
    let mut filled = 0;
    while filled < LEN_SIZE {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a record header",
            ));
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one length-prefixed record and flush.
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "record too large"));
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}
