//! Secure transport: hello exchange, per-direction encrypted records, chunked file bodies.
//!
//! Record body on the socket: `encrypt(noise.wrap([marker] ++ frame))`, where `marker` is 0 for a
//! raw frame and 1 for a deflated one. Only the hello frames travel in clear.

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::channel::{Channel, ChunkObserver};
use crate::config::TransportConfig;
use crate::crypto::{CipherPair, Keypair, PublicKey, Role};
use crate::error::{TransferError, TransportError};
use crate::protocol::ProtocolError;
use crate::protocol::PROTOCOL_VERSION;
use crate::wire::{decode_frame, encode_frame, read_record, write_record, Frame};

use self::marker::{mark, unmark};

/// Encrypted channel over any byte stream (TCP in production, in-memory pipes in tests).
pub struct SecureChannel<S> {
    stream: S,
    peer: String,
    ciphers: CipherPair,
    config: TransportConfig,
    closed: bool,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Initiator side: send our hello, then read the peer's.
    pub async fn connect_handshake(
        mut stream: S,
        peer: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let peer = peer.into();
        let keypair = Keypair::generate();
        write_hello(&mut stream, keypair.public_key()).await?;
        let remote = read_hello(&mut stream).await?;
        log::debug!("handshake with {} (peer key {})", peer, remote.fingerprint());
        Ok(Self::established(stream, peer, keypair, &remote, Role::Initiator, config))
    }

    /// Responder side: read the peer's hello, then answer with ours.
    pub async fn accept_handshake(
        mut stream: S,
        peer: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let peer = peer.into();
        let keypair = Keypair::generate();
        let remote = read_hello(&mut stream).await?;
        write_hello(&mut stream, keypair.public_key()).await?;
        log::debug!("handshake with {} (peer key {})", peer, remote.fingerprint());
        Ok(Self::established(stream, peer, keypair, &remote, Role::Responder, config))
    }

    fn established(
        stream: S,
        peer: String,
        keypair: Keypair,
        remote: &PublicKey,
        role: Role,
        config: TransportConfig,
    ) -> Self {
        let ciphers = keypair.agree(remote, role, config.handshake_password.as_deref());
        Self {
            stream,
            peer,
            ciphers,
            config,
            closed: false,
        }
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let plain = encode_frame(frame)?;
        let marked = mark(plain, self.config.compress)?;
        let padded = self.config.noise.wrap(marked);
        let cipher = self.ciphers.outbound.seal(&padded)?;
        write_record(&mut self.stream, &cipher).await?;
        Ok(())
    }

    /// Next frame, or `None` on a clean close at a record boundary.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let cipher = match read_record(&mut self.stream).await? {
            Some(c) => c,
            None => return Ok(None),
        };
        let padded = self.ciphers.inbound.open(&cipher)?;
        let marked = self.config.noise.unwrap(padded)?;
        let plain = unmark(marked)?;
        Ok(Some(decode_frame(&plain)?))
    }

    async fn expect_frame(&mut self) -> Result<Frame, TransportError> {
        self.recv_frame().await?.ok_or(TransportError::Closed)
    }
}

/// Open a TCP connection to `host:port` without handshaking yet.
pub async fn connect_tcp(host: &str, port: u16) -> Result<(TcpStream, String), TransportError> {
    let stream = TcpStream::connect((host, port)).await?;
    let _ = stream.set_nodelay(true);
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| format!("{host}:{port}"));
    Ok((stream, peer))
}

/// Connect to `host:port` and run the initiator handshake.
pub async fn connect(
    host: &str,
    port: u16,
    config: TransportConfig,
) -> Result<SecureChannel<TcpStream>, TransportError> {
    let (stream, peer) = connect_tcp(host, port).await?;
    SecureChannel::connect_handshake(stream, peer, config).await
}

async fn write_hello<S: AsyncWrite + Unpin>(
    stream: &mut S,
    public_key: PublicKey,
) -> Result<(), TransportError> {
    let hello = Frame::Hello {
        protocol_version: PROTOCOL_VERSION,
        public_key,
    };
    write_record(stream, &encode_frame(&hello)?).await?;
    Ok(())
}

async fn read_hello<S: AsyncRead + Unpin>(stream: &mut S) -> Result<PublicKey, TransportError> {
    let body = read_record(stream)
        .await?
        .ok_or_else(|| TransportError::Handshake("peer closed before hello".into()))?;
    match decode_frame(&body)? {
        Frame::Hello {
            protocol_version,
            public_key,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(TransportError::Handshake(format!(
                    "unsupported protocol version {protocol_version} (ours is {PROTOCOL_VERSION})"
                )));
            }
            Ok(public_key)
        }
        _ => Err(TransportError::UnexpectedFrame("hello")),
    }
}

/// One-byte compression marker in front of every frame.
mod marker {
    use std::io::{Read, Write};

    use flate2::read::DeflateDecoder;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    use crate::error::TransportError;
    use crate::wire::MAX_FRAME_LEN;

    pub(super) const MARKER_RAW: u8 = 0;
    pub(super) const MARKER_DEFLATE: u8 = 1;

    pub(super) fn mark(plain: Vec<u8>, compress: bool) -> Result<Vec<u8>, TransportError> {
        if compress {
            let mut enc = DeflateEncoder::new(vec![MARKER_DEFLATE], Compression::default());
            enc.write_all(&plain)
                .map_err(|e| TransportError::Compression(e.to_string()))?;
            let deflated = enc
                .finish()
                .map_err(|e| TransportError::Compression(e.to_string()))?;
            if deflated.len() <= plain.len() {
                return Ok(deflated);
            }
        }
        let mut out = Vec::with_capacity(plain.len() + 1);
        out.push(MARKER_RAW);
        out.extend_from_slice(&plain);
        Ok(out)
    }

    pub(super) fn unmark(mut marked: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        if marked.is_empty() {
            return Err(TransportError::Compression("empty record".into()));
        }
        match marked[0] {
            MARKER_RAW => Ok(marked.split_off(1)),
            MARKER_DEFLATE => {
                let limit = MAX_FRAME_LEN as u64;
                let mut out = Vec::new();
                DeflateDecoder::new(&marked[1..])
                    .take(limit + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| TransportError::Compression(e.to_string()))?;
                if out.len() as u64 > limit {
                    return Err(TransportError::Compression("inflated record too large".into()));
                }
                Ok(out)
            }
            other => Err(TransportError::Compression(format!("unknown marker {other}"))),
        }
    }
}

#[async_trait]
impl<S> Channel for SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn write_message(&mut self, value: &Value) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(value)?;
        self.send_frame(&Frame::Message(bytes)).await
    }

    async fn read_message(&mut self) -> Result<Option<Value>, TransportError> {
        match self.recv_frame().await? {
            None => Ok(None),
            Some(Frame::Message(bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Some(_) => Err(TransportError::UnexpectedFrame("message")),
        }
    }

    async fn write_file_stream(
        &mut self,
        file: &mut File,
        len: u64,
        observer: &mut dyn ChunkObserver,
    ) -> Result<u64, TransferError> {
        self.send_frame(&Frame::FileHeader { len }).await?;
        let mut buf = vec![0u8; self.config.chunk_size()];
        let mut sent: u64 = 0;
        while sent < len {
            let want = buf.len().min((len - sent) as usize);
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(TransferError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("file shrank to {sent} bytes while sending {len}"),
                )));
            }
            self.send_frame(&Frame::FileChunk(buf[..n].to_vec())).await?;
            observer.on_chunk(&buf[..n]);
            sent += n as u64;
        }
        Ok(sent)
    }

    async fn read_file_stream(
        &mut self,
        file: &mut File,
        expected: u64,
        observer: &mut dyn ChunkObserver,
    ) -> Result<u64, TransferError> {
        let len = match self.expect_frame().await? {
            Frame::FileHeader { len } => len,
            _ => return Err(TransportError::UnexpectedFrame("file header").into()),
        };
        if len != expected {
            return Err(ProtocolError::SizeMismatch {
                declared: expected,
                actual: len,
            }
            .into());
        }
        let mut received: u64 = 0;
        while received < len {
            let chunk = match self.expect_frame().await? {
                Frame::FileChunk(chunk) => chunk,
                _ => return Err(TransportError::UnexpectedFrame("file chunk").into()),
            };
            if received + chunk.len() as u64 > len {
                return Err(TransportError::Overrun.into());
            }
            file.write_all(&chunk).await?;
            observer.on_chunk(&chunk);
            received += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(received)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
