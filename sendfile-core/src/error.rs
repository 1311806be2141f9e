//! Transport and session errors.

use std::io;

use crate::crypto::CryptoError;
use crate::noise::NoiseError;
use crate::path::PathError;
use crate::protocol::ProtocolError;
use crate::wire::FrameError;

/// Failure of the secure channel underneath a session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("crypto: {0} (mismatched handshake password?)")]
    Crypto(#[from] CryptoError),
    #[error("noise: {0}")]
    Noise(#[from] NoiseError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("unexpected frame: expected {0}")]
    UnexpectedFrame(&'static str),
    #[error("connection closed by peer")]
    Closed,
    #[error("peer sent more bytes than announced")]
    Overrun,
    #[error("invalid message payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression: {0}")]
    Compression(String),
}

/// Why a file transfer (and with it the session) failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("path escapes the receive directory: {0}")]
    PathEscape(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<PathError> for TransferError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Escape(name) => TransferError::PathEscape(name),
            PathError::Io(e) => TransferError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_errors_map_onto_transfer_errors() {
        let e: TransferError = PathError::Escape("../x".into()).into();
        assert!(matches!(e, TransferError::PathEscape(ref n) if n == "../x"));
        let e: TransferError = PathError::Io(io::Error::from(io::ErrorKind::NotFound)).into();
        assert!(matches!(e, TransferError::Io(_)));
    }

    #[test]
    fn display_carries_cause() {
        let e = TransferError::from(ProtocolError::MissingField("size"));
        assert_eq!(e.to_string(), "protocol error: missing field 'size'");
    }
}
