//! Transfer sessions: per-connection state machines for both roles, plus the hooks and
//! reports they emit.

pub mod receiver;
pub mod sender;

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::channel::ChunkObserver;
use crate::error::TransferError;
use crate::integrity::{Digester, HashAlgorithm};
use crate::protocol::FileRequest;

pub use receiver::{run_receiver, serve_connection};
pub use sender::{send_files, send_to};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Sender,
    Receiver,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Sender => f.write_str("sender"),
            SessionRole::Receiver => f.write_str("receiver"),
        }
    }
}

/// Result of one file, reported as soon as it is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub name: String,
    /// Destination on the receiver, source on the sender.
    pub path: PathBuf,
    pub index: u64,
    pub count: u64,
    /// Size announced in the request.
    pub size: u64,
    /// Bytes that actually went through the digest.
    pub bytes: u64,
    /// Hex digest of those bytes.
    pub digest: String,
    pub error: Option<String>,
}

impl TransferOutcome {
    fn new(request: &FileRequest, path: &Path, bytes: u64, digest: String) -> Self {
        let (index, count) = request.position();
        Self {
            name: request.name.clone(),
            path: path.to_path_buf(),
            index,
            count,
            size: request.size,
            bytes,
            digest,
            error: None,
        }
    }

    fn with_error(mut self, error: &TransferError) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything one connection produced.
#[derive(Debug)]
pub struct SessionReport {
    /// Tags the session's log lines.
    pub id: Uuid,
    pub role: SessionRole,
    pub peer: String,
    pub outcomes: Vec<TransferOutcome>,
    /// Why the session stopped early, if it did.
    pub error: Option<TransferError>,
}

impl SessionReport {
    pub fn new(role: SessionRole, peer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            peer: peer.into(),
            outcomes: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.outcomes.iter().all(TransferOutcome::is_success)
    }

    pub fn bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }
}

/// Observational hooks. Nothing here can change what a session does.
pub trait SessionObserver: Send + Sync {
    fn connection_established(&self, _peer: &str) {}
    fn handshake_started(&self, _peer: &str) {}
    fn file_started(&self, _request: &FileRequest, _path: &Path) {}
    fn chunk_transferred(&self, _len: usize) {}
    fn file_finished(&self, _outcome: &TransferOutcome) {}
    fn connection_closed(&self, _peer: &str) {}
    fn connection_refused(&self, _peer: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Per-file chunk hook: running digest, byte counter, progress forwarding.
pub struct Instrument<'a> {
    digester: Digester,
    bytes: u64,
    observer: &'a dyn SessionObserver,
}

impl<'a> Instrument<'a> {
    pub fn new(hash: HashAlgorithm, observer: &'a dyn SessionObserver) -> Self {
        Self {
            digester: Digester::new(hash),
            bytes: 0,
            observer,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Hex digest and byte count of everything observed.
    pub fn finish(self) -> (String, u64) {
        (self.digester.finalize_hex(), self.bytes)
    }
}

impl ChunkObserver for Instrument<'_> {
    fn on_chunk(&mut self, chunk: &[u8]) {
        self.digester.update(chunk);
        self.bytes += chunk.len() as u64;
        self.observer.chunk_transferred(chunk.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::integrity::digest_hex;

    #[derive(Default)]
    struct Chunks(AtomicUsize);

    impl SessionObserver for Chunks {
        fn chunk_transferred(&self, len: usize) {
            self.0.fetch_add(len, Ordering::SeqCst);
        }
    }

    #[test]
    fn instrument_digests_and_forwards() {
        let seen = Chunks::default();
        let mut inst = Instrument::new(HashAlgorithm::Sha256, &seen);
        inst.on_chunk(b"hel");
        inst.on_chunk(b"lo");
        assert_eq!(inst.bytes(), 5);
        let (digest, bytes) = inst.finish();
        assert_eq!(bytes, 5);
        assert_eq!(digest, digest_hex(HashAlgorithm::Sha256, b"hello"));
        assert_eq!(seen.0.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn report_success_needs_every_outcome() {
        let req = FileRequest::new("a", 1, 0, 2);
        let mut report = SessionReport::new(SessionRole::Receiver, "peer");
        report
            .outcomes
            .push(TransferOutcome::new(&req, Path::new("a"), 1, String::new()));
        assert!(report.is_success());
        let failed = TransferOutcome::new(&req, Path::new("b"), 0, String::new())
            .with_error(&TransferError::PathEscape("b".into()));
        report.outcomes.push(failed);
        assert!(!report.is_success());
        assert_eq!(report.bytes(), 1);
    }
}
