//! Explicit configuration handed to transport and sessions at construction.

use std::path::PathBuf;
use std::sync::Arc;

use crate::integrity::HashAlgorithm;
use crate::listener::SessionPolicy;
use crate::noise::{NoiseStrategy, RandomPadding};

/// Default size of one file chunk on the wire.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
/// Chunks are clamped to this range.
pub const MIN_BUFFER_SIZE: usize = 512;
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Settings of the secure channel. Both peers must agree on noise and password.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub buffer_size: usize,
    /// Deflate outgoing records. Incoming records are decoded either way.
    pub compress: bool,
    pub noise: Arc<dyn NoiseStrategy>,
    /// Mixed into the session keys when set.
    pub handshake_password: Option<Vec<u8>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            compress: false,
            noise: Arc::new(RandomPadding::default()),
            handshake_password: None,
        }
    }
}

impl TransportConfig {
    pub fn chunk_size(&self) -> usize {
        self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Directory every received file lands in. Created when missing.
    pub sandbox_root: PathBuf,
    pub hash: HashAlgorithm,
    pub policy: SessionPolicy,
}

impl ReceiverConfig {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            hash: HashAlgorithm::default(),
            policy: SessionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SenderConfig {
    pub hash: HashAlgorithm,
    /// Hand the channel back after the batch instead of closing it.
    pub keep_open: bool,
}
