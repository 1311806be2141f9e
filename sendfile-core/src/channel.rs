//! The seam between sessions and the transport underneath them.

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;

use crate::error::{TransferError, TransportError};

/// Sees every chunk of a file body, in order, as it passes through the channel.
pub trait ChunkObserver: Send {
    fn on_chunk(&mut self, chunk: &[u8]);
}

/// Ignores chunks.
impl ChunkObserver for () {
    fn on_chunk(&mut self, _chunk: &[u8]) {}
}

/// Message and file-stream primitives a session needs from its connection.
#[async_trait]
pub trait Channel: Send {
    /// Remote address, for log lines and reports.
    fn peer(&self) -> &str;

    async fn write_message(&mut self, value: &Value) -> Result<(), TransportError>;

    /// Next message, or `None` when the peer closed cleanly between messages.
    async fn read_message(&mut self) -> Result<Option<Value>, TransportError>;

    /// Stream `len` bytes of `file`. Returns the number of bytes sent.
    async fn write_file_stream(
        &mut self,
        file: &mut File,
        len: u64,
        observer: &mut dyn ChunkObserver,
    ) -> Result<u64, TransferError>;

    /// Receive one file body of exactly `expected` bytes into `file`. A body announced with
    /// any other length is refused before anything is written. Returns the bytes written.
    async fn read_file_stream(
        &mut self,
        file: &mut File,
        expected: u64,
        observer: &mut dyn ChunkObserver,
    ) -> Result<u64, TransferError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
