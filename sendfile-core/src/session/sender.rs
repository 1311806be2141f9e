//! Sender role: announce each file, wait for the answer, stream the body. Strictly in order.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;

use super::{Instrument, SessionObserver, SessionReport, SessionRole, TransferOutcome};
use crate::channel::Channel;
use crate::config::{SenderConfig, TransportConfig};
use crate::error::{TransferError, TransportError};
use crate::integrity::Digester;
use crate::protocol::{Answer, FileRequest};
use crate::transport::{connect_tcp, SecureChannel};

enum SenderState {
    Request {
        index: usize,
    },
    Streaming {
        index: usize,
        request: FileRequest,
        file: File,
    },
    Finished,
    Failed {
        error: TransferError,
        outcome: Option<TransferOutcome>,
    },
}

struct SenderSession<'a, C: Channel> {
    channel: &'a mut C,
    paths: &'a [PathBuf],
    config: &'a SenderConfig,
    observer: &'a dyn SessionObserver,
    report: SessionReport,
}

/// Connect, handshake and send `paths` as one batch.
pub async fn send_to(
    host: &str,
    port: u16,
    transport: TransportConfig,
    paths: &[PathBuf],
    config: &SenderConfig,
    observer: &dyn SessionObserver,
) -> SessionReport {
    let (stream, peer) = match connect_tcp(host, port).await {
        Ok(c) => c,
        Err(e) => return aborted(format!("{host}:{port}"), e),
    };
    observer.connection_established(&peer);
    observer.handshake_started(&peer);
    match SecureChannel::connect_handshake(stream, peer.clone(), transport).await {
        Ok(mut channel) => send_files(&mut channel, paths, config, observer).await,
        Err(e) => {
            log::warn!("handshake with {} failed: {}", peer, e);
            observer.connection_closed(&peer);
            aborted(peer, e)
        }
    }
}

fn aborted(peer: String, error: TransportError) -> SessionReport {
    let mut report = SessionReport::new(SessionRole::Sender, peer);
    report.error = Some(error.into());
    report
}

/// Send `paths` over an established channel. The channel is closed afterwards unless
/// `keep_open` is set and every file went through; a failure always closes it.
pub async fn send_files<C: Channel>(
    channel: &mut C,
    paths: &[PathBuf],
    config: &SenderConfig,
    observer: &dyn SessionObserver,
) -> SessionReport {
    let report = SessionReport::new(SessionRole::Sender, channel.peer());
    log::debug!("[{}] sending {} file(s) to {}", report.id, paths.len(), report.peer);
    let session = SenderSession {
        channel,
        paths,
        config,
        observer,
        report,
    };
    session.run().await
}

impl<'a, C: Channel> SenderSession<'a, C> {
    async fn run(mut self) -> SessionReport {
        let mut state = SenderState::Request { index: 0 };
        loop {
            state = match state {
                SenderState::Request { index } => self.request(index).await,
                SenderState::Streaming {
                    index,
                    request,
                    file,
                } => self.stream(index, request, file).await,
                SenderState::Finished => {
                    if !self.config.keep_open {
                        self.close().await;
                    }
                    break;
                }
                SenderState::Failed { error, outcome } => {
                    self.fail(error, outcome).await;
                    break;
                }
            };
        }
        self.report
    }

    async fn request(&mut self, index: usize) -> SenderState {
        let paths = self.paths;
        let Some(path) = paths.get(index) else {
            return SenderState::Finished;
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let count = self.paths.len() as u64;

        let (file, size) = match open_source(path).await {
            Ok(f) => f,
            Err(e) => {
                let request = FileRequest::new(name, 0, index as u64, count);
                let error = TransferError::from(e);
                let outcome = self.empty_outcome(&request, path, &error);
                return SenderState::Failed {
                    error,
                    outcome: Some(outcome),
                };
            }
        };
        let request = FileRequest::new(name, size, index as u64, count);

        if let Err(error) = self.exchange(&request).await {
            let outcome = self.empty_outcome(&request, path, &error);
            return SenderState::Failed {
                error,
                outcome: Some(outcome),
            };
        }
        SenderState::Streaming {
            index,
            request,
            file,
        }
    }

    /// Request out, answer in. Only an accepting answer lets the body follow.
    async fn exchange(&mut self, request: &FileRequest) -> Result<(), TransferError> {
        self.channel.write_message(&request.to_value()).await?;
        let value = self
            .channel
            .read_message()
            .await?
            .ok_or(TransportError::Closed)?;
        Answer::from_value(&value)?.into_result()?;
        Ok(())
    }

    async fn stream(&mut self, index: usize, request: FileRequest, mut file: File) -> SenderState {
        let paths = self.paths;
        let path = &paths[index];
        self.observer.file_started(&request, path);
        let mut instrument = Instrument::new(self.config.hash, self.observer);
        let result = self
            .channel
            .write_file_stream(&mut file, request.size, &mut instrument)
            .await;
        let (digest, bytes) = instrument.finish();
        let outcome = TransferOutcome::new(&request, path, bytes, digest);
        match result {
            Ok(_) => {
                log::info!(
                    "[{}] sent '{}' ({}:{})",
                    self.report.id,
                    outcome.name,
                    outcome.digest,
                    outcome.bytes
                );
                self.observer.file_finished(&outcome);
                self.report.outcomes.push(outcome);
                SenderState::Request { index: index + 1 }
            }
            Err(error) => {
                let outcome = outcome.with_error(&error);
                SenderState::Failed {
                    error,
                    outcome: Some(outcome),
                }
            }
        }
    }

    async fn fail(&mut self, error: TransferError, outcome: Option<TransferOutcome>) {
        log::warn!("[{}] send to {} failed: {}", self.report.id, self.report.peer, error);
        if let Some(outcome) = outcome {
            self.observer.file_finished(&outcome);
            self.report.outcomes.push(outcome);
        }
        self.report.error = Some(error);
        self.close().await;
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            log::debug!("[{}] close: {}", self.report.id, e);
        }
        self.observer.connection_closed(&self.report.peer);
    }

    fn empty_outcome(&self, request: &FileRequest, path: &Path, error: &TransferError) -> TransferOutcome {
        let digest = Digester::new(self.config.hash).finalize_hex();
        TransferOutcome::new(request, path, 0, digest).with_error(error)
    }
}

async fn open_source(path: &Path) -> io::Result<(File, u64)> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    let file = File::open(path).await?;
    Ok((file, meta.len()))
}
