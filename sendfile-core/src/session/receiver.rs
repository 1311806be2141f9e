//! Receiver role: answer requests, write bodies into the receive directory.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Instrument, SessionObserver, SessionReport, SessionRole, TransferOutcome};
use crate::channel::Channel;
use crate::config::{ReceiverConfig, TransportConfig};
use crate::error::TransferError;
use crate::integrity::Digester;
use crate::listener::SessionPolicy;
use crate::path::{self, PathError};
use crate::protocol::{
    Answer, FileRequest, ProtocolError, CODE_DESTINATION_FAILED, CODE_MALFORMED, CODE_PATH_REJECTED,
};
use crate::transport::SecureChannel;

enum ReceiverState {
    AwaitRequest,
    Receiving {
        request: FileRequest,
        path: PathBuf,
        file: File,
    },
    Completed {
        request: FileRequest,
        outcome: TransferOutcome,
    },
    Failed {
        error: TransferError,
        outcome: Option<TransferOutcome>,
    },
    Closing,
}

struct ReceiverSession<'a, C: Channel> {
    channel: &'a mut C,
    config: &'a ReceiverConfig,
    observer: &'a dyn SessionObserver,
    report: SessionReport,
    /// A batch was started and its last file has not arrived yet.
    in_batch: bool,
}

/// Handshake on an accepted stream, then serve it.
pub async fn serve_connection<S>(
    stream: S,
    peer: String,
    transport: TransportConfig,
    config: &ReceiverConfig,
    observer: &dyn SessionObserver,
) -> SessionReport
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    observer.connection_established(&peer);
    observer.handshake_started(&peer);
    match SecureChannel::accept_handshake(stream, peer.clone(), transport).await {
        Ok(mut channel) => run_receiver(&mut channel, config, observer).await,
        Err(e) => {
            log::warn!("handshake with {} failed: {}", peer, e);
            observer.connection_closed(&peer);
            let mut report = SessionReport::new(SessionRole::Receiver, peer);
            report.error = Some(e.into());
            report
        }
    }
}

/// Receive files until the peer is done or something fails. Always closes the channel.
pub async fn run_receiver<C: Channel>(
    channel: &mut C,
    config: &ReceiverConfig,
    observer: &dyn SessionObserver,
) -> SessionReport {
    let report = SessionReport::new(SessionRole::Receiver, channel.peer());
    log::debug!("[{}] receiver session with {}", report.id, report.peer);
    let session = ReceiverSession {
        channel,
        config,
        observer,
        report,
        in_batch: false,
    };
    session.run().await
}

impl<'a, C: Channel> ReceiverSession<'a, C> {
    async fn run(mut self) -> SessionReport {
        let mut state = ReceiverState::AwaitRequest;
        loop {
            state = match state {
                ReceiverState::AwaitRequest => self.await_request().await,
                ReceiverState::Receiving {
                    request,
                    path,
                    file,
                } => self.receive(request, path, file).await,
                ReceiverState::Completed { request, outcome } => self.complete(request, outcome),
                ReceiverState::Failed { error, outcome } => {
                    self.fail(error, outcome).await;
                    break;
                }
                ReceiverState::Closing => {
                    self.close().await;
                    break;
                }
            };
        }
        self.report
    }

    async fn await_request(&mut self) -> ReceiverState {
        let value = match self.channel.read_message().await {
            Ok(Some(v)) => v,
            Ok(None) if self.in_batch => {
                return failed(ProtocolError::UnexpectedEof.into(), None);
            }
            Ok(None) => return ReceiverState::Closing,
            Err(e) => return failed(e.into(), None),
        };

        let request = match FileRequest::from_value(&value) {
            Ok(r) => r,
            Err(e) => {
                self.reject(CODE_MALFORMED, &e.to_string()).await;
                return failed(e.into(), None);
            }
        };
        self.in_batch = true;
        let (index, count) = request.position();
        log::debug!(
            "[{}] request '{}' ({} bytes, {}/{})",
            self.report.id,
            request.name,
            request.size,
            index + 1,
            count
        );

        let path = match path::resolve(&request.name, &self.config.sandbox_root).await {
            Ok(p) => p,
            Err(e) => {
                let code = match e {
                    PathError::Escape(_) => CODE_PATH_REJECTED,
                    PathError::Io(_) => CODE_DESTINATION_FAILED,
                };
                self.reject(code, &e.to_string()).await;
                let error = TransferError::from(e);
                let outcome = self.empty_outcome(&request, &self.config.sandbox_root, &error);
                return failed(error, Some(outcome));
            }
        };

        let file = match path::create_destination(&path).await {
            Ok(f) => f,
            Err(e) => {
                self.reject(CODE_DESTINATION_FAILED, &e.to_string()).await;
                let error = TransferError::from(e);
                let outcome = self.empty_outcome(&request, &path, &error);
                return failed(error, Some(outcome));
            }
        };

        if let Err(e) = self.channel.write_message(&Answer::accept().to_value()).await {
            let error = TransferError::from(e);
            let outcome = self.empty_outcome(&request, &path, &error);
            return failed(error, Some(outcome));
        }
        ReceiverState::Receiving {
            request,
            path,
            file,
        }
    }

    async fn receive(&mut self, request: FileRequest, path: PathBuf, mut file: File) -> ReceiverState {
        self.observer.file_started(&request, &path);
        let mut instrument = Instrument::new(self.config.hash, self.observer);
        let result = self
            .channel
            .read_file_stream(&mut file, request.size, &mut instrument)
            .await;
        drop(file);
        let (digest, bytes) = instrument.finish();
        let outcome = TransferOutcome::new(&request, &path, bytes, digest);
        match result {
            Ok(_) => ReceiverState::Completed { request, outcome },
            Err(error) => {
                let outcome = outcome.with_error(&error);
                failed(error, Some(outcome))
            }
        }
    }

    fn complete(&mut self, request: FileRequest, outcome: TransferOutcome) -> ReceiverState {
        log::info!(
            "[{}] received '{}' -> {} ({}:{})",
            self.report.id,
            outcome.name,
            outcome.path.display(),
            outcome.digest,
            outcome.bytes
        );
        self.observer.file_finished(&outcome);
        self.report.outcomes.push(outcome);
        if !request.is_last() {
            return ReceiverState::AwaitRequest;
        }
        self.in_batch = false;
        match self.config.policy {
            SessionPolicy::SingleShot => ReceiverState::Closing,
            SessionPolicy::DoNotClose => ReceiverState::AwaitRequest,
        }
    }

    async fn fail(&mut self, error: TransferError, outcome: Option<TransferOutcome>) {
        log::warn!("[{}] receive from {} failed: {}", self.report.id, self.report.peer, error);
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

    /// Best effort; the connection is torn down right after.
    async fn reject(&mut self, code: i64, message: &str) {
        let answer = Answer::reject(code, message);
        if let Err(e) = self.channel.write_message(&answer.to_value()).await {
            log::debug!("[{}] could not send rejection: {}", self.report.id, e);
        }
    }

    fn empty_outcome(
        &self,
        request: &FileRequest,
        path: &Path,
        error: &TransferError,
    ) -> TransferOutcome {
        let digest = Digester::new(self.config.hash).finalize_hex();
        TransferOutcome::new(request, path, 0, digest).with_error(error)
    }
}

fn failed(error: TransferError, outcome: Option<TransferOutcome>) -> ReceiverState {
    ReceiverState::Failed { error, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::TransportConfig;
    use crate::session::NoopObserver;

    async fn channels() -> (
        SecureChannel<tokio::io::DuplexStream>,
        SecureChannel<tokio::io::DuplexStream>,
    ) {
        let (x, y) = tokio::io::duplex(64 * 1024);
        let (a, b) = tokio::join!(
            SecureChannel::connect_handshake(x, "receiver", TransportConfig::default()),
            SecureChannel::accept_handshake(y, "sender", TransportConfig::default()),
        );
        (a.unwrap(), b.unwrap())
    }

    #[tokio::test]
    async fn clean_close_before_any_request_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig::new(dir.path());
        let (mut sender, mut receiver) = channels().await;
        sender.close().await.unwrap();
        let report = run_receiver(&mut receiver, &config, &NoopObserver).await;
        assert!(report.error.is_none());
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn malformed_request_is_answered_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig::new(dir.path());
        let (mut sender, mut receiver) = channels().await;
        sender
            .write_message(&json!({"type": 1, "name": "x", "size": "big"}))
            .await
            .unwrap();
        let report = run_receiver(&mut receiver, &config, &NoopObserver).await;
        assert!(matches!(
            report.error,
            Some(TransferError::Protocol(ProtocolError::NotNumeric("size")))
        ));
        let answer = Answer::from_value(&sender.read_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(answer.code, CODE_MALFORMED);
        assert!(sender.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_inside_a_batch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig::new(dir.path());
        let (mut sender, mut receiver) = channels().await;

        let recv = tokio::spawn(async move { run_receiver(&mut receiver, &config, &NoopObserver).await });

        sender
            .write_message(&FileRequest::new("one", 0, 0, 2).to_value())
            .await
            .unwrap();
        let answer = Answer::from_value(&sender.read_message().await.unwrap().unwrap()).unwrap();
        assert!(answer.is_accepted());
        let empty = dir.path().join("empty-src");
        std::fs::write(&empty, b"").unwrap();
        let mut src = File::open(&empty).await.unwrap();
        sender.write_file_stream(&mut src, 0, &mut ()).await.unwrap();
        sender.close().await.unwrap();

        let report = recv.await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.outcomes[0].is_success());
        assert!(matches!(
            report.error,
            Some(TransferError::Protocol(ProtocolError::UnexpectedEof))
        ));
    }

    #[tokio::test]
    async fn size_mismatch_fails_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let config = ReceiverConfig::new(&inbox);
        let (mut sender, mut receiver) = channels().await;

        let recv = tokio::spawn(async move { run_receiver(&mut receiver, &config, &NoopObserver).await });

        sender
            .write_message(&FileRequest::single("short.bin", 10).to_value())
            .await
            .unwrap();
        let answer = Answer::from_value(&sender.read_message().await.unwrap().unwrap()).unwrap();
        assert!(answer.is_accepted());
        let src_path = dir.path().join("src");
        std::fs::write(&src_path, b"abc").unwrap();
        let mut src = File::open(&src_path).await.unwrap();
        sender.write_file_stream(&mut src, 3, &mut ()).await.unwrap();

        let report = recv.await.unwrap();
        assert!(matches!(
            report.error,
            Some(TransferError::Protocol(ProtocolError::SizeMismatch { declared: 10, actual: 3 }))
        ));
        assert!(!report.outcomes[0].is_success());
        assert_eq!(report.outcomes[0].bytes, 0);
        assert_eq!(std::fs::metadata(inbox.join("short.bin")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn body_longer_than_accepted_size_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let config = ReceiverConfig::new(&inbox);
        let (mut sender, mut receiver) = channels().await;

        let recv = tokio::spawn(async move { run_receiver(&mut receiver, &config, &NoopObserver).await });

        sender
            .write_message(&FileRequest::single("small.txt", 3).to_value())
            .await
            .unwrap();
        let answer = Answer::from_value(&sender.read_message().await.unwrap().unwrap()).unwrap();
        assert!(answer.is_accepted());
        let src_path = dir.path().join("big");
        std::fs::write(&src_path, vec![7u8; 100_000]).unwrap();
        let mut src = File::open(&src_path).await.unwrap();
        // The receiver hangs up after the header, so the rest of the body may not go through.
        let _ = sender.write_file_stream(&mut src, 100_000, &mut ()).await;

        let report = recv.await.unwrap();
        assert!(matches!(
            report.error,
            Some(TransferError::Protocol(ProtocolError::SizeMismatch {
                declared: 3,
                actual: 100_000
            }))
        ));
        assert_eq!(std::fs::metadata(inbox.join("small.txt")).unwrap().len(), 0);
    }
}
