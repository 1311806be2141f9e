//! Listening side: accept loop driven by the session policy. One session at a time.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{JoinError, JoinHandle};

use crate::config::{ReceiverConfig, TransportConfig};
use crate::session::{serve_connection, SessionObserver, SessionReport};

/// What the listener does once a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// Stop listening after the first session.
    #[default]
    SingleShot,
    /// Keep serving connections, one after another.
    DoNotClose,
}

/// What a listener did before it stopped.
#[derive(Debug, Default)]
pub struct ServeSummary {
    pub reports: Vec<SessionReport>,
    /// Connections closed unanswered because a session was active.
    pub refused: u64,
    /// Sessions whose task died (panicked) without producing a report.
    pub lost: u64,
}

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Serve receiver sessions until the policy or `shutdown` says stop.
    pub async fn receive(
        &self,
        transport: TransportConfig,
        config: ReceiverConfig,
        observer: Arc<dyn SessionObserver>,
        shutdown: impl Future<Output = ()>,
    ) -> ServeSummary {
        let policy = config.policy;
        let config = Arc::new(config);
        let session_observer = observer.clone();
        self.serve(policy, shutdown, observer, move |stream, addr| {
            let transport = transport.clone();
            let config = config.clone();
            let observer = session_observer.clone();
            async move {
                let _ = stream.set_nodelay(true);
                serve_connection(stream, addr.to_string(), transport, &config, observer.as_ref()).await
            }
        })
        .await
    }

    /// Accept loop. `handler` runs each admitted connection on its own task; while it
    /// runs, further connections are accepted and closed at once.
    pub async fn serve<F, Fut>(
        &self,
        policy: SessionPolicy,
        shutdown: impl Future<Output = ()>,
        observer: Arc<dyn SessionObserver>,
        mut handler: F,
    ) -> ServeSummary
    where
        F: FnMut(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = SessionReport> + Send + 'static,
    {
        let mut summary = ServeSummary::default();
        let mut active: Option<JoinHandle<SessionReport>> = None;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("listener shutting down");
                    if let Some(task) = active.take() {
                        task.abort();
                        // A session that already finished still gets reported.
                        if let Ok(report) = task.await {
                            summary.reports.push(report);
                        }
                    }
                    break;
                }
                joined = session_end(&mut active) => {
                    active = None;
                    match joined {
                        Ok(report) => {
                            log::debug!("[{}] session with {} ended", report.id, report.peer);
                            summary.reports.push(report);
                        }
                        Err(e) => {
                            log::error!("session task failed: {}", e);
                            summary.lost += 1;
                        }
                    }
                    if policy == SessionPolicy::SingleShot {
                        break;
                    }
                }
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if active.is_some() {
                            refuse(stream, addr).await;
                            observer.connection_refused(&addr.to_string());
                            summary.refused += 1;
                            continue;
                        }
                        log::info!("connection from {}", addr);
                        active = Some(tokio::spawn(handler(stream, addr)));
                    }
                    Err(e) => log::warn!("accept failed: {}", e),
                },
            }
        }
        summary
    }
}

/// Resolves when the active session task ends. Never resolves while idle.
async fn session_end(
    active: &mut Option<JoinHandle<SessionReport>>,
) -> Result<SessionReport, JoinError> {
    match active.as_mut() {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

/// Close without a handshake or any data.
async fn refuse(mut stream: TcpStream, addr: SocketAddr) {
    log::warn!("refused connection from {}: a session is already active", addr);
    if let Err(e) = stream.shutdown().await {
        log::debug!("shutdown of refused connection {}: {}", addr, e);
    }
}
