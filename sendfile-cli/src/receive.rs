//! Receive mode.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use sendfile_core::{Listener, SessionPolicy};

use crate::config::Settings;
use crate::progress::ConsoleReporter;

/// Listen and receive until the session policy or `shutdown` ends it.
/// Returns whether every session succeeded.
pub async fn run(
    settings: &Settings,
    reporter: Arc<ConsoleReporter>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<bool> {
    let listener = Listener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("cannot listen on port {}", settings.port))?;
    log::debug!("listening on {}", listener.local_addr()?);
    println!("Waiting for files...");
    if settings.policy == SessionPolicy::DoNotClose {
        log::info!("serving connections until interrupted");
    }

    let summary = listener
        .receive(settings.transport(), settings.receiver(), reporter, shutdown)
        .await;
    for report in &summary.reports {
        if let Some(e) = &report.error {
            log::error!("[{}] session with {} failed: {}", report.id, report.peer, e);
        }
    }
    if summary.refused > 0 {
        log::info!("refused {} connection(s) while busy", summary.refused);
    }
    if summary.lost > 0 {
        log::error!("{} session(s) ended without a report", summary.lost);
    }
    Ok(summary.lost == 0 && summary.reports.iter().all(|r| r.is_success()))
}
