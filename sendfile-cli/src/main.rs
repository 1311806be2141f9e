// sendfile: send files to a listening peer, or listen and receive them.

mod args;
mod config;
mod files;
mod progress;
mod receive;
mod send;

use std::sync::Arc;

use clap::Parser;

use crate::args::{Args, Mode};
use crate::config::Settings;
use crate::progress::ConsoleReporter;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let settings = Settings::resolve(config::load(), &args)?;
    log::debug!(
        "{:?} mode, peer {}:{}, hash {}, buffer {}",
        args.mode(),
        settings.host,
        settings.port,
        settings.hash,
        settings.buffer_size
    );

    let rt = tokio::runtime::Runtime::new()?;
    let ok = rt.block_on(async {
        match args.mode() {
            Mode::Send => {
                let reporter = ConsoleReporter::new("send", args.verbose);
                tokio::select! {
                    res = send::run(&settings, &args.patterns, &reporter) => res,
                    _ = shutdown_signal() => Ok(false),
                }
            }
            Mode::Receive => {
                let reporter = Arc::new(ConsoleReporter::new("receive", args.verbose));
                receive::run(&settings, reporter, shutdown_signal()).await
            }
        }
    })?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("cannot watch SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    log::info!("interrupted, shutting down");
}
