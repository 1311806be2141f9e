//! Send mode.

use anyhow::Context;
use sendfile_core::transport::connect_tcp;
use sendfile_core::{send_files, send_to, Channel, SecureChannel, SessionObserver, SessionReport};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Settings;
use crate::files;
use crate::progress::ConsoleReporter;

/// Send the files matching `patterns`. Returns whether every file went through.
pub async fn run(
    settings: &Settings,
    patterns: &[String],
    reporter: &ConsoleReporter,
) -> anyhow::Result<bool> {
    let files = files::expand(patterns)?;
    println!("Sending files...");
    if !settings.keep_open {
        let report = send_to(
            &settings.host,
            settings.port,
            settings.transport(),
            &files,
            &settings.sender(),
            reporter,
        )
        .await;
        return Ok(finish(report));
    }

    let (stream, peer) = connect_tcp(&settings.host, settings.port)
        .await
        .with_context(|| format!("cannot connect to {}:{}", settings.host, settings.port))?;
    reporter.connection_established(&peer);
    reporter.handshake_started(&peer);
    let mut channel = SecureChannel::connect_handshake(stream, peer, settings.transport())
        .await
        .context("handshake failed")?;

    let config = settings.sender();
    let mut ok = finish(send_files(&mut channel, &files, &config, reporter).await);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while ok {
        println!("Connection kept open; enter more file patterns (Ctrl+D to finish):");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let patterns: Vec<String> = line.split_whitespace().map(String::from).collect();
        if patterns.is_empty() {
            continue;
        }
        let files = files::expand(&patterns)?;
        ok = finish(send_files(&mut channel, &files, &config, reporter).await);
    }
    if ok {
        channel.close().await?;
        reporter.connection_closed(channel.peer());
    }
    Ok(ok)
}

fn finish(report: SessionReport) -> bool {
    if let Some(e) = &report.error {
        log::error!("[{}] {}", report.id, e);
    }
    report.is_success()
}
