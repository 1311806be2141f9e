//! Terminal output: connection notices, one progress bar per file, a result line per file.

use std::path::Path;
use std::sync::Mutex;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use sendfile_core::{FileRequest, SessionObserver, TransferOutcome};

const NAME_WIDTH: usize = 30;

pub struct ConsoleReporter {
    /// "send" or "receive", shown in front of each file.
    verb: &'static str,
    verbose: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new(verb: &'static str, verbose: bool) -> Self {
        Self {
            verb,
            verbose,
            bar: Mutex::new(None),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("  {msg} [{bar:20}] {percent}% {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("= ")
    }

    /// The receiver shows where the file actually lands, which differs from the
    /// requested name after a collision.
    fn display_name(&self, request: &FileRequest, path: &Path) -> String {
        match path.file_name() {
            Some(name) if self.verb == "receive" => name.to_string_lossy().into_owned(),
            _ => request.name.clone(),
        }
    }

    /// Print above the active bar, if there is one.
    fn println(&self, line: String) {
        match self.bar.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(bar) => bar.println(line),
                None => println!("{line}"),
            },
            Err(_) => println!("{line}"),
        }
    }
}

impl SessionObserver for ConsoleReporter {
    fn connection_established(&self, peer: &str) {
        self.println(format!("Connection established with '{peer}'"));
    }

    fn handshake_started(&self, peer: &str) {
        if self.verbose {
            self.println(format!("Starting handshake with '{peer}'..."));
        }
    }

    fn file_started(&self, request: &FileRequest, path: &Path) {
        let bar = ProgressBar::new(request.size);
        bar.set_style(Self::bar_style());
        bar.set_message(file_label(self.verb, &self.display_name(request, path), request));
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn chunk_transferred(&self, len: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                bar.inc(len as u64);
            }
        }
    }

    fn file_finished(&self, outcome: &TransferOutcome) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish();
            }
        }
        println!("{}", result_line(outcome));
    }

    fn connection_closed(&self, peer: &str) {
        if self.verbose {
            self.println(format!("Closed connection with '{peer}'"));
        }
    }

    fn connection_refused(&self, peer: &str) {
        self.println(format!("Refused connection from '{peer}': busy with another session"));
    }
}

fn file_label(verb: &str, name: &str, request: &FileRequest) -> String {
    let (index, count) = request.position();
    format!(
        "{verb} '{}' ({}/{}; {})",
        truncate(name, NAME_WIDTH),
        index + 1,
        count,
        HumanBytes(request.size)
    )
}

/// `[OK: <digest>:<size>]` or `[FAILED: '<error>']`.
pub fn result_line(outcome: &TransferOutcome) -> String {
    match &outcome.error {
        None => format!("    [OK: {}:{}]", outcome.digest, outcome.bytes),
        Some(e) => format!("    [FAILED: '{e}']"),
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }
    let kept: String = name.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outcome(error: Option<&str>) -> TransferOutcome {
        TransferOutcome {
            name: "a.txt".into(),
            path: PathBuf::from("a.txt"),
            index: 0,
            count: 1,
            size: 5,
            bytes: 5,
            digest: "abc123".into(),
            error: error.map(String::from),
        }
    }

    #[test]
    fn result_lines() {
        assert_eq!(result_line(&outcome(None)), "    [OK: abc123:5]");
        assert_eq!(
            result_line(&outcome(Some("connection closed by peer"))),
            "    [FAILED: 'connection closed by peer']"
        );
    }

    #[test]
    fn labels_count_from_one() {
        let req = FileRequest::new("report.pdf", 2048, 1, 3);
        assert_eq!(
            file_label("send", "report.pdf", &req),
            "send 'report.pdf' (2/3; 2.00 KiB)"
        );
    }

    #[test]
    fn receiver_shows_the_destination_name() {
        let req = FileRequest::single("a.txt", 5);
        let landed = Path::new("/inbox/a_0.txt");
        let receiving = ConsoleReporter::new("receive", false);
        assert_eq!(receiving.display_name(&req, landed), "a_0.txt");
        let sending = ConsoleReporter::new("send", false);
        assert_eq!(sending.display_name(&req, Path::new("/src/dir/a.txt")), "a.txt");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "x".repeat(50);
        let t = truncate(&long, NAME_WIDTH);
        assert_eq!(t.chars().count(), NAME_WIDTH);
        assert!(t.ends_with("..."));
        assert_eq!(truncate("short", NAME_WIDTH), "short");
    }
}
