//! Command-line argument parsing

use std::path::PathBuf;

use anyhow::Context;
use base64::Engine;
use clap::Parser;

/// Send files to, or receive files from, another sendfile peer
#[derive(Parser, Debug)]
#[command(name = "sendfile", version, about, long_about = None)]
pub struct Args {
    /// Files or glob patterns to send
    pub patterns: Vec<String>,

    /// Send mode (default when patterns are given)
    #[arg(short, long, conflicts_with = "receive")]
    pub send: bool,

    /// Receive mode (default without patterns)
    #[arg(short, long)]
    pub receive: bool,

    /// Host to connect to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory received files are written to
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Hash algorithm: sha224, sha256, sha384 or sha512
    #[arg(long)]
    pub hash: Option<String>,

    /// Size of one file chunk in bytes
    #[arg(short, long = "buffer")]
    pub buffer_size: Option<usize>,

    /// Keep listening after the first session
    #[arg(long, visible_alias = "dnc")]
    pub do_not_close: bool,

    /// Keep the connection open after the batch and read more patterns from stdin
    #[arg(long)]
    pub keep_open: bool,

    /// Compress outgoing data
    #[arg(short, long, overrides_with = "no_compression")]
    pub compress: bool,

    /// Do not compress outgoing data (overrides an earlier --compress)
    #[arg(long, visible_alias = "nc", overrides_with = "compress")]
    pub no_compression: bool,

    /// Disable random padding (the peer must do the same)
    #[arg(long, visible_alias = "nn")]
    pub no_noise: bool,

    /// Password mixed into the handshake
    #[arg(long, conflicts_with = "handshake64")]
    pub handshake: Option<String>,

    /// Handshake password as base64
    #[arg(long)]
    pub handshake64: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Send,
    Receive,
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.send || (!self.receive && !self.patterns.is_empty()) {
            Mode::Send
        } else {
            Mode::Receive
        }
    }

    pub fn handshake_password(&self) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(pw) = &self.handshake {
            return Ok(Some(pw.as_bytes().to_vec()));
        }
        match &self.handshake64 {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .context("--handshake64 is not valid base64")?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("sendfile").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn mode_follows_patterns() {
        assert_eq!(parse(&[]).mode(), Mode::Receive);
        assert_eq!(parse(&["*.txt"]).mode(), Mode::Send);
        assert_eq!(parse(&["-s"]).mode(), Mode::Send);
        assert_eq!(parse(&["-r", "x"]).mode(), Mode::Receive);
    }

    #[test]
    fn send_and_receive_conflict() {
        let res = Args::try_parse_from(["sendfile", "-s", "-r"]);
        assert!(res.is_err());
    }

    #[test]
    fn aliases() {
        let args = parse(&["--dnc", "--nn", "-H", "peer", "-p", "4000", "-b", "1024"]);
        assert!(args.do_not_close);
        assert!(args.no_noise);
        assert_eq!(args.host.as_deref(), Some("peer"));
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.buffer_size, Some(1024));
    }

    #[test]
    fn last_compression_flag_wins() {
        let args = parse(&["-c", "--nc"]);
        assert!(!args.compress);
        assert!(args.no_compression);
        let args = parse(&["--no-compression", "--compress"]);
        assert!(args.compress);
        assert!(!args.no_compression);
        assert!(!parse(&[]).compress);
    }

    #[test]
    fn handshake_passwords() {
        assert_eq!(parse(&["--handshake", "pw"]).handshake_password().unwrap(), Some(b"pw".to_vec()));
        assert_eq!(
            parse(&["--handshake64", "cHc="]).handshake_password().unwrap(),
            Some(b"pw".to_vec())
        );
        assert!(parse(&["--handshake64", "***"]).handshake_password().is_err());
        assert_eq!(parse(&[]).handshake_password().unwrap(), None);
    }
}
