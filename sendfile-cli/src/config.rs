//! Load config from file and environment, then apply command-line flags.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sendfile_core::{
    HashAlgorithm, NoNoise, NoiseStrategy, RandomPadding, ReceiverConfig, SenderConfig,
    SessionPolicy, TransportConfig, DEFAULT_BUFFER_SIZE,
};
use serde::Deserialize;

use crate::args::Args;

/// File: ~/.config/sendfile/config.toml or /etc/sendfile/config.toml.
/// Env overrides: SENDFILE_HOST, SENDFILE_PORT, SENDFILE_DIR, SENDFILE_HASH, SENDFILE_BUFFER_SIZE.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Receive directory (default: current directory).
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_hash")]
    pub hash: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    30904
}
fn default_hash() -> String {
    "sha256".into()
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dir: None,
            hash: default_hash(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|key| std::env::var(key).ok());
    c
}

impl Config {
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(s) = lookup("SENDFILE_HOST") {
            self.host = s;
        }
        if let Some(p) = lookup("SENDFILE_PORT").and_then(|s| s.parse().ok()) {
            self.port = p;
        }
        if let Some(s) = lookup("SENDFILE_DIR") {
            self.dir = Some(PathBuf::from(s));
        }
        if let Some(s) = lookup("SENDFILE_HASH") {
            self.hash = s;
        }
        if let Some(b) = lookup("SENDFILE_BUFFER_SIZE").and_then(|s| s.parse().ok()) {
            self.buffer_size = b;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sendfile/config.toml"));
    }
    out.push(PathBuf::from("/etc/sendfile/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("cannot read {}: {}", path.display(), e);
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            log::warn!("ignoring {}: {}", path.display(), e);
            None
        }
    }
}

/// Everything a run needs, after config file, environment and flags are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub dir: PathBuf,
    pub hash: HashAlgorithm,
    pub buffer_size: usize,
    pub policy: SessionPolicy,
    pub keep_open: bool,
    pub compress: bool,
    pub noise: bool,
    pub handshake_password: Option<Vec<u8>>,
}

impl Settings {
    /// Flags win over config values.
    pub fn resolve(config: Config, args: &Args) -> anyhow::Result<Self> {
        let hash_name = args.hash.clone().unwrap_or(config.hash);
        let hash = hash_name
            .parse::<HashAlgorithm>()
            .with_context(|| format!("invalid hash setting '{hash_name}'"))?;
        let dir = match args.dir.clone().or(config.dir) {
            Some(d) => d,
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        Ok(Self {
            host: args.host.clone().unwrap_or(config.host),
            port: args.port.unwrap_or(config.port),
            dir,
            hash,
            buffer_size: args.buffer_size.unwrap_or(config.buffer_size),
            policy: if args.do_not_close {
                SessionPolicy::DoNotClose
            } else {
                SessionPolicy::SingleShot
            },
            keep_open: args.keep_open,
            compress: args.compress && !args.no_compression,
            noise: !args.no_noise,
            handshake_password: args.handshake_password()?,
        })
    }

    pub fn transport(&self) -> TransportConfig {
        let noise: Arc<dyn NoiseStrategy> = if self.noise {
            Arc::new(RandomPadding::default())
        } else {
            Arc::new(NoNoise)
        };
        TransportConfig {
            buffer_size: self.buffer_size,
            compress: self.compress,
            noise,
            handshake_password: self.handshake_password.clone(),
        }
    }

    pub fn receiver(&self) -> ReceiverConfig {
        ReceiverConfig {
            sandbox_root: self.dir.clone(),
            hash: self.hash,
            policy: self.policy,
        }
    }

    pub fn sender(&self) -> SenderConfig {
        SenderConfig {
            hash: self.hash,
            keep_open: self.keep_open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    #[test]
    fn file_values_and_defaults() {
        let c: Config = toml::from_str("port = 4000\nhash = \"sha512\"").unwrap();
        assert_eq!(c.port, 4000);
        assert_eq!(c.hash, "sha512");
        assert_eq!(c.host, "localhost");
        assert_eq!(c.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("colour = true").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("SENDFILE_HOST", "10.0.0.2"),
            ("SENDFILE_PORT", "5000"),
            ("SENDFILE_BUFFER_SIZE", "not a number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.host, "10.0.0.2");
        assert_eq!(c.port, 5000);
        assert_eq!(c.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn flags_override_config() {
        let args = Args::try_parse_from([
            "sendfile", "-p", "7000", "--hash", "sha384", "-d", "/tmp/in", "--dnc", "--nn",
        ])
        .unwrap();
        let s = Settings::resolve(Config::default(), &args).unwrap();
        assert_eq!(s.port, 7000);
        assert_eq!(s.host, "localhost");
        assert_eq!(s.hash, HashAlgorithm::Sha384);
        assert_eq!(s.dir, PathBuf::from("/tmp/in"));
        assert_eq!(s.policy, SessionPolicy::DoNotClose);
        assert!(!s.noise);
        assert_eq!(s.receiver().policy, SessionPolicy::DoNotClose);
    }

    #[test]
    fn bad_hash_is_an_error() {
        let args = Args::try_parse_from(["sendfile", "--hash", "md5"]).unwrap();
        assert!(Settings::resolve(Config::default(), &args).is_err());
    }
}
