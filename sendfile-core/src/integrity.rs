//! Integrity: running digest over the bytes of a file as they cross the wire.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Hash algorithms both peers can agree on out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "");
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == normalized)
            .ok_or_else(|| UnknownAlgorithm(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported hash algorithm '{0}' (use sha224, sha256, sha384 or sha512)")]
pub struct UnknownAlgorithm(pub String);

/// Digest accumulator, seeded once per file and fed every chunk in order.
#[derive(Clone)]
pub enum Digester {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Digester {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha224 => Digester::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Digester::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Digester::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Digester::Sha224(h) => h.update(chunk),
            Digester::Sha256(h) => h.update(chunk),
            Digester::Sha384(h) => h.update(chunk),
            Digester::Sha512(h) => h.update(chunk),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Digester::Sha224(h) => hex::encode(h.finalize()),
            Digester::Sha256(h) => hex::encode(h.finalize()),
            Digester::Sha384(h) => hex::encode(h.finalize()),
            Digester::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hex digest of a complete buffer.
pub fn digest_hex(algorithm: HashAlgorithm, payload: &[u8]) -> String {
    let mut d = Digester::new(algorithm);
    d.update(payload);
    d.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            digest_hex(HashAlgorithm::Sha256, b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn chunked_equals_whole() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for alg in HashAlgorithm::ALL {
            let mut d = Digester::new(alg);
            for chunk in payload.chunks(333) {
                d.update(chunk);
            }
            assert_eq!(d.finalize_hex(), digest_hex(alg, &payload), "{alg}");
        }
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(digest_hex(HashAlgorithm::Sha224, b"").len(), 56);
        assert_eq!(digest_hex(HashAlgorithm::Sha384, b"").len(), 96);
        assert_eq!(digest_hex(HashAlgorithm::Sha512, b"").len(), 128);
    }

    #[test]
    fn parse_names() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("sha-512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
