//! Traffic noise: random-length padding around each record so message sizes do not leak.
//! Both peers must use the same strategy.

use std::fmt;

use rand::{Rng, RngCore};

/// Reversible transform applied to every record before encryption.
pub trait NoiseStrategy: Send + Sync + fmt::Debug {
    fn wrap(&self, data: Vec<u8>) -> Vec<u8>;
    fn unwrap(&self, data: Vec<u8>) -> Result<Vec<u8>, NoiseError>;
}

/// Pass-through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNoise;

impl NoiseStrategy for NoNoise {
    fn wrap(&self, data: Vec<u8>) -> Vec<u8> {
        data
    }

    fn unwrap(&self, data: Vec<u8>) -> Result<Vec<u8>, NoiseError> {
        Ok(data)
    }
}

/// Layout: `[random byte][pad len][pad bytes][data]`, pad len in `0..=max_len`.
#[derive(Debug, Clone, Copy)]
pub struct RandomPadding {
    max_len: u8,
}

impl RandomPadding {
    pub fn new(max_len: u8) -> Self {
        Self { max_len }
    }
}

impl Default for RandomPadding {
    fn default() -> Self {
        Self::new(u8::MAX)
    }
}

impl NoiseStrategy for RandomPadding {
    fn wrap(&self, data: Vec<u8>) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let pad_len = rng.gen_range(0..=self.max_len) as usize;
        let mut out = vec![0u8; 2 + pad_len + data.len()];
        out[0] = rng.gen();
        out[1] = pad_len as u8;
        rng.fill_bytes(&mut out[2..2 + pad_len]);
        out[2 + pad_len..].copy_from_slice(&data);
        out
    }

    fn unwrap(&self, mut data: Vec<u8>) -> Result<Vec<u8>, NoiseError> {
        if data.len() < 2 {
            return Err(NoiseError::Truncated);
        }
        let start = 2 + data[1] as usize;
        if start > data.len() {
            return Err(NoiseError::Truncated);
        }
        Ok(data.split_off(start))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NoiseError {
    #[error("padded record shorter than its declared noise")]
    Truncated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_roundtrip() {
        let noise = RandomPadding::default();
        for len in [0usize, 1, 17, 4096] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let wrapped = noise.wrap(data.clone());
            assert!(wrapped.len() >= data.len() + 2);
            assert_eq!(noise.unwrap(wrapped).unwrap(), data);
        }
    }

    #[test]
    fn zero_max_len_adds_only_header() {
        let noise = RandomPadding::new(0);
        let wrapped = noise.wrap(b"abc".to_vec());
        assert_eq!(wrapped.len(), 5);
        assert_eq!(wrapped[1], 0);
    }

    #[test]
    fn truncated_padding_rejected() {
        let noise = RandomPadding::default();
        assert!(noise.unwrap(vec![9]).is_err());
        assert!(noise.unwrap(vec![9, 200, 1, 2]).is_err());
    }

    #[test]
    fn no_noise_is_identity() {
        assert_eq!(NoNoise.unwrap(NoNoise.wrap(b"x".to_vec())).unwrap(), b"x");
    }
}
