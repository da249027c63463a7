// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub trait CryptoRngCore: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> CryptoRngCore for T {}

/// Source of independent, cryptographically secure random streams.
pub trait RandomSource: Send + Sync + 'static {
    fn stream(&self) -> Box<dyn CryptoRngCore>;
}

/// Hands out ChaCha20 streams seeded from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn stream(&self) -> Box<dyn CryptoRngCore> {
        Box::new(ChaCha20Rng::from_entropy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_are_independent() {
        let source = OsRandomSource;
        let mut first = source.stream();
        let mut second = source.stream();
        assert_ne!(first.next_u64(), second.next_u64());
    }
}
