//! Fault injection between an endpoint and the wire.

use bytes::{Bytes, BytesMut};
use gbn_abstract::{FaultConfig, HEADER_LEN};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// What the channel did with one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fate {
    Dropped,
    Delivered { datagram: Bytes, corrupted: bool },
}

/// Drops datagrams and flips payload bytes according to a [`FaultConfig`].
///
/// Corruption XORs one random payload byte with `0xFF` and leaves the header
/// (including the checksum) untouched. Datagrams without payload are never
/// corrupted.
#[derive(Debug)]
pub struct FaultyChannel {
    config: FaultConfig,
    rng: StdRng,
}

impl FaultyChannel {
    pub fn new(config: FaultConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    pub fn seeded(config: FaultConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: FaultConfig, rng: StdRng) -> Self {
        Self { config, rng }
    }

    pub fn transmit(&mut self, datagram: Bytes) -> Fate {
        if self.roll(self.config.loss_pct) {
            debug!("channel dropped {} byte datagram", datagram.len());
            return Fate::Dropped;
        }

        if datagram.len() <= HEADER_LEN || !self.roll(self.config.corrupt_pct) {
            return Fate::Delivered {
                datagram,
                corrupted: false,
            };
        }

        let mut damaged = BytesMut::from(&datagram[..]);
        let pos = self.rng.random_range(HEADER_LEN..damaged.len());
        damaged[pos] ^= 0xFF;
        debug!("channel corrupted byte {} of {}", pos, damaged.len());
        Fate::Delivered {
            datagram: damaged.freeze(),
            corrupted: true,
        }
    }

    fn roll(&mut self, pct: u8) -> bool {
        pct > 0 && self.rng.random_range(0..100u8) < pct
    }
}
