//! Unreliable in-memory transport.
//!
//! Models the delivery contract sessions must survive: at-least-once for
//! anything not dropped, in any order, possibly more than once.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Channel behaviour. Rates are percentages (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    /// Deliver a random in-flight item instead of the oldest.
    pub reorder: bool,
    /// Chance that a sent item is enqueued twice.
    pub duplicate_percent: u8,
    /// Chance that a sent item is lost.
    pub drop_percent: u8,
}

/// Counters for a channel's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    /// Items handed to `send`.
    pub sent: u64,
    /// Items lost.
    pub dropped: u64,
    /// Extra copies enqueued.
    pub duplicated: u64,
    /// Items handed out by `deliver_next`.
    pub delivered: u64,
}

/// One-directional simulated link.
#[derive(Debug)]
pub struct SimChannel<T> {
    queue: VecDeque<T>,
    rng: ChaCha20Rng,
    config: ChannelConfig,
    stats: ChannelStats,
}

impl<T: Clone> SimChannel<T> {
    /// Creates an empty channel whose faults are driven by `seed`.
    pub fn new(seed: u64, config: ChannelConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            config,
            stats: ChannelStats::default(),
        }
    }

    /// Puts an item on the wire, subject to loss and duplication.
    pub fn send(&mut self, item: T) {
        self.stats.sent += 1;
        if self.roll(self.config.drop_percent) {
            self.stats.dropped += 1;
            return;
        }
        if self.roll(self.config.duplicate_percent) {
            self.stats.duplicated += 1;
            self.queue.push_back(item.clone());
        }
        self.queue.push_back(item);
    }

    /// Takes the next item to deliver, if any.
    pub fn deliver_next(&mut self) -> Option<T> {
        let item = if self.config.reorder && self.queue.len() > 1 {
            let index = self.rng.gen_range(0..self.queue.len());
            self.queue.remove(index)
        } else {
            self.queue.pop_front()
        };
        if item.is_some() {
            self.stats.delivered += 1;
        }
        item
    }

    /// Delivers everything still in flight.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.deliver_next()).collect()
    }

    /// Items currently in flight.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    fn roll(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.gen_range(0u8..100) < percent
    }
}
