//! Lock-free ban score.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

const ORD: Ordering = Ordering::Relaxed;

/// Misbehaviour accumulator with a one-shot threshold signal.
///
/// The score only grows. The first increase that takes it to or past the
/// threshold reports the crossing; later increases never report again.
#[derive(Debug)]
pub struct BanScore {
    score: AtomicU32,
    banned: AtomicBool,
    threshold: u32,
}

impl BanScore {
    pub fn new(threshold: u32) -> Self {
        Self {
            score: AtomicU32::new(0),
            banned: AtomicBool::new(false),
            threshold,
        }
    }

    pub fn score(&self) -> u32 {
        self.score.load(ORD)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether the threshold has been crossed.
    pub fn is_banned(&self) -> bool {
        self.banned.load(Ordering::Acquire)
    }

    /// Add `delta` (saturating). Returns `true` only on the call that crossed the threshold.
    pub fn increase(&self, delta: u32) -> bool {
        let previous = self
            .score
            .fetch_update(ORD, ORD, |current| Some(current.saturating_add(delta)))
            .unwrap_or_else(|current| current);
        let current = previous.saturating_add(delta);

        current >= self.threshold && !self.banned.swap(true, Ordering::AcqRel)
    }
}
