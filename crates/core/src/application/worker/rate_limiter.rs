//! Rate Limiter (fixed window)
//!
//! Caps how many jobs a worker starts per window. Uses a single atomic so
//! concurrent permit holders never take a lock to check it.

use std::time::Duration;
use tokio::time::Instant;

use std::sync::atomic::{AtomicU64, Ordering};

/// At most `max` job starts per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Fixed-window limiter: the window index and the starts counted in it
/// live in one `AtomicU64` updated by compare-and-swap.
pub struct RateLimiter {
    // Upper 32 bits: starts in the current window
    // Lower 32 bits: window index since creation
    packed: AtomicU64,
    created_at: Instant,
    max: u32,
    window_ms: u64,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            packed: AtomicU64::new(0),
            created_at: Instant::now(),
            max: limit.max,
            window_ms: (limit.window.as_millis() as u64).max(1),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        Instant::now().duration_since(self.created_at).as_millis() as u64
    }

    /// Take one start from the current window.
    ///
    /// `Err(wait)` means the window is used up and the next one opens after `wait`.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        loop {
            let elapsed_ms = self.elapsed_ms();
            let window = elapsed_ms / self.window_ms;
            let window_tag = window & 0xFFFF_FFFF;

            let packed = self.packed.load(Ordering::Acquire);
            let count = (packed >> 32) as u32;
            let stored_window = packed & 0xFFFF_FFFF;

            let count = if stored_window == window_tag { count } else { 0 };
            if count >= self.max {
                let next_window_at = (window + 1) * self.window_ms;
                return Err(Duration::from_millis(next_window_at - elapsed_ms));
            }

            let new_packed = ((count as u64 + 1) << 32) | window_tag;
            match self.packed.compare_exchange(
                packed,
                new_packed,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(_) => continue, // Retry
            }
        }
    }

    /// Give back a start taken in the current window (nothing was claimed)
    pub fn refund(&self) {
        let window_tag = (self.elapsed_ms() / self.window_ms) & 0xFFFF_FFFF;
        let _ = self
            .packed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                let count = packed >> 32;
                (packed & 0xFFFF_FFFF == window_tag && count > 0)
                    .then(|| ((count - 1) << 32) | window_tag)
            });
    }

    /// Starts left in the current window (for monitoring)
    pub fn remaining(&self) -> u32 {
        let window_tag = (self.elapsed_ms() / self.window_ms) & 0xFFFF_FFFF;
        let packed = self.packed.load(Ordering::Acquire);
        if packed & 0xFFFF_FFFF == window_tag {
            self.max.saturating_sub((packed >> 32) as u32)
        } else {
            self.max
        }
    }
}
