//! ## bmpbridge-telemetry::throttle
//! **Token bucket with O(1) updates**
//!
//! Bounds how many log lines a failure storm can emit. It gates the log line
//! only; the operation that failed, and its counters, always proceed.

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Non-blocking token bucket. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self::new_at(capacity, refill_per_sec, Instant::now())
    }

    /// Creates a bucket whose refill clock starts at `now`.
    pub fn new_at(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Takes one token if available.
    #[inline]
    pub fn acquire(&self) -> bool {
        self.acquire_at(Instant::now())
    }

    /// Same as [`TokenBucket::acquire`] with an explicit clock reading.
    pub fn acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        // Readings older than the last refill add nothing.
        let elapsed = now.saturating_duration_since(state.last_refill);
        if !elapsed.is_zero() {
            state.tokens =
                (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
