//! Continuously refilling token bucket.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Longest wait [`TokenBucket::reserve`] will hand out. Anything slower is
/// treated like a bucket that never refills.
pub const MAX_RESERVE_WAIT: Duration = Duration::from_secs(3600);

/// Token bucket with `burst` capacity refilled at `rate` tokens per second.
///
/// Tokens are fractional and refill continuously. [`TokenBucket::reserve`]
/// may take the balance negative; the returned delay is exactly how long
/// the caller must wait until its token exists.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

struct BucketState {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    #[allow(clippy::suboptimal_flops)]
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = self.rate.mul_add(elapsed, self.tokens).min(self.burst);
            self.last_refill = now;
        }
    }
}

impl TokenBucket {
    /// Starts full.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            state: Mutex::new(BucketState {
                rate: rate.max(0.0),
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token if available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return true;
        }
        false
    }

    /// Claims one token and returns how long until it is usable, or `None`
    /// when the bucket cannot produce it within [`MAX_RESERVE_WAIT`] (for
    /// instance empty with a zero rate). Nothing is claimed on `None`.
    pub fn reserve(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Some(Duration::ZERO);
        }
        if state.rate <= 0.0 {
            return None;
        }
        let deficit = 1.0 - state.tokens;
        let wait = Duration::try_from_secs_f64(deficit / state.rate)
            .ok()
            .filter(|wait| *wait <= MAX_RESERVE_WAIT)?;
        state.tokens -= 1.0;
        Some(wait)
    }

    /// Gives back a token claimed by [`reserve`](Self::reserve) that will not be used.
    pub fn cancel_reservation(&self) {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.tokens = (state.tokens + 1.0).min(state.burst);
    }

    /// Changes the refill rate; tokens accrued so far are credited at the old rate.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.rate = rate.max(0.0);
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn burst(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let burst = self.state.lock().burst as u32;
        burst
    }

    /// Tokens available now; negative while reservations are outstanding.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.tokens
    }
}
