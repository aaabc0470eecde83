//! Token-bucket rate limiter for outbound exchange calls (spec.md §4.1).
//!
//! Grounded on the teacher's `tokio::sync::Mutex`-guarded shared state
//! pattern (`InventoryManager`, `OfiEngine`) generalized to a fixed one-second
//! rolling window admission counter. `tokio::sync::Mutex` is FIFO, so
//! concurrent `acquire()` callers are admitted in arrival order per spec.md
//! §4.1's "admissions are granted in arrival order".

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// `rate_limit <= 0` means unlimited (spec.md §4.1: "zero or negative N
/// means unlimited").
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub rate_limit: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { rate_limit: 10 }
    }
}

impl RateLimiterConfig {
    pub fn from_env(prefix: &str) -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var(prefix) {
            if let Ok(n) = v.parse() {
                cfg.rate_limit = n;
            }
        }
        cfg
    }
}

struct State {
    /// Admission timestamps within the trailing one-second window, oldest
    /// first.
    admissions: VecDeque<Instant>,
}

/// A fixed-window token bucket admitting at most `rate_limit` calls per
/// rolling one-second window (spec.md §4.1).
pub struct RateLimiter {
    rate_limit: i64,
    state: Mutex<State>,
}

const WINDOW: Duration = Duration::from_secs(1);

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            rate_limit: config.rate_limit,
            state: Mutex::new(State {
                admissions: VecDeque::new(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(RateLimiterConfig { rate_limit: 0 })
    }

    /// Suspends the caller until admission, then records the admission
    /// timestamp. Unlimited (`rate_limit <= 0`) never suspends.
    pub async fn acquire(&self) {
        if self.rate_limit <= 0 {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = state.admissions.front() {
                    if now.saturating_duration_since(oldest) >= WINDOW {
                        state.admissions.pop_front();
                    } else {
                        break;
                    }
                }
                if (state.admissions.len() as i64) < self.rate_limit {
                    state.admissions.push_back(now);
                    return;
                }
                // Bucket full: wait until the oldest admission leaves the
                // window, then re-check (another waiter may win the race).
                let oldest = *state.admissions.front().expect("bucket full implies non-empty");
                WINDOW.saturating_sub(now.saturating_duration_since(oldest))
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Read-only: the number of admissions recorded in the most recent
    /// second (spec.md §4.1 `current_rate()`).
    pub async fn current_rate(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        while let Some(&oldest) = state.admissions.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                state.admissions.pop_front();
            } else {
                break;
            }
        }
        state.admissions.len()
    }
}
