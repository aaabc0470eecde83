//! Literal scenario S6 (spec.md §8): with `rate_limit=10`, 15 concurrent
//! admission requests submitted at the same instant must admit the first 10
//! immediately and the 11th no earlier than 1.0s after the first, with
//! `current_rate()` never exceeding 10 in any sliding window.

use std::time::Duration;

use mm_core::ratelimit::{RateLimiter, RateLimiterConfig};

#[tokio::test(start_paused = true)]
async fn fifteen_concurrent_requests_admit_ten_immediately_then_throttle() {
    let limiter = std::sync::Arc::new(RateLimiter::new(RateLimiterConfig { rate_limit: 10 }));
    let start = tokio::time::Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..15 {
        let limiter = limiter.clone();
        tasks.push(tokio::spawn(async move {
            limiter.acquire().await;
            tokio::time::Instant::now()
        }));
    }

    // Let the first wave of admissions settle without advancing the clock.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_millis(1_100)).await;

    let mut completions: Vec<Duration> = Vec::new();
    for t in tasks {
        let at = t.await.unwrap();
        completions.push(at.saturating_duration_since(start));
    }
    completions.sort();

    for elapsed in completions.iter().take(10) {
        assert!(*elapsed < Duration::from_millis(50), "first 10 must admit ~immediately, got {elapsed:?}");
    }
    assert!(
        completions[10] >= Duration::from_millis(1_000),
        "11th admission must wait at least 1.0s after the first, got {:?}",
        completions[10]
    );
}

#[tokio::test(start_paused = true)]
async fn current_rate_never_exceeds_limit_under_sustained_load() {
    let limiter = RateLimiter::new(RateLimiterConfig { rate_limit: 10 });
    for _ in 0..50 {
        limiter.acquire().await;
        assert!(limiter.current_rate().await <= 10);
        tokio::time::advance(Duration::from_millis(30)).await;
    }
}

#[tokio::test]
async fn zero_rate_limit_means_unlimited() {
    let limiter = RateLimiter::new(RateLimiterConfig { rate_limit: 0 });
    let start = std::time::Instant::now();
    for _ in 0..1_000 {
        limiter.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(200));
}
