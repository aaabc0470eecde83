//! Abstract market-data feed adapter (spec.md §1, §6).
//!
//! Grounded on the teacher's `MarketDataMsg::BookTick`/`Trade` variants in
//! `messages.rs`; generalized into a pull-based adapter trait so the engine
//! never depends on a concrete exchange's websocket client.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;

use crate::model::event::MarketSample;

/// Which side initiated the last trade, when known (spec.md §6
/// `trade_side?`). Mirrors the teacher's `TakerSide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakerSide {
    Buy,
    Sell,
}

/// One raw sample as pushed by the market-data adapter (spec.md §6):
/// `(timestamp, bid, ask, last_price?, last_qty?, trade_side?)`.
#[derive(Debug, Clone, Copy)]
pub struct RawSample {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last_price: Option<Decimal>,
    pub last_qty: Option<Decimal>,
    pub trade_side: Option<TakerSide>,
}

impl From<RawSample> for MarketSample {
    fn from(raw: RawSample) -> Self {
        MarketSample {
            bid: raw.bid,
            ask: raw.ask,
            last_price: raw.last_price,
            last_qty: raw.last_qty,
        }
    }
}

/// The external collaborator interface the core polls. "The adapter is
/// responsible for reconnect and sequencing; the core treats gaps as
/// missing data, not errors" (spec.md §6) — hence `next()` returns `None`
/// on stream end rather than an error.
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    async fn next(&mut self) -> Option<RawSample>;
}

/// A synthetic random-walk feed for the demo binary and integration tests.
/// Not part of the spec's scope; exists purely so `bin/mm_core.rs` has
/// something to drive the engine with.
pub struct SyntheticFeed {
    mid: Decimal,
    half_spread: Decimal,
    tick_interval: std::time::Duration,
}

impl SyntheticFeed {
    pub fn new(start_mid: Decimal, half_spread: Decimal, tick_interval: std::time::Duration) -> Self {
        Self {
            mid: start_mid,
            half_spread,
            tick_interval,
        }
    }
}

#[async_trait]
impl MarketDataAdapter for SyntheticFeed {
    async fn next(&mut self) -> Option<RawSample> {
        tokio::time::sleep(self.tick_interval).await;
        let drift: f64 = rand::thread_rng().gen_range(-0.001..0.001);
        let factor = Decimal::try_from(1.0 + drift).unwrap_or(Decimal::ONE);
        self.mid *= factor;
        Some(RawSample {
            bid: self.mid - self.half_spread,
            ask: self.mid + self.half_spread,
            last_price: Some(self.mid),
            last_qty: Some(Decimal::ONE),
            trade_side: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn synthetic_feed_produces_samples_around_start_mid() {
        let mut feed = SyntheticFeed::new(dec!(50000), dec!(1), std::time::Duration::from_millis(1));
        let sample = feed.next().await.unwrap();
        assert!(sample.bid < sample.ask);
    }
}
