//! Full-pipeline smoke test: a finite feed drives `Engine::run` end-to-end
//! through C1-C7, exercising periodic reset (S4) and a general liveness
//! check of the wired system.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mm_core::config::EngineConfig;
use mm_core::feed::{MarketDataAdapter, RawSample};
use mm_core::transport::MockTransport;
use mm_core::Engine;
use rust_decimal_macros::dec;

struct FiniteFeed {
    remaining: usize,
    mid: rust_decimal::Decimal,
}

#[async_trait]
impl MarketDataAdapter for FiniteFeed {
    async fn next(&mut self) -> Option<RawSample> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        Some(RawSample {
            bid: self.mid - dec!(1),
            ask: self.mid + dec!(1),
            last_price: Some(self.mid),
            last_qty: Some(dec!(1)),
            trade_side: None,
        })
    }
}

#[tokio::test]
async fn engine_runs_to_feed_end_and_places_resting_orders() {
    let config = EngineConfig::from_env("BTCUSDT").expect("default config is valid");
    let transport = Arc::new(MockTransport::new());
    let engine = Engine::new(config, transport);

    let feed = Box::new(FiniteFeed {
        remaining: 30,
        mid: dec!(50000),
    });

    engine.run(feed).await;

    let live = engine.order_manager.query_live(None);
    assert!(!live.is_empty(), "engine should have resting orders after processing ticks");
    assert!(live.iter().any(|o| o.side == mm_core::model::order::Side::Bid));
    assert!(live.iter().any(|o| o.side == mm_core::model::order::Side::Ask));

    engine.stop().await;
}

#[tokio::test]
async fn s4_periodic_reset_marks_live_orders_pending_cancel() {
    let mut config = EngineConfig::from_env("BTCUSDT").expect("default config is valid");
    config.order_manager.reset_interval = Duration::from_millis(30);
    let transport = Arc::new(MockTransport::new());
    let engine = Engine::new(config, transport);

    let feed = Box::new(FiniteFeed {
        remaining: 60,
        mid: dec!(50000),
    });

    let engine_for_run = engine.clone();
    let run_handle = tokio::spawn(async move {
        engine_for_run.run(feed).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let live_before = engine.order_manager.query_live(None);
    assert!(!live_before.is_empty(), "engine should have resting orders before the reset fires");

    // past `reset_interval`: the background reset timer should have marked
    // every order captured above as no longer live (PENDING_CANCEL).
    tokio::time::sleep(Duration::from_millis(60)).await;

    let stats = engine.order_manager.reset_stats();
    assert!(stats.last_reset_time.is_some());
    for order in &live_before {
        let current = engine.order_manager.get(order.local_id).expect("order still tracked");
        assert!(!current.is_live(), "order {} should no longer be live after periodic reset", order.local_id);
    }

    run_handle.abort();
    engine.stop().await;
}
