//! End-to-end literal scenarios S1-S3 (spec.md §8), driven through the real
//! event bus and Order Manager rather than calling strategy internals
//! directly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mm_core::bus::{boxed_handler, EventBus, EventBusConfig};
use mm_core::model::event::{Event, Topic};
use mm_core::model::order::Side;
use mm_core::order_manager::{OrderManager, OrderManagerConfig};
use mm_core::strategy::{StrategyConfig, StrategyEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

struct Harness {
    bus: EventBus,
    order_manager: Arc<OrderManager>,
    strategy: StrategyEngine,
    places: Arc<Mutex<Vec<Event>>>,
    modifies: Arc<Mutex<Vec<Event>>>,
    cancels: Arc<Mutex<Vec<Event>>>,
}

fn make(config: StrategyConfig) -> Harness {
    let bus = EventBus::new(EventBusConfig::default());
    let order_manager = OrderManager::new("BTCUSDT".into(), OrderManagerConfig::default(), bus.clone());
    let strategy = StrategyEngine::new("BTCUSDT".into(), config, order_manager.clone(), bus.clone());

    let places = Arc::new(Mutex::new(Vec::new()));
    let modifies = Arc::new(Mutex::new(Vec::new()));
    let cancels = Arc::new(Mutex::new(Vec::new()));

    let p = places.clone();
    bus.subscribe(
        Topic::PlaceOrder,
        boxed_handler(move |env| {
            let p = p.clone();
            async move {
                p.lock().unwrap().push(env.event);
                Ok(())
            }
        }),
    );
    let m = modifies.clone();
    bus.subscribe(
        Topic::ModifyOrder,
        boxed_handler(move |env| {
            let m = m.clone();
            async move {
                m.lock().unwrap().push(env.event);
                Ok(())
            }
        }),
    );
    let c = cancels.clone();
    bus.subscribe(
        Topic::CancelOrder,
        boxed_handler(move |env| {
            let c = c.clone();
            async move {
                c.lock().unwrap().push(env.event);
                Ok(())
            }
        }),
    );

    Harness {
        bus,
        order_manager,
        strategy,
        places,
        modifies,
        cancels,
    }
}

#[tokio::test]
async fn s1_happy_place_emits_two_priced_place_decisions() {
    let h = make(StrategyConfig {
        min_spread: dec!(0.002),
        max_spread: dec!(0.004),
        target_orders_per_side: 1,
        min_order_value: dec!(10000),
        ..Default::default()
    });
    let _workers = h.bus.start();

    h.strategy.on_price_tick(dec!(50000), Uuid::new_v4()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let places = h.places.lock().unwrap();
    assert_eq!(places.len(), 2);
    for event in places.iter() {
        if let Event::PlaceOrder { side, price, qty, .. } = event {
            let expected = match side {
                Side::Bid => dec!(49840),
                Side::Ask => dec!(50160),
            };
            assert_eq!(*price, expected);
            assert!(*qty * *price >= dec!(10000));
        }
    }
}

#[tokio::test]
async fn s2_kept_order_then_modified_on_further_drift() {
    let h = make(StrategyConfig {
        drift_threshold: dec!(0.005),
        modify_threshold: dec!(0.003),
        max_modify_deviation: dec!(0.01),
        min_spread: dec!(0.002),
        max_spread: dec!(0.004),
        target_orders_per_side: 1,
        min_order_value: dec!(10000),
        ..Default::default()
    });
    let _workers = h.bus.start();

    let id = h.order_manager.create(Side::Bid, dec!(49800), dec!(1)).await;
    h.order_manager.apply_ack(id, "R1".into(), true).await.unwrap();

    h.strategy.on_price_tick(dec!(50000), Uuid::new_v4()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.modifies.lock().unwrap().is_empty());
    assert!(h.cancels.lock().unwrap().is_empty());

    h.strategy.on_price_tick(dec!(50300), Uuid::new_v4()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let modifies = h.modifies.lock().unwrap();
    assert_eq!(modifies.len(), 1);
    if let Event::ModifyOrder { new_price, .. } = &modifies[0] {
        assert_eq!(new_price.unwrap(), dec!(50139.040));
    } else {
        panic!("expected ModifyOrder");
    }
}

#[tokio::test]
async fn s3_drift_triggered_cancel_then_place_next_tick() {
    let h = make(StrategyConfig {
        max_modify_deviation: dec!(0.01),
        max_spread: dec!(0.004),
        target_orders_per_side: 1,
        min_order_value: dec!(10000),
        ..Default::default()
    });
    let _workers = h.bus.start();

    let id = h.order_manager.create(Side::Bid, dec!(49000), dec!(1)).await;
    h.order_manager.apply_ack(id, "R1".into(), true).await.unwrap();

    h.strategy.on_price_tick(dec!(50000), Uuid::new_v4()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.cancels.lock().unwrap().len(), 1);
    // The cancelled order is still "live" from the Order Manager's point of
    // view until Execution applies the cancel — simulate that here so the
    // next tick sees an empty book and emits a fresh BID place.
    h.order_manager.request_cancel(id).await.unwrap();
    h.order_manager.apply_terminal(id, mm_core::model::order::OrderState::Cancelled).await.unwrap();

    h.strategy.on_price_tick(dec!(50000), Uuid::new_v4()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let bid_places: Vec<Decimal> = h
        .places
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::PlaceOrder { side: Side::Bid, price, .. } => Some(*price),
            _ => None,
        })
        .collect();
    assert!(bid_places.iter().any(|p| *p == dec!(49840)));
}
