//! Literal scenario S5 (spec.md §8): a position breach trips the emergency
//! stop, driven end-to-end through the public Risk Controller API rather
//! than its private per-rule check methods.

use std::time::Duration;

use mm_core::bus::{boxed_handler, EventBus, EventBusConfig};
use mm_core::model::event::Topic;
use mm_core::model::order::Side;
use mm_core::order_manager::{OrderManager, OrderManagerConfig};
use mm_core::risk::{RiskConfig, RiskController};
use rust_decimal_macros::dec;

#[tokio::test]
async fn s5_position_breach_triggers_emergency_stop_and_cancel_all() {
    let bus = EventBus::new(EventBusConfig::default());
    let order_manager = OrderManager::new("BTCUSDT".into(), OrderManagerConfig::default(), bus.clone());
    let risk = RiskController::new(
        RiskConfig {
            max_position: dec!(2),
            check_interval: Duration::from_millis(20),
            ..RiskConfig::default()
        },
        order_manager.clone(),
        bus.clone(),
    );

    let cancel_all_seen = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let seen = cancel_all_seen.clone();
    bus.subscribe(
        Topic::CancelAllOrders,
        boxed_handler(move |_env| {
            let seen = seen.clone();
            async move {
                seen.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    risk.subscribe();
    let _workers = bus.start();
    tokio::spawn(risk.clone().run_periodic_checks());

    let a = order_manager.create(Side::Bid, dec!(100), dec!(1.0)).await;
    order_manager.apply_ack(a, "R1".into(), true).await.unwrap();
    order_manager.apply_fill("R1", dec!(1.0), None).await.unwrap();

    let b = order_manager.create(Side::Bid, dec!(100), dec!(1.1)).await;
    order_manager.apply_ack(b, "R2".into(), true).await.unwrap();
    order_manager.apply_fill("R2", dec!(1.1), None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(risk.position(), dec!(2.1));
    assert!(risk.is_emergency_stopped());
    assert!(cancel_all_seen.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn healthy_position_never_trips_emergency_stop() {
    let bus = EventBus::new(EventBusConfig::default());
    let order_manager = OrderManager::new("BTCUSDT".into(), OrderManagerConfig::default(), bus.clone());
    let risk = RiskController::new(
        RiskConfig {
            max_position: dec!(2),
            check_interval: Duration::from_millis(20),
            ..RiskConfig::default()
        },
        order_manager.clone(),
        bus.clone(),
    );
    risk.subscribe();
    let _workers = bus.start();
    tokio::spawn(risk.clone().run_periodic_checks());

    let a = order_manager.create(Side::Bid, dec!(100), dec!(0.5)).await;
    order_manager.apply_ack(a, "R1".into(), true).await.unwrap();
    order_manager.apply_fill("R1", dec!(0.5), None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(!risk.is_emergency_stopped());
}
