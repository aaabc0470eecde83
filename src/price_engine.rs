//! Reference-Price Engine (C4): rolling TWAP/VWAP/hybrid estimator
//! (spec.md §4.4).
//!
//! Grounded on the teacher's `OfiEngine`'s fixed-size ring-buffer sample
//! accumulation (`VecDeque` bounded by a window, `ofi.rs`), generalized from
//! order-flow imbalance to a price estimator per spec.md §4.4.

use std::collections::VecDeque;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::bus::EventBus;
use crate::model::event::{Event, MarketSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceMethod {
    Twap,
    Vwap,
    Hybrid,
}

#[derive(Debug, Clone, Copy)]
pub struct PriceEngineConfig {
    pub method: PriceMethod,
    pub window_size: usize,
    /// Exponential smoothing applied on top of the method result; `1.0`
    /// (default) disables smoothing and passes the raw estimate through.
    pub smoothing_factor: f64,
    /// Reserved for downstream consumers deciding whether a tick's
    /// `change_from_prev` is significant enough to act on (spec.md §6).
    pub change_threshold: f64,
    /// Samples whose relative price change exceeds this are treated as
    /// feed anomalies and dropped rather than folded into the estimator.
    pub anomaly_threshold: f64,
    pub base_confidence: f64,
}

impl Default for PriceEngineConfig {
    fn default() -> Self {
        Self {
            method: PriceMethod::Hybrid,
            window_size: 20,
            smoothing_factor: 1.0,
            change_threshold: 0.0005,
            anomaly_threshold: 0.2,
            base_confidence: 0.95,
        }
    }
}

impl PriceEngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MM_PRICE_METHOD") {
            cfg.method = match v.to_uppercase().as_str() {
                "TWAP" => PriceMethod::Twap,
                "VWAP" => PriceMethod::Vwap,
                _ => PriceMethod::Hybrid,
            };
        }
        if let Ok(v) = std::env::var("MM_PRICE_WINDOW_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.window_size = n;
            }
        }
        if let Ok(v) = std::env::var("MM_PRICE_SMOOTHING_FACTOR") {
            if let Ok(n) = v.parse() {
                cfg.smoothing_factor = n;
            }
        }
        if let Ok(v) = std::env::var("MM_PRICE_CHANGE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.change_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("MM_PRICE_ANOMALY_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.anomaly_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("MM_PRICE_BASE_CONFIDENCE") {
            if let Ok(n) = v.parse() {
                cfg.base_confidence = n;
            }
        }
        cfg
    }
}

struct Trade {
    price: Decimal,
    qty: Decimal,
}

pub struct ReferencePriceEngine {
    config: PriceEngineConfig,
    bus: EventBus,
    mid_window: VecDeque<Decimal>,
    trade_window: VecDeque<Trade>,
    prev_reference: Option<Decimal>,
    smoothed: Option<f64>,
}

impl ReferencePriceEngine {
    pub fn new(config: PriceEngineConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            mid_window: VecDeque::with_capacity(config.window_size.max(1)),
            trade_window: VecDeque::with_capacity(config.window_size.max(1)),
            prev_reference: None,
            smoothed: None,
        }
    }

    /// Folds one market sample into the rolling estimator and emits a
    /// `PriceTick` (spec.md §4.4: "emits a new PriceTick for every input
    /// sample"), unless the sample looks like a feed anomaly.
    pub async fn on_sample(&mut self, sample: MarketSample) {
        let mid = sample.mid();

        if let Some(prev) = self.prev_reference {
            if !prev.is_zero() {
                let change = ((mid - prev) / prev).abs();
                if change > Decimal::try_from(self.config.anomaly_threshold).unwrap_or(Decimal::MAX) {
                    warn!(%mid, %prev, "dropping anomalous price sample");
                    return;
                }
            }
        }

        self.push_mid(mid);
        if let (Some(price), Some(qty)) = (sample.last_price, sample.last_qty) {
            self.push_trade(price, qty);
        }

        let raw = self.estimate(mid);
        let reference_price = self.apply_smoothing(raw);

        let change_from_prev = match self.prev_reference {
            Some(prev) if !prev.is_zero() => (reference_price - prev) / prev,
            _ => Decimal::ZERO,
        };
        let confidence = self.confidence();
        self.prev_reference = Some(reference_price);

        self.bus
            .publish(Event::PriceTick {
                reference_price,
                change_from_prev,
                confidence,
            })
            .await;
    }

    fn push_mid(&mut self, mid: Decimal) {
        if self.mid_window.len() == self.config.window_size.max(1) {
            self.mid_window.pop_front();
        }
        self.mid_window.push_back(mid);
    }

    fn push_trade(&mut self, price: Decimal, qty: Decimal) {
        if self.trade_window.len() == self.config.window_size.max(1) {
            self.trade_window.pop_front();
        }
        self.trade_window.push_back(Trade { price, qty });
    }

    fn twap(&self) -> Decimal {
        if self.mid_window.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = self.mid_window.iter().copied().sum();
        sum / Decimal::from(self.mid_window.len())
    }

    fn vwap(&self, fallback_mid: Decimal) -> Decimal {
        let vol_sum: Decimal = self.trade_window.iter().map(|t| t.qty).sum();
        if vol_sum.is_zero() {
            return fallback_mid;
        }
        let notional: Decimal = self.trade_window.iter().map(|t| t.price * t.qty).sum();
        notional / vol_sum
    }

    fn estimate(&self, current_mid: Decimal) -> Decimal {
        match self.config.method {
            PriceMethod::Twap => self.twap(),
            PriceMethod::Vwap => self.vwap(current_mid),
            PriceMethod::Hybrid => {
                Decimal::new(6, 1) * self.twap() + Decimal::new(4, 1) * self.vwap(current_mid)
            }
        }
    }

    fn apply_smoothing(&mut self, raw: Decimal) -> Decimal {
        if self.config.smoothing_factor >= 1.0 {
            return raw;
        }
        let raw_f: f64 = raw.to_f64().unwrap_or(0.0);
        let alpha = self.config.smoothing_factor.clamp(0.0, 1.0);
        let smoothed = match self.smoothed {
            Some(prev) => alpha * raw_f + (1.0 - alpha) * prev,
            None => raw_f,
        };
        self.smoothed = Some(smoothed);
        Decimal::try_from(smoothed).unwrap_or(raw)
    }

    /// `confidence` defaults to `base_confidence` and is reduced
    /// proportionally while the window is still filling (spec.md §4.4).
    fn confidence(&self) -> f64 {
        let window = self.config.window_size.max(1) as f64;
        let filled = self.mid_window.len() as f64;
        self.config.base_confidence * (filled / window).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusConfig;
    use crate::model::event::Topic;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn sample(bid: Decimal, ask: Decimal) -> MarketSample {
        MarketSample {
            bid,
            ask,
            last_price: None,
            last_qty: None,
        }
    }

    #[tokio::test]
    async fn first_tick_has_zero_change_from_prev() {
        let bus = EventBus::new(EventBusConfig::default());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        bus.subscribe(
            Topic::PriceTick,
            crate::bus::boxed_handler(move |env| {
                let seen2 = seen2.clone();
                async move {
                    if let Event::PriceTick { change_from_prev, .. } = env.event {
                        *seen2.lock().unwrap() = Some(change_from_prev);
                    }
                    Ok(())
                }
            }),
        );
        let _handles = bus.start();
        let mut engine = ReferencePriceEngine::new(
            PriceEngineConfig {
                method: PriceMethod::Twap,
                ..Default::default()
            },
            bus,
        );
        engine.on_sample(sample(dec!(100), dec!(100))).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*seen.lock().unwrap(), Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn vwap_falls_back_to_mid_with_no_trades() {
        let bus = EventBus::new(EventBusConfig::default());
        let mut engine = ReferencePriceEngine::new(
            PriceEngineConfig {
                method: PriceMethod::Vwap,
                ..Default::default()
            },
            bus,
        );
        engine.on_sample(sample(dec!(99), dec!(101))).await;
        assert_eq!(engine.vwap(dec!(100)), dec!(100));
    }

    #[test]
    fn confidence_scales_with_buffer_fill() {
        let bus = EventBus::new(EventBusConfig::default());
        let engine = ReferencePriceEngine::new(
            PriceEngineConfig {
                window_size: 10,
                base_confidence: 0.95,
                ..Default::default()
            },
            bus,
        );
        assert_eq!(engine.confidence(), 0.0);
    }

    #[test]
    fn anomaly_threshold_field_is_respected_by_default_config() {
        assert!(PriceEngineConfig::default().anomaly_threshold > 0.0);
    }
}
