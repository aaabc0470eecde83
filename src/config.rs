//! Top-level configuration surface (spec.md §6) and validation.
//!
//! Grounded on the teacher's `CoordinatorConfig`/`OfiConfig`/`InventoryConfig`
//! `Default` + `from_env()` pattern (SPEC_FULL.md §10.3). Each component
//! owns its own config struct; `EngineConfig` aggregates them and validates
//! the cross-field invariants no single component can check alone.

use crate::bus::EventBusConfig;
use crate::error::MmError;
use crate::execution::ExecutionConfig;
use crate::order_manager::OrderManagerConfig;
use crate::price_engine::PriceEngineConfig;
use crate::risk::RiskConfig;
use crate::strategy::StrategyConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub bus: EventBusConfig,
    pub strategy: StrategyConfig,
    pub order_manager: OrderManagerConfig,
    pub price_engine: PriceEngineConfig,
    pub execution: ExecutionConfig,
    pub risk: RiskConfig,
}

impl EngineConfig {
    /// Builds the config from recognized environment variables, matching
    /// `Settings::from_env` in the teacher's `main.rs` — unrecognized keys
    /// are simply never read (spec.md §6: "No on-disk persisted state, no
    /// CLI surface... all other keys rejected").
    pub fn from_env(symbol: impl Into<String>) -> Result<Self, MmError> {
        let cfg = Self {
            symbol: symbol.into(),
            bus: EventBusConfig::from_env(),
            strategy: StrategyConfig::from_env(),
            order_manager: OrderManagerConfig::from_env(),
            price_engine: PriceEngineConfig::from_env(),
            execution: ExecutionConfig::from_env(),
            risk: RiskConfig::from_env(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), MmError> {
        if self.symbol.trim().is_empty() {
            return Err(MmError::InvalidConfig("symbol must not be empty".into()));
        }
        if self.strategy.min_spread >= self.strategy.max_spread {
            return Err(MmError::InvalidConfig("min_spread must be < max_spread".into()));
        }
        if self.strategy.drift_threshold >= self.strategy.max_modify_deviation {
            return Err(MmError::InvalidConfig(
                "drift_threshold must be < max_modify_deviation".into(),
            ));
        }
        if self.strategy.modify_threshold >= self.strategy.drift_threshold {
            return Err(MmError::InvalidConfig(
                "modify_threshold must be < drift_threshold".into(),
            ));
        }
        if self.strategy.target_orders_per_side == 0 {
            return Err(MmError::InvalidConfig("target_orders_per_side must be > 0".into()));
        }
        if self.strategy.min_order_value <= rust_decimal::Decimal::ZERO {
            return Err(MmError::InvalidConfig("min_order_value must be > 0".into()));
        }
        if self.execution.worker_count == 0 {
            return Err(MmError::InvalidConfig("execution.worker_count must be > 0".into()));
        }
        if self.risk.max_position <= rust_decimal::Decimal::ZERO {
            return Err(MmError::InvalidConfig("risk.max_position must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base() -> EngineConfig {
        EngineConfig {
            symbol: "BTCUSDT".into(),
            bus: EventBusConfig::default(),
            strategy: StrategyConfig::default(),
            order_manager: OrderManagerConfig::default(),
            price_engine: PriceEngineConfig::default(),
            execution: ExecutionConfig::default(),
            risk: RiskConfig::default(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_empty_symbol() {
        let mut cfg = base();
        cfg.symbol = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_spread_bounds() {
        let mut cfg = base();
        cfg.strategy.min_spread = dec!(0.01);
        cfg.strategy.max_spread = dec!(0.001);
        assert!(cfg.validate().is_err());
    }
}
