//! Demo binary: wires the engine to a [`MockTransport`] and a
//! [`SyntheticFeed`] so the pipeline can be exercised end-to-end without a
//! real exchange connection.
//!
//! Grounded on the teacher's `bin/polymarket_mm.rs`: `tracing-subscriber`
//! setup from `EnvFilter`, `Settings::from_env()` plus `.context(...)` via
//! `anyhow`, then hand the wired actors to the tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mm_core::transport::MockTransport;
use mm_core::{Engine, EngineConfig};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let symbol = std::env::var("MM_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string());
    let config = EngineConfig::from_env(symbol).context("invalid engine configuration")?;

    let transport = Arc::new(MockTransport::new());
    let engine = Engine::new(config, transport);

    let feed = Box::new(mm_core::feed::SyntheticFeed::new(
        dec!(50000),
        dec!(5),
        Duration::from_millis(200),
    ));

    let engine_for_signal = engine.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        engine_for_signal.stop().await;
        std::process::exit(0);
    });

    engine.run(feed).await;
    Ok(())
}
