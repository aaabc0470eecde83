//! Top-level wiring: the `Engine` assembles C1-C7 into the pipeline
//! spec.md §2 describes and owns their lifecycle.
//!
//! Grounded on the teacher's `main.rs`, which constructs each actor, wires
//! their channels, and `tokio::spawn`s the resulting futures.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::{boxed_handler, EventBus};
use crate::config::EngineConfig;
use crate::execution::ExecutionEngine;
use crate::feed::MarketDataAdapter;
use crate::model::event::{Event, Topic};
use crate::order_manager::OrderManager;
use crate::price_engine::ReferencePriceEngine;
use crate::risk::RiskController;
use crate::strategy::StrategyEngine;
use crate::transport::ExchangeTransport;

pub struct Engine {
    pub bus: EventBus,
    pub order_manager: Arc<OrderManager>,
    pub execution: Arc<ExecutionEngine>,
    pub risk: Arc<RiskController>,
    strategy: Arc<StrategyEngine>,
    price_engine: Arc<Mutex<ReferencePriceEngine>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig, transport: Arc<dyn ExchangeTransport>) -> Arc<Self> {
        let bus = EventBus::new(config.bus);
        let order_manager = OrderManager::new(config.symbol.clone(), config.order_manager, bus.clone());
        let execution = ExecutionEngine::new(
            config.symbol.clone(),
            config.execution,
            order_manager.clone(),
            transport,
            bus.clone(),
        );
        let risk = RiskController::new(config.risk, order_manager.clone(), bus.clone());
        let strategy = Arc::new(StrategyEngine::new(
            config.symbol.clone(),
            config.strategy,
            order_manager.clone(),
            bus.clone(),
        ));
        let price_engine = Arc::new(Mutex::new(ReferencePriceEngine::new(config.price_engine, bus.clone())));

        Arc::new(Self {
            bus,
            order_manager,
            execution,
            risk,
            strategy,
            price_engine,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Wires cross-component subscriptions and spawns every background
    /// task: bus workers, the Order Manager's reset/archival timers, the
    /// Execution Engine's queue workers, and the Risk Controller's periodic
    /// check. Then drives `feed` into the Reference-Price Engine until the
    /// feed ends.
    pub async fn run(self: &Arc<Self>, mut feed: Box<dyn MarketDataAdapter>) {
        self.wire_subscriptions();

        let mut handles = self.bus.start();
        handles.extend(self.execution.spawn_workers());
        handles.push(tokio::spawn(self.execution.clone().run_event_listener()));
        self.execution.subscribe();
        self.risk.subscribe();

        {
            let om = self.order_manager.clone();
            handles.push(tokio::spawn(om.clone().run_periodic_reset()));
            handles.push(tokio::spawn(om.run_archival_purge()));
        }
        {
            let risk = self.risk.clone();
            handles.push(tokio::spawn(risk.run_periodic_checks()));
        }
        *self.handles.lock().await = handles;

        info!(symbol = %self.order_manager.symbol(), "engine started");

        while let Some(raw) = feed.next().await {
            self.price_engine.lock().await.on_sample(raw.into()).await;
        }

        info!("market data feed ended, engine idling");
    }

    fn wire_subscriptions(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(
            Topic::PriceTick,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::PriceTick { reference_price, .. } = env.event {
                        this.strategy.on_price_tick(reference_price, env.correlation_id).await;
                    }
                    Ok(())
                }
            }),
        );

        let order_manager = self.order_manager.clone();
        self.bus.subscribe(
            Topic::CancelAllOrders,
            boxed_handler(move |_env| {
                let order_manager = order_manager.clone();
                async move {
                    order_manager.cancel_all().await;
                    Ok(())
                }
            }),
        );
    }

    pub async fn stop(&self) {
        self.bus.stop().await;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}
