use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, instrument, warn};

use token_radar::config::{config_path, RadarConfig, StorageBackend};
use token_radar::engine::AggregationEngine;
use token_radar::providers::{build_chains, build_holder_source, http_client};
use token_radar::realtime::{RealtimeGateway, RealtimeHub};
use token_radar::store::{MemoryStore, SqliteStore, Stores};
use token_radar::telemetry::init_tracing;
use token_radar::transport::UpdateBus;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const FETCH_MARK_MAX_AGE_MINUTES: i64 = 5;

struct ServiceOrchestrator {
    config: RadarConfig,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl ServiceOrchestrator {
    fn new(config: RadarConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            config,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    fn open_stores(&self) -> Result<Stores> {
        match self.config.storage.backend {
            StorageBackend::Memory => {
                warn!("Using in-memory storage, snapshots will not survive a restart");
                Ok(Stores::from_backend(Arc::new(MemoryStore::new())))
            }
            StorageBackend::Sqlite => {
                let path = &self.config.storage.sqlite_path;
                let store = SqliteStore::open(path)
                    .with_context(|| format!("Failed to open SQLite store at {}", path))?;
                info!(path = %path, "💾 SQLite store opened");
                Ok(Stores::from_backend(Arc::new(store)))
            }
        }
    }

    #[instrument(skip(self))]
    async fn start_all_services(&mut self) -> Result<()> {
        info!("🚀 Starting token radar services");

        let stores = self.open_stores()?;
        let client = http_client(self.config.providers.timeout()).context("Failed to build HTTP client")?;
        let (market, metadata) = build_chains(&self.config, client.clone());

        let bus = UpdateBus::new(self.config.server.update_bus_capacity);
        let mut engine = AggregationEngine::new(&self.config, stores, market, metadata).with_update_bus(bus.clone());
        if let Some(holders) = build_holder_source(&self.config, client) {
            engine = engine.with_holder_source(holders);
        }
        let engine = Arc::new(engine);
        let hub = Arc::new(RealtimeHub::new(self.config.server.subscriber_buffer));

        // Hub fan-out
        let hub_updates = bus.subscribe();
        let hub_shutdown = self.shutdown_tx.subscribe();
        let fanout_hub = hub.clone();
        let hub_task = tokio::spawn(async move {
            fanout_hub.run(hub_updates, hub_shutdown).await;
            Ok(())
        });
        self.tasks.push(("realtime hub", hub_task));

        // Websocket gateway
        let gateway = RealtimeGateway::new(hub.clone(), self.config.server.bind_address.clone()).with_engine(engine.clone());
        let gateway_shutdown = self.shutdown_tx.subscribe();
        let gateway_task = tokio::spawn(async move {
            let result = gateway.run(gateway_shutdown).await;
            if let Err(e) = &result {
                error!("Realtime gateway error: {}", e);
            }
            result
        });
        self.tasks.push(("realtime gateway", gateway_task));

        // Housekeeping: prune idle limiter keys and report counters
        let mut housekeeping_shutdown = self.shutdown_tx.subscribe();
        let housekeeping_engine = engine.clone();
        let housekeeping_hub = hub.clone();
        let housekeeping_task = tokio::spawn(async move {
            let mut ticker = interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        housekeeping_engine.rate_limiter().prune();
                        let marks = housekeeping_engine.prune_fetch_marks(chrono::Duration::minutes(FETCH_MARK_MAX_AGE_MINUTES));
                        debug!(marks, "Pruned fetch marks");
                        let stats = housekeeping_engine.stats();
                        let hub_stats = housekeeping_hub.stats();
                        info!(
                            requests = stats.requests,
                            live_fetches = stats.live_fetches,
                            coalesced = stats.coalesced,
                            throttled = stats.throttled,
                            persistence_failures = stats.persistence_failures,
                            subscriptions = hub_stats.subscriptions,
                            delivered = hub_stats.delivered,
                            dropped = hub_stats.dropped,
                            "📊 Radar stats"
                        );
                    }
                    _ = housekeeping_shutdown.recv() => {
                        debug!("Housekeeping stopped");
                        return Ok(());
                    }
                }
            }
        });
        self.tasks.push(("housekeeping", housekeeping_task));

        info!("✅ All {} services started successfully", self.tasks.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shutdown_all(&mut self) -> Result<()> {
        info!("🛑 Shutting down all services");
        let _ = self.shutdown_tx.send(());

        for (name, task) in self.tasks.drain(..) {
            match task.await {
                Ok(Ok(())) => info!("✅ {} shut down cleanly", name),
                Ok(Err(e)) => warn!("⚠️  {} error during shutdown: {}", name, e),
                Err(e) => error!("❌ {} task failed: {}", name, e),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path(std::env::args().nth(1));
    let config = RadarConfig::load(path.as_deref()).context("Failed to load configuration")?;
    let _guard = init_tracing(&config.logging)?;

    info!("📡 Token Radar - risk and liquidity aggregation");
    match &path {
        Some(path) => info!("📋 Configuration loaded from {}", path.display()),
        None => info!("📋 No configuration file given, using defaults"),
    }
    info!(bind = %config.server.bind_address, backend = ?config.storage.backend, "Configuration loaded");

    let mut orchestrator = ServiceOrchestrator::new(config);
    if let Err(e) = orchestrator.start_all_services().await {
        error!("Failed to start services: {}", e);
        orchestrator.shutdown_all().await?;
        return Err(e);
    }
    info!("Press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    orchestrator.shutdown_all().await?;
    info!("👋 Token radar shutdown complete");
    Ok(())
}
