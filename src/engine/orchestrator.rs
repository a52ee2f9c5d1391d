//! Per-request aggregation flow
//!
//! LOAD_SNAPSHOT -> EVALUATE_FRESHNESS -> [FETCH_LIVE] -> MERGE -> PERSIST
//! -> COMPUTE_DERIVED -> RESPOND
//!
//! Everything up to PERSIST runs inside the token's critical section so two
//! stale requests for one token never fetch twice or interleave writes. A
//! request that waited on the lock while another one fetched serves that
//! result, even for tokens the freshness policy always treats as stale.

use super::locks::TokenLocks;
use super::merge::{history_sample, merge_holders, merge_market, merge_metadata};
use super::rate_limit::FetchRateLimiter;
use super::stats::{EngineStats, EngineStatsSnapshot};
use crate::config::RadarConfig;
use crate::core::{ProtectionFlags, TokenId, TokenSnapshot, TokenState, WalletId};
use crate::error::EngineError;
use crate::freshness::{FreshnessEvaluator, MarketStaleness};
use crate::metrics::{RiskCalculator, VelocityCalculator};
use crate::providers::{HolderSource, MarketChain, MetadataChain};
use crate::store::Stores;
use crate::transport::{TokenUpdate, UpdateBus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of the locked part of a request
struct Refresh {
    snapshot: TokenSnapshot,
    refreshed: bool,
    throttled: bool,
}

pub struct AggregationEngine {
    stores: Stores,
    freshness: FreshnessEvaluator,
    market: MarketChain,
    metadata: MetadataChain,
    holders: Option<Arc<dyn HolderSource>>,
    holder_timeout: Duration,
    velocity: VelocityCalculator,
    risk: RiskCalculator,
    limiter: FetchRateLimiter,
    locks: TokenLocks,
    /// When each token's last live fetch finished
    fetched_at: DashMap<String, DateTime<Utc>>,
    bus: Option<UpdateBus>,
    stats: EngineStats,
}

impl AggregationEngine {
    pub fn new(config: &RadarConfig, stores: Stores, market: MarketChain, metadata: MetadataChain) -> Self {
        info!(
            market_providers = ?market.provider_names(),
            metadata_providers = ?metadata.provider_names(),
            "🚀 Aggregation engine initialized"
        );
        Self {
            stores,
            // zero holders only counts as stale once a holder source is attached
            freshness: FreshnessEvaluator::new(&config.freshness).with_holder_check(false),
            market,
            metadata,
            holders: None,
            holder_timeout: config.providers.timeout(),
            velocity: VelocityCalculator::new(&config.velocity),
            risk: RiskCalculator::new(&config.risk),
            limiter: FetchRateLimiter::new(&config.rate_limit),
            locks: TokenLocks::new(),
            fetched_at: DashMap::new(),
            bus: None,
            stats: EngineStats::default(),
        }
    }

    /// Publish every assembled state on `bus`
    pub fn with_update_bus(mut self, bus: UpdateBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: FetchRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Fill in holder counts that the market and metadata chains left at zero
    pub fn with_holder_source(mut self, source: Arc<dyn HolderSource>) -> Self {
        info!(source = source.name(), "👥 Holder counts enabled");
        self.freshness = self.freshness.with_holder_check(true);
        self.holders = Some(source);
        self
    }

    /// Forget fetch marks older than `max_age`. Returns how many were dropped.
    pub fn prune_fetch_marks(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.fetched_at.len();
        self.fetched_at.retain(|_, at| *at >= cutoff);
        before - self.fetched_at.len()
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn rate_limiter(&self) -> &FetchRateLimiter {
        &self.limiter
    }

    fn validate(&self, token: &str, wallet: Option<&str>) -> Result<(TokenId, Option<WalletId>), EngineError> {
        let token = TokenId::parse(token)?;
        let wallet = wallet.map(WalletId::parse).transpose()?;
        Ok((token, wallet))
    }

    /// Current state of one token, refreshed from live providers when stale.
    ///
    /// Only malformed identifiers fail. Provider outages degrade to the stored
    /// snapshot and store failures are logged.
    #[instrument(skip(self), fields(token = %token))]
    pub async fn get_token_state(&self, token: &str, wallet: Option<&str>) -> Result<TokenState, EngineError> {
        EngineStats::incr(&self.stats.requests);
        let (token, wallet) = self.validate(token, wallet).map_err(|e| {
            EngineStats::incr(&self.stats.rejected_inputs);
            warn!(error = %e, "Rejected malformed request");
            e
        })?;
        Ok(self.aggregate(&token, wallet.as_ref()).await)
    }

    /// Batched form of `get_token_state`. Duplicates are collapsed, order of
    /// first appearance is kept, and the tokens are aggregated concurrently.
    #[instrument(skip(self, tokens), fields(count = tokens.len()))]
    pub async fn get_token_states(&self, tokens: &[String], wallet: Option<&str>) -> Result<Vec<TokenState>, EngineError> {
        let wallet = wallet.map(WalletId::parse).transpose().map_err(|e| {
            EngineStats::incr(&self.stats.rejected_inputs);
            e
        })?;

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(tokens.len());
        for raw in tokens {
            let id = TokenId::parse(raw).map_err(|e| {
                EngineStats::incr(&self.stats.rejected_inputs);
                e
            })?;
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }

        for _ in &ids {
            EngineStats::incr(&self.stats.requests);
        }
        let states = join_all(ids.iter().map(|id| self.aggregate(id, wallet.as_ref()))).await;
        Ok(states)
    }

    async fn aggregate(&self, token: &TokenId, wallet: Option<&WalletId>) -> TokenState {
        let now = Utc::now();
        let refresh = self.refresh(token, wallet, now).await;
        let state = self.assemble(token, wallet, refresh, now).await;

        if let Some(bus) = &self.bus {
            bus.publish(TokenUpdate::new(state.clone()));
            EngineStats::incr(&self.stats.updates_published);
        }
        state
    }

    /// LOAD_SNAPSHOT through PERSIST, under the token's lock
    async fn refresh(&self, token: &TokenId, wallet: Option<&WalletId>, now: DateTime<Utc>) -> Refresh {
        let _guard = self.locks.acquire(token.as_str()).await;

        let stored = match self.stores.snapshots.load_snapshot(token.as_str()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Snapshot load failed, treating token as unseen");
                None
            }
        };

        let report = self.freshness.evaluate(token, stored.as_ref(), now);
        let mut snapshot = stored.unwrap_or_else(|| TokenSnapshot::empty(token.as_str()));

        if !report.needs_fetch() {
            EngineStats::incr(&self.stats.skipped_fresh);
            debug!("Snapshot fresh, skipping live fetch");
            return Refresh { snapshot, refreshed: false, throttled: false };
        }

        // Another request fetched while this one waited for the lock
        if self.fetched_at.get(token.as_str()).is_some_and(|at| *at >= now) {
            EngineStats::incr(&self.stats.coalesced);
            debug!(market = ?report.market, "Live fetch finished while waiting, reusing its result");
            return Refresh { snapshot, refreshed: false, throttled: false };
        }

        if !self.limiter.try_acquire(wallet.map(|w| w.as_str()), token.as_str()) {
            EngineStats::incr(&self.stats.throttled);
            info!(market = ?report.market, metadata = ?report.metadata, "⏳ Live fetch throttled, serving stored snapshot");
            return Refresh { snapshot, refreshed: false, throttled: true };
        }

        EngineStats::incr(&self.stats.live_fetches);
        debug!(market = ?report.market, metadata = ?report.metadata, "Snapshot stale, fetching live data");

        let mut market_source = None;
        let mut metadata_fetched = false;
        let mut holders_fetched = false;
        let mut changed = false;

        // Only the holder count is missing: the market chain has nothing to add
        let holders_only = report.market == Some(MarketStaleness::NoHolders);
        if report.market_stale() && !holders_only {
            match self.market.fetch(token).await {
                Some(quote) => {
                    changed |= merge_market(&mut snapshot, &quote, now);
                    market_source = Some(quote.source);
                }
                None => EngineStats::incr(&self.stats.market_exhausted),
            }
        }

        if report.metadata_stale() {
            match self.metadata.fetch(token).await {
                Some(quote) => {
                    changed |= merge_metadata(&mut snapshot, &quote, now);
                    metadata_fetched = true;
                }
                None => EngineStats::incr(&self.stats.metadata_exhausted),
            }
        }

        if report.market_stale() && snapshot.holder_count == 0 {
            if let Some(source) = &self.holders {
                if let Some(holders) = self.fetch_holders(source.as_ref(), token).await {
                    changed |= merge_holders(&mut snapshot, holders);
                    holders_fetched = true;
                }
            }
        }
        self.fetched_at.insert(token.to_string(), Utc::now());

        let refreshed = market_source.is_some() || metadata_fetched || holders_fetched;
        if !refreshed {
            warn!("Live fetch did not improve data, serving stored snapshot");
            return Refresh { snapshot, refreshed, throttled: false };
        }
        EngineStats::incr(&self.stats.refreshed);

        if let Err(e) = self.stores.snapshots.upsert_snapshot(&snapshot).await {
            EngineStats::incr(&self.stats.persistence_failures);
            error!(error = %e, "❌ Failed to persist snapshot, returning in-memory result");
        }

        if let Some(sample) = market_source.and_then(|source| history_sample(&snapshot, source, now)) {
            if let Err(e) = self.stores.history.append_sample(&sample).await {
                EngineStats::incr(&self.stats.persistence_failures);
                error!(error = %e, "❌ Failed to append history sample");
            }
        }

        info!(
            price = snapshot.price,
            liquidity = snapshot.liquidity,
            holders = snapshot.holder_count,
            source = market_source.unwrap_or("-"),
            changed,
            "✅ Snapshot refreshed"
        );
        Refresh { snapshot, refreshed, throttled: false }
    }

    async fn fetch_holders(&self, source: &dyn HolderSource, token: &TokenId) -> Option<u64> {
        match timeout(self.holder_timeout, source.holder_count(token)).await {
            Ok(Ok(holders)) => Some(holders),
            Ok(Err(e)) => {
                EngineStats::incr(&self.stats.holders_unavailable);
                warn!(source = source.name(), error = %e, "⚠️ Holder count unavailable");
                None
            }
            Err(_) => {
                EngineStats::incr(&self.stats.holders_unavailable);
                warn!(source = source.name(), after = ?self.holder_timeout, "⚠️ Holder count lookup timed out");
                None
            }
        }
    }

    /// COMPUTE_DERIVED and RESPOND
    async fn assemble(&self, token: &TokenId, wallet: Option<&WalletId>, refresh: Refresh, now: DateTime<Utc>) -> TokenState {
        let Refresh { snapshot, refreshed, throttled } = refresh;

        let history = self
            .stores
            .history
            .recent_samples(token.as_str(), now - self.velocity.lookback())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "History lookup failed, velocity defaults to zero");
                Vec::new()
            });
        let velocity = self.velocity.compute(&snapshot, &history, now);

        let signals = match self.stores.risk.risk_signals(token.as_str()).await {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "Risk signal lookup failed, using rule-based score only");
                None
            }
        };
        let risk = self.risk.assemble(&snapshot, signals.as_ref());

        if let Err(e) = self.stores.snapshots.cache_derived(token.as_str(), &velocity, &risk).await {
            debug!(error = %e, "Derived metric cache write failed");
        }

        let protection = match wallet {
            Some(wallet) => match self.stores.protection.protection(token.as_str(), wallet.as_str()).await {
                Ok(record) => Some(record.as_ref().map(ProtectionFlags::from).unwrap_or_default()),
                Err(e) => {
                    warn!(error = %e, wallet = %wallet, "Protection lookup failed, omitting flags");
                    None
                }
            },
            None => None,
        };

        TokenState {
            updated_at: snapshot.last_updated_at().unwrap_or(now),
            snapshot,
            velocity,
            risk,
            protection,
            refreshed,
            throttled,
        }
    }
}

/// Encode a state for the wire. Non-finite numbers are refused rather than
/// silently turned into nulls.
pub fn encode_state(state: &TokenState) -> Result<String, EngineError> {
    ensure_finite(state)?;
    serde_json::to_string(state).map_err(|e| EngineError::Serialization(e.to_string()))
}

pub fn ensure_finite(state: &TokenState) -> Result<(), EngineError> {
    let bad = state.non_finite_fields();
    if bad.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Serialization(format!("non-finite values in {}", bad.join(", "))))
    }
}
