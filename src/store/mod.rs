//! Persistence collaborators of the aggregation engine
//!
//! - `SnapshotStore` - latest merged state per token (upsert by token)
//! - `HistoryLedger` - append-only price/liquidity samples
//! - `ProtectionSource` - read-only protection configuration per token+wallet
//! - `RiskSignalSource` - read-only upstream rule/model risk signals
//!
//! Only the engine writes snapshots and history; everything else is read.

pub mod memory;
pub mod sqlite;

use crate::core::{HistorySample, ProtectionRecord, RiskRecord, RiskSignals, TokenSnapshot, VelocityRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_snapshot(&self, token: &str) -> Result<Option<TokenSnapshot>, StoreError>;

    /// Insert or replace the snapshot row for `snapshot.token`
    async fn upsert_snapshot(&self, snapshot: &TokenSnapshot) -> Result<(), StoreError>;

    /// Best-effort cache of derived metrics next to the snapshot. Never
    /// authoritative; recomputed on every request.
    async fn cache_derived(
        &self,
        token: &str,
        velocity: &VelocityRecord,
        risk: &RiskRecord,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait HistoryLedger: Send + Sync {
    async fn append_sample(&self, sample: &HistorySample) -> Result<(), StoreError>;

    /// Samples for `token` recorded at or after `since`, newest first
    async fn recent_samples(
        &self,
        token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistorySample>, StoreError>;
}

#[async_trait]
pub trait ProtectionSource: Send + Sync {
    async fn protection(&self, token: &str, wallet: &str) -> Result<Option<ProtectionRecord>, StoreError>;
}

#[async_trait]
pub trait RiskSignalSource: Send + Sync {
    async fn risk_signals(&self, token: &str) -> Result<Option<RiskSignals>, StoreError>;
}

/// The four collaborators as handed to the engine
#[derive(Clone)]
pub struct Stores {
    pub snapshots: Arc<dyn SnapshotStore>,
    pub history: Arc<dyn HistoryLedger>,
    pub protection: Arc<dyn ProtectionSource>,
    pub risk: Arc<dyn RiskSignalSource>,
}

impl Stores {
    /// Every role served by one backend
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: SnapshotStore + HistoryLedger + ProtectionSource + RiskSignalSource + 'static,
    {
        Self {
            snapshots: backend.clone(),
            history: backend.clone(),
            protection: backend.clone(),
            risk: backend,
        }
    }
}
