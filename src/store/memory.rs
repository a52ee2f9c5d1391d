use super::{HistoryLedger, ProtectionSource, RiskSignalSource, SnapshotStore};
use crate::core::{HistorySample, ProtectionRecord, RiskRecord, RiskSignals, TokenSnapshot, VelocityRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// In-process store for tests and the `memory` backend.
///
/// History per token is kept in insertion order; lookups sort newest first.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: DashMap<String, TokenSnapshot>,
    derived: DashMap<String, (VelocityRecord, RiskRecord)>,
    history: DashMap<String, Vec<HistorySample>>,
    protection: DashMap<(String, String), ProtectionRecord>,
    risk_signals: DashMap<String, RiskSignals>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed protection configuration (normally owned by another service)
    pub fn put_protection(&self, record: ProtectionRecord) {
        self.protection
            .insert((record.token.clone(), record.wallet.clone()), record);
    }

    /// Seed upstream risk signals
    pub fn put_risk_signals(&self, token: &str, signals: RiskSignals) {
        self.risk_signals.insert(token.to_string(), signals);
    }

    pub fn history_len(&self, token: &str) -> usize {
        self.history.get(token).map(|h| h.len()).unwrap_or(0)
    }

    pub fn cached_derived(&self, token: &str) -> Option<(VelocityRecord, RiskRecord)> {
        self.derived.get(token).map(|d| d.value().clone())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_snapshot(&self, token: &str) -> Result<Option<TokenSnapshot>, StoreError> {
        Ok(self.snapshots.get(token).map(|s| s.value().clone()))
    }

    async fn upsert_snapshot(&self, snapshot: &TokenSnapshot) -> Result<(), StoreError> {
        self.snapshots.insert(snapshot.token.clone(), snapshot.clone());
        Ok(())
    }

    async fn cache_derived(
        &self,
        token: &str,
        velocity: &VelocityRecord,
        risk: &RiskRecord,
    ) -> Result<(), StoreError> {
        self.derived
            .insert(token.to_string(), (velocity.clone(), risk.clone()));
        Ok(())
    }
}

#[async_trait]
impl HistoryLedger for MemoryStore {
    async fn append_sample(&self, sample: &HistorySample) -> Result<(), StoreError> {
        self.history
            .entry(sample.token.clone())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn recent_samples(
        &self,
        token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistorySample>, StoreError> {
        let mut samples: Vec<HistorySample> = self
            .history
            .get(token)
            .map(|h| h.iter().filter(|s| s.recorded_at >= since).cloned().collect())
            .unwrap_or_default();
        samples.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(samples)
    }
}

#[async_trait]
impl ProtectionSource for MemoryStore {
    async fn protection(&self, token: &str, wallet: &str) -> Result<Option<ProtectionRecord>, StoreError> {
        Ok(self
            .protection
            .get(&(token.to_string(), wallet.to_string()))
            .map(|p| p.value().clone()))
    }
}

#[async_trait]
impl RiskSignalSource for MemoryStore {
    async fn risk_signals(&self, token: &str) -> Result<Option<RiskSignals>, StoreError> {
        Ok(self.risk_signals.get(token).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(token: &str, price: f64, at: DateTime<Utc>) -> HistorySample {
        HistorySample {
            token: token.to_string(),
            price,
            liquidity: 1_000.0,
            market_cap: 10_000.0,
            recorded_at: at,
            source: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_recent_samples_newest_first_and_cut_off() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.append_sample(&sample("a", 1.0, now - Duration::seconds(600))).await.unwrap();
        store.append_sample(&sample("a", 3.0, now)).await.unwrap();
        store.append_sample(&sample("a", 2.0, now - Duration::seconds(60))).await.unwrap();
        store.append_sample(&sample("b", 9.0, now)).await.unwrap();

        let recent = store
            .recent_samples("a", now - Duration::seconds(120))
            .await
            .unwrap();
        let prices: Vec<f64> = recent.iter().map(|s| s.price).collect();
        assert_eq!(prices, vec![3.0, 2.0]);
        assert_eq!(store.history_len("a"), 3);
    }

    #[tokio::test]
    async fn test_snapshot_upsert_replaces() {
        let store = MemoryStore::new();
        let mut snap = TokenSnapshot::empty("a");
        store.upsert_snapshot(&snap).await.unwrap();
        snap.price = 2.5;
        store.upsert_snapshot(&snap).await.unwrap();

        let loaded = store.load_snapshot("a").await.unwrap().unwrap();
        assert_eq!(loaded.price, 2.5);
        assert!(store.load_snapshot("missing").await.unwrap().is_none());
    }
}
