//! SQLite backend for snapshots, history, protection and risk signals
//!
//! Tables:
//! - `token_snapshots` - UPSERT on token, plus best-effort derived-metric cache columns
//! - `token_history` - INSERT only, read newest first
//! - `token_protection` - written by the protection service, read here
//! - `token_risk_signals` - written by the upstream risk pipeline, read here

use super::{HistoryLedger, ProtectionSource, RiskSignalSource, SnapshotStore};
use crate::core::{
    HistorySample, MetadataStatus, ProtectionRecord, RiskLevel, RiskRecord, RiskSignals, TokenSnapshot,
    VelocityRecord,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS token_snapshots (
    token               TEXT PRIMARY KEY,
    price               REAL NOT NULL DEFAULT 0,
    liquidity           REAL NOT NULL DEFAULT 0,
    market_cap          REAL NOT NULL DEFAULT 0,
    volume_24h          REAL NOT NULL DEFAULT 0,
    holder_count        INTEGER NOT NULL DEFAULT 0,
    price_change_24h    REAL NOT NULL DEFAULT 0,
    symbol              TEXT NOT NULL DEFAULT '',
    name                TEXT NOT NULL DEFAULT '',
    logo_uri            TEXT NOT NULL DEFAULT '',
    metadata_status     TEXT NOT NULL DEFAULT 'pending',
    price_updated_at    INTEGER,
    metadata_updated_at INTEGER,
    velocity_json       TEXT,
    hybrid_risk_score   REAL,
    hybrid_risk_level   TEXT,
    derived_at          INTEGER
);

CREATE TABLE IF NOT EXISTS token_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    token       TEXT NOT NULL,
    price       REAL NOT NULL,
    liquidity   REAL NOT NULL,
    market_cap  REAL NOT NULL,
    recorded_at INTEGER NOT NULL,
    source      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_token_history_token_time
    ON token_history (token, recorded_at DESC);

CREATE TABLE IF NOT EXISTS token_protection (
    token                      TEXT NOT NULL,
    wallet                     TEXT NOT NULL,
    monitoring_active          INTEGER NOT NULL DEFAULT 0,
    mempool_monitoring_enabled INTEGER NOT NULL DEFAULT 0,
    risk_threshold             TEXT NOT NULL DEFAULT 'HIGH',
    alerts_count               INTEGER NOT NULL DEFAULT 0,
    trigger_count              INTEGER NOT NULL DEFAULT 0,
    last_threat_detected_at    INTEGER,
    PRIMARY KEY (token, wallet)
);

CREATE TABLE IF NOT EXISTS token_risk_signals (
    token               TEXT PRIMARY KEY,
    rule_risk_score     REAL,
    ml_probability      REAL,
    ml_confidence       REAL,
    ml_time_to_rug_secs INTEGER,
    top_risk_factors    TEXT NOT NULL DEFAULT '[]',
    updated_at          INTEGER
);
"#;

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Rejected(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!("📊 Opened SQLite store at {} (WAL)", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Write a protection row. Used by the protection service and tests.
    pub fn put_protection(&self, record: &ProtectionRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO token_protection (
                token, wallet, monitoring_active, mempool_monitoring_enabled,
                risk_threshold, alerts_count, trigger_count, last_threat_detected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(token, wallet) DO UPDATE SET
                monitoring_active = excluded.monitoring_active,
                mempool_monitoring_enabled = excluded.mempool_monitoring_enabled,
                risk_threshold = excluded.risk_threshold,
                alerts_count = excluded.alerts_count,
                trigger_count = excluded.trigger_count,
                last_threat_detected_at = excluded.last_threat_detected_at",
            params![
                record.token,
                record.wallet,
                record.monitoring_active,
                record.mempool_monitoring_enabled,
                record.risk_threshold.as_str(),
                record.alerts_count,
                record.trigger_count,
                record.last_threat_detected_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    /// Write upstream risk signals. Used by the risk pipeline and tests.
    pub fn put_risk_signals(&self, token: &str, signals: &RiskSignals) -> Result<(), StoreError> {
        let factors = serde_json::to_string(&signals.top_risk_factors)?;
        self.conn()?.execute(
            "INSERT INTO token_risk_signals (
                token, rule_risk_score, ml_probability, ml_confidence,
                ml_time_to_rug_secs, top_risk_factors, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(token) DO UPDATE SET
                rule_risk_score = excluded.rule_risk_score,
                ml_probability = excluded.ml_probability,
                ml_confidence = excluded.ml_confidence,
                ml_time_to_rug_secs = excluded.ml_time_to_rug_secs,
                top_risk_factors = excluded.top_risk_factors,
                updated_at = excluded.updated_at",
            params![
                token,
                signals.rule_risk_score,
                signals.ml_probability,
                signals.ml_confidence,
                signals.ml_time_to_rug_secs.map(|s| s as i64),
                factors,
                to_millis(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Read back the cached hybrid score; `None` until the first aggregation
    pub fn cached_hybrid_score(&self, token: &str) -> Result<Option<f64>, StoreError> {
        let score = self
            .conn()?
            .query_row(
                "SELECT hybrid_risk_score FROM token_snapshots WHERE token = ?1",
                params![token],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?;
        Ok(score.flatten())
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn load_snapshot(&self, token: &str) -> Result<Option<TokenSnapshot>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT token, price, liquidity, market_cap, volume_24h, holder_count,
                        price_change_24h, symbol, name, logo_uri, metadata_status,
                        price_updated_at, metadata_updated_at
                 FROM token_snapshots WHERE token = ?1",
                params![token],
                |row| {
                    Ok((
                        TokenSnapshot {
                            token: row.get(0)?,
                            price: row.get(1)?,
                            liquidity: row.get(2)?,
                            market_cap: row.get(3)?,
                            volume_24h: row.get(4)?,
                            holder_count: row.get::<_, i64>(5)?.max(0) as u64,
                            price_change_24h: row.get(6)?,
                            symbol: row.get(7)?,
                            name: row.get(8)?,
                            logo_uri: row.get(9)?,
                            metadata_status: MetadataStatus::Pending,
                            price_updated_at: row.get::<_, Option<i64>>(11)?.and_then(from_millis),
                            metadata_updated_at: row.get::<_, Option<i64>>(12)?.and_then(from_millis),
                        },
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mut snapshot, status)) => {
                snapshot.metadata_status = status.parse().map_err(StoreError::Corrupt)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn upsert_snapshot(&self, s: &TokenSnapshot) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO token_snapshots (
                token, price, liquidity, market_cap, volume_24h, holder_count,
                price_change_24h, symbol, name, logo_uri, metadata_status,
                price_updated_at, metadata_updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(token) DO UPDATE SET
                price = excluded.price,
                liquidity = excluded.liquidity,
                market_cap = excluded.market_cap,
                volume_24h = excluded.volume_24h,
                holder_count = excluded.holder_count,
                price_change_24h = excluded.price_change_24h,
                symbol = excluded.symbol,
                name = excluded.name,
                logo_uri = excluded.logo_uri,
                metadata_status = excluded.metadata_status,
                price_updated_at = excluded.price_updated_at,
                metadata_updated_at = excluded.metadata_updated_at",
            params![
                s.token,
                s.price,
                s.liquidity,
                s.market_cap,
                s.volume_24h,
                s.holder_count as i64,
                s.price_change_24h,
                s.symbol,
                s.name,
                s.logo_uri,
                s.metadata_status.as_str(),
                s.price_updated_at.map(to_millis),
                s.metadata_updated_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    async fn cache_derived(
        &self,
        token: &str,
        velocity: &VelocityRecord,
        risk: &RiskRecord,
    ) -> Result<(), StoreError> {
        let velocity_json = serde_json::to_string(velocity)?;
        // Only caches onto an existing row; a token never persisted has nothing to annotate
        self.conn()?.execute(
            "UPDATE token_snapshots
             SET velocity_json = ?2, hybrid_risk_score = ?3, hybrid_risk_level = ?4, derived_at = ?5
             WHERE token = ?1",
            params![
                token,
                velocity_json,
                risk.hybrid_risk_score,
                risk.hybrid_risk_level.as_str(),
                to_millis(Utc::now()),
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl HistoryLedger for SqliteStore {
    async fn append_sample(&self, sample: &HistorySample) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO token_history (token, price, liquidity, market_cap, recorded_at, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample.token,
                sample.price,
                sample.liquidity,
                sample.market_cap,
                to_millis(sample.recorded_at),
                sample.source,
            ],
        )?;
        Ok(())
    }

    async fn recent_samples(
        &self,
        token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistorySample>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT token, price, liquidity, market_cap, recorded_at, source
             FROM token_history
             WHERE token = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at DESC",
        )?;
        let rows = stmt.query_map(params![token, to_millis(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (token, price, liquidity, market_cap, recorded_ms, source) = row?;
            let recorded_at = from_millis(recorded_ms)
                .ok_or_else(|| StoreError::Corrupt(format!("bad recorded_at {}", recorded_ms)))?;
            samples.push(HistorySample {
                token,
                price,
                liquidity,
                market_cap,
                recorded_at,
                source,
            });
        }
        Ok(samples)
    }
}

#[async_trait]
impl ProtectionSource for SqliteStore {
    async fn protection(&self, token: &str, wallet: &str) -> Result<Option<ProtectionRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT monitoring_active, mempool_monitoring_enabled, risk_threshold,
                        alerts_count, trigger_count, last_threat_detected_at
                 FROM token_protection WHERE token = ?1 AND wallet = ?2",
                params![token, wallet],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((active, mempool, threshold, alerts, triggers, last_threat)) = row else {
            return Ok(None);
        };
        let risk_threshold: RiskLevel = threshold.parse().map_err(StoreError::Corrupt)?;
        Ok(Some(ProtectionRecord {
            token: token.to_string(),
            wallet: wallet.to_string(),
            monitoring_active: active,
            mempool_monitoring_enabled: mempool,
            risk_threshold,
            alerts_count: alerts,
            trigger_count: triggers,
            last_threat_detected_at: last_threat.and_then(from_millis),
        }))
    }
}

#[async_trait]
impl RiskSignalSource for SqliteStore {
    async fn risk_signals(&self, token: &str) -> Result<Option<RiskSignals>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT rule_risk_score, ml_probability, ml_confidence, ml_time_to_rug_secs, top_risk_factors
                 FROM token_risk_signals WHERE token = ?1",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((rule, probability, confidence, time_to_rug, factors)) = row else {
            return Ok(None);
        };
        Ok(Some(RiskSignals {
            rule_risk_score: rule,
            ml_probability: probability,
            ml_confidence: confidence,
            ml_time_to_rug_secs: time_to_rug.map(|s| s.max(0) as u64),
            top_risk_factors: serde_json::from_str(&factors)?,
        }))
    }
}
