//! Engine configuration structures
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RadarConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub freshness: FreshnessConfig,
    pub providers: ProvidersConfig,
    pub bonding_curve: BondingCurveConfig,
    pub velocity: VelocityConfig,
    pub risk: RiskConfig,
    pub rate_limit: RateLimitConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Websocket bind address for the push channel
    pub bind_address: String,
    /// Outbound queue per subscriber; updates beyond this are dropped for that subscriber
    pub subscriber_buffer: usize,
    /// Capacity of the internal update bus
    pub update_bus_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8790".to_string(),
            subscriber_buffer: 256,
            update_bus_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: "data/token_radar.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Age after which the market category is refetched
    pub max_price_age_secs: u64,
    /// Prices below this are treated as corrupted placeholder data
    pub min_valid_price: f64,
    /// Mint suffixes of bonding-curve launch platforms; such tokens are always refetched
    pub bonding_curve_suffixes: Vec<String>,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_price_age_secs: 300,
            min_valid_price: 1e-7,
            bonding_curve_suffixes: vec!["pump".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub dexscreener_base: String,
    pub jupiter_price_url: String,
    pub pumpfun_base: String,
    /// Helius RPC endpoint including the api-key query; metadata lookups are skipped when empty
    pub helius_rpc_url: String,
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            dexscreener_base: "https://api.dexscreener.com".to_string(),
            jupiter_price_url: "https://lite-api.jup.ag/price/v3".to_string(),
            pumpfun_base: "https://frontend-api-v3.pump.fun".to_string(),
            helius_rpc_url: String::new(),
            timeout_secs: 8,
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Heuristic constants for pump.fun style tokens. None of these have a
/// documented derivation; they are kept configurable for calibration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BondingCurveConfig {
    pub migrated_liquidity_ratio: f64,
    pub pre_migration_liquidity_ratio: f64,
    /// Virtual SOL in the curve at launch
    pub virtual_sol_start: f64,
    /// Virtual SOL in the curve at completion
    pub virtual_sol_end: f64,
    pub sol_usd_rate: f64,
    pub total_supply: f64,
}

impl Default for BondingCurveConfig {
    fn default() -> Self {
        Self {
            migrated_liquidity_ratio: 0.30,
            pre_migration_liquidity_ratio: 0.20,
            virtual_sol_start: 30.0,
            virtual_sol_end: 115.0,
            sol_usd_rate: 150.0,
            total_supply: 1_000_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VelocityConfig {
    pub horizon_1m_secs: i64,
    pub horizon_5m_secs: i64,
    pub horizon_30m_secs: i64,
    pub tolerance_secs: i64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            horizon_1m_secs: 60,
            horizon_5m_secs: 300,
            horizon_30m_secs: 1800,
            tolerance_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    pub rule_weight: f64,
    pub model_weight: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            rule_weight: 0.4,
            model_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Live fetches allowed per (subject, token) per minute
    pub fetches_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetches_per_minute: 12,
            burst: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub websocket_url: String,
    /// Up to this many distinct tokens are looked up individually; more go in one batch
    pub coalescing_threshold: usize,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub optimistic_grace_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8780".to_string(),
            websocket_url: "ws://127.0.0.1:8790".to_string(),
            coalescing_threshold: 3,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            optimistic_grace_ms: 5_000,
            request_timeout_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_name: "token-radar.log".to_string(),
        }
    }
}
