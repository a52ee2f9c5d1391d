use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Values providers hand back when they don't actually know a token's name
const PLACEHOLDER_LABELS: &[&str] = &["unknown", "unknown token", "n/a", "na", "none", "null", "???", "-"];

/// True for symbols/names that carry no information
pub fn is_placeholder(label: &str) -> bool {
    let trimmed = label.trim();
    trimmed.is_empty()
        || PLACEHOLDER_LABELS
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataStatus {
    #[default]
    Pending,
    Complete,
}

impl MetadataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataStatus::Pending => "pending",
            MetadataStatus::Complete => "complete",
        }
    }
}

impl FromStr for MetadataStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MetadataStatus::Pending),
            "complete" => Ok(MetadataStatus::Complete),
            other => Err(format!("unknown metadata status: {}", other)),
        }
    }
}

/// Latest merged state for one token across the market and metadata categories.
///
/// Numeric fields are never optional; zero means "unknown" so downstream
/// arithmetic stays total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSnapshot {
    pub token: String,
    pub price: f64,
    pub liquidity: f64,
    pub market_cap: f64,
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
    pub holder_count: u64,
    #[serde(rename = "priceChange24h")]
    pub price_change_24h: f64,
    pub symbol: String,
    pub name: String,
    pub logo_uri: String,
    pub metadata_status: MetadataStatus,
    pub price_updated_at: Option<DateTime<Utc>>,
    pub metadata_updated_at: Option<DateTime<Utc>>,
}

impl TokenSnapshot {
    /// All-zero snapshot used when the store has never seen this token
    pub fn empty(token: &str) -> Self {
        Self {
            token: token.to_string(),
            price: 0.0,
            liquidity: 0.0,
            market_cap: 0.0,
            volume_24h: 0.0,
            holder_count: 0,
            price_change_24h: 0.0,
            symbol: String::new(),
            name: String::new(),
            logo_uri: String::new(),
            metadata_status: MetadataStatus::Pending,
            price_updated_at: None,
            metadata_updated_at: None,
        }
    }

    /// Recompute `metadata_status` from the current symbol and name
    pub fn refresh_metadata_status(&mut self) {
        self.metadata_status = if !is_placeholder(&self.symbol) && !is_placeholder(&self.name) {
            MetadataStatus::Complete
        } else {
            MetadataStatus::Pending
        };
    }

    /// Most recent update across both categories
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        match (self.price_updated_at, self.metadata_updated_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// One point of the per-token price/liquidity time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    pub token: String,
    pub price: f64,
    pub liquidity: f64,
    pub market_cap: f64,
    pub recorded_at: DateTime<Utc>,
    pub source: String,
}

/// Percentage change over the 1m/5m/30m horizons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VelocityRecord {
    pub token: String,
    pub price_velocity_1m: f64,
    pub price_velocity_5m: f64,
    pub price_velocity_30m: f64,
    pub liquidity_velocity_1m: f64,
    pub liquidity_velocity_5m: f64,
    pub liquidity_velocity_30m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a probability-like score in [0, 1]
    pub fn from_probability(p: f64) -> Self {
        if p >= 0.8 {
            RiskLevel::Critical
        } else if p >= 0.6 {
            RiskLevel::High
        } else if p >= 0.4 {
            RiskLevel::Moderate
        } else if p >= 0.2 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    /// Bucket a 0-100 score
    pub fn from_score(score: f64) -> Self {
        Self::from_probability(score / 100.0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MINIMAL" => Ok(RiskLevel::Minimal),
            "LOW" => Ok(RiskLevel::Low),
            "MODERATE" => Ok(RiskLevel::Moderate),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// Signals produced upstream of this engine: a rule-based score and the
/// opaque model output. Any of them may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RiskSignals {
    pub rule_risk_score: Option<f64>,
    pub ml_probability: Option<f64>,
    pub ml_confidence: Option<f64>,
    pub ml_time_to_rug_secs: Option<u64>,
    #[serde(default)]
    pub top_risk_factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRecord {
    pub token: String,
    pub rule_risk_score: f64,
    pub rule_risk_level: RiskLevel,
    pub ml_probability: Option<f64>,
    pub ml_confidence: Option<f64>,
    pub ml_time_to_rug_secs: Option<u64>,
    pub top_risk_factors: Vec<String>,
    pub hybrid_risk_score: f64,
    pub hybrid_risk_level: RiskLevel,
}

/// Per token+wallet monitoring configuration, owned by the protection service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionRecord {
    pub token: String,
    pub wallet: String,
    pub monitoring_active: bool,
    pub mempool_monitoring_enabled: bool,
    pub risk_threshold: RiskLevel,
    pub alerts_count: u32,
    pub trigger_count: u32,
    pub last_threat_detected_at: Option<DateTime<Utc>>,
}

/// What a response exposes about protection state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionFlags {
    pub monitored: bool,
    pub mempool_monitoring: bool,
    pub risk_threshold: Option<RiskLevel>,
}

impl From<&ProtectionRecord> for ProtectionFlags {
    fn from(record: &ProtectionRecord) -> Self {
        Self {
            monitored: record.monitoring_active,
            mempool_monitoring: record.monitoring_active && record.mempool_monitoring_enabled,
            risk_threshold: Some(record.risk_threshold),
        }
    }
}

/// Assembled answer to "what is the state of token X for wallet W right now"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    pub snapshot: TokenSnapshot,
    pub velocity: VelocityRecord,
    pub risk: RiskRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection: Option<ProtectionFlags>,
    /// A live fetch improved at least one category during this request
    pub refreshed: bool,
    /// The live fetch was skipped by the rate limiter
    pub throttled: bool,
    pub updated_at: DateTime<Utc>,
}

impl TokenState {
    pub fn token(&self) -> &str {
        &self.snapshot.token
    }

    /// Names of numeric fields holding NaN or infinity
    pub fn non_finite_fields(&self) -> Vec<&'static str> {
        let s = &self.snapshot;
        let v = &self.velocity;
        let r = &self.risk;
        let mut checks = vec![
            ("price", s.price),
            ("liquidity", s.liquidity),
            ("marketCap", s.market_cap),
            ("volume24h", s.volume_24h),
            ("priceChange24h", s.price_change_24h),
            ("priceVelocity1m", v.price_velocity_1m),
            ("priceVelocity5m", v.price_velocity_5m),
            ("priceVelocity30m", v.price_velocity_30m),
            ("liquidityVelocity1m", v.liquidity_velocity_1m),
            ("liquidityVelocity5m", v.liquidity_velocity_5m),
            ("liquidityVelocity30m", v.liquidity_velocity_30m),
            ("ruleRiskScore", r.rule_risk_score),
            ("hybridRiskScore", r.hybrid_risk_score),
        ];
        if let Some(p) = r.ml_probability {
            checks.push(("mlProbability", p));
        }
        if let Some(c) = r.ml_confidence {
            checks.push(("mlConfidence", c));
        }
        checks
            .into_iter()
            .filter(|(_, value)| !value.is_finite())
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_labels() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("  "));
        assert!(is_placeholder("UNKNOWN"));
        assert!(is_placeholder("Unknown Token"));
        assert!(!is_placeholder("BONK"));
    }

    #[test]
    fn test_metadata_status_needs_both_labels() {
        let mut snap = TokenSnapshot::empty("mint");
        snap.symbol = "BONK".to_string();
        snap.refresh_metadata_status();
        assert_eq!(snap.metadata_status, MetadataStatus::Pending);

        snap.name = "Bonk".to_string();
        snap.refresh_metadata_status();
        assert_eq!(snap.metadata_status, MetadataStatus::Complete);

        snap.name = "unknown".to_string();
        snap.refresh_metadata_status();
        assert_eq!(snap.metadata_status, MetadataStatus::Pending);
    }

    #[test]
    fn test_risk_level_buckets() {
        assert_eq!(RiskLevel::from_probability(0.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_probability(0.79), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.4), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_probability(0.2), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.19), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_score(74.0), RiskLevel::High);
        assert_eq!("critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snap = TokenSnapshot::empty("mint");
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("marketCap").is_some());
        assert!(json.get("volume24h").is_some());
        assert!(json.get("priceChange24h").is_some());
        assert_eq!(json["metadataStatus"], "pending");
    }

    #[test]
    fn test_protection_flags_require_active_monitoring() {
        let record = ProtectionRecord {
            token: "mint".to_string(),
            wallet: "wallet".to_string(),
            monitoring_active: false,
            mempool_monitoring_enabled: true,
            risk_threshold: RiskLevel::High,
            alerts_count: 0,
            trigger_count: 0,
            last_threat_detected_at: None,
        };
        let flags = ProtectionFlags::from(&record);
        assert!(!flags.monitored);
        assert!(!flags.mempool_monitoring);
        assert_eq!(flags.risk_threshold, Some(RiskLevel::High));
    }
}
