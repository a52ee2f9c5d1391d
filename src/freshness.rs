//! Staleness policy deciding whether a live fetch is needed
//!
//! The market and metadata categories are judged independently so the engine
//! only refetches what is actually missing.

use crate::config::FreshnessConfig;
use crate::core::{is_placeholder, MetadataStatus, TokenId, TokenSnapshot};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Why the market category was judged stale (first matching rule)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStaleness {
    Missing,
    NonPositivePrice,
    CorruptedPrice,
    NoLiquidity,
    NoMarketCap,
    NoVolume,
    NoHolders,
    Expired,
    BondingCurveToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStaleness {
    Missing,
    PlaceholderSymbol,
    PlaceholderName,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FreshnessReport {
    pub market: Option<MarketStaleness>,
    pub metadata: Option<MetadataStaleness>,
}

impl FreshnessReport {
    pub fn needs_fetch(&self) -> bool {
        self.market_stale() || self.metadata_stale()
    }

    pub fn market_stale(&self) -> bool {
        self.market.is_some()
    }

    pub fn metadata_stale(&self) -> bool {
        self.metadata.is_some()
    }
}

pub struct FreshnessEvaluator {
    max_age: Duration,
    min_valid_price: f64,
    bonding_curve_suffixes: Vec<String>,
    holder_check: bool,
}

impl FreshnessEvaluator {
    pub fn new(config: &FreshnessConfig) -> Self {
        Self {
            max_age: Duration::seconds(config.max_price_age_secs as i64),
            min_valid_price: config.min_valid_price,
            bonding_curve_suffixes: config.bonding_curve_suffixes.clone(),
            holder_check: true,
        }
    }

    /// Turn the zero-holder rule off when nothing can supply holder counts,
    /// otherwise every snapshot would stay stale.
    pub fn with_holder_check(mut self, enabled: bool) -> Self {
        self.holder_check = enabled;
        self
    }

    /// Tokens of a bonding-curve launch platform, recognised by mint suffix
    pub fn is_bonding_curve_token(&self, token: &TokenId) -> bool {
        token.has_suffix_in(&self.bonding_curve_suffixes)
    }

    pub fn evaluate(&self, token: &TokenId, snapshot: Option<&TokenSnapshot>, now: DateTime<Utc>) -> FreshnessReport {
        FreshnessReport {
            market: self.market_staleness(token, snapshot, now),
            metadata: Self::metadata_staleness(snapshot),
        }
    }

    fn market_staleness(
        &self,
        token: &TokenId,
        snapshot: Option<&TokenSnapshot>,
        now: DateTime<Utc>,
    ) -> Option<MarketStaleness> {
        let Some(s) = snapshot else {
            return Some(MarketStaleness::Missing);
        };

        if s.price <= 0.0 {
            return Some(MarketStaleness::NonPositivePrice);
        }
        if s.price < self.min_valid_price {
            return Some(MarketStaleness::CorruptedPrice);
        }
        if s.liquidity <= 0.0 {
            return Some(MarketStaleness::NoLiquidity);
        }
        if s.market_cap <= 0.0 {
            return Some(MarketStaleness::NoMarketCap);
        }
        if s.volume_24h <= 0.0 {
            return Some(MarketStaleness::NoVolume);
        }
        if self.holder_check && s.holder_count == 0 {
            return Some(MarketStaleness::NoHolders);
        }
        match s.price_updated_at {
            Some(at) if now - at <= self.max_age => {}
            _ => return Some(MarketStaleness::Expired),
        }
        if self.is_bonding_curve_token(token) {
            return Some(MarketStaleness::BondingCurveToken);
        }
        None
    }

    fn metadata_staleness(snapshot: Option<&TokenSnapshot>) -> Option<MetadataStaleness> {
        let Some(s) = snapshot else {
            return Some(MetadataStaleness::Missing);
        };
        if is_placeholder(&s.symbol) {
            Some(MetadataStaleness::PlaceholderSymbol)
        } else if is_placeholder(&s.name) {
            Some(MetadataStaleness::PlaceholderName)
        } else if s.metadata_status != MetadataStatus::Complete {
            Some(MetadataStaleness::Incomplete)
        } else {
            None
        }
    }
}
