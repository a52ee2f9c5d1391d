//! Non-regressing merge of fetched quotes into a snapshot
//!
//! A fetched field only replaces the stored one when it is meaningfully
//! present: finite and non-zero for numbers, non-placeholder for labels.
use crate::core::{is_placeholder, HistorySample, TokenSnapshot};
use crate::providers::{MarketQuote, MetadataQuote};
use chrono::{DateTime, Utc};

fn present(value: f64) -> Option<f64> {
    (value.is_finite() && value != 0.0).then_some(value)
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Returns true when any field changed
pub fn merge_market(snapshot: &mut TokenSnapshot, quote: &MarketQuote, now: DateTime<Utc>) -> bool {
    let before = snapshot.clone();

    if let Some(price) = positive(quote.price) {
        snapshot.price = price;
    }
    if let Some(liquidity) = positive(quote.liquidity) {
        snapshot.liquidity = liquidity;
    }
    if let Some(market_cap) = positive(quote.market_cap) {
        snapshot.market_cap = market_cap;
    }
    if let Some(volume) = positive(quote.volume_24h) {
        snapshot.volume_24h = volume;
    }
    // Change can legitimately be negative
    if let Some(change) = present(quote.price_change_24h) {
        snapshot.price_change_24h = change;
    }
    if let Some(holders) = quote.holder_count.filter(|h| *h > 0) {
        snapshot.holder_count = holders;
    }

    let changed = *snapshot != before;
    if positive(quote.price).is_some() {
        snapshot.price_updated_at = Some(now);
    }
    changed
}

pub fn merge_metadata(snapshot: &mut TokenSnapshot, quote: &MetadataQuote, now: DateTime<Utc>) -> bool {
    let before = snapshot.clone();

    if !is_placeholder(&quote.symbol) {
        snapshot.symbol = quote.symbol.trim().to_string();
    }
    if !is_placeholder(&quote.name) {
        snapshot.name = quote.name.trim().to_string();
    }
    if let Some(logo) = quote.logo_uri.as_deref().filter(|l| !l.trim().is_empty()) {
        snapshot.logo_uri = logo.to_string();
    }
    if let Some(holders) = quote.holder_count.filter(|h| *h > 0) {
        snapshot.holder_count = holders;
    }
    snapshot.refresh_metadata_status();

    let changed = *snapshot != before;
    if quote.is_adequate() {
        snapshot.metadata_updated_at = Some(now);
    }
    changed
}

/// Holder counts arrive on their own; zero is "not reported"
pub fn merge_holders(snapshot: &mut TokenSnapshot, holders: u64) -> bool {
    if holders == 0 || snapshot.holder_count == holders {
        return false;
    }
    snapshot.holder_count = holders;
    true
}

/// A ledger sample for the merged snapshot, unless it carries no market signal
pub fn history_sample(snapshot: &TokenSnapshot, source: &str, now: DateTime<Utc>) -> Option<HistorySample> {
    if snapshot.price <= 0.0 && snapshot.liquidity <= 0.0 {
        return None;
    }
    Some(HistorySample {
        token: snapshot.token.clone(),
        price: snapshot.price,
        liquidity: snapshot.liquidity,
        market_cap: snapshot.market_cap,
        recorded_at: now,
        source: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MetadataStatus;

    fn populated() -> TokenSnapshot {
        let mut s = TokenSnapshot::empty("mint");
        s.price = 0.5;
        s.liquidity = 10_000.0;
        s.market_cap = 500_000.0;
        s.volume_24h = 7_000.0;
        s.holder_count = 321;
        s.price_change_24h = -4.0;
        s.symbol = "RAD".to_string();
        s.name = "Radar".to_string();
        s.logo_uri = "https://cdn.example/rad.png".to_string();
        s.refresh_metadata_status();
        s
    }

    #[test]
    fn test_zero_quote_leaves_snapshot_unchanged() {
        let mut snap = populated();
        let original = snap.clone();
        let changed = merge_market(&mut snap, &MarketQuote::default(), Utc::now());
        assert!(!changed);
        assert_eq!(snap, original);

        let changed = merge_metadata(&mut snap, &MetadataQuote::default(), Utc::now());
        assert!(!changed);
        assert_eq!(snap, original);
    }

    #[test]
    fn test_partial_quote_overwrites_only_present_fields() {
        let mut snap = populated();
        let quote = MarketQuote {
            price: 0.75,
            liquidity: f64::NAN,
            price_change_24h: 12.0,
            source: "jupiter",
            ..MarketQuote::default()
        };
        let now = Utc::now();
        assert!(merge_market(&mut snap, &quote, now));
        assert_eq!(snap.price, 0.75);
        assert_eq!(snap.liquidity, 10_000.0);
        assert_eq!(snap.market_cap, 500_000.0);
        assert_eq!(snap.price_change_24h, 12.0);
        assert_eq!(snap.price_updated_at, Some(now));
    }

    #[test]
    fn test_metadata_completes_status() {
        let mut snap = TokenSnapshot::empty("mint");
        let quote = MetadataQuote {
            symbol: " RAD ".to_string(),
            name: "Radar".to_string(),
            logo_uri: Some(String::new()),
            holder_count: Some(42),
            source: "helius",
        };
        assert!(merge_metadata(&mut snap, &quote, Utc::now()));
        assert_eq!(snap.symbol, "RAD");
        assert_eq!(snap.metadata_status, MetadataStatus::Complete);
        assert_eq!(snap.logo_uri, "");
        assert_eq!(snap.holder_count, 42);
    }

    #[test]
    fn test_holders_never_regress_to_zero() {
        let mut snap = populated();
        assert!(!merge_holders(&mut snap, 0));
        assert_eq!(snap.holder_count, 321);
        assert!(!merge_holders(&mut snap, 321));
        assert!(merge_holders(&mut snap, 400));
        assert_eq!(snap.holder_count, 400);
    }

    #[test]
    fn test_history_sample_requires_market_signal() {
        let now = Utc::now();
        assert!(history_sample(&TokenSnapshot::empty("mint"), "dexscreener", now).is_none());

        let mut liquid_only = TokenSnapshot::empty("mint");
        liquid_only.liquidity = 10.0;
        let sample = history_sample(&liquid_only, "pumpfun", now).unwrap();
        assert_eq!(sample.recorded_at, now);
        assert_eq!(sample.source, "pumpfun");
    }
}
