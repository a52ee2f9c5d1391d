//! Jupiter price API v3: price-only fallback
use super::{send_json, MarketQuote, PriceProvider};
use crate::core::TokenId;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

const PROVIDER: &str = "jupiter";

pub struct JupiterPriceProvider {
    client: Client,
    price_url: String,
}

impl JupiterPriceProvider {
    pub fn new(client: Client, price_url: &str) -> Self {
        Self {
            client,
            price_url: price_url.trim_end_matches('/').to_string(),
        }
    }
}

/// V3 format: `{ "<mint>": { "usdPrice": 147.47, "priceChange24h": 1.2 } }`
pub fn quote_from_response(data: &Value, mint: &str) -> Result<MarketQuote, ProviderError> {
    let entry = data
        .get(mint)
        .and_then(Value::as_object)
        .ok_or(ProviderError::Empty { provider: PROVIDER })?;

    let price = entry
        .get("usdPrice")
        .and_then(Value::as_f64)
        .ok_or_else(|| ProviderError::Parse {
            provider: PROVIDER,
            message: format!("usdPrice missing for {}", mint),
        })?;

    Ok(MarketQuote {
        price,
        price_change_24h: entry.get("priceChange24h").and_then(Value::as_f64).unwrap_or(0.0),
        source: PROVIDER,
        ..MarketQuote::default()
    })
}

#[async_trait]
impl PriceProvider for JupiterPriceProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch_market(&self, token: &TokenId) -> Result<MarketQuote, ProviderError> {
        let request = self
            .client
            .get(&self.price_url)
            .query(&[("ids", token.as_str())]);
        let data: Value = send_json(PROVIDER, request).await?;
        quote_from_response(&data, token.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOL: &str = "So11111111111111111111111111111111111111112";

    #[test]
    fn test_parses_usd_price() {
        let data: Value = serde_json::from_str(
            r#"{"So11111111111111111111111111111111111111112":{"usdPrice":147.47,"blockId":1,"decimals":9,"priceChange24h":-2.5}}"#,
        )
        .unwrap();
        let quote = quote_from_response(&data, SOL).unwrap();
        assert_eq!(quote.price, 147.47);
        assert_eq!(quote.price_change_24h, -2.5);
        assert_eq!(quote.liquidity, 0.0);
        assert_eq!(quote.source, "jupiter");
    }

    #[test]
    fn test_missing_mint_is_empty() {
        let data: Value = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            quote_from_response(&data, SOL),
            Err(ProviderError::Empty { .. })
        ));
    }

    #[test]
    fn test_missing_price_is_parse_error() {
        let data: Value =
            serde_json::from_str(r#"{"So11111111111111111111111111111111111111112":{"decimals":9}}"#).unwrap();
        assert!(matches!(
            quote_from_response(&data, SOL),
            Err(ProviderError::Parse { .. })
        ));
    }
}
