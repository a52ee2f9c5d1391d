//! DexScreener pair aggregator: market data, fallback metadata and pool TVL
use super::{parse_decimal, send_json, MarketQuote, MetadataProvider, MetadataQuote, PoolLiquiditySource, PriceProvider};
use crate::core::{is_placeholder, TokenId};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const PROVIDER: &str = "dexscreener";

#[derive(Debug, Clone, Deserialize)]
pub struct PairsResponse {
    #[serde(default)]
    pub pairs: Option<Vec<TokenPair>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub pair_address: String,
    pub base_token: PairToken,
    pub price_usd: Option<String>,
    pub liquidity: Option<PairLiquidity>,
    pub volume: Option<PairVolume>,
    pub price_change: Option<PairPriceChange>,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    pub info: Option<PairInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairToken {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairLiquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairVolume {
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairPriceChange {
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub image_url: Option<String>,
}

impl TokenPair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity
            .as_ref()
            .and_then(|l| l.usd)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }
}

/// A token can trade in many pools; the deepest one where it is the base token wins
pub fn deepest_pair<'a>(pairs: &'a [TokenPair], mint: &str) -> Option<&'a TokenPair> {
    let as_base: Vec<&TokenPair> = pairs.iter().filter(|p| p.base_token.address == mint).collect();
    let candidates: Vec<&TokenPair> = if as_base.is_empty() {
        pairs.iter().collect()
    } else {
        as_base
    };
    candidates
        .into_iter()
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}

pub fn market_quote_from_pair(pair: &TokenPair) -> MarketQuote {
    MarketQuote {
        price: parse_decimal(pair.price_usd.as_deref()),
        liquidity: pair.liquidity_usd(),
        market_cap: pair.market_cap.or(pair.fdv).unwrap_or(0.0),
        volume_24h: pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
        price_change_24h: pair.price_change.as_ref().and_then(|c| c.h24).unwrap_or(0.0),
        holder_count: None,
        source: PROVIDER,
    }
}

pub fn metadata_quote_from_pair(pair: &TokenPair) -> MetadataQuote {
    MetadataQuote {
        symbol: pair.base_token.symbol.trim().to_string(),
        name: pair.base_token.name.trim().to_string(),
        logo_uri: pair
            .info
            .as_ref()
            .and_then(|i| i.image_url.clone())
            .filter(|u| !u.is_empty()),
        holder_count: None,
        source: PROVIDER,
    }
}

pub struct DexScreenerProvider {
    client: Client,
    base_url: String,
}

impl DexScreenerProvider {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_pairs(&self, url: String) -> Result<Vec<TokenPair>, ProviderError> {
        debug!("🌐 Fetching pairs from DexScreener: {}", url);
        let response: PairsResponse = send_json(PROVIDER, self.client.get(&url)).await?;
        match response.pairs {
            Some(pairs) if !pairs.is_empty() => Ok(pairs),
            _ => Err(ProviderError::Empty { provider: PROVIDER }),
        }
    }

    pub async fn token_pairs(&self, token: &TokenId) -> Result<Vec<TokenPair>, ProviderError> {
        self.fetch_pairs(format!("{}/latest/dex/tokens/{}", self.base_url, token))
            .await
    }
}

#[async_trait]
impl PriceProvider for DexScreenerProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch_market(&self, token: &TokenId) -> Result<MarketQuote, ProviderError> {
        let pairs = self.token_pairs(token).await?;
        let pair = deepest_pair(&pairs, token.as_str()).ok_or(ProviderError::Empty { provider: PROVIDER })?;
        debug!(
            token = %token,
            pair = %pair.pair_address,
            liquidity = pair.liquidity_usd(),
            candidates = pairs.len(),
            "Selected deepest DexScreener pair"
        );
        Ok(market_quote_from_pair(pair))
    }
}

#[async_trait]
impl MetadataProvider for DexScreenerProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch_metadata(&self, token: &TokenId) -> Result<MetadataQuote, ProviderError> {
        let pairs = self.token_pairs(token).await?;
        // Only pairs where the token is the base carry its own name
        pairs
            .iter()
            .filter(|p| p.base_token.address == token.as_str())
            .filter(|p| !is_placeholder(&p.base_token.symbol))
            .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
            .map(metadata_quote_from_pair)
            .ok_or(ProviderError::Empty { provider: PROVIDER })
    }
}

#[async_trait]
impl PoolLiquiditySource for DexScreenerProvider {
    async fn pool_liquidity(&self, pool_address: &str) -> Result<f64, ProviderError> {
        let pairs = self
            .fetch_pairs(format!("{}/latest/dex/pairs/solana/{}", self.base_url, pool_address))
            .await?;
        pairs
            .iter()
            .find(|p| p.pair_address == pool_address)
            .or_else(|| pairs.first())
            .map(|p| p.liquidity_usd())
            .filter(|tvl| *tvl > 0.0)
            .ok_or(ProviderError::Empty { provider: PROVIDER })
    }
}
