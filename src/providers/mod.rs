//! External market-data and metadata sources
//!
//! Every source is normalised into a `MarketQuote` or `MetadataQuote` and
//! consulted through an ordered `MarketChain` / `MetadataChain`.

pub mod chain;
pub mod dexscreener;
pub mod helius;
pub mod jupiter;
pub mod pumpfun;

use crate::config::RadarConfig;
use crate::core::{is_placeholder, TokenId};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use chain::{MarketChain, MetadataChain};
pub use dexscreener::DexScreenerProvider;
pub use helius::HeliusMetadataProvider;
pub use jupiter::JupiterPriceProvider;
pub use pumpfun::PumpFunProvider;

/// Canonical market-category fields. Zero means "not reported".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketQuote {
    pub price: f64,
    pub liquidity: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub price_change_24h: f64,
    pub holder_count: Option<u64>,
    pub source: &'static str,
}

impl MarketQuote {
    /// A quote is only accepted when its primary value (price) is present
    pub fn is_adequate(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Canonical metadata-category fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataQuote {
    pub symbol: String,
    pub name: String,
    pub logo_uri: Option<String>,
    pub holder_count: Option<u64>,
    pub source: &'static str,
}

impl MetadataQuote {
    pub fn is_adequate(&self) -> bool {
        !is_placeholder(&self.symbol) && !is_placeholder(&self.name)
    }
}

/// Source of price/liquidity/market data
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Providers specific to a launch platform skip other tokens
    fn applies_to(&self, _token: &TokenId) -> bool {
        true
    }

    async fn fetch_market(&self, token: &TokenId) -> Result<MarketQuote, ProviderError>;
}

/// Source of symbol/name/logo metadata
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_metadata(&self, token: &TokenId) -> Result<MetadataQuote, ProviderError>;
}

/// Number of wallets holding a non-zero balance of a token
#[async_trait]
pub trait HolderSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn holder_count(&self, token: &TokenId) -> Result<u64, ProviderError>;
}

/// Total value locked in a specific exchange pool
#[async_trait]
pub trait PoolLiquiditySource: Send + Sync {
    async fn pool_liquidity(&self, pool_address: &str) -> Result<f64, ProviderError>;
}

/// Shared HTTP client for all providers
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("token-radar/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Wire the configured providers into their fallback order.
///
/// Market: DexScreener, Jupiter, then pump.fun for bonding-curve tokens.
/// Metadata: Helius (when an RPC URL is configured), then DexScreener.
pub fn build_chains(config: &RadarConfig, client: Client) -> (MarketChain, MetadataChain) {
    let providers = &config.providers;
    let dexscreener = Arc::new(DexScreenerProvider::new(client.clone(), &providers.dexscreener_base));

    let market: Vec<Arc<dyn PriceProvider>> = vec![
        dexscreener.clone() as Arc<dyn PriceProvider>,
        Arc::new(JupiterPriceProvider::new(client.clone(), &providers.jupiter_price_url)) as Arc<dyn PriceProvider>,
        Arc::new(PumpFunProvider::new(
            client.clone(),
            &providers.pumpfun_base,
            config.bonding_curve.clone(),
            config.freshness.bonding_curve_suffixes.clone(),
            dexscreener.clone(),
            providers.timeout(),
        )) as Arc<dyn PriceProvider>,
    ];

    let mut metadata: Vec<Arc<dyn MetadataProvider>> = Vec::new();
    if providers.helius_rpc_url.trim().is_empty() {
        info!("No Helius RPC URL configured, metadata falls back to DexScreener only");
    } else {
        metadata.push(Arc::new(HeliusMetadataProvider::new(client, &providers.helius_rpc_url)));
    }
    metadata.push(dexscreener);

    let market = MarketChain::new(market, providers.timeout());
    let metadata = MetadataChain::new(metadata, providers.timeout());
    info!(market = ?market.provider_names(), metadata = ?metadata.provider_names(), "🧭 Provider chains ready");
    (market, metadata)
}

/// Holder counts come from the Helius RPC, so there is no source without one
pub fn build_holder_source(config: &RadarConfig, client: Client) -> Option<Arc<dyn HolderSource>> {
    let url = config.providers.helius_rpc_url.trim();
    if url.is_empty() {
        info!("No Helius RPC URL configured, holder counts are not tracked");
        return None;
    }
    Some(Arc::new(HeliusMetadataProvider::new(client, url)))
}

/// Send a request and decode a JSON body, mapping every failure to a soft provider error
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider,
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;
    parse_json(provider, &body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(provider: &'static str, body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        provider,
        message: e.to_string(),
    })
}

/// Numbers that providers send as strings ("0.00123")
pub(crate) fn parse_decimal(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
