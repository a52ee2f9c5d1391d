//! pump.fun bonding-curve provider
//!
//! The coin endpoint reports market cap but not liquidity, so liquidity is
//! derived: migrated coins use the pool's TVL when it can be read, otherwise a
//! share of market cap; coins still on the curve use their progress between the
//! curve's virtual SOL bounds.
//!
//! The coin request and the pool lookup each get a slice of the provider's
//! time budget, so a slow pool still leaves room for the market-cap estimate.

use super::{send_json, MarketQuote, PoolLiquiditySource, PriceProvider};
use crate::config::BondingCurveConfig;
use crate::core::TokenId;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const PROVIDER: &str = "pumpfun";
const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PumpCoin {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    pub image_uri: Option<String>,
    /// Curve completed and liquidity moved to an exchange pool
    pub complete: bool,
    pub raydium_pool: Option<String>,
    pub pump_swap_pool: Option<String>,
    /// Market cap in SOL
    pub market_cap: Option<f64>,
    pub usd_market_cap: Option<f64>,
    /// Lamports
    pub virtual_sol_reserves: Option<f64>,
    /// Percent 0-100, when the API reports it
    pub bonding_curve_progress: Option<f64>,
}

impl PumpCoin {
    pub fn pool_address(&self) -> Option<&str> {
        self.pump_swap_pool
            .as_deref()
            .or(self.raydium_pool.as_deref())
            .filter(|p| !p.is_empty())
    }

    pub fn market_cap_usd(&self, sol_usd_rate: f64) -> f64 {
        self.usd_market_cap
            .filter(|v| *v > 0.0)
            .or_else(|| self.market_cap.map(|sol| sol * sol_usd_rate))
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.0)
    }

    /// Curve progress in [0, 1]
    pub fn progress(&self, curve: &BondingCurveConfig) -> Option<f64> {
        if let Some(pct) = self.bonding_curve_progress.filter(|p| p.is_finite()) {
            return Some((pct / 100.0).clamp(0.0, 1.0));
        }
        let sol = self.virtual_sol_reserves.filter(|v| *v > 0.0)? / LAMPORTS_PER_SOL;
        let span = curve.virtual_sol_end - curve.virtual_sol_start;
        Some(((sol - curve.virtual_sol_start) / span).clamp(0.0, 1.0))
    }
}

/// Normalise a coin into a market quote. `pool_tvl` is the migrated pool's
/// TVL when it was read successfully.
pub fn estimate_quote(coin: &PumpCoin, curve: &BondingCurveConfig, pool_tvl: Option<f64>) -> MarketQuote {
    let market_cap = coin.market_cap_usd(curve.sol_usd_rate);

    let liquidity = if coin.complete {
        match pool_tvl.filter(|tvl| *tvl > 0.0) {
            Some(tvl) => tvl,
            None => market_cap * curve.migrated_liquidity_ratio,
        }
    } else {
        match coin.progress(curve) {
            Some(p) => {
                let virtual_sol =
                    curve.virtual_sol_start + p * (curve.virtual_sol_end - curve.virtual_sol_start);
                virtual_sol * curve.sol_usd_rate
            }
            None => market_cap * curve.pre_migration_liquidity_ratio,
        }
    };

    MarketQuote {
        price: market_cap / curve.total_supply,
        liquidity,
        market_cap,
        source: PROVIDER,
        ..MarketQuote::default()
    }
}

pub struct PumpFunProvider {
    client: Client,
    base_url: String,
    curve: BondingCurveConfig,
    token_suffixes: Vec<String>,
    pools: Arc<dyn PoolLiquiditySource>,
    coin_timeout: Duration,
    pool_timeout: Duration,
}

impl PumpFunProvider {
    /// `budget` is the chain's per-provider timeout. Half of it goes to the
    /// coin request and a quarter to the pool lookup.
    pub fn new(
        client: Client,
        base_url: &str,
        curve: BondingCurveConfig,
        token_suffixes: Vec<String>,
        pools: Arc<dyn PoolLiquiditySource>,
        budget: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            curve,
            token_suffixes,
            pools,
            coin_timeout: budget / 2,
            pool_timeout: budget / 4,
        }
    }

    pub async fn fetch_coin(&self, token: &TokenId) -> Result<PumpCoin, ProviderError> {
        let url = format!("{}/coins/{}", self.base_url, token);
        match timeout(self.coin_timeout, send_json(PROVIDER, self.client.get(&url))).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: PROVIDER,
                after: self.coin_timeout,
            }),
        }
    }

    /// Quote for an already fetched coin. A failed or slow pool lookup falls
    /// back to the market-cap estimate.
    pub async fn quote_for_coin(&self, coin: &PumpCoin) -> MarketQuote {
        let pool_tvl = match (coin.complete, coin.pool_address()) {
            (true, Some(pool)) => match timeout(self.pool_timeout, self.pools.pool_liquidity(pool)).await {
                Ok(Ok(tvl)) => Some(tvl),
                Ok(Err(e)) => {
                    warn!(mint = %coin.mint, pool = %pool, error = %e, "Pool TVL lookup failed, estimating from market cap");
                    None
                }
                Err(_) => {
                    warn!(
                        mint = %coin.mint,
                        pool = %pool,
                        after = ?self.pool_timeout,
                        "Pool TVL lookup timed out, estimating from market cap"
                    );
                    None
                }
            },
            _ => None,
        };
        estimate_quote(coin, &self.curve, pool_tvl)
    }
}

#[async_trait]
impl PriceProvider for PumpFunProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn applies_to(&self, token: &TokenId) -> bool {
        token.has_suffix_in(&self.token_suffixes)
    }

    async fn fetch_market(&self, token: &TokenId) -> Result<MarketQuote, ProviderError> {
        let coin = self.fetch_coin(token).await?;
        let quote = self.quote_for_coin(&coin).await;
        debug!(
            token = %token,
            migrated = coin.complete,
            market_cap = quote.market_cap,
            liquidity = quote.liquidity,
            "pump.fun quote derived"
        );
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::parse_json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn curve() -> BondingCurveConfig {
        BondingCurveConfig::default()
    }

    #[test]
    fn test_price_from_market_cap_over_supply() {
        let coin = PumpCoin {
            usd_market_cap: Some(50_000.0),
            ..PumpCoin::default()
        };
        let quote = estimate_quote(&coin, &curve(), None);
        assert!((quote.price - 0.00005).abs() < 1e-12);
        // no progress known, pre-migration ratio
        assert!((quote.liquidity - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_progress_drives_pre_migration_liquidity() {
        let coin = PumpCoin {
            usd_market_cap: Some(50_000.0),
            bonding_curve_progress: Some(50.0),
            ..PumpCoin::default()
        };
        let quote = estimate_quote(&coin, &curve(), None);
        // 30 + 0.5 * 85 = 72.5 SOL at 150 USD
        assert!((quote.liquidity - 10_875.0).abs() < 1e-6);
    }

    #[test]
    fn test_virtual_reserves_give_progress() {
        let coin = PumpCoin {
            virtual_sol_reserves: Some(115_000_000_000.0),
            ..PumpCoin::default()
        };
        assert_eq!(coin.progress(&curve()), Some(1.0));

        let coin = PumpCoin {
            virtual_sol_reserves: Some(10_000_000_000.0),
            ..PumpCoin::default()
        };
        assert_eq!(coin.progress(&curve()), Some(0.0));
    }

    #[test]
    fn test_migrated_prefers_pool_tvl() {
        let coin = PumpCoin {
            complete: true,
            raydium_pool: Some("Pool".to_string()),
            market_cap: Some(1_000.0),
            ..PumpCoin::default()
        };
        let with_pool = estimate_quote(&coin, &curve(), Some(42_000.0));
        assert_eq!(with_pool.liquidity, 42_000.0);
        assert_eq!(with_pool.market_cap, 150_000.0);

        let without_pool = estimate_quote(&coin, &curve(), None);
        assert!((without_pool.liquidity - 45_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_parses_coin_fixture() {
        let coin: PumpCoin = parse_json(
            PROVIDER,
            r#"{
                "mint": "2q7jMwWYFxUdxBqWbi8ohztyG1agjQMrasUXwqGCpump",
                "name": "Radar",
                "symbol": "RAD",
                "complete": true,
                "raydium_pool": null,
                "pump_swap_pool": "SwapPool111",
                "market_cap": 420.5,
                "usd_market_cap": 63075.0,
                "virtual_sol_reserves": 115005359004,
                "total_supply": 1000000000000000
            }"#,
        )
        .unwrap();
        assert!(coin.complete);
        assert_eq!(coin.pool_address(), Some("SwapPool111"));
        assert_eq!(coin.market_cap_usd(150.0), 63075.0);
    }

    struct FailingPools(AtomicUsize);

    #[async_trait]
    impl PoolLiquiditySource for FailingPools {
        async fn pool_liquidity(&self, _pool: &str) -> Result<f64, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Empty { provider: "dexscreener" })
        }
    }

    struct HangingPools;

    #[async_trait]
    impl PoolLiquiditySource for HangingPools {
        async fn pool_liquidity(&self, _pool: &str) -> Result<f64, ProviderError> {
            std::future::pending::<Result<f64, ProviderError>>().await
        }
    }

    fn provider_with(pools: Arc<dyn PoolLiquiditySource>) -> PumpFunProvider {
        PumpFunProvider::new(
            Client::new(),
            "http://localhost",
            curve(),
            vec!["pump".to_string()],
            pools,
            Duration::from_secs(8),
        )
    }

    fn migrated_coin() -> PumpCoin {
        PumpCoin {
            mint: "2q7jMwWYFxUdxBqWbi8ohztyG1agjQMrasUXwqGCpump".to_string(),
            complete: true,
            pump_swap_pool: Some("SwapPool111".to_string()),
            usd_market_cap: Some(100_000.0),
            ..PumpCoin::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_pool_lookup_still_yields_estimate() {
        let provider = provider_with(Arc::new(HangingPools));
        let started = tokio::time::Instant::now();

        let quote = provider.quote_for_coin(&migrated_coin()).await;

        // 30% of market cap, well inside the provider budget
        assert!((quote.liquidity - 30_000.0).abs() < 1e-6);
        assert!(quote.is_adequate());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_failing_pool_lookup_is_tried_once() {
        let pools = Arc::new(FailingPools(AtomicUsize::new(0)));
        let provider = provider_with(pools.clone());

        let quote = provider.quote_for_coin(&migrated_coin()).await;
        assert!((quote.liquidity - 30_000.0).abs() < 1e-6);
        assert_eq!(pools.0.load(Ordering::SeqCst), 1);

        // coins still on the curve never touch the pool source
        let on_curve = PumpCoin { complete: false, ..migrated_coin() };
        provider.quote_for_coin(&on_curve).await;
        assert_eq!(pools.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_applies_only_to_platform_tokens() {
        let provider = provider_with(Arc::new(FailingPools(AtomicUsize::new(0))));
        let pump = TokenId::parse("2q7jMwWYFxUdxBqWbi8ohztyG1agjQMrasUXwqGCpump").unwrap();
        let sol = TokenId::parse("So11111111111111111111111111111111111111112").unwrap();
        assert!(provider.applies_to(&pump));
        assert!(!provider.applies_to(&sol));
    }
}
