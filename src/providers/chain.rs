//! Ordered provider fallback chains
//!
//! Providers are tried strictly in sequence, each under its own timeout. The
//! first adequate answer wins; every failure is soft and only logged.

use super::{MarketQuote, MetadataProvider, MetadataQuote, PriceProvider};
use crate::core::TokenId;
use crate::error::ProviderError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

pub struct MarketChain {
    providers: Vec<Arc<dyn PriceProvider>>,
    timeout: Duration,
}

impl MarketChain {
    pub fn new(providers: Vec<Arc<dyn PriceProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// `None` when every applicable provider failed or had nothing usable
    #[instrument(skip(self), fields(token = %token))]
    pub async fn fetch(&self, token: &TokenId) -> Option<MarketQuote> {
        for (position, provider) in self.providers.iter().enumerate() {
            if !provider.applies_to(token) {
                continue;
            }
            let name = provider.name();
            let outcome = match timeout(self.timeout, provider.fetch_market(token)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: name,
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(quote) if quote.is_adequate() => {
                    if position > 0 {
                        info!(provider = name, price = quote.price, "🔄 Market data served by fallback provider");
                    } else {
                        debug!(provider = name, price = quote.price, "Market data fetched");
                    }
                    return Some(quote);
                }
                Ok(_) => warn!(provider = name, "⚠️ Provider returned no usable price, trying next"),
                Err(e) => warn!(provider = name, error = %e, "⚠️ Provider failed, trying next"),
            }
        }
        warn!("❌ All market data providers exhausted");
        None
    }
}

pub struct MetadataChain {
    providers: Vec<Arc<dyn MetadataProvider>>,
    timeout: Duration,
}

impl MetadataChain {
    pub fn new(providers: Vec<Arc<dyn MetadataProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    #[instrument(skip(self), fields(token = %token))]
    pub async fn fetch(&self, token: &TokenId) -> Option<MetadataQuote> {
        for provider in &self.providers {
            let name = provider.name();
            let outcome = match timeout(self.timeout, provider.fetch_metadata(token)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: name,
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(quote) if quote.is_adequate() => {
                    debug!(provider = name, symbol = %quote.symbol, "Metadata fetched");
                    return Some(quote);
                }
                Ok(_) => warn!(provider = name, "⚠️ Provider returned placeholder metadata, trying next"),
                Err(e) => warn!(provider = name, error = %e, "⚠️ Metadata provider failed, trying next"),
            }
        }
        warn!("❌ All metadata providers exhausted");
        None
    }
}
