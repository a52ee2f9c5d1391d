//! Consumer-side access to token state
//!
//! `TokenDataClient` owns the lookup transport, an optional fallback, the
//! in-flight request map and the live push connection. Failures never leave
//! this type: a token that cannot be looked up resolves to `None`.

use super::connection::{overlay_protection, LiveConnection};
use super::overrides::OptimisticOverrides;
use super::transport::{LookupTransport, UnifiedFallback};
use crate::config::ClientConfig;
use crate::core::{ProtectionFlags, TokenState};
use crate::transport::TokenUpdate;
use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

type LookupKey = (String, Option<String>);
type PendingLookup = Shared<BoxFuture<'static, Option<TokenState>>>;

pub struct TokenDataClient {
    transport: Arc<dyn LookupTransport>,
    fallback: Option<Arc<dyn UnifiedFallback>>,
    coalescing_threshold: usize,
    in_flight: Arc<DashMap<LookupKey, PendingLookup>>,
    overrides: Arc<OptimisticOverrides<ProtectionFlags>>,
    live: Option<LiveConnection>,
}

impl TokenDataClient {
    pub fn new(transport: Arc<dyn LookupTransport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            fallback: None,
            coalescing_threshold: config.coalescing_threshold,
            in_flight: Arc::new(DashMap::new()),
            overrides: Arc::new(OptimisticOverrides::new(Duration::from_millis(config.optimistic_grace_ms))),
            live: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn UnifiedFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Open the push connection to `config.websocket_url`. Pushed states get
    /// the same protection overrides as looked-up ones.
    pub fn with_live_connection(mut self, config: &ClientConfig) -> Self {
        let live = LiveConnection::with_overrides(config.websocket_url.clone(), config, self.overrides.clone());
        live.start();
        self.live = Some(live);
        self
    }

    /// Single lookup. Concurrent calls for the same (token, wallet) share one request.
    pub async fn get_token_state(&self, token: &str, wallet: Option<&str>) -> Option<TokenState> {
        let key: LookupKey = (token.to_string(), wallet.map(str::to_string));

        let pending = match self.in_flight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!(token, "Joining in-flight lookup");
                entry.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let transport = self.transport.clone();
                let fallback = self.fallback.clone();
                let in_flight = self.in_flight.clone();
                let future = async move {
                    let result = lookup_one(transport, fallback, &key.0, key.1.as_deref()).await;
                    in_flight.remove(&key);
                    result
                }
                .boxed()
                .shared();
                entry.insert(future.clone());
                future
            }
        };

        pending.await.map(|state| overlay_protection(&self.overrides, state))
    }

    /// Up to the coalescing threshold each distinct token is looked up on its
    /// own, concurrently; above it one batched call is made.
    pub async fn get_token_states(&self, tokens: &[String], wallet: Option<&str>) -> HashMap<String, Option<TokenState>> {
        let mut seen = HashSet::new();
        let distinct: Vec<String> = tokens.iter().filter(|t| seen.insert(t.as_str())).cloned().collect();

        if distinct.len() <= self.coalescing_threshold {
            let results = join_all(distinct.iter().map(|token| self.get_token_state(token, wallet))).await;
            return distinct.into_iter().zip(results).collect();
        }

        match self.transport.lookup_batch(&distinct, wallet).await {
            Ok(states) => {
                let mut by_token: HashMap<String, TokenState> = states
                    .into_iter()
                    .map(|state| (state.token().to_string(), state))
                    .collect();
                distinct
                    .into_iter()
                    .map(|token| {
                        let state = by_token
                            .remove(&token)
                            .map(|state| overlay_protection(&self.overrides, state));
                        (token, state)
                    })
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, count = distinct.len(), "Batched lookup failed");
                let fallback = self.fallback.clone();
                let results = join_all(distinct.iter().map(|token| {
                    let fallback = fallback.clone();
                    async move {
                        match fallback {
                            Some(fallback) => fallback.fetch_unified(token, wallet).await,
                            None => None,
                        }
                    }
                }))
                .await;
                distinct
                    .into_iter()
                    .zip(results)
                    .map(|(token, state)| (token, state.map(|s| overlay_protection(&self.overrides, s))))
                    .collect()
            }
        }
    }

    /// Record a local protection change so stale server echoes do not revert it
    pub fn record_optimistic_protection(&self, token: &str, flags: ProtectionFlags) {
        self.overrides.record(token, flags);
    }

    pub async fn subscribe(&self, token: &str) {
        match &self.live {
            Some(live) => live.subscribe(token).await,
            None => debug!(token, "No live connection, subscribe ignored"),
        }
    }

    pub async fn unsubscribe(&self, token: &str) {
        if let Some(live) = &self.live {
            live.unsubscribe(token).await;
        }
    }

    /// Pushed updates, if a live connection was opened
    pub fn updates(&self) -> Option<broadcast::Receiver<TokenUpdate>> {
        self.live.as_ref().map(LiveConnection::updates)
    }

    pub fn live_connection(&self) -> Option<&LiveConnection> {
        self.live.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn shutdown(&self) {
        if let Some(live) = &self.live {
            live.shutdown().await;
        }
        info!("Token data client shut down");
    }
}

async fn lookup_one(
    transport: Arc<dyn LookupTransport>,
    fallback: Option<Arc<dyn UnifiedFallback>>,
    token: &str,
    wallet: Option<&str>,
) -> Option<TokenState> {
    match transport.lookup(token, wallet).await {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(token, error = %e, "Token lookup failed");
            match fallback {
                Some(fallback) => fallback.fetch_unified(token, wallet).await,
                None => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RiskLevel, RiskRecord, TokenSnapshot, VelocityRecord};
    use crate::error::ClientError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state(token: &str) -> TokenState {
        TokenState {
            snapshot: TokenSnapshot::empty(token),
            velocity: VelocityRecord::default(),
            risk: RiskRecord {
                token: token.to_string(),
                rule_risk_score: 10.0,
                rule_risk_level: RiskLevel::Minimal,
                ml_probability: None,
                ml_confidence: None,
                ml_time_to_rug_secs: None,
                top_risk_factors: vec![],
                hybrid_risk_score: 10.0,
                hybrid_risk_level: RiskLevel::Minimal,
            },
            protection: None,
            refreshed: false,
            throttled: false,
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct CountingTransport {
        single: AtomicUsize,
        batch: AtomicUsize,
        fail: bool,
        delay_ms: u64,
    }

    #[async_trait]
    impl LookupTransport for CountingTransport {
        async fn lookup(&self, token: &str, _wallet: Option<&str>) -> Result<TokenState, ClientError> {
            self.single.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(ClientError::Status(503));
            }
            Ok(state(token))
        }

        async fn lookup_batch(&self, tokens: &[String], _wallet: Option<&str>) -> Result<Vec<TokenState>, ClientError> {
            self.batch.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClientError::Timeout);
            }
            Ok(tokens.iter().map(|t| state(t)).collect())
        }
    }

    struct StaticFallback;

    #[async_trait]
    impl UnifiedFallback for StaticFallback {
        async fn fetch_unified(&self, token: &str, _wallet: Option<&str>) -> Option<TokenState> {
            Some(state(token))
        }
    }

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("token-{i}")).collect()
    }

    #[tokio::test]
    async fn test_three_tokens_use_individual_lookups() {
        let transport = Arc::new(CountingTransport::default());
        let client = TokenDataClient::new(transport.clone(), &ClientConfig::default());

        let results = client.get_token_states(&tokens(3), None).await;
        assert_eq!(results.len(), 3);
        assert!(results.values().all(Option::is_some));
        assert_eq!(transport.single.load(Ordering::SeqCst), 3);
        assert_eq!(transport.batch.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_four_tokens_use_one_batch() {
        let transport = Arc::new(CountingTransport::default());
        let client = TokenDataClient::new(transport.clone(), &ClientConfig::default());

        let results = client.get_token_states(&tokens(4), None).await;
        assert_eq!(results.len(), 4);
        assert_eq!(transport.single.load(Ordering::SeqCst), 0);
        assert_eq!(transport.batch.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicates_count_once_toward_threshold() {
        let transport = Arc::new(CountingTransport::default());
        let client = TokenDataClient::new(transport.clone(), &ClientConfig::default());

        let mut list = tokens(3);
        list.push("token-0".to_string());
        client.get_token_states(&list, None).await;
        assert_eq!(transport.single.load(Ordering::SeqCst), 3);
        assert_eq!(transport.batch.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_lookups_share_request() {
        let transport = Arc::new(CountingTransport {
            delay_ms: 50,
            ..Default::default()
        });
        let client = TokenDataClient::new(transport.clone(), &ClientConfig::default());

        let (a, b) = tokio::join!(
            client.get_token_state("token-0", Some("wallet")),
            client.get_token_state("token-0", Some("wallet")),
        );
        assert!(a.is_some() && b.is_some());
        assert_eq!(transport.single.load(Ordering::SeqCst), 1);
        assert_eq!(client.in_flight(), 0);

        // different wallet is a different request
        client.get_token_state("token-0", None).await;
        assert_eq!(transport.single.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_without_fallback_is_empty() {
        let transport = Arc::new(CountingTransport {
            fail: true,
            ..Default::default()
        });
        let client = TokenDataClient::new(transport, &ClientConfig::default());

        assert!(client.get_token_state("token-0", None).await.is_none());
        let results = client.get_token_states(&tokens(5), None).await;
        assert_eq!(results.len(), 5);
        assert!(results.values().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let transport = Arc::new(CountingTransport {
            fail: true,
            ..Default::default()
        });
        let client = TokenDataClient::new(transport, &ClientConfig::default()).with_fallback(Arc::new(StaticFallback));

        assert!(client.get_token_state("token-0", None).await.is_some());
        let results = client.get_token_states(&tokens(5), None).await;
        assert!(results.values().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_optimistic_protection_overrides_lookup() {
        let transport = Arc::new(CountingTransport::default());
        let client = TokenDataClient::new(transport, &ClientConfig::default());
        let flags = ProtectionFlags {
            monitored: true,
            mempool_monitoring: true,
            risk_threshold: Some(RiskLevel::High),
        };
        client.record_optimistic_protection("token-0", flags.clone());

        let state = client.get_token_state("token-0", Some("wallet")).await.unwrap();
        assert_eq!(state.protection, Some(flags));

        let other = client.get_token_state("token-1", Some("wallet")).await.unwrap();
        assert_eq!(other.protection, None);
    }

    #[tokio::test]
    async fn test_live_connection_dials_configured_websocket_url() {
        use futures_util::StreamExt;
        use tokio_tungstenite::{accept_async, tungstenite::Message};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            websocket_url: format!("ws://{}", listener.local_addr().unwrap()),
            ..ClientConfig::default()
        };
        let client = TokenDataClient::new(Arc::new(CountingTransport::default()), &config).with_live_connection(&config);
        client.subscribe("token-0").await;

        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame, Message::Text(r#"{"type":"subscribe","token":"token-0"}"#.to_string()));

        client.shutdown().await;
    }
}
