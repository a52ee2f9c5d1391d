use crate::config::ClientConfig;
use crate::core::TokenState;
use crate::error::ClientError;
use crate::providers::http_client;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Request/response lookups against the token-state service
#[async_trait]
pub trait LookupTransport: Send + Sync {
    async fn lookup(&self, token: &str, wallet: Option<&str>) -> Result<TokenState, ClientError>;

    async fn lookup_batch(&self, tokens: &[String], wallet: Option<&str>) -> Result<Vec<TokenState>, ClientError>;
}

/// Older all-in-one fetch path, used when a lookup fails
#[async_trait]
pub trait UnifiedFallback: Send + Sync {
    async fn fetch_unified(&self, token: &str, wallet: Option<&str>) -> Option<TokenState>;
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    tokens: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    wallet: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct HttpLookupTransport {
    client: Client,
    base_url: String,
}

impl HttpLookupTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = http_client(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self::new(client, config.server_url.clone()))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let body = response.text().await.map_err(classify)?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

fn classify(error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Network(error)
    }
}

#[async_trait]
impl LookupTransport for HttpLookupTransport {
    async fn lookup(&self, token: &str, wallet: Option<&str>) -> Result<TokenState, ClientError> {
        let url = format!("{}/tokens/{}", self.base_url, token);
        debug!(%url, "Token lookup");
        let mut request = self.client.get(&url);
        if let Some(wallet) = wallet {
            request = request.query(&[("wallet", wallet)]);
        }
        self.send(request).await
    }

    async fn lookup_batch(&self, tokens: &[String], wallet: Option<&str>) -> Result<Vec<TokenState>, ClientError> {
        let url = format!("{}/tokens/batch", self.base_url);
        debug!(%url, count = tokens.len(), "Batched token lookup");
        let request = self.client.post(&url).json(&BatchRequest { tokens, wallet });
        self.send(request).await
    }
}
