//! Helius DAS: `getAsset` for on-chain token metadata and `getTokenAccounts`
//! for holder counts
use super::{send_json, HolderSource, MetadataProvider, MetadataQuote};
use crate::core::TokenId;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

const PROVIDER: &str = "helius";
const HOLDER_PAGE_SIZE: usize = 1000;
/// Counting stops here; larger tokens report this many pages' worth of holders
const MAX_HOLDER_PAGES: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Asset>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Asset {
    pub content: Option<AssetContent>,
    pub token_info: Option<AssetTokenInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssetContent {
    pub metadata: Option<AssetMetadata>,
    pub links: Option<AssetLinks>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssetMetadata {
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssetLinks {
    pub image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssetTokenInfo {
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountsResponse {
    pub result: Option<TokenAccountsPage>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenAccountsPage {
    pub total: u64,
    pub token_accounts: Vec<TokenAccount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenAccount {
    pub owner: String,
    pub amount: u64,
}

pub fn page_from_response(response: TokenAccountsResponse) -> Result<TokenAccountsPage, ProviderError> {
    if let Some(err) = response.error {
        return Err(ProviderError::Parse {
            provider: PROVIDER,
            message: format!("rpc error {}: {}", err.code, err.message),
        });
    }
    response.result.ok_or(ProviderError::Empty { provider: PROVIDER })
}

/// Add the page's funded owners to `owners`. A wallet with several token
/// accounts counts once.
pub fn collect_holders(owners: &mut HashSet<String>, page: &TokenAccountsPage) {
    owners.extend(
        page.token_accounts
            .iter()
            .filter(|account| account.amount > 0 && !account.owner.is_empty())
            .map(|account| account.owner.clone()),
    );
}

pub fn quote_from_response(response: RpcResponse) -> Result<MetadataQuote, ProviderError> {
    if let Some(err) = response.error {
        return Err(ProviderError::Parse {
            provider: PROVIDER,
            message: format!("rpc error {}: {}", err.code, err.message),
        });
    }
    let asset = response.result.ok_or(ProviderError::Empty { provider: PROVIDER })?;

    let content = asset.content.unwrap_or_default();
    let metadata = content.metadata.unwrap_or_default();
    // Some fungibles only carry the ticker under token_info
    let symbol = if metadata.symbol.trim().is_empty() {
        asset.token_info.and_then(|t| t.symbol).unwrap_or_default()
    } else {
        metadata.symbol
    };

    Ok(MetadataQuote {
        symbol: symbol.trim().to_string(),
        name: metadata.name.trim().to_string(),
        logo_uri: content.links.and_then(|l| l.image).filter(|u| !u.is_empty()),
        holder_count: None,
        source: PROVIDER,
    })
}

pub struct HeliusMetadataProvider {
    client: Client,
    rpc_url: String,
}

impl HeliusMetadataProvider {
    pub fn new(client: Client, rpc_url: &str) -> Self {
        Self {
            client,
            rpc_url: rpc_url.to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for HeliusMetadataProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch_metadata(&self, token: &TokenId) -> Result<MetadataQuote, ProviderError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "token-radar",
            "method": "getAsset",
            "params": { "id": token.as_str() },
        });
        let response: RpcResponse = send_json(PROVIDER, self.client.post(&self.rpc_url).json(&body)).await?;
        quote_from_response(response)
    }
}

#[async_trait]
impl HolderSource for HeliusMetadataProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn holder_count(&self, token: &TokenId) -> Result<u64, ProviderError> {
        let mut owners = HashSet::new();
        for page in 1..=MAX_HOLDER_PAGES {
            let body = json!({
                "jsonrpc": "2.0",
                "id": "token-radar",
                "method": "getTokenAccounts",
                "params": { "mint": token.as_str(), "page": page, "limit": HOLDER_PAGE_SIZE },
            });
            let response: TokenAccountsResponse =
                send_json(PROVIDER, self.client.post(&self.rpc_url).json(&body)).await?;
            let accounts = page_from_response(response)?;
            collect_holders(&mut owners, &accounts);

            if accounts.token_accounts.len() < HOLDER_PAGE_SIZE {
                break;
            }
            if page == MAX_HOLDER_PAGES {
                debug!(token = %token, holders = owners.len(), "Holder count capped at page limit");
            }
        }

        match owners.len() as u64 {
            0 => Err(ProviderError::Empty { provider: PROVIDER }),
            holders => Ok(holders),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::parse_json;

    #[test]
    fn test_parses_fungible_asset() {
        let response: RpcResponse = parse_json(
            PROVIDER,
            r#"{
                "jsonrpc": "2.0",
                "id": "token-radar",
                "result": {
                    "interface": "FungibleToken",
                    "id": "2q7jMwWYFxUdxBqWbi8ohztyG1agjQMrasUXwqGCpump",
                    "content": {
                        "metadata": {"name": "Radar ", "symbol": "RAD"},
                        "links": {"image": "https://ipfs.example/rad.png"}
                    },
                    "token_info": {"symbol": "RAD", "decimals": 6, "supply": 1000000000000000}
                }
            }"#,
        )
        .unwrap();
        let quote = quote_from_response(response).unwrap();
        assert_eq!(quote.name, "Radar");
        assert_eq!(quote.symbol, "RAD");
        assert_eq!(quote.logo_uri.as_deref(), Some("https://ipfs.example/rad.png"));
        assert!(quote.is_adequate());
    }

    #[test]
    fn test_symbol_falls_back_to_token_info() {
        let response: RpcResponse = parse_json(
            PROVIDER,
            r#"{"result":{"content":{"metadata":{"name":"Radar","symbol":""}},"token_info":{"symbol":"RAD"}}}"#,
        )
        .unwrap();
        assert_eq!(quote_from_response(response).unwrap().symbol, "RAD");
    }

    #[test]
    fn test_holders_are_distinct_funded_owners() {
        let response: TokenAccountsResponse = parse_json(
            PROVIDER,
            r#"{
                "jsonrpc": "2.0",
                "result": {
                    "total": 4,
                    "limit": 1000,
                    "page": 1,
                    "token_accounts": [
                        {"address": "Acc1", "mint": "M", "owner": "WalletA", "amount": 500, "frozen": false},
                        {"address": "Acc2", "mint": "M", "owner": "WalletA", "amount": 20, "frozen": false},
                        {"address": "Acc3", "mint": "M", "owner": "WalletB", "amount": 0, "frozen": false},
                        {"address": "Acc4", "mint": "M", "owner": "WalletC", "amount": 1, "frozen": false}
                    ]
                }
            }"#,
        )
        .unwrap();
        let page = page_from_response(response).unwrap();
        assert_eq!(page.total, 4);

        let mut owners = HashSet::new();
        collect_holders(&mut owners, &page);
        assert_eq!(owners.len(), 2);
        // a second page with an already seen owner adds nothing
        collect_holders(&mut owners, &page);
        assert_eq!(owners.len(), 2);
    }

    #[test]
    fn test_token_accounts_rpc_error() {
        let response: TokenAccountsResponse =
            parse_json(PROVIDER, r#"{"error":{"code":-32602,"message":"Invalid mint"}}"#).unwrap();
        assert!(page_from_response(response).unwrap_err().to_string().contains("Invalid mint"));
    }

    #[test]
    fn test_rpc_error_is_reported() {
        let response: RpcResponse = parse_json(
            PROVIDER,
            r#"{"error":{"code":-32000,"message":"Asset Not Found"}}"#,
        )
        .unwrap();
        let err = quote_from_response(response).unwrap_err();
        assert!(err.to_string().contains("Asset Not Found"));
    }
}
