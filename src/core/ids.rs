//! Identifier parsing for token mints and wallets
//!
//! Both are base58 encoded 32-byte public keys. Anything that does not decode
//! to exactly 32 bytes is rejected at the engine boundary.
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decode a base58 address into its raw 32 bytes if valid
pub fn parse_address(address: &str) -> Option<[u8; 32]> {
    match bs58::decode(address).into_vec() {
        Ok(bytes) if bytes.len() == 32 => {
            let mut addr = [0u8; 32];
            addr.copy_from_slice(&bytes);
            Some(addr)
        }
        _ => None,
    }
}

fn validate(field: &'static str, raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::MalformedInput {
            field,
            reason: "empty identifier".to_string(),
        });
    }
    if parse_address(trimmed).is_none() {
        return Err(EngineError::MalformedInput {
            field,
            reason: format!("'{}' is not a base58 32-byte address", trimmed),
        });
    }
    Ok(trimmed.to_string())
}

/// A validated token mint address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        validate("token", raw).map(TokenId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the mint carries one of the given launch-platform suffixes
    /// (pump.fun mints end in "pump").
    pub fn has_suffix_in(&self, suffixes: &[String]) -> bool {
        suffixes.iter().any(|s| !s.is_empty() && self.0.ends_with(s.as_str()))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated wallet address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        validate("wallet", raw).map(WalletId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
