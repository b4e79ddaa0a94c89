//! Holdings oracle trait
//!
//! This module defines the interface for on-chain balance lookups.
//! Implementations answer whether an address holds a configured token,
//! either for one address or with the token's full holder list.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::TokenDescriptor;
use crate::utils::address::EvmAddress;

#[derive(Debug)]
pub enum ProviderError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    Rpc { code: i64, message: String },
    Malformed(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Status { status, body } => {
                write!(f, "Provider returned {}: {}", status, body)
            }
            ProviderError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            ProviderError::Malformed(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e)
    }
}

impl ProviderError {
    /// Rate limits, 5xx and transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Rpc { .. } | ProviderError::Malformed(_) => false,
        }
    }
}

/// Result of one oracle lookup.
#[derive(Debug, Clone)]
pub enum Holding {
    /// Answer for the queried address only.
    Address(bool),
    /// Every holder of the token, reusable for other addresses in the same cycle.
    Holders(Arc<HashSet<EvmAddress>>),
}

impl Holding {
    pub fn contains(&self, address: &EvmAddress) -> bool {
        match self {
            Holding::Address(held) => *held,
            Holding::Holders(holders) => holders.contains(address),
        }
    }
}

/// Trait for on-chain holdings providers
#[async_trait]
pub trait HoldingsOracle: Send + Sync {
    /// Returns the name of the provider (e.g., "ankr", "moralis")
    fn name(&self) -> &'static str;

    /// Cache key under which a lookup result may be reused within one cycle.
    ///
    /// Providers that answer with holder lists key by token only, so all
    /// users checked against that token share one call.
    fn cache_key(&self, token: &TokenDescriptor, address: &EvmAddress) -> String;

    /// Look up `address`'s holding of `token`.
    ///
    /// A 3-part descriptor requires the exact token id with a positive
    /// balance; a 2-part one any positive balance of the contract.
    async fn lookup(
        &self,
        token: &TokenDescriptor,
        address: &EvmAddress,
    ) -> Result<Holding, ProviderError>;

    async fn holds(
        &self,
        token: &TokenDescriptor,
        address: &EvmAddress,
    ) -> Result<bool, ProviderError> {
        Ok(self.lookup(token, address).await?.contains(address))
    }
}
