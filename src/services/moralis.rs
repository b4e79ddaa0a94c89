//! Moralis deep-index API client
//!
//! Queries `GET /{address}/nft` filtered to one contract. Answers are per
//! address, so results are cached per token and address.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::ankr::is_positive_amount;
use super::holdings_oracle::{Holding, HoldingsOracle, ProviderError};
use crate::config::TokenDescriptor;
use crate::utils::address::EvmAddress;
use crate::utils::cache::CacheKey;
use crate::utils::retry::with_retry;

/// Default Moralis API base URL
const DEFAULT_MORALIS_API_BASE: &str = "https://deep-index.moralis.io/api/v2";

/// Response from the /{address}/nft endpoint
#[derive(Debug, Deserialize)]
struct NftPage {
    result: Option<Vec<NftEntry>>,
}

#[derive(Debug, Deserialize)]
struct NftEntry {
    token_id: String,
    #[serde(default)]
    amount: Option<String>,
}

pub struct MoralisClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl MoralisClient {
    pub fn new(http_client: Client, api_key: String) -> Self {
        Self::with_base_url(http_client, api_key, DEFAULT_MORALIS_API_BASE.to_string())
    }

    /// Creates a new Moralis client with a custom API base URL
    ///
    /// This is useful for testing with a mock server.
    pub fn with_base_url(http_client: Client, api_key: String, base_url: String) -> Self {
        Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_nfts(
        &self,
        token: &TokenDescriptor,
        address: &EvmAddress,
    ) -> Result<Vec<NftEntry>, ProviderError> {
        let url = format!("{}/{}/nft", self.base_url, address);

        log::debug!("Fetching NFTs from Moralis: {} for {}", token, address);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("chain", token.chain.moralis_id()),
                ("format", "decimal"),
                ("token_addresses", token.contract.as_str()),
            ])
            .header("accept", "application/json")
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Moralis API error for {}: {} - {}", address, status, body);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: NftPage = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        page.result
            .ok_or_else(|| ProviderError::Malformed("response has no result".to_string()))
    }
}

#[async_trait]
impl HoldingsOracle for MoralisClient {
    fn name(&self) -> &'static str {
        "moralis"
    }

    fn cache_key(&self, token: &TokenDescriptor, address: &EvmAddress) -> String {
        CacheKey::new("moralis").with(token).with(address).build()
    }

    async fn lookup(
        &self,
        token: &TokenDescriptor,
        address: &EvmAddress,
    ) -> Result<Holding, ProviderError> {
        let entries = with_retry("moralis_nft", ProviderError::is_transient, || {
            self.fetch_nfts(token, address)
        })
        .await?;

        let held = entries.iter().any(|nft| {
            let positive = nft.amount.as_deref().map(is_positive_amount).unwrap_or(false);
            match &token.token_id {
                Some(token_id) => nft.token_id == *token_id && positive,
                None => positive,
            }
        });

        Ok(Holding::Address(held))
    }
}
