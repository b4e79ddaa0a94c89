//! Ankr Advanced API client
//!
//! Uses the multichain JSON-RPC endpoint:
//! - `ankr_getNFTHolders` lists every holder of a contract, so one call
//!   answers for all registered users in a cycle.
//! - `ankr_getNFTsByOwner` is used for token-id descriptors, where the
//!   holder list can't tell which id an address holds.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

use super::holdings_oracle::{Holding, HoldingsOracle, ProviderError};
use crate::config::TokenDescriptor;
use crate::utils::address::EvmAddress;
use crate::utils::cache::CacheKey;
use crate::utils::retry::with_retry;

/// Default Ankr multichain RPC base URL (the API key is appended as a path segment)
const DEFAULT_ANKR_API_BASE: &str = "https://rpc.ankr.com/multichain";

const HOLDERS_PAGE_SIZE: u32 = 1000;

/// Upper bound on holder pages fetched for one contract
const MAX_HOLDER_PAGES: usize = 50;

const OWNER_PAGE_SIZE: u32 = 50;

/// Upper bound on owner asset pages fetched for one address
const MAX_OWNER_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldersResult {
    holders: Vec<String>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NftsByOwnerResult {
    #[serde(default)]
    assets: Vec<NftAsset>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NftAsset {
    contract_address: String,
    token_id: String,
    /// Present for ERC-1155; ERC-721 assets are owned outright.
    quantity: Option<String>,
}

/// Follows `nextPageToken`s, refusing to loop forever on a provider that
/// repeats a token or never stops paging.
struct PageCursor {
    method: &'static str,
    max_pages: usize,
    fetched: usize,
    current: String,
    seen: HashSet<String>,
}

impl PageCursor {
    fn new(method: &'static str, max_pages: usize) -> Self {
        Self {
            method,
            max_pages,
            fetched: 0,
            current: String::new(),
            seen: HashSet::new(),
        }
    }

    fn token(&self) -> &str {
        &self.current
    }

    /// Record the token returned with a page. `Ok(false)` means that was the last page.
    fn advance(&mut self, next: String) -> Result<bool, ProviderError> {
        self.fetched += 1;
        if next.is_empty() {
            return Ok(false);
        }
        if !self.seen.insert(next.clone()) {
            return Err(ProviderError::Malformed(format!(
                "{} repeated page token {}",
                self.method, next
            )));
        }
        if self.fetched >= self.max_pages {
            return Err(ProviderError::Malformed(format!(
                "{} still paging after {} pages",
                self.method, self.max_pages
            )));
        }
        self.current = next;
        Ok(true)
    }
}

pub struct AnkrClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl AnkrClient {
    pub fn new(http_client: Client, api_key: String) -> Self {
        Self::with_base_url(http_client, api_key, DEFAULT_ANKR_API_BASE.to_string())
    }

    /// Creates a new Ankr client with a custom API base URL
    ///
    /// This is useful for testing with a mock server.
    pub fn with_base_url(http_client: Client, api_key: String, base_url: String) -> Self {
        Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, self.api_key);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        with_retry(method, ProviderError::is_transient, || {
            self.send::<T>(&url, &payload, method)
        })
        .await
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        payload: &Value,
        method: &str,
    ) -> Result<T, ProviderError> {
        let response = self.http_client.post(url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if let Some(error) = data.error {
            return Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        data.result
            .ok_or_else(|| ProviderError::Malformed(format!("{} returned no result", method)))
    }

    async fn fetch_holders(
        &self,
        token: &TokenDescriptor,
    ) -> Result<HashSet<EvmAddress>, ProviderError> {
        let mut holders = HashSet::new();
        let mut pages = PageCursor::new("ankr_getNFTHolders", MAX_HOLDER_PAGES);

        loop {
            let result: HoldersResult = self
                .call(
                    "ankr_getNFTHolders",
                    json!({
                        "blockchain": token.chain.ankr_id(),
                        "contractAddress": token.contract.as_str(),
                        "pageSize": HOLDERS_PAGE_SIZE,
                        "pageToken": pages.token(),
                    }),
                )
                .await?;

            for raw in &result.holders {
                match EvmAddress::parse(raw) {
                    Ok(address) => {
                        holders.insert(address);
                    }
                    Err(_) => log::debug!("Ankr: skipping unparsable holder {}", raw),
                }
            }

            // A partial holder list would quietly demote everyone past the cut
            match pages.advance(result.next_page_token) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    log::warn!("Ankr: holder list for {} is incomplete: {}", token, e);
                    return Err(e);
                }
            }
        }

        log::debug!("Ankr: {} has {} holders", token, holders.len());
        Ok(holders)
    }

    async fn owns_token_id(
        &self,
        token: &TokenDescriptor,
        token_id: &str,
        address: &EvmAddress,
    ) -> Result<bool, ProviderError> {
        let mut pages = PageCursor::new("ankr_getNFTsByOwner", MAX_OWNER_PAGES);
        let mut filter = serde_json::Map::new();
        filter.insert(token.contract.to_string(), json!([]));

        loop {
            let result: NftsByOwnerResult = self
                .call(
                    "ankr_getNFTsByOwner",
                    json!({
                        "blockchain": token.chain.ankr_id(),
                        "walletAddress": address.as_str(),
                        "filter": [filter.clone()],
                        "pageSize": OWNER_PAGE_SIZE,
                        "pageToken": pages.token(),
                    }),
                )
                .await?;

            let found = result.assets.iter().any(|asset| {
                asset.contract_address.eq_ignore_ascii_case(token.contract.as_str())
                    && asset.token_id == token_id
                    && asset
                        .quantity
                        .as_deref()
                        .map(is_positive_amount)
                        .unwrap_or(true)
            });

            if found {
                return Ok(true);
            }
            if !pages.advance(result.next_page_token)? {
                return Ok(false);
            }
        }
    }
}

/// Balances come back as decimal strings that may exceed u64.
pub(crate) fn is_positive_amount(raw: &str) -> bool {
    let digits = raw.trim();
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits.chars().any(|c| c != '0')
}

#[async_trait]
impl HoldingsOracle for AnkrClient {
    fn name(&self) -> &'static str {
        "ankr"
    }

    fn cache_key(&self, token: &TokenDescriptor, address: &EvmAddress) -> String {
        let key = CacheKey::new("ankr").with(token);
        match token.token_id {
            Some(_) => key.with(address).build(),
            None => key.build(),
        }
    }

    async fn lookup(
        &self,
        token: &TokenDescriptor,
        address: &EvmAddress,
    ) -> Result<Holding, ProviderError> {
        match &token.token_id {
            Some(token_id) => Ok(Holding::Address(
                self.owns_token_id(token, token_id, address).await?,
            )),
            None => Ok(Holding::Holders(Arc::new(self.fetch_holders(token).await?))),
        }
    }
}
