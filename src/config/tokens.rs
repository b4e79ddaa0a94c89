//! Token descriptors from the `TOKENS_TO_CHECK` list.
//!
//! `Chain:contract` names a fungible token or a whole NFT collection;
//! `Chain:contract:token_id` names one ERC-1155 token id inside a contract.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::chains::{Chain, UnknownChain};
use crate::utils::address::{EvmAddress, InvalidAddress};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TokenDescriptor {
    pub chain: Chain,
    pub contract: EvmAddress,
    pub token_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenParseError {
    WrongArity(String),
    Chain(UnknownChain),
    Contract(InvalidAddress),
    TokenId(String),
}

impl fmt::Display for TokenParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenParseError::WrongArity(raw) => write!(
                f,
                "Token descriptor '{}' must be Chain:contract or Chain:contract:token_id",
                raw
            ),
            TokenParseError::Chain(e) => write!(f, "{}", e),
            TokenParseError::Contract(e) => write!(f, "Bad contract: {}", e),
            TokenParseError::TokenId(raw) => {
                write!(f, "Token id '{}' must be a non-empty decimal number", raw)
            }
        }
    }
}

impl std::error::Error for TokenParseError {}

impl TokenDescriptor {
    pub fn fungible(chain: Chain, contract: EvmAddress) -> Self {
        Self {
            chain,
            contract,
            token_id: None,
        }
    }

    pub fn semi_fungible(chain: Chain, contract: EvmAddress, token_id: impl Into<String>) -> Self {
        Self {
            chain,
            contract,
            token_id: Some(token_id.into()),
        }
    }

    /// Parse a comma-separated list, skipping blank entries. Order is kept.
    pub fn parse_list(raw: &str) -> Result<Vec<TokenDescriptor>, TokenParseError> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for TokenDescriptor {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').map(str::trim).collect();
        let (chain, contract, token_id) = match parts.as_slice() {
            [chain, contract] => (*chain, *contract, None),
            [chain, contract, token_id] => (*chain, *contract, Some(*token_id)),
            _ => return Err(TokenParseError::WrongArity(s.to_string())),
        };

        let chain: Chain = chain.parse().map_err(TokenParseError::Chain)?;
        let contract = EvmAddress::parse(contract).map_err(TokenParseError::Contract)?;

        let token_id = match token_id {
            Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
                Some(id.to_string())
            }
            Some(id) => return Err(TokenParseError::TokenId(id.to_string())),
            None => None,
        };

        Ok(Self {
            chain,
            contract,
            token_id,
        })
    }
}

impl fmt::Display for TokenDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token_id {
            Some(id) => write!(f, "{}:{}:{}", self.chain, self.contract, id),
            None => write!(f, "{}:{}", self.chain, self.contract),
        }
    }
}
