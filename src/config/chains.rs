use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EVM chains the holdings providers can be queried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
    Optimism,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Ethereum, Chain::Base, Chain::Arbitrum, Chain::Optimism];

    pub fn name(self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::Base => "Base",
            Chain::Arbitrum => "Arbitrum",
            Chain::Optimism => "Optimism",
        }
    }

    /// Value of the `chain` query parameter in the Moralis deep-index API.
    pub fn moralis_id(self) -> &'static str {
        match self {
            Chain::Ethereum => "eth",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
        }
    }

    /// Value of the `blockchain` parameter in the Ankr advanced API.
    pub fn ankr_id(self) -> &'static str {
        match self {
            Chain::Ethereum => "eth",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChain(pub String);

impl fmt::Display for UnknownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supported: Vec<&str> = Chain::ALL.iter().map(|c| c.name()).collect();
        write!(
            f,
            "Unknown chain '{}' (supported: {})",
            self.0,
            supported.join(", ")
        )
    }
}

impl std::error::Error for UnknownChain {}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Chain::ALL
            .into_iter()
            .find(|chain| chain.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownChain(trimmed.to_string()))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
