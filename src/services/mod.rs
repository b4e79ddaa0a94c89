//! Services module for external integrations

pub mod ankr;
pub mod holdings_oracle;
pub mod moralis;

pub use ankr::AnkrClient;
pub use holdings_oracle::{Holding, HoldingsOracle, ProviderError};
pub use moralis::MoralisClient;
