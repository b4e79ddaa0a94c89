//! Gating configuration
//!
//! Holds the static knobs of the reconciliation loop: which tokens grant
//! access, how many confirming cycles flip a status, and how often to run.

pub mod chains;
pub mod tokens;

pub use chains::Chain;
pub use tokens::{TokenDescriptor, TokenParseError};

use std::num::NonZeroU32;
use std::time::Duration;

use crate::utils::env::EnvVars;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
    UnknownProvider(String),
    Token(TokenParseError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} is not set", key),
            ConfigError::Invalid { key, value } => {
                write!(f, "{} has an invalid value: '{}'", key, value)
            }
            ConfigError::UnknownProvider(name) => {
                write!(f, "Unknown HOLDINGS_PROVIDER '{}' (expected ankr or moralis)", name)
            }
            ConfigError::Token(e) => write!(f, "TOKENS_TO_CHECK: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<TokenParseError> for ConfigError {
    fn from(e: TokenParseError) -> Self {
        ConfigError::Token(e)
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Checked in order; holding any one of them is enough.
    pub tokens: Vec<TokenDescriptor>,
    /// Consecutive same-direction signals needed to flip a status (N).
    pub confirmation_cycles: NonZeroU32,
    pub check_interval: Duration,
    pub startup_delay: Duration,
    /// Upper bound on in-flight oracle and chat API calls within a cycle.
    pub lookup_concurrency: usize,
    /// Update statuses but never touch the group.
    pub dry_run: bool,
}

impl GateConfig {
    pub fn from_env_vars(env_vars: &EnvVars) -> Result<Self, ConfigError> {
        let tokens = TokenDescriptor::parse_list(&env_vars.tokens_to_check)?;

        let confirmation_cycles =
            NonZeroU32::new(env_vars.confirmation_cycles).ok_or(ConfigError::Invalid {
                key: "CONFIRMATION_CYCLES",
                value: env_vars.confirmation_cycles.to_string(),
            })?;

        if env_vars.check_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "CHECK_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if env_vars.lookup_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "LOOKUP_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if tokens.is_empty() {
            log::warn!(
                "TOKENS_TO_CHECK is empty, every registered user will be treated as ineligible"
            );
        }

        Ok(Self {
            tokens,
            confirmation_cycles,
            check_interval: Duration::from_secs(env_vars.check_interval_seconds),
            startup_delay: Duration::from_secs(env_vars.startup_delay_seconds),
            lookup_concurrency: env_vars.lookup_concurrency,
            dry_run: env_vars.disable_membership_actions,
        })
    }
}
