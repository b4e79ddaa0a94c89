//! Test utilities shared by unit tests
//!
//! Builds an [`AppState`] over in-memory stores so handlers and routes can be
//! exercised without touching the filesystem or the network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;
use crate::config::{GateConfig, TokenDescriptor};
use crate::handlers::eligibility::{EligibilityTable, MemberState, MembershipBackend};
use crate::handlers::registration::{AddressBook, UserId};
use crate::services::{Holding, HoldingsOracle, ProviderError};
use crate::storage::MemoryStore;
use crate::utils::address::EvmAddress;
use crate::utils::env::EnvVars;
use crate::utils::telegram::TelegramClient;

/// Minimal environment for tests, with `extra` overriding the defaults.
pub fn test_env_vars(extra: &[(&str, &str)]) -> EnvVars {
    let mut vars: HashMap<String, String> = [
        ("TELEGRAM_BOT_TOKEN", "123:test"),
        ("TELEGRAM_GROUP_ID", "-1001"),
        ("ANKR_API_KEY", "test-key"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    EnvVars::from_lookup(|key| vars.get(key).cloned()).expect("valid test environment")
}

/// Oracle that knows of no holders at all.
pub struct EmptyOracle;

#[async_trait]
impl HoldingsOracle for EmptyOracle {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn cache_key(&self, token: &TokenDescriptor, _address: &EvmAddress) -> String {
        token.to_string()
    }

    async fn lookup(
        &self,
        _token: &TokenDescriptor,
        _address: &EvmAddress,
    ) -> Result<Holding, ProviderError> {
        Ok(Holding::Address(false))
    }
}

/// Backend where everybody is already gone.
pub struct EmptyGroup;

#[async_trait]
impl MembershipBackend for EmptyGroup {
    async fn member_state(
        &self,
        _user: UserId,
    ) -> Result<MemberState, Box<dyn std::error::Error + Send + Sync>> {
        Ok(MemberState::Left)
    }

    async fn remove_allow_rejoin(
        &self,
        _user: UserId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    async fn lift_removal(
        &self,
        _user: UserId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Initialize app state over memory stores, an empty oracle and an empty group.
pub async fn init_test_state() -> AppState {
    let env_vars = test_env_vars(&[]);
    let config = GateConfig::from_env_vars(&env_vars).expect("valid test config");
    let http_client = reqwest::Client::new();
    let telegram_client = TelegramClient::with_base_url(
        http_client.clone(),
        env_vars.telegram_bot_token.clone(),
        env_vars.telegram_group_id,
        "http://127.0.0.1:9".to_string(),
    );

    AppState::build(
        http_client,
        env_vars,
        config,
        telegram_client,
        Arc::new(EmptyOracle),
        Arc::new(EmptyGroup),
        Arc::new(MemoryStore::<AddressBook>::new()),
        Arc::new(MemoryStore::<EligibilityTable>::new()),
    )
    .await
}
