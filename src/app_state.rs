use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{ConfigError, GateConfig},
    handlers::{
        eligibility::{
            EligibilityEvaluator, EligibilityTable, HysteresisTracker, MembershipBackend,
            MembershipReconciler, ReconciliationCycle, Scheduler,
        },
        registration::{AddressBook, AddressRegistry, RegistrationDialogue},
    },
    services::{AnkrClient, HoldingsOracle, MoralisClient},
    storage::{JsonFileStore, Persistence},
    utils::{
        env::{EnvVars, HoldingsProviderKind},
        telegram::TelegramClient,
    },
};

/// Every provider call gets this long before it counts as failed.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AppState {
    pub http_client: reqwest::Client,
    pub env_vars: EnvVars,
    pub config: GateConfig,
    pub telegram_client: TelegramClient,
    pub registry: Arc<AddressRegistry>,
    pub tracker: Arc<HysteresisTracker>,
    pub dialogue: Arc<RegistrationDialogue>,
    pub scheduler: Scheduler,
}

impl AppState {
    /// Initialize the application state from the environment: JSON state
    /// files, the configured holdings provider and the Telegram group.
    pub async fn new(env_vars: EnvVars) -> Result<AppState, Box<dyn std::error::Error>> {
        let config = GateConfig::from_env_vars(&env_vars)?;

        let http_client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        let oracle = holdings_oracle(&env_vars, &http_client)?;
        log::info!(
            "Using {} for holdings lookups, {} token(s) configured",
            oracle.name(),
            config.tokens.len()
        );

        let telegram_client = TelegramClient::with_base_url(
            http_client.clone(),
            env_vars.telegram_bot_token.clone(),
            env_vars.telegram_group_id,
            env_vars.telegram_api_base_url.clone(),
        );

        let address_store: Arc<dyn Persistence<AddressBook>> =
            Arc::new(JsonFileStore::new(env_vars.dictionary_file.clone()));
        let status_store: Arc<dyn Persistence<EligibilityTable>> =
            Arc::new(JsonFileStore::new(env_vars.user_status_file.clone()));

        let backend: Arc<dyn MembershipBackend> = Arc::new(telegram_client.clone());

        Ok(Self::build(
            http_client,
            env_vars,
            config,
            telegram_client,
            oracle,
            backend,
            address_store,
            status_store,
        )
        .await)
    }

    /// Wire the components together from already-constructed collaborators.
    #[allow(clippy::too_many_arguments)]
    pub async fn build(
        http_client: reqwest::Client,
        env_vars: EnvVars,
        config: GateConfig,
        telegram_client: TelegramClient,
        oracle: Arc<dyn HoldingsOracle>,
        backend: Arc<dyn MembershipBackend>,
        address_store: Arc<dyn Persistence<AddressBook>>,
        status_store: Arc<dyn Persistence<EligibilityTable>>,
    ) -> AppState {
        let registry = Arc::new(AddressRegistry::load(address_store).await);
        let tracker =
            Arc::new(HysteresisTracker::load(config.confirmation_cycles, status_store).await);

        if config.dry_run {
            log::warn!(
                "Membership actions are disabled, statuses are tracked but the group is never changed"
            );
        }

        let evaluator = EligibilityEvaluator::new(oracle, config.tokens.clone());
        let reconciler =
            MembershipReconciler::new(backend, config.lookup_concurrency, config.dry_run);
        let cycle = ReconciliationCycle::new(
            registry.clone(),
            evaluator,
            tracker.clone(),
            reconciler,
            config.lookup_concurrency,
        );

        let dialogue = Arc::new(RegistrationDialogue::new(registry.clone(), tracker.clone()));

        AppState {
            http_client,
            env_vars,
            config,
            telegram_client,
            registry,
            tracker,
            dialogue,
            scheduler: Scheduler::new(Arc::new(cycle)),
        }
    }
}

fn holdings_oracle(
    env_vars: &EnvVars,
    http_client: &reqwest::Client,
) -> Result<Arc<dyn HoldingsOracle>, ConfigError> {
    let oracle: Arc<dyn HoldingsOracle> = match env_vars.holdings_provider {
        HoldingsProviderKind::Ankr => {
            let api_key = env_vars
                .ankr_api_key
                .clone()
                .ok_or(ConfigError::Missing("ANKR_API_KEY"))?;
            Arc::new(AnkrClient::with_base_url(
                http_client.clone(),
                api_key,
                env_vars.ankr_api_base_url.clone(),
            ))
        }
        HoldingsProviderKind::Moralis => {
            let api_key = env_vars
                .moralis_api_key
                .clone()
                .ok_or(ConfigError::Missing("MORALIS_API_KEY"))?;
            Arc::new(MoralisClient::with_base_url(
                http_client.clone(),
                api_key,
                env_vars.moralis_api_base_url.clone(),
            ))
        }
    };
    Ok(oracle)
}
