//! Registration dialogue
//!
//! Per-user conversation that collects an EVM address over private messages
//! and binds it in the [`AddressRegistry`]. Validation problems are answered
//! in the chat and never escape as errors.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::registry::{AddressRegistry, BindOutcome, RegistryError, UserId};
use crate::handlers::eligibility::tracker::HysteresisTracker;
use crate::utils::address::EvmAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueState {
    Idle,
    AwaitingAddress,
    ConfirmOverwrite { address: EvmAddress },
}

enum Answer {
    Yes,
    No,
}

fn parse_answer(text: &str) -> Option<Answer> {
    match text.trim().to_lowercase().as_str() {
        "yes" | "y" | "да" => Some(Answer::Yes),
        "no" | "n" | "нет" => Some(Answer::No),
        _ => None,
    }
}

/// Strip a `@botname` suffix so `/start@my_bot` matches `/start`.
fn command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    Some(first.split('@').next().unwrap_or(first))
}

pub struct RegistrationDialogue {
    registry: Arc<AddressRegistry>,
    tracker: Arc<HysteresisTracker>,
    states: Mutex<HashMap<UserId, DialogueState>>,
}

impl RegistrationDialogue {
    pub fn new(registry: Arc<AddressRegistry>, tracker: Arc<HysteresisTracker>) -> Self {
        Self {
            registry,
            tracker,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state_of(&self, user: UserId) -> DialogueState {
        self.states
            .lock()
            .await
            .get(&user)
            .cloned()
            .unwrap_or(DialogueState::Idle)
    }

    async fn set_state(&self, user: UserId, state: DialogueState) {
        let mut states = self.states.lock().await;
        if state == DialogueState::Idle {
            states.remove(&user);
        } else {
            states.insert(user, state);
        }
    }

    /// Handle one private message and return the reply to send back.
    pub async fn handle(&self, user: UserId, text: &str) -> String {
        match command(text) {
            Some("/start") => return self.start(user).await,
            Some("/cancel") => {
                self.set_state(user, DialogueState::Idle).await;
                return "Operation cancelled.".to_string();
            }
            Some("/status") => return self.status(user).await,
            _ => {}
        }

        match self.state_of(user).await {
            DialogueState::Idle => {
                "Send /start to register or change your address, or /status to see your current status."
                    .to_string()
            }
            DialogueState::AwaitingAddress => self.enter_address(user, text).await,
            DialogueState::ConfirmOverwrite { address } => {
                self.confirm_overwrite(user, address, text).await
            }
        }
    }

    async fn start(&self, user: UserId) -> String {
        self.set_state(user, DialogueState::AwaitingAddress).await;
        match self.registry.address_of(user).await {
            Some(address) => format!(
                "Your linked address is {}. Send a new EVM address to replace it, or /cancel to keep it.",
                address
            ),
            None => "You have no linked address yet. Please send your EVM address.".to_string(),
        }
    }

    async fn enter_address(&self, user: UserId, text: &str) -> String {
        let Ok(address) = EvmAddress::parse(text) else {
            return "Invalid address format. Please send a valid EVM address (0x followed by 40 hex characters)."
                .to_string();
        };

        if let Err(RegistryError::AddressTaken { .. }) =
            self.registry.check_available(user, &address).await
        {
            return "This address is already linked to another user. Please send a different address."
                .to_string();
        }

        match self.registry.address_of(user).await {
            Some(current) if current == address => {
                self.set_state(user, DialogueState::Idle).await;
                format!("{} is already your linked address. Nothing changed.", address)
            }
            Some(current) => {
                let reply = format!(
                    "You already have {} linked. Replace it with {}? (yes/no)",
                    current, address
                );
                self.set_state(user, DialogueState::ConfirmOverwrite { address })
                    .await;
                reply
            }
            None => self.bind(user, address, "linked").await,
        }
    }

    async fn confirm_overwrite(&self, user: UserId, address: EvmAddress, text: &str) -> String {
        match parse_answer(text) {
            Some(Answer::Yes) => self.bind(user, address, "updated").await,
            Some(Answer::No) => {
                self.set_state(user, DialogueState::Idle).await;
                "Cancelled. Your address was not changed.".to_string()
            }
            None => "Please answer 'yes' or 'no'.".to_string(),
        }
    }

    async fn bind(&self, user: UserId, address: EvmAddress, verb: &str) -> String {
        let reply = match self.registry.bind(user, address.clone()).await {
            Ok(BindOutcome::Unchanged) => {
                format!("{} is already your linked address. Nothing changed.", address)
            }
            Ok(_) => format!("Address successfully {}: {}", verb, address),
            Err(RegistryError::AddressTaken { .. }) => {
                // Someone claimed it between the prompt and the confirmation
                "This address is already linked to another user. Please send a different address."
                    .to_string()
            }
            Err(RegistryError::Store(e)) => {
                log::error!("[dialogue] Failed to save binding for user {}: {}", user, e);
                "Something went wrong while saving your address. Please try again later."
                    .to_string()
            }
        };
        self.set_state(user, DialogueState::Idle).await;
        reply
    }

    async fn status(&self, user: UserId) -> String {
        let Some(address) = self.registry.address_of(user).await else {
            return "You have no linked address. Send /start to register one.".to_string();
        };
        let record = self.tracker.get(user).await.unwrap_or_default();
        format!(
            "Linked address: {}\nStatus: {} ({}/{} confirmations)",
            address,
            record.status,
            record.counter,
            self.tracker.threshold()
        )
    }
}
