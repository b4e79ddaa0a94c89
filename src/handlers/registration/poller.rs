//! Long-polling loop feeding private messages into the registration dialogue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::dialogue::RegistrationDialogue;
use super::registry::UserId;
use crate::utils::telegram::{TelegramClient, TelegramError, Update};

/// Seconds Telegram holds a getUpdates request open.
const LONG_POLL_TIMEOUT_SECS: u64 = 30;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct RegistrationPoller {
    telegram: TelegramClient,
    dialogue: Arc<RegistrationDialogue>,
    offset: i64,
    poll_timeout_secs: u64,
}

impl RegistrationPoller {
    pub fn new(telegram: TelegramClient, dialogue: Arc<RegistrationDialogue>) -> Self {
        Self {
            telegram,
            dialogue,
            offset: 0,
            poll_timeout_secs: LONG_POLL_TIMEOUT_SECS,
        }
    }

    #[cfg(test)]
    fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Fetch one batch of updates and answer them. Returns how many messages were handled.
    pub async fn poll_once(&mut self) -> Result<usize, TelegramError> {
        let updates = self
            .telegram
            .get_updates(self.offset, self.poll_timeout_secs)
            .await?;

        let mut handled = 0;
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            if self.handle_update(update).await {
                handled += 1;
            }
        }
        Ok(handled)
    }

    async fn handle_update(&self, update: Update) -> bool {
        let Some(message) = update.message else {
            return false;
        };
        // The gated group itself is never a place for the dialogue
        if message.chat.kind != "private" {
            return false;
        }
        let (Some(from), Some(text)) = (message.from, message.text) else {
            return false;
        };

        let reply = self.dialogue.handle(UserId(from.id), &text).await;
        if let Err(e) = self.telegram.send_message(message.chat.id, &reply).await {
            log::error!("[poller] Failed to reply to user {}: {}", from.id, e);
        }
        true
    }

    /// Poll until `shutdown` flips to true, backing off on errors.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!("[poller] Starting registration bot");
        let mut backoff = INITIAL_BACKOFF;

        while !*shutdown.borrow() {
            let result = tokio::select! {
                result = self.poll_once() => result,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match result {
                Ok(_) => backoff = INITIAL_BACKOFF,
                Err(e) => {
                    log::warn!(
                        "[poller] getUpdates failed: {}, retrying in {:?}",
                        e,
                        backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        log::info!("[poller] Stopped");
    }
}
