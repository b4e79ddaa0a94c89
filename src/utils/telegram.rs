//! Telegram client for the Bot API.
//!
//! Covers the handful of methods the bot needs: long-polling updates and
//! replying for the registration dialogue, plus membership lookups and
//! bans for the gated group.
//!
//! # Examples
//! ```no_run
//! use token_gate::utils::telegram::TelegramClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TelegramClient::new(
//!     reqwest::Client::new(),
//!     "bot123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11".to_string(),
//!     -1001234567890,
//! );
//!
//! client.send_message(123456789, "Hello from Rust!").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::handlers::eligibility::reconciler::{MemberState, MembershipBackend};
use crate::handlers::registration::UserId;
use crate::utils::retry::with_retry;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug)]
pub enum TelegramError {
    Http(reqwest::Error),
    Api {
        code: Option<i64>,
        description: String,
    },
    Malformed(String),
}

impl std::fmt::Display for TelegramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelegramError::Http(e) => write!(f, "Telegram request failed: {}", e),
            TelegramError::Api {
                code: Some(code),
                description,
            } => write!(f, "Telegram API returned {}: {}", code, description),
            TelegramError::Api {
                code: None,
                description,
            } => write!(f, "Telegram API error: {}", description),
            TelegramError::Malformed(msg) => write!(f, "Malformed Telegram response: {}", msg),
        }
    }
}

impl std::error::Error for TelegramError {}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Http(e)
    }
}

impl TelegramError {
    fn is_transient(&self) -> bool {
        match self {
            TelegramError::Http(e) => e.is_timeout() || e.is_connect(),
            TelegramError::Api { code: Some(code), .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
    #[serde(default)]
    is_member: Option<bool>,
}

impl ChatMember {
    fn state(&self) -> Result<MemberState, TelegramError> {
        match self.status.as_str() {
            "creator" | "administrator" => Ok(MemberState::Privileged),
            "member" => Ok(MemberState::Member),
            "restricted" if self.is_member.unwrap_or(true) => Ok(MemberState::Member),
            "restricted" | "left" => Ok(MemberState::Left),
            "kicked" => Ok(MemberState::Removed),
            other => Err(TelegramError::Malformed(format!(
                "unknown chat member status '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TelegramClient {
    http_client: reqwest::Client,
    bot_token: String,
    group_id: i64,
    base_url: String,
}

impl TelegramClient {
    pub fn new(http_client: reqwest::Client, bot_token: String, group_id: i64) -> Self {
        Self::with_base_url(
            http_client,
            bot_token,
            group_id,
            DEFAULT_TELEGRAM_API_BASE.to_string(),
        )
    }

    /// Creates a new client with a custom API base URL
    ///
    /// This is useful for testing with a mock server.
    pub fn with_base_url(
        http_client: reqwest::Client,
        bot_token: String,
        group_id: i64,
        base_url: String,
    ) -> Self {
        Self {
            http_client,
            bot_token,
            group_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TelegramError> {
        with_retry(method, TelegramError::is_transient, || self.send(method, &params)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.bot_token, method);
        let response = self.http_client.post(url).json(params).send().await?;

        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            TelegramError::Malformed(format!("{} ({}): {}", method, status, e))
        })?;

        if !body.ok {
            return Err(TelegramError::Api {
                code: body.error_code.or(Some(i64::from(status.as_u16()))),
                description: body.description.unwrap_or_default(),
            });
        }

        body.result
            .ok_or_else(|| TelegramError::Malformed(format!("{} returned no result", method)))
    }

    /// Sends a message to a chat.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _: Value = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    /// Long-poll for new updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    pub async fn get_chat_member(&self, user: UserId) -> Result<MemberState, TelegramError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({
                    "chat_id": self.group_id,
                    "user_id": user.0,
                }),
            )
            .await?;
        member.state()
    }

    pub async fn ban_chat_member(&self, user: UserId) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "banChatMember",
                json!({
                    "chat_id": self.group_id,
                    "user_id": user.0,
                }),
            )
            .await?;
        Ok(())
    }

    /// Only lifts an existing ban; never removes a current member.
    pub async fn unban_chat_member(&self, user: UserId) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "unbanChatMember",
                json!({
                    "chat_id": self.group_id,
                    "user_id": user.0,
                    "only_if_banned": true,
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MembershipBackend for TelegramClient {
    async fn member_state(
        &self,
        user: UserId,
    ) -> Result<MemberState, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.get_chat_member(user).await?)
    }

    async fn remove_allow_rejoin(
        &self,
        user: UserId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.ban_chat_member(user).await?;
        self.unban_chat_member(user).await?;
        Ok(())
    }

    async fn lift_removal(
        &self,
        user: UserId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.unban_chat_member(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:test";
    const GROUP: i64 = -100200300;

    fn client(server: &MockServer) -> TelegramClient {
        TelegramClient::with_base_url(
            reqwest::Client::new(),
            TOKEN.to_string(),
            GROUP,
            server.uri(),
        )
    }

    async fn mount_member_status(server: &MockServer, user: i64, member: Value) {
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getChatMember", TOKEN)))
            .and(body_partial_json(json!({"chat_id": GROUP, "user_id": user})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": member})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_member_status_mapping() {
        let server = MockServer::start().await;
        mount_member_status(&server, 1, json!({"status": "member"})).await;
        mount_member_status(&server, 2, json!({"status": "kicked"})).await;
        mount_member_status(&server, 3, json!({"status": "left"})).await;
        mount_member_status(&server, 4, json!({"status": "administrator"})).await;
        mount_member_status(&server, 5, json!({"status": "restricted", "is_member": false}))
            .await;

        let telegram = client(&server);
        assert_eq!(telegram.get_chat_member(UserId(1)).await.unwrap(), MemberState::Member);
        assert_eq!(telegram.get_chat_member(UserId(2)).await.unwrap(), MemberState::Removed);
        assert_eq!(telegram.get_chat_member(UserId(3)).await.unwrap(), MemberState::Left);
        assert_eq!(
            telegram.get_chat_member(UserId(4)).await.unwrap(),
            MemberState::Privileged
        );
        assert_eq!(telegram.get_chat_member(UserId(5)).await.unwrap(), MemberState::Left);
    }

    #[tokio::test]
    async fn test_remove_allow_rejoin_bans_then_unbans() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/banChatMember", TOKEN)))
            .and(body_partial_json(json!({"chat_id": GROUP, "user_id": 9})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/unbanChatMember", TOKEN)))
            .and(body_partial_json(json!({"user_id": 9, "only_if_banned": true})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server).remove_allow_rejoin(UserId(9)).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_surfaces_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/banChatMember", TOKEN)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: can't remove chat owner"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).ban_chat_member(UserId(1)).await.unwrap_err();
        assert!(matches!(err, TelegramError::Api { code: Some(400), .. }));
        assert!(err.to_string().contains("chat owner"));
    }

    #[tokio::test]
    async fn test_get_updates_parses_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getUpdates", TOKEN)))
            .and(body_partial_json(json!({"offset": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {
                        "update_id": 10,
                        "message": {
                            "message_id": 1,
                            "chat": {"id": 42, "type": "private"},
                            "from": {"id": 42, "is_bot": false, "first_name": "A"},
                            "text": "/start"
                        }
                    },
                    {"update_id": 11}
                ]
            })))
            .mount(&server)
            .await;

        let updates = client(&server).get_updates(10, 0).await.unwrap();
        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.kind, "private");
        assert_eq!(message.from.as_ref().unwrap().id, 42);
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert!(updates[1].message.is_none());
    }
}
