use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Once;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use token_gate::AppState;
use token_gate::utils::env::EnvVars;

static INIT: Once = Once::new();

pub const BOT_TOKEN: &str = "123456:test-token";
pub const GROUP_ID: i64 = -1001234567890;
pub const ANKR_KEY: &str = "test-key";
pub const CONTRACT: &str = "0x495f947276749ce646f68ac8c248420045cb7b5e";

/// Initialize logging once for the whole test binary.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Mock servers standing in for Ankr and the Telegram Bot API.
pub struct TestBackends {
    pub ankr: MockServer,
    pub telegram: MockServer,
}

impl TestBackends {
    pub async fn start() -> Self {
        init_logging();
        Self {
            ankr: MockServer::start().await,
            telegram: MockServer::start().await,
        }
    }

    /// Environment pointing every external call at the mock servers and all
    /// state files into `dir`.
    pub fn env_vars(&self, dir: &Path, extra: &[(&str, &str)]) -> EnvVars {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("TELEGRAM_BOT_TOKEN".to_string(), BOT_TOKEN.to_string()),
            ("TELEGRAM_GROUP_ID".to_string(), GROUP_ID.to_string()),
            ("TELEGRAM_API_BASE_URL".to_string(), self.telegram.uri()),
            ("ANKR_API_KEY".to_string(), ANKR_KEY.to_string()),
            ("ANKR_API_BASE_URL".to_string(), self.ankr.uri()),
            ("TOKENS_TO_CHECK".to_string(), format!("Ethereum:{}", CONTRACT)),
            (
                "DICTIONARY_FILE".to_string(),
                dir.join("user_addresses.json").display().to_string(),
            ),
            (
                "USER_STATUS_FILE".to_string(),
                dir.join("user_statuses.json").display().to_string(),
            ),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        EnvVars::from_lookup(|key| vars.get(key).cloned()).expect("valid test environment")
    }

    pub async fn state(&self, dir: &Path, extra: &[(&str, &str)]) -> AppState {
        AppState::new(self.env_vars(dir, extra))
            .await
            .expect("Failed to initialize app state")
    }

    pub async fn mount_holders(&self, holders: &[&str]) {
        Mock::given(method("POST"))
            .and(path(format!("/{}", ANKR_KEY)))
            .and(body_partial_json(json!({
                "method": "ankr_getNFTHolders",
                "params": {"contractAddress": CONTRACT}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"holders": holders, "nextPageToken": ""}
            })))
            .mount(&self.ankr)
            .await;
    }

    pub async fn mount_member_status(&self, user: i64, status: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/getChatMember", BOT_TOKEN)))
            .and(body_partial_json(json!({"chat_id": GROUP_ID, "user_id": user})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "status": status,
                    "user": {"id": user, "is_bot": false, "first_name": "U"}
                }
            })))
            .mount(&self.telegram)
            .await;
    }

    /// Expect exactly `times` calls of a membership method for `user`.
    pub async fn expect_membership_call(&self, api_method: &str, user: i64, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/{}", BOT_TOKEN, api_method)))
            .and(body_partial_json(json!({"chat_id": GROUP_ID, "user_id": user})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})),
            )
            .expect(times)
            .mount(&self.telegram)
            .await;
    }
}

pub fn read_json(path: &Path) -> Value {
    let raw = std::fs::read_to_string(path).expect("state file exists");
    serde_json::from_str(&raw).expect("state file is valid JSON")
}
