use std::path::PathBuf;

use crate::config::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldingsProviderKind {
    Ankr,
    Moralis,
}

#[derive(Clone, Debug)]
pub struct EnvVars {
    pub telegram_bot_token: String,
    pub telegram_group_id: i64,
    pub telegram_api_base_url: String, // Override for testing
    pub holdings_provider: HoldingsProviderKind,
    pub ankr_api_key: Option<String>,
    pub ankr_api_base_url: String, // Override for testing
    pub moralis_api_key: Option<String>,
    pub moralis_api_base_url: String, // Override for testing
    pub tokens_to_check: String,
    pub confirmation_cycles: u32,
    pub check_interval_seconds: u64,
    pub startup_delay_seconds: u64,
    pub lookup_concurrency: usize,
    pub dictionary_file: PathBuf,
    pub user_status_file: PathBuf,
    pub disable_membership_actions: bool,
    pub disable_registration_bot: bool,
    // 0 disables the status API
    pub port: u16,
}

impl EnvVars {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup, so tests don't have
    /// to mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let holdings_provider = match var("HOLDINGS_PROVIDER")
            .unwrap_or_else(|| "ankr".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "ankr" => HoldingsProviderKind::Ankr,
            "moralis" => HoldingsProviderKind::Moralis,
            other => return Err(ConfigError::UnknownProvider(other.to_string())),
        };

        let env_vars = Self {
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            telegram_group_id: parse_var("TELEGRAM_GROUP_ID", required("TELEGRAM_GROUP_ID")?)?,
            telegram_api_base_url: var("TELEGRAM_API_BASE_URL")
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            holdings_provider,
            ankr_api_key: var("ANKR_API_KEY"),
            ankr_api_base_url: var("ANKR_API_BASE_URL")
                .unwrap_or_else(|| "https://rpc.ankr.com/multichain".to_string()),
            moralis_api_key: var("MORALIS_API_KEY"),
            moralis_api_base_url: var("MORALIS_API_BASE_URL")
                .unwrap_or_else(|| "https://deep-index.moralis.io/api/v2".to_string()),
            tokens_to_check: var("TOKENS_TO_CHECK").unwrap_or_default(),
            confirmation_cycles: var("CONFIRMATION_CYCLES")
                .map(|s| parse_var("CONFIRMATION_CYCLES", s))
                .transpose()?
                .unwrap_or(3),
            check_interval_seconds: var("CHECK_INTERVAL_SECONDS")
                .map(|s| parse_var("CHECK_INTERVAL_SECONDS", s))
                .transpose()?
                .unwrap_or(3600),
            startup_delay_seconds: var("STARTUP_DELAY_SECONDS")
                .map(|s| parse_var("STARTUP_DELAY_SECONDS", s))
                .transpose()?
                .unwrap_or(10),
            lookup_concurrency: var("LOOKUP_CONCURRENCY")
                .map(|s| parse_var("LOOKUP_CONCURRENCY", s))
                .transpose()?
                .unwrap_or(4),
            dictionary_file: var("DICTIONARY_FILE")
                .unwrap_or_else(|| "user_addresses.json".to_string())
                .into(),
            user_status_file: var("USER_STATUS_FILE")
                .unwrap_or_else(|| "user_statuses.json".to_string())
                .into(),
            disable_membership_actions: var("DISABLE_MEMBERSHIP_ACTIONS")
                .map(|s| parse_flag("DISABLE_MEMBERSHIP_ACTIONS", s))
                .transpose()?
                .unwrap_or(false),
            disable_registration_bot: var("DISABLE_REGISTRATION_BOT")
                .map(|s| parse_flag("DISABLE_REGISTRATION_BOT", s))
                .transpose()?
                .unwrap_or(false),
            port: var("PORT")
                .map(|s| parse_var("PORT", s))
                .transpose()?
                .unwrap_or(3003),
        };

        // The selected provider must have its key
        match env_vars.holdings_provider {
            HoldingsProviderKind::Ankr if env_vars.ankr_api_key.is_none() => {
                return Err(ConfigError::Missing("ANKR_API_KEY"));
            }
            HoldingsProviderKind::Moralis if env_vars.moralis_api_key.is_none() => {
                return Err(ConfigError::Missing("MORALIS_API_KEY"));
            }
            _ => {}
        }

        Ok(env_vars)
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn parse_flag(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("TELEGRAM_GROUP_ID", "-1001234567890"),
        ("ANKR_API_KEY", "ankr-key"),
    ];

    #[test]
    fn test_defaults() {
        let env = EnvVars::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(env.telegram_group_id, -1001234567890);
        assert_eq!(env.holdings_provider, HoldingsProviderKind::Ankr);
        assert_eq!(env.confirmation_cycles, 3);
        assert_eq!(env.check_interval_seconds, 3600);
        assert_eq!(env.startup_delay_seconds, 10);
        assert_eq!(env.dictionary_file, PathBuf::from("user_addresses.json"));
        assert_eq!(env.user_status_file, PathBuf::from("user_statuses.json"));
        assert!(!env.disable_membership_actions);
        assert_eq!(env.port, 3003);
    }

    #[test]
    fn test_missing_required_variable() {
        let err = EnvVars::from_lookup(lookup(&[("TELEGRAM_GROUP_ID", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn test_provider_key_is_required() {
        let err = EnvVars::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_GROUP_ID", "1"),
            ("HOLDINGS_PROVIDER", "moralis"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("MORALIS_API_KEY")));
    }

    #[test]
    fn test_unparsable_number_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push(("CONFIRMATION_CYCLES", "three"));
        let err = EnvVars::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "CONFIRMATION_CYCLES",
                ..
            }
        ));
    }

    #[test]
    fn test_flag_spellings() {
        for (raw, expected) in [
            ("1", true),
            ("yes", true),
            ("TRUE", true),
            (" On ", true),
            ("0", false),
            ("No", false),
            ("false", false),
        ] {
            let mut pairs = BASE.to_vec();
            pairs.push(("DISABLE_MEMBERSHIP_ACTIONS", raw));
            pairs.push(("DISABLE_REGISTRATION_BOT", raw));
            let env = EnvVars::from_lookup(lookup(&pairs)).unwrap();
            assert_eq!(env.disable_membership_actions, expected, "value {:?}", raw);
            assert_eq!(env.disable_registration_bot, expected, "value {:?}", raw);
        }
    }

    #[test]
    fn test_unrecognized_flag_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push(("DISABLE_MEMBERSHIP_ACTIONS", "enabled"));
        let err = EnvVars::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "DISABLE_MEMBERSHIP_ACTIONS",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let mut pairs = BASE.to_vec();
        pairs.push(("HOLDINGS_PROVIDER", "etherscan"));
        let err = EnvVars::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(p) if p == "etherscan"));
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_process_environment() {
        unsafe {
            std::env::set_var("TELEGRAM_BOT_TOKEN", "999:env");
            std::env::set_var("TELEGRAM_GROUP_ID", "-42");
            std::env::set_var("ANKR_API_KEY", "env-key");
            std::env::set_var("DISABLE_MEMBERSHIP_ACTIONS", "true");
        }

        let env = EnvVars::from_env().unwrap();
        assert_eq!(env.telegram_bot_token, "999:env");
        assert_eq!(env.telegram_group_id, -42);
        assert!(env.disable_membership_actions);

        unsafe {
            for key in [
                "TELEGRAM_BOT_TOKEN",
                "TELEGRAM_GROUP_ID",
                "ANKR_API_KEY",
                "DISABLE_MEMBERSHIP_ACTIONS",
            ] {
                std::env::remove_var(key);
            }
        }
    }
}
