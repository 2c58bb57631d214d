//! Configuration module for CTOWatch

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use teloxide::types::{ChatId, Recipient};
use thiserror::Error;

/// Floor for the pause before each token-details request
pub const MIN_DETAILS_DELAY: Duration = Duration::from_secs(1);

/// Startup configuration failures. Any of these aborts the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_channel: Recipient,
    pub admin_user_ids: Vec<u64>,

    // DexScreener
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub details_delay: Duration,

    // Pipeline
    pub check_interval: Duration,
    pub dispatch_delay: Duration,
    pub seen_file: PathBuf,

    // Health server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_bot_token =
            get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let channel =
            get("TELEGRAM_CHANNEL_ID").ok_or(ConfigError::Missing("TELEGRAM_CHANNEL_ID"))?;
        let telegram_channel = parse_recipient(&channel)?;

        let admin_user_ids = match get("TELEGRAM_ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map_err(|_| ConfigError::Invalid {
                        key: "TELEGRAM_ADMIN_IDS",
                        value: s.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let request_timeout = match parse_or(&get, "REQUEST_TIMEOUT_SECS", 10u64)? {
            0 => {
                return Err(ConfigError::Invalid {
                    key: "REQUEST_TIMEOUT_SECS",
                    value: "0".to_string(),
                })
            }
            secs => Duration::from_secs(secs),
        };

        Ok(Self {
            telegram_bot_token,
            telegram_channel,
            admin_user_ids,
            api_base_url: get("DEXSCREENER_API_URL")
                .unwrap_or_else(|| "https://api.dexscreener.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            request_timeout,
            details_delay: Duration::from_millis(parse_or(&get, "DETAILS_DELAY_MS", 1000)?)
                .max(MIN_DETAILS_DELAY),
            check_interval: Duration::from_secs(parse_or(&get, "CHECK_INTERVAL_SECS", 60)?.max(1)),
            dispatch_delay: Duration::from_millis(parse_or(&get, "DISPATCH_DELAY_MS", 2000)?),
            seen_file: get("SEEN_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/seen_tokens.json")),
            health_port: parse_or(&get, "HEALTH_PORT", 3000)?,
        })
    }

    /// Whether `user_id` may run control commands (`/check`, `/clear`)
    pub fn is_admin(&self, user_id: Option<u64>) -> bool {
        if self.admin_user_ids.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.admin_user_ids.contains(&id))
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Channels are addressed either by numeric id or by `@username`.
fn parse_recipient(raw: &str) -> Result<Recipient, ConfigError> {
    if raw.starts_with('@') {
        return Ok(Recipient::ChannelUsername(raw.to_string()));
    }
    raw.parse::<i64>()
        .map(|id| Recipient::Id(ChatId(id)))
        .map_err(|_| ConfigError::Invalid {
            key: "TELEGRAM_CHANNEL_ID",
            value: raw.to_string(),
        })
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

    #[test]
    fn missing_token_refuses_to_start() {
        let err = Config::from_lookup(lookup(&[("TELEGRAM_CHANNEL_ID", "-100123")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn missing_channel_refuses_to_start() {
        let err = Config::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "123:abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_CHANNEL_ID")));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "   "),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
        ]))
        .unwrap();

        assert_eq!(config.telegram_channel, Recipient::Id(ChatId(-100123)));
        assert_eq!(config.api_base_url, "https://api.dexscreener.com");
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.dispatch_delay, Duration::from_secs(2));
        assert_eq!(config.details_delay, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.seen_file, PathBuf::from("data/seen_tokens.json"));
        assert_eq!(config.health_port, 3000);
        assert!(config.is_admin(None));
    }

    #[test]
    fn channel_username_and_admins() {
        let config = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHANNEL_ID", "@cto_alerts"),
            ("TELEGRAM_ADMIN_IDS", "42, 7"),
            ("DEXSCREENER_API_URL", "http://localhost:9000/"),
        ]))
        .unwrap();

        assert_eq!(
            config.telegram_channel,
            Recipient::ChannelUsername("@cto_alerts".to_string())
        );
        assert_eq!(config.api_base_url, "http://localhost:9000");
        assert!(config.is_admin(Some(42)));
        assert!(!config.is_admin(Some(8)));
        assert!(!config.is_admin(None));
    }

    #[test]
    fn invalid_number_is_fatal() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
            ("CHECK_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CHECK_INTERVAL_SECS", .. }));
    }

    #[test]
    fn details_delay_never_drops_below_floor() {
        let config = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
            ("DETAILS_DELAY_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.details_delay, MIN_DETAILS_DELAY);

        let config = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
            ("DETAILS_DELAY_MS", "2500"),
        ]))
        .unwrap();
        assert_eq!(config.details_delay, Duration::from_millis(2500));
    }

    #[test]
    fn zero_request_timeout_is_fatal() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
            ("REQUEST_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REQUEST_TIMEOUT_SECS", .. }));
    }
}
