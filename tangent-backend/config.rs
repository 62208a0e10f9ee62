use std::time::Duration;

use crate::chat::xai;

/// Server configuration loaded from environment variables.
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub chat: ChatConfig,
}

/// Where model requests go.
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// When set, requests are forwarded to another relay instead of the model API.
    pub relay_url: Option<String>,
    pub idle_timeout: Duration,
}

/// Raw chat settings as they come from the environment.
#[derive(Default)]
pub struct RawChatValues<'a> {
    pub api_key: Option<&'a str>,
    pub fallback_api_key: Option<&'a str>,
    pub base_url: Option<&'a str>,
    pub model: Option<&'a str>,
    pub relay_url: Option<&'a str>,
    pub idle_timeout_secs: Option<&'a str>,
}

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).map(String::from)
}

impl Config {
    pub fn from_env() -> Self {
        let api_key = std::env::var("XAI_API_KEY").ok();
        let fallback_api_key = std::env::var("GROK_API_KEY").ok();
        let base_url = std::env::var("CHAT_BASE_URL").ok();
        let model = std::env::var("CHAT_MODEL").ok();
        let relay_url = std::env::var("CHAT_RELAY_URL").ok();
        let idle_timeout_secs = std::env::var("STREAM_IDLE_TIMEOUT_SECS").ok();

        Self::from_raw_values(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("SENTRY_DSN").ok().as_deref(),
            std::env::var("ENVIRONMENT").ok().as_deref(),
            RawChatValues {
                api_key: api_key.as_deref(),
                fallback_api_key: fallback_api_key.as_deref(),
                base_url: base_url.as_deref(),
                model: model.as_deref(),
                relay_url: relay_url.as_deref(),
                idle_timeout_secs: idle_timeout_secs.as_deref(),
            },
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        port: Option<&str>,
        sentry_dsn: Option<&str>,
        environment: Option<&str>,
        chat: RawChatValues<'_>,
    ) -> Self {
        let port = port.and_then(|v| v.parse().ok()).unwrap_or(8081);

        let sentry_dsn = non_empty(sentry_dsn);

        let environment = non_empty(environment).unwrap_or_else(|| "local".to_string());

        let idle_secs = chat
            .idle_timeout_secs
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);

        let chat = ChatConfig {
            api_key: non_empty(chat.api_key).or_else(|| non_empty(chat.fallback_api_key)),
            base_url: non_empty(chat.base_url).unwrap_or_else(|| xai::DEFAULT_BASE_URL.to_string()),
            model: non_empty(chat.model).unwrap_or_else(|| xai::DEFAULT_MODEL.to_string()),
            relay_url: non_empty(chat.relay_url),
            idle_timeout: Duration::from_secs(idle_secs),
        };

        Config {
            port,
            sentry_dsn,
            environment,
            chat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        Config::from_raw_values(None, None, None, RawChatValues::default())
    }

    #[test]
    fn test_config_invalid_port_uses_default() {
        let config = Config::from_raw_values(Some("not-a-number"), None, None, RawChatValues::default());
        assert_eq!(config.port, 8081);
    }

    #[test]
    fn test_config_valid_port() {
        let config = Config::from_raw_values(Some("3000"), None, None, RawChatValues::default());
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_config_empty_sentry_dsn_is_none() {
        let config = Config::from_raw_values(None, Some(""), None, RawChatValues::default());
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_config_default_environment() {
        assert_eq!(defaults().environment, "local");
    }

    #[test]
    fn test_chat_defaults() {
        let config = defaults();
        assert!(config.chat.api_key.is_none());
        assert_eq!(config.chat.base_url, xai::DEFAULT_BASE_URL);
        assert_eq!(config.chat.model, "grok-4");
        assert!(config.chat.relay_url.is_none());
        assert_eq!(config.chat.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_fallback_api_key() {
        let config = Config::from_raw_values(
            None,
            None,
            None,
            RawChatValues {
                api_key: Some(""),
                fallback_api_key: Some("grok-key"),
                ..Default::default()
            },
        );
        assert_eq!(config.chat.api_key.as_deref(), Some("grok-key"));

        let config = Config::from_raw_values(
            None,
            None,
            None,
            RawChatValues {
                api_key: Some("xai-key"),
                fallback_api_key: Some("grok-key"),
                ..Default::default()
            },
        );
        assert_eq!(config.chat.api_key.as_deref(), Some("xai-key"));
    }

    #[test]
    fn test_idle_timeout_rejects_zero_and_garbage() {
        for raw in ["0", "soon"] {
            let config = Config::from_raw_values(
                None,
                None,
                None,
                RawChatValues {
                    idle_timeout_secs: Some(raw),
                    ..Default::default()
                },
            );
            assert_eq!(config.chat.idle_timeout, Duration::from_secs(120));
        }

        let config = Config::from_raw_values(
            None,
            None,
            None,
            RawChatValues {
                idle_timeout_secs: Some("30"),
                relay_url: Some("https://relay.example"),
                ..Default::default()
            },
        );
        assert_eq!(config.chat.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.chat.relay_url.as_deref(), Some("https://relay.example"));
    }
}
