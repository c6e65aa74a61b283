//! Environment-backed runtime configuration for `realtime-tail`.

use std::{env, time::Duration};

use realtime_core::{
    EventType, LoopConfig, NarrowFilter, QueueConfig, RetryPolicy, events::UnknownEventType,
};
use thiserror::Error;
use url::Url;

const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 10 * 60;

/// Runtime configuration used by the tail app.
#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    /// Server base URL.
    pub site: Url,
    /// Bot or user email used for basic auth.
    pub email: String,
    /// API key paired with `email`.
    pub api_key: String,
    /// Event types to subscribe to; empty subscribes to everything.
    pub event_types: Vec<EventType>,
    /// Message filter applied by the server.
    pub narrow: NarrowFilter,
    pub all_public_streams: Option<bool>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub poll_timeout: Duration,
}

impl TailConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let site_raw = required_trimmed_env("ZULIP_SITE", &mut lookup)?;
        let site = Url::parse(&site_raw).map_err(|err| ConfigError::InvalidValue {
            key: "ZULIP_SITE",
            value: site_raw.clone(),
            reason: err.to_string(),
        })?;
        let email = required_trimmed_env("ZULIP_EMAIL", &mut lookup)?;
        let api_key = required_trimmed_env("ZULIP_API_KEY", &mut lookup)?;

        let event_types = match optional_trimmed_env("REALTIME_TAIL_EVENT_TYPES", &mut lookup) {
            Some(value) => parse_event_types(&value).map_err(|err| ConfigError::InvalidValue {
                key: "REALTIME_TAIL_EVENT_TYPES",
                value,
                reason: err.to_string(),
            })?,
            None => Vec::new(),
        };

        let narrow = match optional_trimmed_env("REALTIME_TAIL_NARROW", &mut lookup) {
            Some(value) => value
                .parse::<NarrowFilter>()
                .map_err(|err| ConfigError::InvalidValue {
                    key: "REALTIME_TAIL_NARROW",
                    value,
                    reason: err.to_string(),
                })?,
            None => NarrowFilter::new(),
        };

        let all_public_streams =
            parse_optional_bool("REALTIME_TAIL_ALL_PUBLIC_STREAMS", &mut lookup)?;
        let backoff_base_ms = parse_optional_u64_with_default(
            "REALTIME_TAIL_BACKOFF_BASE_MS",
            DEFAULT_BACKOFF_BASE_MS,
            &mut lookup,
        )?;
        let backoff_max_ms = parse_optional_u64_with_default(
            "REALTIME_TAIL_BACKOFF_MAX_MS",
            DEFAULT_BACKOFF_MAX_MS,
            &mut lookup,
        )?;
        let poll_timeout_secs = parse_optional_u64_with_default(
            "REALTIME_TAIL_POLL_TIMEOUT_SECS",
            DEFAULT_POLL_TIMEOUT_SECS,
            &mut lookup,
        )?;

        if backoff_base_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REALTIME_TAIL_BACKOFF_BASE_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if backoff_max_ms < backoff_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "REALTIME_TAIL_BACKOFF_MAX_MS",
                value: backoff_max_ms.to_string(),
                reason: format!("must be at least the base delay ({backoff_base_ms})"),
            });
        }
        if poll_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REALTIME_TAIL_POLL_TIMEOUT_SECS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            site,
            email,
            api_key,
            event_types,
            narrow,
            all_public_streams,
            backoff_base_ms,
            backoff_max_ms,
            poll_timeout: Duration::from_secs(poll_timeout_secs),
        })
    }

    /// Registration options derived from this config.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            all_public_streams: self.all_public_streams,
            ..QueueConfig::default()
        }
        .with_event_types(self.event_types.iter().copied())
        .with_narrow(self.narrow.clone())
    }

    /// Loop tuning derived from this config.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            retry: RetryPolicy::new(self.backoff_base_ms, self.backoff_max_ms),
            poll_timeout: self.poll_timeout,
            ..LoopConfig::default()
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    #[error("missing required {key}")]
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_event_types(value: &str) -> Result<Vec<EventType>, UnknownEventType> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse::<EventType>)
        .collect()
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_optional_bool<F>(key: &'static str, lookup: &mut F) -> Result<Option<bool>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true or false".to_owned(),
        }),
    }
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use realtime_core::{Narrow, Operator};
    use std::collections::HashMap;

    const CREDENTIALS: [(&str, &str); 3] = [
        ("ZULIP_SITE", "https://chat.example.com"),
        ("ZULIP_EMAIL", "tail-bot@example.com"),
        ("ZULIP_API_KEY", "abc123"),
    ];

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<TailConfig, ConfigError> {
        let map = CREDENTIALS
            .iter()
            .chain(pairs.iter())
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        TailConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_credentials_and_defaults() {
        let cfg = config_from_pairs(&[]).expect("config should parse");

        assert_eq!(cfg.site.as_str(), "https://chat.example.com/");
        assert_eq!(cfg.email, "tail-bot@example.com");
        assert_eq!(cfg.api_key, "abc123");
        assert!(cfg.event_types.is_empty());
        assert!(cfg.narrow.is_empty());
        assert_eq!(cfg.all_public_streams, None);
        assert_eq!(cfg.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);
        assert_eq!(cfg.backoff_max_ms, DEFAULT_BACKOFF_MAX_MS);
        assert_eq!(cfg.poll_timeout, Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS));
    }

    #[test]
    fn credentials_are_required() {
        let err = TailConfig::from_lookup(|_| None).expect_err("missing site must fail");
        assert_eq!(err, ConfigError::Missing { key: "ZULIP_SITE" });

        let err = TailConfig::from_lookup(|key| match key {
            "ZULIP_SITE" => Some("https://chat.example.com".to_owned()),
            "ZULIP_EMAIL" => Some("   ".to_owned()),
            _ => None,
        })
        .expect_err("blank email must fail");
        assert_eq!(err, ConfigError::Missing { key: "ZULIP_EMAIL" });
    }

    #[test]
    fn parses_subscription_options() {
        let cfg = config_from_pairs(&[
            ("REALTIME_TAIL_EVENT_TYPES", "message, typing,,heartbeat"),
            ("REALTIME_TAIL_NARROW", "stream:general -is:starred"),
            ("REALTIME_TAIL_ALL_PUBLIC_STREAMS", "true"),
        ])
        .expect("config should parse");

        assert_eq!(
            cfg.event_types,
            vec![EventType::Message, EventType::Typing, EventType::Heartbeat]
        );
        assert_eq!(
            cfg.narrow,
            NarrowFilter::new()
                .with(Narrow::new(Operator::STREAM, "general"))
                .with(Narrow::is_starred().negate())
        );

        let queue = cfg.queue_config();
        assert_eq!(queue.all_public_streams, Some(true));
        assert_eq!(queue.event_types.len(), 3);
        assert_eq!(queue.narrow.len(), 2);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from_pairs(&[("REALTIME_TAIL_EVENT_TYPES", "message,bogus")])
            .expect_err("unknown event type must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "REALTIME_TAIL_EVENT_TYPES",
                ..
            }
        ));

        let err = config_from_pairs(&[("REALTIME_TAIL_NARROW", "general")])
            .expect_err("narrow without operator must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "REALTIME_TAIL_NARROW",
                ..
            }
        ));

        let err = config_from_pairs(&[("REALTIME_TAIL_ALL_PUBLIC_STREAMS", "maybe")])
            .expect_err("bad bool must fail");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = config_from_pairs(&[("ZULIP_SITE", "chat.example.com")])
            .expect_err("relative site must fail");
        assert!(matches!(err, ConfigError::InvalidValue { key: "ZULIP_SITE", .. }));
    }

    #[test]
    fn validates_backoff_bounds() {
        let cfg = config_from_pairs(&[
            ("REALTIME_TAIL_BACKOFF_BASE_MS", "250"),
            ("REALTIME_TAIL_BACKOFF_MAX_MS", "4000"),
            ("REALTIME_TAIL_POLL_TIMEOUT_SECS", "90"),
        ])
        .expect("config should parse");
        let loop_config = cfg.loop_config();
        assert_eq!(loop_config.retry.base_delay_ms(), 250);
        assert_eq!(loop_config.retry.max_delay_ms(), 4_000);
        assert_eq!(loop_config.poll_timeout, Duration::from_secs(90));

        let err = config_from_pairs(&[
            ("REALTIME_TAIL_BACKOFF_BASE_MS", "5000"),
            ("REALTIME_TAIL_BACKOFF_MAX_MS", "1000"),
        ])
        .expect_err("max below base must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "REALTIME_TAIL_BACKOFF_MAX_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[("REALTIME_TAIL_BACKOFF_BASE_MS", "0")])
            .expect_err("zero base must fail");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
