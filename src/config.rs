//! Process configuration read from the environment (after `.env` is loaded).

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::application::tailer::{TailerConfig, DEFAULT_CHANNEL};
use crate::application::worker::{RetryPolicy, WorkerOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub run_migrations: bool,
    pub reconnect_delay: Duration,
    pub catch_up: bool,
    pub kafka_brokers: String,
    pub topic_prefix: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub worker_name: String,
    pub max_attempts: u32,
    pub dead_letter_topic: String,
    pub search_url: String,
    pub search_index: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let topics: Vec<String> = or("WORKER_TOPICS", "Product")
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(ConfigError::Invalid {
                name: "WORKER_TOPICS",
                value: or("WORKER_TOPICS", ""),
            });
        }

        // The insert trigger always notifies on the default channel.
        if let Some(channel) = get("OUTBOX_CHANNEL") {
            if channel != DEFAULT_CHANNEL {
                return Err(ConfigError::Invalid {
                    name: "OUTBOX_CHANNEL",
                    value: channel,
                });
            }
        }

        let max_attempts = parse(&get, "WORKER_MAX_ATTEMPTS", 3u32)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            run_migrations: parse(&get, "RUN_MIGRATIONS", true)?,
            reconnect_delay: Duration::from_secs(parse(&get, "OUTBOX_RECONNECT_SECS", 5u64)?),
            catch_up: parse(&get, "OUTBOX_CATCH_UP", false)?,
            kafka_brokers: or("KAFKA_BROKERS", "localhost:9092"),
            topic_prefix: or("KAFKA_TOPIC_PREFIX", ""),
            group_id: or("WORKER_GROUP_ID", "search-sync"),
            topics,
            worker_name: or("WORKER_NAME", "search-sync-worker"),
            max_attempts,
            dead_letter_topic: or("DEAD_LETTER_TOPIC", "search-sync.dlq"),
            search_url: or("SEARCH_URL", "http://localhost:9200"),
            search_index: or("SEARCH_INDEX", "products"),
        })
    }

    pub fn tailer_config(&self) -> TailerConfig {
        TailerConfig {
            reconnect_delay: self.reconnect_delay,
            catch_up: self.catch_up,
            ..TailerConfig::new(self.database_url.clone())
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
            ..WorkerOptions::new(
                self.group_id.clone(),
                self.topics.clone(),
                self.worker_name.clone(),
            )
        }
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
        assert!(matches!(
            config(&[("DATABASE_URL", "   ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/catalog")]).unwrap();

        assert_eq!(cfg.tailer_config().channel, "outbox_messages");
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
        assert!(!cfg.catch_up);
        assert!(cfg.run_migrations);
        assert_eq!(cfg.topics, vec!["Product".to_string()]);
        assert_eq!(cfg.group_id, "search-sync");
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.dead_letter_topic, "search-sync.dlq");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://db/catalog"),
            ("WORKER_TOPICS", "Product, Category ,"),
            ("OUTBOX_CATCH_UP", "true"),
            ("OUTBOX_RECONNECT_SECS", "2"),
            ("WORKER_MAX_ATTEMPTS", "5"),
            ("WORKER_NAME", "sync-1"),
        ])
        .unwrap();

        assert_eq!(cfg.topics, vec!["Product".to_string(), "Category".to_string()]);
        assert!(cfg.catch_up);

        let tailer = cfg.tailer_config();
        assert_eq!(tailer.connection_string, "postgres://db/catalog");
        assert_eq!(tailer.reconnect_delay, Duration::from_secs(2));
        assert!(tailer.catch_up);

        let worker = cfg.worker_options();
        assert_eq!(worker.name, "sync-1");
        assert_eq!(worker.retry.max_attempts, 5);
        assert_eq!(worker.poll_timeout, Duration::from_millis(100));
        assert_eq!(worker.resubscribe_delay, Duration::from_secs(1));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config(&[
            ("DATABASE_URL", "postgres://db/catalog"),
            ("OUTBOX_CATCH_UP", "sometimes"),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "OUTBOX_CATCH_UP has an invalid value 'sometimes'"
        );

        assert!(config(&[
            ("DATABASE_URL", "postgres://db/catalog"),
            ("WORKER_MAX_ATTEMPTS", "0"),
        ])
        .is_err());
        assert!(config(&[
            ("DATABASE_URL", "postgres://db/catalog"),
            ("WORKER_TOPICS", " , "),
        ])
        .is_err());
    }

    #[test]
    fn outbox_channel_must_match_the_trigger() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://db/catalog"),
            ("OUTBOX_CHANNEL", "outbox_messages"),
        ])
        .unwrap();
        assert_eq!(cfg.tailer_config().channel, DEFAULT_CHANNEL);

        let err = config(&[
            ("DATABASE_URL", "postgres://db/catalog"),
            ("OUTBOX_CHANNEL", "product_changes"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "OUTBOX_CHANNEL",
                ..
            }
        ));
    }
}
