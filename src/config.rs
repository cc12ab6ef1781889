use anyhow::{Context, Result, bail};
use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::{DispatcherConfig, RetryPolicy};
use crate::motive_client::DEFAULT_MOTIVE_API_BASE_URL;
use crate::telegram_client::DEFAULT_TELEGRAM_API_BASE_URL;

/// Process-wide configuration, read once at startup
#[derive(Clone)]
pub struct AppConfig {
    /// Shared secret for webhook HMAC signatures
    pub webhook_secret: String,
    pub telegram_bot_token: String,
    /// Chat or channel the alerts are posted to
    pub telegram_chat_id: String,
    pub telegram_api_base_url: String,
    /// Without a key, drivers are labelled by id instead of looked up
    pub motive_api_key: Option<String>,
    pub motive_api_base_url: String,
    pub dispatcher: DispatcherConfig,
    /// How long shutdown waits for queued alerts to go out
    pub shutdown_drain: Duration,
    pub sentry_dsn: Option<String>,
    /// Deployment environment name ("production", "staging", ...)
    pub environment: String,
}

impl AppConfig {
    /// Initialize configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            optional(key).with_context(|| format!("{} must be set", key))
        };

        let dispatcher = DispatcherConfig {
            workers: parse_or(&optional, "DELIVERY_WORKERS", 4)?,
            queue_size: parse_or(&optional, "DELIVERY_QUEUE_SIZE", 1000)?,
            retry: RetryPolicy {
                max_attempts: parse_or(&optional, "DELIVERY_MAX_ATTEMPTS", 1)?,
                backoff: Duration::from_millis(parse_or(
                    &optional,
                    "DELIVERY_RETRY_BACKOFF_MS",
                    1000,
                )?),
            },
        };
        if dispatcher.workers == 0 {
            bail!("DELIVERY_WORKERS must be at least 1");
        }
        if dispatcher.queue_size == 0 {
            bail!("DELIVERY_QUEUE_SIZE must be at least 1");
        }
        if dispatcher.retry.max_attempts == 0 {
            bail!("DELIVERY_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            webhook_secret: required("WEBHOOK_SECRET")?,
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            telegram_chat_id: required("TELEGRAM_CHAT_ID")?,
            telegram_api_base_url: optional("TELEGRAM_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE_URL.to_string()),
            motive_api_key: optional("MOTIVE_API_KEY"),
            motive_api_base_url: optional("MOTIVE_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MOTIVE_API_BASE_URL.to_string()),
            dispatcher,
            shutdown_drain: Duration::from_secs(parse_or(&optional, "SHUTDOWN_DRAIN_SECS", 10)?),
            sentry_dsn: optional("SENTRY_DSN"),
            environment: optional("SAFETY_ENV").unwrap_or_else(|| "development".to_string()),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("webhook_secret", &"[REDACTED]")
            .field("telegram_bot_token", &"[REDACTED]")
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("telegram_api_base_url", &self.telegram_api_base_url)
            .field(
                "motive_api_key",
                &self.motive_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("motive_api_base_url", &self.motive_api_base_url)
            .field("dispatcher", &self.dispatcher)
            .field("shutdown_drain", &self.shutdown_drain)
            .field("sentry_dsn", &self.sentry_dsn.as_ref().map(|_| "[REDACTED]"))
            .field("environment", &self.environment)
            .finish()
    }
}
