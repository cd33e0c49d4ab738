//! Configuration module for environment variable parsing.
//!
//! All settings come from the process environment. The binaries load an
//! optional `.env` file first, so local runs can keep credentials out of the
//! shell history.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// How the fetched report reaches the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Attach the report file to the email.
    Attachment,
    /// Send a text-only notice pointing at the stored report.
    Notice,
}

impl FromStr for DeliveryMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attachment" => Ok(DeliveryMode::Attachment),
            "notice" => Ok(DeliveryMode::Notice),
            _ => Err(()),
        }
    }
}

/// RabbitMQ settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// AMQP connection URL
    pub url: String,
    /// Durable topic exchange the reports are published to
    pub exchange: String,
    /// Durable queue this worker consumes from
    pub queue: String,
    /// Routing key binding the queue to the exchange
    pub routing_key: String,
    /// Maximum number of unresolved deliveries in flight
    pub prefetch: u16,
    /// Consumer tag announced to the broker
    pub consumer_tag: String,
}

/// Object storage settings.
///
/// Credentials come from the environment only. Instance or task role
/// credentials must be exported as `AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN` by the launcher.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// Base URL of the S3-compatible endpoint, addressed path-style
    pub endpoint: String,
}

/// Outbound mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub domain: String,
    pub api_base: String,
    pub from: String,
    pub subject: String,
    pub mode: DeliveryMode,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,

    /// Port for the health endpoint
    pub port: u16,

    /// Timeout applied to object storage and mail API requests
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let broker = BrokerConfig::from_lookup(&lookup)?;

        let region = required(&lookup, "AWS_REGION")?;
        let endpoint = optional(&lookup, "S3_ENDPOINT")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));

        let storage = StorageConfig {
            access_key_id: required(&lookup, "AWS_ACCESS_KEY_ID")?,
            secret_access_key: required(&lookup, "AWS_SECRET_ACCESS_KEY")?,
            session_token: optional(&lookup, "AWS_SESSION_TOKEN"),
            region,
            endpoint,
        };

        let mail = MailConfig {
            api_key: required(&lookup, "MAILGUN_API_KEY")?,
            domain: required(&lookup, "MAILGUN_DOMAIN")?,
            api_base: optional(&lookup, "MAILGUN_API_BASE")
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.mailgun.net".to_string()),
            from: required(&lookup, "REPORT_FROM_EMAIL")?,
            subject: optional(&lookup, "REPORT_SUBJECT")
                .unwrap_or_else(|| "Task Report".to_string()),
            mode: parsed(&lookup, "REPORT_DELIVERY_MODE", DeliveryMode::Attachment)?,
        };

        Ok(Config {
            broker,
            storage,
            mail,
            port: parsed(&lookup, "PORT", 3000)?,
            request_timeout: Duration::from_millis(parsed(&lookup, "REQUEST_TIMEOUT_MS", 15_000)?),
        })
    }
}

impl BrokerConfig {
    /// Load only the broker section, for tools that never touch storage or mail.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name: &str| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefetch: u16 = parsed(lookup, "RABBITMQ_PREFETCH", 1)?;
        if prefetch == 0 {
            return Err(ConfigError::Invalid {
                name: "RABBITMQ_PREFETCH",
                value: "0".to_string(),
            });
        }

        Ok(BrokerConfig {
            url: required(lookup, "RABBITMQ_URL")?,
            exchange: required(lookup, "RABBITMQ_EXCHANGE")?,
            queue: required(lookup, "RABBITMQ_QUEUE")?,
            routing_key: required(lookup, "RABBITMQ_ROUTING_KEY")?,
            prefetch,
            consumer_tag: optional(lookup, "RABBITMQ_CONSUMER_TAG")
                .unwrap_or_else(|| "report-worker".to_string()),
        })
    }
}

/// Read a variable, treating blank values as unset.
fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name).ok_or(ConfigError::Missing(name))
}

/// Parse a variable, falling back to `default` when it is unset.
fn parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match optional(lookup, name) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => Err(ConfigError::Invalid { name, value: raw }),
        },
    }
}
