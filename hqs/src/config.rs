//! Configuration management

use hqs_queue::{QueueConfig, ReceiptCodec, ServiceSettings};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queues: QueueDefaults,

    #[serde(default)]
    pub receipts: ReceiptConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Prefix of queue URLs; derived from the listen port when unset
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_account_id")]
    pub account_id: String,

    #[serde(default = "default_long_poll_interval_ms")]
    pub long_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_url: None,
            account_id: default_account_id(),
            long_poll_interval_ms: default_long_poll_interval_ms(),
        }
    }
}

/// Attributes applied to queues created without explicit ones
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    pub visibility_timeout: u32,
    pub maximum_message_size: u32,
    pub message_retention_period: u32,
    pub delay_seconds: u32,
    pub receive_message_wait_time_seconds: u32,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        let config = QueueConfig::default();
        Self {
            visibility_timeout: config.visibility_timeout,
            maximum_message_size: config.maximum_message_size,
            message_retention_period: config.message_retention_period,
            delay_seconds: config.delay_seconds,
            receive_message_wait_time_seconds: config.receive_message_wait_time_seconds,
        }
    }
}

impl From<&QueueDefaults> for QueueConfig {
    fn from(defaults: &QueueDefaults) -> Self {
        Self {
            visibility_timeout: defaults.visibility_timeout,
            maximum_message_size: defaults.maximum_message_size,
            message_retention_period: defaults.message_retention_period,
            delay_seconds: defaults.delay_seconds,
            receive_message_wait_time_seconds: defaults.receive_message_wait_time_seconds,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ReceiptConfig {
    /// Hex-encoded signing key; a random key is generated when unset, which
    /// invalidates outstanding handles on restart
    #[serde(default)]
    pub secret: Option<String>,
}

impl ReceiptConfig {
    pub fn codec(&self) -> anyhow::Result<ReceiptCodec> {
        match &self.secret {
            Some(secret) => {
                let key = hex::decode(secret.trim())
                    .map_err(|e| anyhow::anyhow!("receipt secret is not valid hex: {e}"))?;
                Ok(ReceiptCodec::new(&key)?)
            }
            None => Ok(ReceiptCodec::random()),
        }
    }
}

fn default_port() -> u16 {
    4566
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

fn default_long_poll_interval_ms() -> u64 {
    100
}

impl Config {
    /// Load configuration from `hqs.toml` (or `path`) and `HQS__*` environment
    /// variables, e.g. `HQS__SERVER__PORT=8080`
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::File::with_name("hqs").required(false));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("HQS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// Service settings for a server listening on `port`
    pub fn service_settings(&self, port: u16) -> anyhow::Result<ServiceSettings> {
        let default_queue_config = QueueConfig::from(&self.queues);
        default_queue_config.validate()?;

        Ok(ServiceSettings {
            base_url: self
                .server
                .base_url
                .clone()
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            account_id: self.server.account_id.clone(),
            long_poll_interval: Duration::from_millis(self.server.long_poll_interval_ms.max(1)),
            default_queue_config,
        })
    }
}
