//! Queue configuration and identity

use serde::{Deserialize, Deserializer, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

pub const VISIBILITY_TIMEOUT_RANGE: RangeInclusive<u32> = 0..=43_200;
pub const MAXIMUM_MESSAGE_SIZE_RANGE: RangeInclusive<u32> = 1_024..=262_144;
pub const RETENTION_PERIOD_RANGE: RangeInclusive<u32> = 60..=1_209_600;
pub const DELAY_RANGE: RangeInclusive<u32> = 0..=900;
pub const RECEIVE_WAIT_RANGE: RangeInclusive<u32> = 0..=20;

pub const MAX_QUEUE_NAME_LEN: usize = 80;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{name} must be between {} and {}, got {value}", .range.start(), .range.end())]
pub struct InvalidAttribute {
    pub name: &'static str,
    pub value: u64,
    pub range: RangeInclusive<u32>,
}

/// Check `value` against an attribute's allowed range
pub fn check_range(
    name: &'static str,
    value: u64,
    range: &RangeInclusive<u32>,
) -> Result<(), InvalidAttribute> {
    if value < u64::from(*range.start()) || value > u64::from(*range.end()) {
        return Err(InvalidAttribute {
            name,
            value,
            range: range.clone(),
        });
    }
    Ok(())
}

/// Per-queue attributes, all in seconds or bytes. Each accepts a number or
/// its decimal string, the form GetQueueAttributes reports them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QueueConfig {
    #[serde(deserialize_with = "number_or_string")]
    pub visibility_timeout: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub maximum_message_size: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub message_retention_period: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub delay_seconds: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub receive_message_wait_time_seconds: u32,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Attribute {
        Number(u32),
        Text(String),
    }

    match Attribute::deserialize(deserializer)? {
        Attribute::Number(n) => Ok(n),
        Attribute::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("Cannot parse '{s}' as an attribute value"))),
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 30,
            maximum_message_size: 262_144, // 256KB
            message_retention_period: 345_600, // 4 days
            delay_seconds: 0,
            receive_message_wait_time_seconds: 0,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), InvalidAttribute> {
        check_range(
            "VisibilityTimeout",
            self.visibility_timeout.into(),
            &VISIBILITY_TIMEOUT_RANGE,
        )?;
        check_range(
            "MaximumMessageSize",
            self.maximum_message_size.into(),
            &MAXIMUM_MESSAGE_SIZE_RANGE,
        )?;
        check_range(
            "MessageRetentionPeriod",
            self.message_retention_period.into(),
            &RETENTION_PERIOD_RANGE,
        )?;
        check_range("DelaySeconds", self.delay_seconds.into(), &DELAY_RANGE)?;
        check_range(
            "ReceiveMessageWaitTimeSeconds",
            self.receive_message_wait_time_seconds.into(),
            &RECEIVE_WAIT_RANGE,
        )
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout.into())
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.message_retention_period.into())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds.into())
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_message_wait_time_seconds.into())
    }
}

/// Queue names are 1-80 characters of alphanumerics, hyphens and underscores
pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_QUEUE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Identity of a live queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    /// Unique per incarnation; a re-created queue gets a new id
    pub id: String,
    pub name: String,
    pub url: String,
    pub created_timestamp: i64,
    pub config: QueueConfig,
}
