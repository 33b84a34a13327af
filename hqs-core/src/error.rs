//! HQS error codes and wire formatting

use serde::Serialize;
use thiserror::Error;

/// Error codes surfaced to queue clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Caller faults
    InvalidRequest,
    QueueDoesNotExist,
    QueueAlreadyExists,
    HandleExpired,
    UnknownOperation,

    // Store-layer failures
    CouldNotSendMessage,
    CouldNotDeleteMessage,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::QueueDoesNotExist => "QueueDoesNotExist",
            Self::QueueAlreadyExists => "QueueAlreadyExists",
            Self::HandleExpired => "HandleExpired",
            Self::UnknownOperation => "UnknownOperation",
            Self::CouldNotSendMessage => "CouldNotSendMessage",
            Self::CouldNotDeleteMessage => "CouldNotDeleteMessage",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest | Self::HandleExpired | Self::UnknownOperation => 400,
            Self::QueueDoesNotExist => 404,
            Self::QueueAlreadyExists => 409,
            Self::CouldNotSendMessage | Self::CouldNotDeleteMessage => 500,
        }
    }

    /// Whether a client may retry the same request unchanged.
    ///
    /// Only store-layer failures qualify; an expired handle must be
    /// re-received, never re-deleted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CouldNotSendMessage | Self::CouldNotDeleteMessage)
    }
}

/// Error as sent over the wire
#[derive(Debug, Error)]
#[error("{}: {message}", .code.as_str())]
pub struct HqsError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl HqsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Format as a JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: &'a str,
            message: &'a str,
            #[serde(rename = "RequestId")]
            request_id: &'a str,
        }

        let error = JsonError {
            error_type: self.code.as_str(),
            message: &self.message,
            request_id: &self.request_id,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"__type":"{}","message":"{}"}}"#, self.code.as_str(), self.message)
        })
    }
}
