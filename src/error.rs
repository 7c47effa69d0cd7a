//! Error types for the applicant relay.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Account store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read account store {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse account store {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Mailbox-level protocol session errors. Any of these ends the cycle for
/// that mailbox only.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {address}: {reason}")]
    Auth { address: String, reason: String },

    #[error("IMAP {command} rejected: {response}")]
    Protocol { command: String, response: String },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl SessionError {
    /// Bad credentials must be flagged to an operator, not retried.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Whether a later attempt could plausibly succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// A single message could not be decoded as MIME.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message uid {uid} is empty")]
    Empty { uid: u32 },

    #[error("Message uid {uid} is not valid MIME: {reason}")]
    Malformed { uid: u32, reason: String },

    #[error("Decoder task for uid {uid} failed: {reason}")]
    Aborted { uid: u32, reason: String },
}

/// Delivery of one record to one subscriber endpoint failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Endpoint {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Delivery to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
}
