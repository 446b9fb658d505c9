// Error taxonomy for the travel distribution gateway
// Every failure a caller can observe is one of the GatewayError kinds; the facade wraps it
// in an OperationError so the controller layer gets the correlation id and attempt count too.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::model::Operation;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        status: Option<u16>,
    },

    #[error("Upstream unavailable after {attempts} attempt(s): {cause}")]
    UpstreamUnavailable {
        cause: String,
        status: Option<u16>,
        attempts: u32,
        is_retryable: bool,
        ambiguous: bool,
    },

    #[error("Upstream error: {code} - {message}")]
    Upstream {
        code: String,
        message: String,
        status: u16,
    },

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32, ambiguous: bool },
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        GatewayError::MalformedResponse(msg.into())
    }

    pub fn authentication(msg: impl Into<String>, status: Option<u16>) -> Self {
        GatewayError::Authentication {
            message: msg.into(),
            status,
        }
    }

    // Only exhausted transient failures are worth an outer retry, and only if the
    // upstream side-effect is known not to have happened.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamUnavailable {
                is_retryable: true,
                ..
            }
        )
    }

    // True when a non-idempotent request was sent and its outcome is unknown.
    // Callers must reconcile through booking details before trying again.
    pub fn is_ambiguous(&self) -> bool {
        match self {
            GatewayError::UpstreamUnavailable { ambiguous, .. } => *ambiguous,
            GatewayError::DeadlineExceeded { ambiguous, .. } => *ambiguous,
            _ => false,
        }
    }

    /// HTTP status the controller layer can map this failure to without knowing
    /// anything about the supplier.
    pub fn suggested_status(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::Authentication { .. } => 502,
            GatewayError::UpstreamUnavailable { .. } => 503,
            GatewayError::Upstream { .. } => 502,
            GatewayError::MalformedResponse(_) => 502,
            GatewayError::DeadlineExceeded { .. } => 504,
        }
    }
}

// What the facade hands back to its caller
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    pub correlation_id: Uuid,
    pub operation: Operation,
    pub attempts: u32,
    pub kind: GatewayError,
}

impl OperationError {
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.kind.is_ambiguous()
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] failed after {} attempt(s): {}",
            self.operation, self.correlation_id, self.attempts, self.kind
        )
    }
}

impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

// Failures at the transport seam. The variant tells the executor whether the
// request could have reached the supplier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    // Never left this process: DNS, refused connection, TLS setup
    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // Sent, but the response could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn request_sent(&self) -> bool {
        !matches!(self, TransportError::Connect(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
