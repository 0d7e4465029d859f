use crate::domain::provider::ProviderId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("connection to {provider} failed: {message}")]
    ConnectionError {
        provider: ProviderId,
        message: String,
    },
    #[error("{provider} did not answer within {timeout:?}")]
    TimeoutError {
        provider: ProviderId,
        timeout: Duration,
    },
    #[error("{provider} rejected the credentials: {message}")]
    AuthenticationError {
        provider: ProviderId,
        message: String,
    },
    #[error("{provider} rate limit exceeded")]
    RateLimitError {
        provider: ProviderId,
        retry_after: Option<Duration>,
    },
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("malformed response from {provider}: {message}")]
    ResponseError {
        provider: ProviderId,
        message: String,
    },
    #[error("{provider} answered HTTP {status}: {message}")]
    HttpError {
        provider: ProviderId,
        status: u16,
        message: String,
    },
    #[error("transport failure: {0}")]
    TransportError(String),
    #[error("{provider} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        provider: ProviderId,
        attempts: u32,
        source: Box<PaymentError>,
    },
    #[error("all {attempted} providers failed, last attempted {provider}: {source}")]
    ProvidersExhausted {
        provider: ProviderId,
        attempted: usize,
        source: Box<PaymentError>,
    },
    #[error("no payment provider is available")]
    NoProviderAvailable,
    #[error("step '{step}' failed after {attempts} attempts: {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        source: Box<PaymentError>,
    },
    #[error("step '{step}' timed out after {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("workflow execution {0} was cancelled")]
    WorkflowCancelled(String),
    #[error("workflow execution {execution_id} exceeded its deadline of {deadline:?}")]
    WorkflowTimeout {
        execution_id: String,
        deadline: Duration,
    },
    #[error("invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Closed classification of failures, used as the key of per-provider error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connection,
    Timeout,
    Authentication,
    RateLimit,
    Validation,
    Response,
    Http,
    Transport,
    RetryExhausted,
    ProvidersExhausted,
    NoProvider,
    Step,
    Workflow,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::Response => "response",
            Self::Http => "http",
            Self::Transport => "transport",
            Self::RetryExhausted => "retry_exhausted",
            Self::ProvidersExhausted => "providers_exhausted",
            Self::NoProvider => "no_provider",
            Self::Step => "step",
            Self::Workflow => "workflow",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::ConnectionError { .. } => ErrorKind::Connection,
            Self::TimeoutError { .. } => ErrorKind::Timeout,
            Self::AuthenticationError { .. } => ErrorKind::Authentication,
            Self::RateLimitError { .. } => ErrorKind::RateLimit,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::ResponseError { .. } => ErrorKind::Response,
            Self::HttpError { .. } => ErrorKind::Http,
            Self::TransportError(_) => ErrorKind::Transport,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::ProvidersExhausted { .. } => ErrorKind::ProvidersExhausted,
            Self::NoProviderAvailable => ErrorKind::NoProvider,
            Self::StepFailed { .. } | Self::StepTimeout { .. } => ErrorKind::Step,
            Self::WorkflowNotFound(_)
            | Self::WorkflowCancelled(_)
            | Self::WorkflowTimeout { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Workflow,
            Self::CsvError(_) | Self::IoError(_) | Self::SerializationError(_) => ErrorKind::Io,
        }
    }

    /// Failures worth retrying against the same provider.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionError { .. }
            | Self::TimeoutError { .. }
            | Self::RateLimitError { .. }
            | Self::TransportError(_) => true,
            Self::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Failures that must surface immediately, without another attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_)
                | Self::AuthenticationError { .. }
                | Self::ValidationError(_)
                | Self::ResponseError { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP-like status reported to the health tracker for a failed attempt.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::HttpError { status, .. } => *status,
            Self::AuthenticationError { .. } => 401,
            Self::RateLimitError { .. } => 429,
            Self::ValidationError(_) => 400,
            Self::TimeoutError { .. } => 504,
            Self::ConnectionError { .. } => 503,
            Self::ResponseError { .. } => 502,
            _ => 500,
        }
    }
}
