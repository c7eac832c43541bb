use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "items[3].id", "OPENAI_API_KEY")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, offending input)
    pub details: Option<String>,
    /// Source of the error (e.g., "openai", "registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse error category callers can branch on without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid credentials, accounts, buckets, base URLs.
    Configuration,
    /// Non-2xx responses and network failures.
    Transport,
    /// Unknown batch ids, results requested before completion, unrecoverable terminal states.
    BatchState,
    /// A single prompt failed.
    ItemFailure,
    /// `wait_for_completion` exceeded its attempt or deadline budget.
    Timeout,
    /// Caller supplied malformed input.
    Validation,
    /// Local I/O and (de)serialization failures.
    Internal,
}

/// Unified error type for every batch adapter.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Batch {batch_id}: {message}")]
    BatchState { batch_id: String, message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Item {custom_id} failed: {message}")]
    ItemFailure { custom_id: String, message: String },

    #[error("Timed out waiting for batch {batch_id} after {waited:?}")]
    Timeout { batch_id: String, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Configuration error naming the environment variable the caller should set.
    pub fn missing_config(provider: &str, env_var: &str) -> Self {
        Error::Configuration {
            message: format!(
                "{} credentials not configured; call configure_{}() or set {}",
                provider, provider, env_var
            ),
            context: ErrorContext::new()
                .with_field_path(env_var)
                .with_source(provider),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn batch_state(batch_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::BatchState {
            batch_id: batch_id.into(),
            message: msg.into(),
        }
    }

    pub fn not_complete(batch_id: impl Into<String>, status: impl std::fmt::Display) -> Self {
        let batch_id = batch_id.into();
        Error::BatchState {
            message: format!("batch not complete (status: {})", status),
            batch_id,
        }
    }

    pub fn batch_not_found(batch_id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "batch",
            id: batch_id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Transport(_) => ErrorKind::Transport,
            Error::BatchState { .. } | Error::NotFound { .. } => ErrorKind::BatchState,
            Error::ItemFailure { .. } => ErrorKind::ItemFailure,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// HTTP status of a transport failure, if the provider answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport(TransportError::Status { status, .. }) => Some(*status),
            Error::Transport(TransportError::Http(e)) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_names_env_var() {
        let err = Error::missing_config("openai", "OPENAI_API_KEY");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let msg = err.to_string();
        assert!(msg.contains("OPENAI_API_KEY"), "{msg}");
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("OPENAI_API_KEY")
        );
    }

    #[test]
    fn transport_status_is_exposed() {
        let err = Error::from(TransportError::Status {
            status: 429,
            body: "slow down".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.status_code(), Some(429));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn batch_state_kinds() {
        assert_eq!(
            Error::batch_not_found("b1").kind(),
            ErrorKind::BatchState
        );
        let err = Error::not_complete("b1", "in_progress");
        assert_eq!(err.kind(), ErrorKind::BatchState);
        assert!(err.to_string().contains("batch not complete"));
    }
}
