use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error (e.g., "window_duration_ms")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "collapser", "registry")
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

/// Unified error type for the collapsing runtime.
///
/// Every variant is cheap to clone: a single failure is delivered to each
/// collapsed request of a window, and batch-level causes share one `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(
        "Failed to map all collapsed requests to response. The expected contract has not been respected. Collapser key: '{key}', requests size: '{request_count}', response size: '{response_count}'"
    )]
    ContractViolation {
        key: String,
        request_count: usize,
        response_count: usize,
    },

    #[error("Batch execution failed for collapser '{key}': {cause}")]
    BatchExecution {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Timed out after {elapsed:?} waiting for collapsed response")]
    Timeout { elapsed: Duration },

    #[error("Collapser '{key}' is shut down")]
    Shutdown { key: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
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
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub(crate) fn batch_execution(key: impl Into<String>, cause: anyhow::Error) -> Self {
        Error::BatchExecution {
            key: key.into(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn poisoned(source: &str) -> Self {
        Error::runtime_with_context(
            "lock poisoned",
            ErrorContext::new().with_source(source),
        )
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ContractViolation { .. })
    }

    pub fn is_batch_execution(&self) -> bool {
        matches!(self, Error::BatchExecution { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_message_carries_counts() {
        let err = Error::ContractViolation {
            key: "K".into(),
            request_count: 3,
            response_count: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("The expected contract has not been respected"));
        assert!(msg.contains("Collapser key: 'K'"));
        assert!(msg.contains("requests size: '3'"));
        assert!(msg.contains("response size: '2'"));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_batch_execution_clones_share_cause() {
        let err = Error::batch_execution("users", anyhow::anyhow!("backend down"));
        let copy = err.clone();
        match (&err, &copy) {
            (Error::BatchExecution { cause: a, .. }, Error::BatchExecution { cause: b, .. }) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => panic!("expected batch execution errors"),
        }
        assert!(copy.to_string().contains("backend down"));
    }

    #[test]
    fn test_context_formatting() {
        let err = Error::configuration_with_context(
            "window must be positive",
            ErrorContext::new()
                .with_field_path("window_duration_ms")
                .with_source("config"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: window must be positive (field: window_duration_ms, source: config)"
        );
        assert!(err.context().is_some());
    }
}
