use thiserror::Error;

/// Main error type for the sidecar with structured error handling
///
/// Only `Validation` is a hard failure surfaced to the caller; everything
/// else degrades to "no result this time" at the component boundaries (hook
/// adapters exit 0, tool-call handlers return JSON envelopes).
#[derive(Error, Debug)]
pub enum AidamError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Input violates a contract (bad SQL statement kind, undeclared
    /// migration table, tool path outside the root)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Referenced session/tool/state does not exist
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A bounded wait exceeded its budget
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Agent usage exceeded the session budget
    #[error("Agent [{agent}] is over budget: spent ${spent:.4} of ${budget:.2}")]
    BudgetExhausted {
        agent: String,
        spent: f64,
        budget: f64,
    },

    /// Session supervision error
    #[error("Session error: {0}")]
    Session(#[from] agent_session::SessionError),

    /// Generated-tool registration or execution error
    #[error("Tool error [{name}]: {message}")]
    Tool { name: String, message: String },

    /// Generic error for cases not covered above
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for sidecar operations
pub type Result<T> = std::result::Result<T, AidamError>;

/// Convenience methods for creating specific error types
impl AidamError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create a tool error
    pub fn tool<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::Tool {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error must be surfaced to the caller rather than
    /// degraded to an empty result
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// JSON envelope for tool-call transports; never panics
    pub fn to_envelope(&self) -> serde_json::Value {
        match self {
            Self::Timeout { operation, .. } => serde_json::json!({
                "status": "timeout",
                "operation": operation,
                "hint": "the operation may still complete; retry to check",
            }),
            Self::NotFound { what } => serde_json::json!({ "error": format!("{} not found", what) }),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

impl From<String> for AidamError {
    fn from(error: String) -> Self {
        Self::Other {
            message: error,
            source: None,
        }
    }
}

impl From<&str> for AidamError {
    fn from(error: &str) -> Self {
        Self::Other {
            message: error.to_string(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validation_is_hard() {
        assert!(AidamError::validation("bad sql").is_hard());
        assert!(!AidamError::not_found("session abc").is_hard());
        assert!(!AidamError::timeout("compaction", 30).is_hard());
    }

    #[test]
    fn test_timeout_envelope_shape() {
        let envelope = AidamError::timeout("compaction", 30).to_envelope();
        assert_eq!(envelope["status"], "timeout");
        assert_eq!(envelope["operation"], "compaction");
    }

    #[test]
    fn test_not_found_envelope() {
        let envelope = AidamError::not_found("tool parse-logs").to_envelope();
        assert_eq!(envelope["error"], "tool parse-logs not found");
    }
}
