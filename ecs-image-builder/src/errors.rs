//! Error types for the image builder.
//!
//! Provider errors carry a stable code string so callers can classify them
//! as transient or fatal. Everything a step can fail with funnels into
//! [`BuildError`], which is what a build ultimately reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for a build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The provider rejected an operation.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// A bounded wait failed, timed out or was cancelled.
    #[error("{0}")]
    Wait(#[from] WaitError),

    /// A step read run state that had not been published yet.
    #[error("{0}")]
    Context(#[from] ContextError),

    /// The configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A local precondition did not hold.
    #[error("{0}")]
    Precondition(String),

    /// The operator cancelled the build.
    #[error("Build cancelled: {0}")]
    Cancelled(String),

    /// A step halted the build.
    #[error("{step}: {message}")]
    Halted {
        /// Name of the halting step.
        step: String,
        /// Human-readable reason, including the underlying error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<BuildError>>,
    },

    /// The communicator failed to customise the instance.
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// Some images of an artifact could not be deleted.
    #[error("Failed to destroy images: {}", .0.join("; "))]
    Destroy(Vec<String>),

    /// A step panicked.
    #[error("Step '{step}' panicked: {message}")]
    Panic {
        /// Name of the panicking step.
        step: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Returns true if this error represents operator cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) | Self::Wait(WaitError::Cancelled) => true,
            Self::Halted {
                source: Some(source),
                ..
            } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Returns the provider error code, if the error came from the provider.
    #[must_use]
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::Provider(e) => Some(e.code.as_str()),
            Self::Wait(WaitError::Failed(e)) => Some(e.code.as_str()),
            Self::Wait(WaitError::Timeout {
                last_error: Some(e),
                ..
            }) => Some(e.code.as_str()),
            Self::Halted {
                source: Some(source),
                ..
            } => source.provider_code(),
            _ => None,
        }
    }
}

/// A classified error returned by the cloud API.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub struct ProviderError {
    /// Stable error code (e.g., "IdempotentProcessing").
    pub code: String,
    /// Provider message.
    pub message: String,
    /// Request id for support lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Code used when a described resource does not exist.
pub const NOT_FOUND_CODE: &str = "NotFound";

impl ProviderError {
    /// Creates a new provider error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Creates a not-found error for a resource.
    #[must_use]
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::new(NOT_FOUND_CODE, format!("{kind} {id} not found"))
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns true if the code matches any of the given codes.
    #[must_use]
    pub fn has_code_in(&self, codes: &[&str]) -> bool {
        codes.iter().any(|c| *c == self.code)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref id) = self.request_id {
            write!(f, " (request id: {id})")?;
        }
        Ok(())
    }
}

/// Failure of a poll-retry wait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The classifier declared the error fatal.
    #[error("{0}")]
    Failed(ProviderError),

    /// The attempt budget or deadline ran out.
    #[error("{}", timeout_message(*attempts, last_error.as_ref()))]
    Timeout {
        /// Number of requests issued.
        attempts: usize,
        /// Last provider error observed, if any.
        last_error: Option<ProviderError>,
    },

    /// The classifier rejected a successful response.
    #[error("response rejected after {attempts} attempts")]
    Rejected {
        /// Number of requests issued.
        attempts: usize,
    },

    /// Cancellation was observed between attempts.
    #[error("wait cancelled")]
    Cancelled,
}

fn timeout_message(attempts: usize, last_error: Option<&ProviderError>) -> String {
    match last_error {
        Some(e) => format!("evaluate failed after {attempts} attempts: {e}"),
        None => format!("evaluate failed after {attempts} attempts: <no error>"),
    }
}

/// Error raised by typed run-state accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A value was read before the step responsible for it ran.
    #[error("run state '{0}' has not been published yet")]
    Missing(&'static str),

    /// A write-once value was published twice.
    #[error("run state '{0}' is already set")]
    AlreadySet(&'static str),
}

/// Error raised when configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// One or more fields are invalid.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Returns the individual validation messages.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        match self {
            Self::Invalid(messages) => messages,
        }
    }
}

/// Result alias for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new("Throttling", "slow down").with_request_id("req-1");
        assert_eq!(err.to_string(), "[Throttling] slow down (request id: req-1)");
    }

    #[test]
    fn test_provider_error_code_membership() {
        let err = ProviderError::new("IdempotentProcessing", "busy");
        assert!(err.has_code_in(&["IdempotentProcessing", "Other"]));
        assert!(!err.has_code_in(&["TaskConflict"]));
    }

    #[test]
    fn test_timeout_wraps_last_error() {
        let err = WaitError::Timeout {
            attempts: 3,
            last_error: Some(ProviderError::new("IncorrectInstanceStatus", "still starting")),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("IncorrectInstanceStatus"));

        let bare = WaitError::Timeout {
            attempts: 2,
            last_error: None,
        };
        assert!(bare.to_string().contains("<no error>"));
    }

    #[test]
    fn test_build_error_cancelled() {
        assert!(BuildError::Cancelled("interrupt".into()).is_cancelled());
        assert!(BuildError::Wait(WaitError::Cancelled).is_cancelled());
        assert!(!BuildError::precondition("nope").is_cancelled());
    }

    #[test]
    fn test_build_error_provider_code() {
        let err: BuildError = ProviderError::new("Forbidden.RAM", "denied").into();
        assert_eq!(err.provider_code(), Some("Forbidden.RAM"));

        let wait: BuildError = WaitError::Failed(ProviderError::new("InvalidParameter", "x")).into();
        assert_eq!(wait.provider_code(), Some("InvalidParameter"));

        assert_eq!(BuildError::precondition("x").provider_code(), None);

        let halted = BuildError::Halted {
            step: "create_instance".into(),
            message: "Error creating instance".into(),
            source: Some(Box::new(ProviderError::new("QuotaExceeded", "no").into())),
        };
        assert_eq!(halted.provider_code(), Some("QuotaExceeded"));
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::Invalid(vec!["a".into(), "b".into()]);
        assert_eq!(err.messages().len(), 2);
        assert_eq!(err.to_string(), "invalid configuration: a; b");
    }
}
