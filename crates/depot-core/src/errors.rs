//! Unified error system for Depot
//!
//! Every failure this layer can surface is a `DepotError`. Transport failures
//! are wrapped verbatim in [`RpcStatus`] so callers see the remote status code
//! exactly as the RPC client reported it.

use std::fmt;

/// Status codes reported by the RPC transport.
///
/// Mirrors the canonical status code set of the wire protocol. This layer never
/// maps one code onto another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Error reported by the underlying RPC client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    /// Status code returned by the remote side or the transport.
    pub code: StatusCode,
    /// Human-readable detail.
    pub message: String,
}

impl RpcStatus {
    /// Create a status with the given code and message
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for `UNAVAILABLE`
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

/// Unified error type for all Depot operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepotError {
    /// Unknown storage, malformed address or missing token
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the misconfiguration
        message: String,
    },

    /// One call site fired more often than the per-request ceiling allows
    #[error(
        "{call_site} called {invocation_count} times from single request. Potential n+1? \
         Worst offender seen {max_call_count} times from {} stack(s)",
        .max_call_stacks.len()
    )]
    TooManyInvocations {
        /// Call site that crossed the ceiling
        call_site: String,
        /// Actual number of invocations of the call site in this request
        invocation_count: u64,
        /// Highest occurrence count across all recorded stacks
        max_call_count: u64,
        /// Every stack signature that reached `max_call_count`
        max_call_stacks: Vec<String>,
    },

    /// The enclosing logical request has no time left
    #[error("Deadline exceeded: {message}")]
    DeadlineExceeded {
        /// Error message describing which deadline passed
        message: String,
    },

    /// Failure reported by the RPC client, passed through untouched
    #[error("Transport error: {0}")]
    Transport(#[from] RpcStatus),
}

impl DepotError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a deadline exceeded error
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            message: message.into(),
        }
    }

    /// Create an unknown storage error
    pub fn storage_not_found(storage: &str) -> Self {
        Self::configuration(format!("storage not found: {storage:?}"))
    }

    /// Returns `true` for configuration errors
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns `true` for budget violations
    pub fn is_too_many_invocations(&self) -> bool {
        matches!(self, Self::TooManyInvocations { .. })
    }

    /// Returns the transport status if this error came from the RPC client
    pub fn rpc_status(&self) -> Option<&RpcStatus> {
        match self {
            Self::Transport(status) => Some(status),
            _ => None,
        }
    }
}

/// Standard Result type for Depot operations
pub type DepotResult<T> = std::result::Result<T, DepotError>;

impl From<toml::de::Error> for DepotError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<std::io::Error> for DepotError {
    fn from(err: std::io::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DepotError::configuration("missing address");
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "Configuration error: missing address");
    }

    #[test]
    fn test_storage_not_found_names_the_storage() {
        let err = DepotError::storage_not_found("nfs-file99");
        assert_eq!(
            err.to_string(),
            "Configuration error: storage not found: \"nfs-file99\""
        );
    }

    #[test]
    fn test_transport_status_passes_through() {
        let status = RpcStatus::new(StatusCode::NotFound, "repository not found");
        let err = DepotError::from(status.clone());
        assert_eq!(err.rpc_status(), Some(&status));
        assert_eq!(
            err.to_string(),
            "Transport error: NOT_FOUND: repository not found"
        );
    }

    #[test]
    fn test_too_many_invocations_message() {
        let err = DepotError::TooManyInvocations {
            call_site: "find_commit".to_string(),
            invocation_count: 31,
            max_call_count: 31,
            max_call_stacks: vec!["Projects#show".to_string()],
        };
        assert!(err.is_too_many_invocations());
        assert!(err
            .to_string()
            .starts_with("find_commit called 31 times from single request. Potential n+1?"));
    }
}
