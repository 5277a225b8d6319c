//! Error types for store, backend and snapshot operations.
//!
//! Caller errors (`NotFound`, `TypeMismatch`, `InvalidName`) are surfaced
//! directly. `Remote` is the transport-level failure of the remote backend;
//! the backend selector consumes it and falls back to the local engine, so it
//! only escapes as `BackendUnavailable` when both paths failed.

/// Result type for rdict operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Key, list or set is absent or expired.
    #[error("key '{key}' not found in store '{store}'")]
    NotFound { store: String, key: String },

    /// Store was never created or has been deleted.
    #[error("store '{store}' not found")]
    StoreNotFound { store: String },

    /// Operation applied to an entry of a different kind.
    #[error("key '{key}' in store '{store}' holds a {actual}, not a {expected}")]
    TypeMismatch {
        store: String,
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Malformed store or key identifier.
    #[error("invalid {what} name '{name}': {reason}")]
    InvalidName {
        what: &'static str,
        name: String,
        reason: &'static str,
    },

    /// Both the remote and the local path failed.
    #[error("no backend available for '{operation}': {reason}")]
    BackendUnavailable { operation: String, reason: String },

    /// Remote backend transport failure or timeout.
    #[error("remote backend error: {0}")]
    Remote(String),

    /// Snapshot export, encoding or commit failed.
    #[error("snapshot failed: {reason}")]
    SnapshotFailure { reason: String },

    /// Snapshot payload written by an unknown format version.
    #[error("incompatible snapshot: format version {found} (supported: {supported})")]
    IncompatibleSnapshot { found: u64, supported: u64 },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend answered with a reply that does not fit the command.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            store: store.into(),
            key: key.into(),
        }
    }

    /// Create a missing store error.
    pub fn store_not_found(store: impl Into<String>) -> Self {
        Self::StoreNotFound {
            store: store.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(
        store: impl Into<String>,
        key: impl Into<String>,
        expected: &'static str,
        actual: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            store: store.into(),
            key: key.into(),
            expected,
            actual,
        }
    }

    /// Create an invalid name error.
    pub fn invalid_name(what: &'static str, name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidName {
            what,
            name: name.into(),
            reason,
        }
    }

    /// Create a backend unavailable error.
    pub fn backend_unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote transport error.
    pub fn remote(reason: impl Into<String>) -> Self {
        Self::Remote(reason.into())
    }

    /// Create a snapshot failure.
    pub fn snapshot_failure(reason: impl Into<String>) -> Self {
        Self::SnapshotFailure {
            reason: reason.into(),
        }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true for failures that warrant falling back to the local engine.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Returns true for errors caused by the request itself.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::StoreNotFound { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidName { .. }
        )
    }

    /// Short machine-readable kind, used as a metrics label and in JSON errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::StoreNotFound { .. } => "not_found",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InvalidName { .. } => "invalid_name",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Remote(_) => "remote",
            Self::SnapshotFailure { .. } => "snapshot_failure",
            Self::IncompatibleSnapshot { .. } => "incompatible_snapshot",
            Self::Serialization(_) => "serialization",
            Self::Io { .. } => "io",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::StoreNotFound { .. } => 404,
            Self::InvalidName { .. } => 400,
            Self::TypeMismatch { .. } => 409,
            Self::IncompatibleSnapshot { .. } => 422,
            Self::BackendUnavailable { .. } | Self::Remote(_) => 503,
            Self::SnapshotFailure { .. }
            | Self::Serialization(_)
            | Self::Io { .. }
            | Self::Config(_)
            | Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::type_mismatch("s", "k", "scalar", "list");
        assert_eq!(
            err.to_string(),
            "key 'k' in store 's' holds a list, not a scalar"
        );

        let err = Error::IncompatibleSnapshot {
            found: 7,
            supported: 1,
        };
        assert!(err.to_string().contains("format version 7"));
    }

    #[test]
    fn test_only_remote_errors_are_transient() {
        assert!(Error::remote("connection refused").is_transient());
        assert!(!Error::not_found("s", "k").is_transient());
        assert!(!Error::type_mismatch("s", "k", "list", "set").is_transient());
        assert!(!Error::backend_unavailable("get", "down").is_transient());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("s", "k").status_code(), 404);
        assert_eq!(Error::store_not_found("s").status_code(), 404);
        assert_eq!(Error::invalid_name("store", "", "empty").status_code(), 400);
        assert_eq!(
            Error::type_mismatch("s", "k", "list", "scalar").status_code(),
            409
        );
        assert_eq!(Error::backend_unavailable("get", "x").status_code(), 503);
        assert_eq!(Error::snapshot_failure("disk full").status_code(), 500);
    }

    #[test]
    fn test_caller_errors() {
        assert!(Error::not_found("s", "k").is_caller_error());
        assert!(Error::invalid_name("key", "", "empty").is_caller_error());
        assert!(!Error::snapshot_failure("x").is_caller_error());
    }
}
