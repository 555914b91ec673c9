//! Error taxonomy shared by every store backend.
//!
//! Three sentinel conditions ([`StoreError::NotFound`], [`StoreError::NotInitialized`],
//! [`StoreError::ConnectionFailed`]) are matched by variant so callers can branch on
//! them without inspecting messages. Everything else is folded into
//! [`StoreError::Backend`], tagged with the name of the operation that failed.

use thiserror::Error;

/// Boxed source error carried by [`StoreError::Backend`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Single-entity lookup miss.
    #[error("resource not found")]
    NotFound,

    /// Operation attempted before a successful `initialize` (or after `close`).
    #[error("store not initialized")]
    NotInitialized,

    /// Backend unreachable at construction or initialization.
    #[error("failed to connect to store: {0}")]
    ConnectionFailed(String),

    /// Options or entities rejected before touching storage.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other failure, wrapped with the failing operation's name.
    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    /// Wrap an arbitrary error as a [`StoreError::Backend`] for `op`.
    pub fn backend(op: &'static str, source: impl Into<BoxError>) -> Self {
        StoreError::Backend {
            op,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, StoreError::NotInitialized)
    }

    pub fn is_connection_failed(&self) -> bool {
        matches!(self, StoreError::ConnectionFailed(_))
    }
}

/// Attach an operation name to a foreign error, producing a [`StoreError::Backend`].
pub trait OpContext<T> {
    fn during(self, op: &'static str) -> Result<T>;
}

impl<T, E> OpContext<T> for std::result::Result<T, E>
where
    E: Into<BoxError>,
{
    fn during(self, op: &'static str) -> Result<T> {
        self.map_err(|e| StoreError::backend(op, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_match_by_variant() {
        assert!(StoreError::NotFound.is_not_found());
        assert!(StoreError::NotInitialized.is_not_initialized());
        assert!(StoreError::ConnectionFailed("refused".into()).is_connection_failed());
        assert!(!StoreError::NotFound.is_not_initialized());
    }

    #[test]
    fn during_wraps_with_operation_name() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err = parsed.during("get_global").unwrap_err();
        match &err {
            StoreError::Backend { op, .. } => assert_eq!(*op, "get_global"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("get_global failed:"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn display_messages() {
        assert_eq!(StoreError::NotFound.to_string(), "resource not found");
        assert_eq!(StoreError::NotInitialized.to_string(), "store not initialized");
        assert_eq!(
            StoreError::ConnectionFailed("timeout".into()).to_string(),
            "failed to connect to store: timeout"
        );
    }
}
