//! Error types for the grid execution core.
//!
//! # Error Classes
//!
//! Failures fall into three groups, and every one of them surfaces as the single
//! error of the logical operation that observed it:
//!
//! ## Contract violations
//!
//! The caller or the invocation pipeline broke a precondition. These are bugs,
//! never retried, and logged at error level where they are detected:
//! - [`GridError::MissingEntry`]: an entry was not pre-loaded into the context
//! - [`GridError::UnsupportedDecode`]: payload decoding on an aggregate operation
//!
//! ## User failures
//!
//! [`GridError::UserFunction`] wraps whatever the caller-supplied function
//! returned. The original error stays reachable through
//! [`std::error::Error::source`] and can be downcast.
//!
//! ## Sub-operation failures
//!
//! Timeouts, transport errors, ownership mismatches and cancellations reported
//! by one destination. The first of these fails the whole logical operation and
//! the remaining destinations are cancelled. Nothing here is retried inside the
//! core; [`GridError::is_retriable`] tells a higher-level policy what it may retry.

use std::time::Duration;

use thiserror::Error;

use crate::types::{MemberId, TopologyId};

/// Boxed error returned by user functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for grid operations.
pub type GridResult<T> = Result<T, GridError>;

/// Errors that can occur while dispatching or applying grid commands.
#[derive(Debug, Error)]
pub enum GridError {
    /// The invocation context had no entry for a key the command touches.
    #[error("No entry pre-loaded in the invocation context for key '{key}'")]
    MissingEntry { key: String },

    /// The caller-supplied function failed.
    #[error("User function failed: {0}")]
    UserFunction(#[source] BoxError),

    /// A destination did not answer in time.
    #[error("Sub-operation to {member} timed out after {elapsed:?}")]
    Timeout { member: MemberId, elapsed: Duration },

    /// The transport could not deliver a sub-operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A sub-operation observed its own cancellation.
    #[error("Sub-operation to {member} was cancelled")]
    Cancelled { member: MemberId },

    /// The caller dropped a logical operation before it completed.
    #[error("Operation {operation} was abandoned before completion")]
    Abandoned { operation: &'static str },

    /// A sub-operation task panicked.
    #[error("Worker task failed: {0}")]
    Worker(String),

    /// Payload decoding was requested on an operation that only aggregates.
    #[error("Operation {operation} does not support direct payload decoding")]
    UnsupportedDecode { operation: &'static str },

    /// The topology moved while keys were being split by owner.
    #[error("Topology changed during split: routed with {expected}, now {observed}")]
    TopologyChanged {
        expected: TopologyId,
        observed: TopologyId,
    },

    /// The topology has no owner for a key (no members).
    #[error("No owner for key '{key}' in topology {topology}")]
    NoOwner { key: String, topology: TopologyId },

    /// A member received a command for a key it does not own.
    #[error("Key '{key}' is not owned by {member}")]
    NotOwner { member: MemberId, key: String },

    /// A stored value could not be converted to or from its typed form.
    #[error("Value conversion failed: {0}")]
    Conversion(String),

    /// A batch was built with the same key twice.
    #[error("Duplicate key '{key}' in batch")]
    DuplicateKey { key: String },

    /// An entry view was asked for a value that is absent.
    #[error("No value present for key '{key}'")]
    NoSuchElement { key: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GridError {
    /// Wrap a user function failure.
    pub fn user(source: impl Into<BoxError>) -> Self {
        GridError::UserFunction(source.into())
    }

    /// Check if a higher-level policy may retry the operation.
    ///
    /// Topology and ownership errors are resolved by re-routing; timeouts and
    /// transport errors are transient. Everything else repeats deterministically.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GridError::Timeout { .. }
                | GridError::Transport(_)
                | GridError::TopologyChanged { .. }
                | GridError::NotOwner { .. }
        )
    }

    /// Check if this error signals a broken precondition rather than a runtime condition.
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            GridError::MissingEntry { .. } | GridError::UnsupportedDecode { .. }
        )
    }

    /// Check if the error requires routing against a newer topology.
    #[inline]
    pub fn needs_forwarding(&self) -> bool {
        matches!(
            self,
            GridError::TopologyChanged { .. } | GridError::NotOwner { .. }
        )
    }

    /// Returns a string label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            GridError::MissingEntry { .. } => "missing_entry",
            GridError::UserFunction(_) => "user_function",
            GridError::Timeout { .. } => "timeout",
            GridError::Transport(_) => "transport",
            GridError::Cancelled { .. } => "cancelled",
            GridError::Abandoned { .. } => "abandoned",
            GridError::Worker(_) => "worker",
            GridError::UnsupportedDecode { .. } => "unsupported_decode",
            GridError::TopologyChanged { .. } => "topology_changed",
            GridError::NoOwner { .. } => "no_owner",
            GridError::NotOwner { .. } => "not_owner",
            GridError::Conversion(_) => "conversion",
            GridError::DuplicateKey { .. } => "duplicate_key",
            GridError::NoSuchElement { .. } => "no_such_element",
            GridError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self {
        GridError::Conversion(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Error)]
    #[error("quota exceeded")]
    struct QuotaExceeded;

    #[test]
    fn test_missing_entry_display() {
        let err = GridError::MissingEntry {
            key: "k1".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("k1"));
        assert!(display.contains("No entry"));
    }

    #[test]
    fn test_user_function_preserves_source() {
        let err = GridError::user(QuotaExceeded);
        let source = err.source().expect("source should be preserved");
        assert!(source.downcast_ref::<QuotaExceeded>().is_some());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_timeout_display() {
        let err = GridError::Timeout {
            member: MemberId::new(2),
            elapsed: Duration::from_millis(1500),
        };
        let display = err.to_string();
        assert!(display.contains("member-2"));
        assert!(display.contains("timed out"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(
            GridError::Timeout {
                member: MemberId::new(1),
                elapsed: Duration::from_secs(1),
            }
            .is_retriable()
        );
        assert!(GridError::Transport("reset".into()).is_retriable());
        assert!(
            GridError::TopologyChanged {
                expected: TopologyId::new(1),
                observed: TopologyId::new(2),
            }
            .is_retriable()
        );
        assert!(!GridError::user(QuotaExceeded).is_retriable());
        assert!(
            !GridError::MissingEntry {
                key: "k".to_string()
            }
            .is_retriable()
        );
        assert!(!GridError::Abandoned { operation: "get_all" }.is_retriable());
    }

    #[test]
    fn test_contract_violations() {
        assert!(
            GridError::MissingEntry {
                key: "k".to_string()
            }
            .is_contract_violation()
        );
        assert!(
            GridError::UnsupportedDecode {
                operation: "get_all"
            }
            .is_contract_violation()
        );
        assert!(!GridError::Config("x".into()).is_contract_violation());
    }

    #[test]
    fn test_needs_forwarding() {
        assert!(
            GridError::NotOwner {
                member: MemberId::new(0),
                key: "k".into(),
            }
            .needs_forwarding()
        );
        assert!(!GridError::Transport("x".into()).needs_forwarding());
    }

    #[test]
    fn test_metric_labels_are_distinct() {
        let errors = [
            GridError::MissingEntry { key: "k".into() },
            GridError::user(QuotaExceeded),
            GridError::Transport("x".into()),
            GridError::Cancelled {
                member: MemberId::new(1),
            },
            GridError::Abandoned { operation: "op" },
            GridError::Worker("panic".into()),
            GridError::Conversion("bad".into()),
        ];
        let mut labels: Vec<_> = errors.iter().map(|e| e.as_metric_label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), errors.len());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: GridError = json_err.into();
        assert!(matches!(err, GridError::Conversion(_)));
    }
}
