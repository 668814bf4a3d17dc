//! Centralized error types for the synchronization engine.
//!
//! Errors never reach the presentation layer. They drive the discovery
//! backoff loop, get swallowed per dimension while polling, or are logged.

use thiserror::Error;

use crate::sonos::types::{Dimension, GroupId};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and diagnostics.
    fn code(&self) -> &'static str;
}

/// Engine-wide error type.
///
/// `Clone` so that a single in-flight discovery result can be shared by
/// every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Device discovery found nothing or failed outright.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Listing the zone groups of a discovered device failed.
    #[error("Group enumeration failed: {0}")]
    Enumeration(String),

    /// One of the four per-group state queries failed.
    #[error("Query for {dimension} on group {group} failed: {message}")]
    Query {
        group: GroupId,
        dimension: Dimension,
        message: String,
    },

    /// Releasing a topology or event subscription failed.
    #[error("Subscription teardown failed: {0}")]
    SubscriptionTeardown(String),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Creates a query error for the given group and dimension.
    pub fn query(group: &GroupId, dimension: Dimension, message: impl Into<String>) -> Self {
        Self::Query {
            group: group.clone(),
            dimension,
            message: message.into(),
        }
    }

    /// Returns true if the error should send the discovery pipeline into
    /// backoff and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_) | Self::Enumeration(_) | Self::Query { .. }
        )
    }
}

impl ErrorCode for SyncError {
    fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Enumeration(_) => "enumeration_failed",
            Self::Query { .. } => "query_failed",
            Self::SubscriptionTeardown(_) => "subscription_teardown_failed",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Convenient Result alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;
