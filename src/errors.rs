//! Error taxonomy for the storage-coordination core.
//!
//! The split matters more than the variants: expected control-flow
//! outcomes (absent keys, lost conditional-create races, rejected rate
//! checks) are modeled as values, while genuinely actionable failures
//! (oversized payloads, memory pressure, backend faults on writes) are
//! surfaced as errors.

use thiserror::Error;

/// Low-level failure from the backing object store.
///
/// `KeyNotFound` is an expected outcome on the read path and is retried
/// there before collapsing to "absent". `PreconditionFailed` is the
/// conditional-create race signal the lock layer depends on.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No object exists at the requested key.
    #[error("object not found")]
    KeyNotFound,

    /// A conditional create found the key already occupied.
    #[error("object already exists")]
    PreconditionFailed,

    /// Any other backend failure, flagged as transient when a retry has
    /// a reasonable chance of succeeding (timeouts, connect failures).
    #[error("backend request failed: {inner}")]
    Other {
        is_transient: bool,
        inner: anyhow::Error,
    },
}

impl BackendError {
    /// Wrap an arbitrary error, marking whether a retry could help.
    pub fn other(is_transient: bool, inner: anyhow::Error) -> Self {
        BackendError::Other {
            is_transient,
            inner,
        }
    }

    /// Whether the read path should retry after this error.
    ///
    /// Not-found is retryable: an eventually-consistent store can serve
    /// a transient 404 for an object that exists.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::KeyNotFound => true,
            BackendError::PreconditionFailed => false,
            BackendError::Other { is_transient, .. } => *is_transient,
        }
    }
}

/// Errors surfaced by [`ObjectStore`](crate::store::client::ObjectStore)
/// write-side operations and by the lock store built on top of it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The payload exceeds the absolute binary-write ceiling. Checked
    /// before any network call; no caller class can bypass it.
    #[error("payload of {size} bytes exceeds the {limit}-byte binary write ceiling")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// The process lacks memory headroom and the payload is above the
    /// soft write threshold.
    #[error("write of {size} bytes declined: process lacks memory headroom")]
    MemoryPressure { size: u64 },

    /// A create-if-absent write found the key already occupied.
    #[error("object already exists at {key}")]
    PreconditionFailed { key: String },

    /// A stored entry could not be encoded or decoded as JSON.
    #[error("malformed stored entry: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend failed in a way the caller may act on.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Misconfigured rate limiter parameters. Always thrown synchronously;
/// never retried or swallowed -- misconfiguration is a programming
/// error, not a runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(String),
}

// -- Tests --------------------------------------------------------------------
