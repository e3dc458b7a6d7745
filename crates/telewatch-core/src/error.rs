// ── Core error types ──
//
// User-facing errors from telewatch-core. Store-specific failures are
// translated by the `From<StoreError>` impl so transport layers only ever
// match on domain-level variants.

use thiserror::Error;

use crate::store::StoreError;

/// Rejection of bad input at the write boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("duplicate rule for {category}/{subcategory}")]
    DuplicateRule {
        category: String,
        subcategory: String,
    },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    // ── Store errors ─────────────────────────────────────────────────
    #[error("Store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Store rejected the write: {reason}")]
    StoreRejected { reason: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Pipeline already started")]
    AlreadyStarted,
}

impl CoreError {
    /// Returns `true` when retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

// ── Conversion from store-layer errors ───────────────────────────────

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { reason } => CoreError::StoreUnavailable { reason },
            StoreError::ChangeStreamClosed => CoreError::StoreUnavailable {
                reason: "change stream closed".into(),
            },
            StoreError::Lagged { skipped } => CoreError::StoreUnavailable {
                reason: format!("change stream lagged, {skipped} notifications skipped"),
            },
            StoreError::Rejected(validation) => CoreError::Validation(validation),
            StoreError::Other(message) => CoreError::StoreRejected { reason: message },
        }
    }
}
