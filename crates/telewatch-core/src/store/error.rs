use thiserror::Error;

use crate::error::ValidationError;

/// Failures reported by a durable store implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store ended an insert subscription.
    #[error("change stream closed by the store")]
    ChangeStreamClosed,

    /// The subscriber fell behind and notifications were dropped.
    #[error("change stream lagged, {skipped} notifications skipped")]
    Lagged { skipped: u64 },

    /// A document failed the store's own validation.
    #[error("document rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}
