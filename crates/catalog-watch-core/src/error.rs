//! Error types shared between the core and the app crate.
//!
//! Fetch and extraction errors live next to the code that raises them in
//! the app crate; the two here cross the trait boundaries defined in this
//! crate.

use thiserror::Error;

/// The item store could not complete an operation.
///
/// Fatal for the current scheduler tick: the tick is abandoned and the
/// next one starts from whatever state was durably written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item {0} not found")]
    NotFound(i64),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// The embedding or entailment backend was unavailable or returned garbage.
///
/// Recoverable: the item goes back to the detail queue on the normal
/// backoff schedule rather than being classified as unmatched.
#[derive(Debug, Error)]
pub enum MatchBackendError {
    #[error("semantic backend is disabled")]
    Disabled,

    #[error("semantic backend request failed: {0}")]
    Request(String),

    #[error("semantic backend returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("match criteria unavailable: {0}")]
    Criteria(String),
}
