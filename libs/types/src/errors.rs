//! Error taxonomy using thiserror
//!
//! The matching core assumes pre-validated inputs, so runtime errors only
//! arise at the seams to external collaborators. Programmer errors (wrong
//! side passed to `take`, a market order used as a maker) panic instead:
//! they indicate a bug in the caller and must never be swallowed.

use thiserror::Error;

/// Errors from the external product/order store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("product not found: {product_id}")]
    ProductNotFound { product_id: String },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

/// Top-level engine error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
