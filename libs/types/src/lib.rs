//! Types library for the matching core
//!
//! This library provides the core type definitions shared by the matching
//! engine and its downstream consumers (settlement, persistence, market
//! data), ensuring type safety and deterministic behavior.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, UserId, AccountId, ProductId)
//! - `numeric`: Fixed-point decimal types (Price, Amount)
//! - `order`: Working order and the `take` fill primitive
//! - `product`: Trading pair composition and decimal precision
//! - `errors`: Error taxonomy

// Public modules
pub mod errors;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod product;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::product::*;
}
