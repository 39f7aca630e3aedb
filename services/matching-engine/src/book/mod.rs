//! Order book infrastructure module
//!
//! Contains the per-side depth and the per-product order book.

pub mod depth;
pub mod order_book;

pub use depth::Depth;
pub use order_book::{BandCheck, BandRates, MatchPlan, OrderBook};
