//! Matching Engine Service
//!
//! Per-product order matching core: price/time-priority order books, the
//! sequential command processors that drive them, and the ordered event log
//! their downstream consumers (settlement, persistence, market data) read.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced (better price, then lower id)
//! - Deterministic matching (same command stream → same log stream)
//! - Filled amounts conserved between taker and maker
//! - Single writer per product: no internal locking, commands are processed
//!   one at a time in arrival order

pub mod book;
pub mod commands;
pub mod engine;
pub mod instant;
pub mod logs;
pub mod store;

pub use engine::Engine;
pub use instant::InstantExchangeEngine;
