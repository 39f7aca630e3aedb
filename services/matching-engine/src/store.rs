//! Seams to the external data store
//!
//! The core never owns persistence: persisted pending orders, closing
//! prices, and band configuration are read synchronously through this trait
//! at well-defined points (auction-open replay, instant-exchange replay).
//! Reads are assumed fast and local.

use std::collections::HashMap;
use std::sync::Mutex;

use types::errors::StoreError;
use types::ids::ProductId;
use types::numeric::Price;
use types::order::Order;

use crate::book::BandRates;

/// Synchronous pull interface to product/order state
pub trait ExchangeStore: Send + Sync {
    /// Persisted orders still pending for a product, ordered by id
    ///
    /// The stable order is what makes auction-open replay deterministic.
    fn pending_orders(&self, product_id: &ProductId) -> Result<Vec<Order>, StoreError>;

    /// Reference (prior closing) price for the current session, if known
    fn closing_price(&self, product_id: &ProductId) -> Result<Option<Price>, StoreError>;

    /// Daily band rate limits configured for the product, if any
    fn band_rates(&self, product_id: &ProductId) -> Result<Option<BandRates>, StoreError>;
}

/// In-memory store backing tests and demos
#[derive(Debug, Default)]
pub struct MemoryStore {
    pending: Mutex<HashMap<ProductId, Vec<Order>>>,
    closing_prices: Mutex<HashMap<ProductId, Price>>,
    rates: Mutex<HashMap<ProductId, BandRates>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pending(&self, order: Order) {
        self.pending
            .lock()
            .expect("store poisoned")
            .entry(order.product_id.clone())
            .or_default()
            .push(order);
    }

    pub fn set_closing_price(&self, product_id: ProductId, price: Price) {
        self.closing_prices
            .lock()
            .expect("store poisoned")
            .insert(product_id, price);
    }

    pub fn set_band_rates(&self, product_id: ProductId, rates: BandRates) {
        self.rates
            .lock()
            .expect("store poisoned")
            .insert(product_id, rates);
    }
}

impl ExchangeStore for MemoryStore {
    fn pending_orders(&self, product_id: &ProductId) -> Result<Vec<Order>, StoreError> {
        let mut orders = self
            .pending
            .lock()
            .expect("store poisoned")
            .get(product_id)
            .cloned()
            .unwrap_or_default();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    fn closing_price(&self, product_id: &ProductId) -> Result<Option<Price>, StoreError> {
        Ok(self
            .closing_prices
            .lock()
            .expect("store poisoned")
            .get(product_id)
            .copied())
    }

    fn band_rates(&self, product_id: &ProductId) -> Result<Option<BandRates>, StoreError> {
        Ok(self
            .rates
            .lock()
            .expect("store poisoned")
            .get(product_id)
            .copied())
    }
}
