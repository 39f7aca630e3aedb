//! Trading pair composition and decimal precision

use crate::ids::ProductId;
use serde::{Deserialize, Serialize};

/// A listed trading pair
///
/// `base_scale` is the number of decimals of the base currency and doubles
/// as the rounding scale for market-buy fund division; `quote_scale` is the
/// number of decimals of the quote currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub base_currency: String,
    pub quote_currency: String,
    pub base_scale: u32,
    pub quote_scale: u32,
}

impl Product {
    pub fn new(
        id: ProductId,
        base_currency: impl Into<String>,
        quote_currency: impl Into<String>,
        base_scale: u32,
        quote_scale: u32,
    ) -> Self {
        Self {
            id,
            base_currency: base_currency.into(),
            quote_currency: quote_currency.into(),
            base_scale,
            quote_scale,
        }
    }

    /// Build a product from a "BASE/QUOTE" id, deriving the currency codes
    pub fn from_symbol(symbol: &str, base_scale: u32, quote_scale: u32) -> Self {
        let id = ProductId::new(symbol);
        let (base, quote) = {
            let (b, q) = id.split();
            (b.to_string(), q.to_string())
        };
        Self {
            id,
            base_currency: base,
            quote_currency: quote,
            base_scale,
            quote_scale,
        }
    }
}
