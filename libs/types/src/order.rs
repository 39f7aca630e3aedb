//! Working order and the `take` fill primitive
//!
//! A working order is the mutable in-memory projection of a persisted order:
//! the remaining matchable quantity plus the settlement metadata a consumer
//! needs to update its own state from the emitted facts.
//!
//! Amount semantics depend on type and side: for limit orders and
//! market-sell, `remaining` is a base-asset quantity; for market-buy it is
//! the quote-currency funds left to spend.

use crate::ids::{AccountId, OrderId, ProductId, UserId};
use crate::numeric::{Amount, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Rests on the book at its price when not fully crossed
    Limit,
    /// Crosses immediately and never rests
    Market,
}

/// Outcome of taking liquidity from a maker order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeResult {
    /// Prices do not cross; nothing changed on either order
    NotCrossed,
    /// A trade occurred (possibly zero-sized for a market-buy whose
    /// remaining funds cannot buy the smallest representable unit)
    Trade {
        /// Base-asset quantity traded
        amount: Amount,
        /// Quote-currency funds traded (amount × maker price)
        funds: Amount,
    },
}

/// One order's remaining matchable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; zero for market orders
    pub price: Price,
    /// Remaining base amount (limit, market-sell) or quote funds (market-buy)
    pub remaining: Amount,
    /// Account that collects this order's fees
    pub fee_account_id: AccountId,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    /// Unix nanos at order creation
    pub created_at: i64,
    /// True once this order has participated in any non-zero trade
    pub ever_matched: bool,
    /// True once the order can never trade again
    pub completed: bool,
    /// Cumulative base amount filled
    pub filled_amount: Amount,
    /// Cumulative quote funds filled
    pub filled_funds: Amount,
}

impl Order {
    /// Create a new limit order
    #[allow(clippy::too_many_arguments)]
    pub fn limit(
        id: OrderId,
        user_id: UserId,
        product_id: ProductId,
        side: Side,
        price: Price,
        amount: Amount,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            user_id,
            product_id,
            side,
            order_type: OrderType::Limit,
            price,
            remaining: amount,
            fee_account_id: AccountId::new(0),
            maker_fee_rate: Decimal::ZERO,
            taker_fee_rate: Decimal::ZERO,
            created_at,
            ever_matched: false,
            completed: false,
            filled_amount: Amount::zero(),
            filled_funds: Amount::zero(),
        }
    }

    /// Create a new market order
    ///
    /// For BUY, `amount` is the quote funds to spend; for SELL it is the
    /// base quantity to sell.
    pub fn market(
        id: OrderId,
        user_id: UserId,
        product_id: ProductId,
        side: Side,
        amount: Amount,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            user_id,
            product_id,
            side,
            order_type: OrderType::Market,
            price: Price::zero(),
            remaining: amount,
            fee_account_id: AccountId::new(0),
            maker_fee_rate: Decimal::ZERO,
            taker_fee_rate: Decimal::ZERO,
            created_at,
            ever_matched: false,
            completed: false,
            filled_amount: Amount::zero(),
            filled_funds: Amount::zero(),
        }
    }

    /// True for a market-buy order (remaining is denominated in funds)
    pub fn is_market_buy(&self) -> bool {
        self.order_type == OrderType::Market && self.side == Side::BUY
    }

    /// Take liquidity from a resting maker order
    ///
    /// `self` is the incoming taker. Decrements both orders by the traded
    /// quantity/funds, accumulates filled totals, and marks `completed` and
    /// `ever_matched` per the fill rules.
    ///
    /// A market-buy taker whose remaining funds cannot buy even the smallest
    /// unit at the maker's price (the trade amount truncates to zero) is
    /// marked completed with a zero-sized trade; this bounds the number of
    /// matching steps.
    ///
    /// # Panics
    /// Panics if the maker is on the same side or is itself a market order.
    /// Both indicate a bug in the caller.
    pub fn take(&mut self, maker: &mut Order, amount_scale: u32) -> TakeResult {
        assert!(
            self.side == maker.side.opposite(),
            "taker and maker must be on opposite sides"
        );
        assert!(
            maker.order_type == OrderType::Limit,
            "a market order can never be a maker"
        );

        // Limit takers only cross when the price is compatible
        if self.order_type == OrderType::Limit {
            let crossed = match self.side {
                Side::BUY => self.price >= maker.price,
                Side::SELL => self.price <= maker.price,
            };
            if !crossed {
                return TakeResult::NotCrossed;
            }
        }

        let (amount, funds) = if self.is_market_buy() {
            let amount = self
                .remaining
                .div_price(maker.price, amount_scale)
                .min(maker.remaining);
            if amount.is_zero() {
                // Remaining funds cannot buy the smallest unit
                self.completed = true;
                return TakeResult::Trade {
                    amount: Amount::zero(),
                    funds: Amount::zero(),
                };
            }
            (amount, amount * maker.price)
        } else {
            let amount = self.remaining.min(maker.remaining);
            (amount, amount * maker.price)
        };

        maker.remaining = maker.remaining - amount;
        maker.filled_amount = maker.filled_amount + amount;
        maker.filled_funds = maker.filled_funds + funds;
        if maker.remaining.is_zero() {
            maker.completed = true;
        }

        if self.is_market_buy() {
            self.remaining = self.remaining - funds;
        } else {
            self.remaining = self.remaining - amount;
        }
        self.filled_amount = self.filled_amount + amount;
        self.filled_funds = self.filled_funds + funds;
        if self.remaining.is_zero() {
            self.completed = true;
        }

        self.ever_matched = true;
        maker.ever_matched = true;

        TakeResult::Trade { amount, funds }
    }
}
