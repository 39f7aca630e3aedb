//! One side of a product's order book
//!
//! Resting orders are kept in a BTreeMap under a side-aware key so that
//! iteration is total and deterministic: better price first, then lower id
//! (earlier arrival) first. A separate id index gives O(1) membership checks
//! and removals by id.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use types::ids::OrderId;
use types::order::{Order, OrderType, Side};

/// Ranking key for a resting order
///
/// Ordered so that the best-ranked order compares least: BUY prefers the
/// higher price, SELL the lower price, ties broken by lower id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DepthKey {
    side: Side,
    price: types::numeric::Price,
    id: OrderId,
}

impl Ord for DepthKey {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(self.side, other.side, "keys from different sides");
        let by_price = match self.side {
            Side::BUY => other.price.cmp(&self.price),
            Side::SELL => self.price.cmp(&other.price),
        };
        by_price.then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for DepthKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One side (buy or sell) of one product's book
#[derive(Debug, Clone)]
pub struct Depth {
    side: Side,
    /// Resting orders in priority order (best first)
    orders: BTreeMap<DepthKey, Order>,
    /// Id index for O(1) membership and removal
    index: HashMap<OrderId, DepthKey>,
}

impl Depth {
    /// Create an empty depth for one side
    pub fn new(side: Side) -> Self {
        Self {
            side,
            orders: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Insert a resting order
    ///
    /// Returns false without mutating if the id is already present.
    ///
    /// # Panics
    /// Panics if the order is on the wrong side or is a market order;
    /// market orders never rest.
    pub fn add(&mut self, order: Order) -> bool {
        assert_eq!(order.side, self.side, "order side does not match depth");
        assert_eq!(
            order.order_type,
            OrderType::Limit,
            "only limit orders can rest on the book"
        );

        if self.index.contains_key(&order.id) {
            return false;
        }

        let key = DepthKey {
            side: self.side,
            price: order.price,
            id: order.id,
        };
        self.index.insert(order.id, key);
        self.orders.insert(key, order);
        true
    }

    /// Remove a resting order by id, returning it when present
    pub fn remove(&mut self, id: &OrderId) -> Option<Order> {
        let key = self.index.remove(id)?;
        self.orders.remove(&key)
    }

    /// The best-ranked resting order, without removal
    pub fn peek(&self) -> Option<&Order> {
        self.orders.values().next()
    }

    /// Mutable access to the best-ranked resting order
    ///
    /// The price of a resting order never changes, so mutating it in place
    /// cannot invalidate its ranking key.
    pub(crate) fn peek_mut(&mut self) -> Option<&mut Order> {
        self.orders.values_mut().next()
    }

    /// Remove and return the best-ranked resting order
    pub fn poll(&mut self) -> Option<Order> {
        let key = *self.orders.keys().next()?;
        self.index.remove(&key.id);
        self.orders.remove(&key)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate resting orders in priority order (best first)
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Linear scan returning clones of all orders matching the predicate
    ///
    /// Intentionally O(n): used only for auction transitions and scheduled
    /// maintenance sweeps, never on the matching hot path.
    pub fn filter(&self, predicate: impl Fn(&Order) -> bool) -> Vec<Order> {
        self.orders
            .values()
            .filter(|o| predicate(o))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
