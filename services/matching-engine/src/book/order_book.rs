//! Per-product order book and crossing algorithm
//!
//! Owns the two depths for one product and implements price/time-priority
//! crossing, the daily price-band gate, and the open/closed (continuous
//! trading vs. call auction) state. While closed, nothing crosses: every
//! submitted order is deferred with a pended fact until the next open
//! transition replays it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::OrderId;
use types::numeric::{Amount, Price};
use types::order::{Order, OrderType, Side, TakeResult};
use types::product::Product;

use super::depth::Depth;
use crate::logs::LogPayload;

/// Asymmetric daily price-band rate limits
///
/// The valid maker-price range for a session is
/// `[reference * (1 - lower), reference * (1 + upper)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRates {
    pub upper: Decimal,
    pub lower: Decimal,
}

/// Result of checking a price against the daily band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandCheck {
    InBand,
    Above,
    Below,
}

/// Proposed outcome of a tentative match, computed without book mutation
///
/// The instant-exchange engine plans both legs first and commits with
/// `take_order` only if every leg clears, so a two-hop trade either fully
/// occurs or leaves both books untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPlan {
    /// Base-asset quantity the taker would fill
    pub filled_amount: Amount,
    /// Quote funds the taker would move
    pub filled_funds: Amount,
    /// Taker remainder after the trial, in the taker's own unit
    pub unfilled: Amount,
    /// Number of maker orders the trial touched
    pub maker_fills: usize,
}

/// One product's tradable state
#[derive(Debug)]
pub struct OrderBook {
    product: Product,
    bids: Depth,
    asks: Depth,
    is_open: bool,
    band_rates: Option<BandRates>,
    reference_price: Option<Price>,
}

/// Outcome of one crossing-loop iteration, resolved after the maker borrow
/// is released
enum Step {
    Stop,
    ZeroTrade,
    Traded { maker_completed: bool },
}

impl OrderBook {
    pub fn new(product: Product, band_rates: Option<BandRates>) -> Self {
        Self {
            bids: Depth::new(Side::BUY),
            asks: Depth::new(Side::SELL),
            is_open: true,
            band_rates,
            reference_price: None,
            product,
        }
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub(crate) fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }

    pub(crate) fn set_reference_price(&mut self, price: Option<Price>) {
        self.reference_price = price;
    }

    pub fn depth(&self, side: Side) -> &Depth {
        match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        }
    }

    pub(crate) fn depth_mut(&mut self, side: Side) -> &mut Depth {
        match side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        }
    }

    /// Check a price against the current daily band
    ///
    /// Returns `InBand` unless both a reference price and rate limits are
    /// configured and the price falls outside the derived bounds.
    pub fn band_check(&self, price: Price) -> BandCheck {
        band_check_at(self.reference_price, self.band_rates.as_ref(), price)
    }

    /// Cross an incoming order and rest, pend, or cancel the remainder
    pub fn place_order(&mut self, mut taker: Order) -> Vec<LogPayload> {
        let mut logs = Vec::new();

        // Aggregate-auction semantics: nothing crosses while closed
        if !self.is_open {
            logs.push(LogPayload::OrderPended { order: taker });
            return logs;
        }

        // A replayed duplicate is dropped silently
        if self.depth(taker.side).contains(&taker.id) {
            return logs;
        }

        if self.cross(&mut taker, &mut logs) {
            return logs;
        }

        if taker.completed {
            logs.push(LogPayload::TakerOrderCompleted { order: taker });
        } else if taker.order_type == OrderType::Limit {
            match self.band_check(taker.price) {
                BandCheck::InBand => {
                    let opened = taker.clone();
                    self.depth_mut(opened.side).add(taker);
                    logs.push(LogPayload::TakerOrderOpened { order: opened });
                }
                // An out-of-band limit order is deferred, never rested
                BandCheck::Above | BandCheck::Below => {
                    logs.push(LogPayload::OrderPended { order: taker });
                }
            }
        } else {
            // Partially filled market order: cancel the unfilled remainder
            logs.push(LogPayload::TakerOrderCancelled { order: taker });
        }

        logs
    }

    /// Cross an incoming order without ever resting it
    ///
    /// The committing half of the trial-then-commit protocol: `plan_match`
    /// first, then this with the same order.
    pub fn take_order(&mut self, taker: &mut Order) -> Vec<LogPayload> {
        let mut logs = Vec::new();
        if self.cross(taker, &mut logs) {
            return logs;
        }
        if taker.completed {
            logs.push(LogPayload::TakerOrderCompleted {
                order: taker.clone(),
            });
        } else {
            logs.push(LogPayload::TakerOrderCancelled {
                order: taker.clone(),
            });
        }
        logs
    }

    /// Tentatively match an order against an immutable view of the book
    ///
    /// Touches no book state: the proposed fills are reported in the
    /// returned plan and applied only when the caller commits via
    /// `take_order`.
    pub fn plan_match(&self, taker: &Order) -> MatchPlan {
        let mut trial = taker.clone();
        let mut maker_fills = 0;

        if self.is_open {
            let opposite = self.depth(taker.side.opposite());
            let scale = self.product.base_scale;
            for maker in opposite.iter() {
                if self.band_check(maker.price) != BandCheck::InBand {
                    break;
                }
                let mut maker = maker.clone();
                match trial.take(&mut maker, scale) {
                    TakeResult::NotCrossed => break,
                    TakeResult::Trade { amount, .. } if amount.is_zero() => break,
                    TakeResult::Trade { .. } => {
                        maker_fills += 1;
                        if trial.completed {
                            break;
                        }
                    }
                }
            }
        }

        MatchPlan {
            filled_amount: trial.filled_amount - taker.filled_amount,
            filled_funds: trial.filled_funds - taker.filled_funds,
            unfilled: trial.remaining,
            maker_fills,
        }
    }

    /// Remove a resting order by id from the side-matching depth
    pub fn cancel(&mut self, id: &OrderId, side: Side) -> Option<Order> {
        self.depth_mut(side).remove(id)
    }

    /// Re-validate resting orders against a (possibly changed) daily band
    ///
    /// Sweeps each side from the best price inward, pending every order now
    /// outside the band, stopping at the first in-band order. Runs on the
    /// auction open transition.
    pub fn filter_orders(&mut self) -> Vec<LogPayload> {
        let mut logs = Vec::new();
        let reference = self.reference_price;
        let rates = self.band_rates;

        for depth in [&mut self.bids, &mut self.asks] {
            while let Some(best) = depth.peek() {
                if band_check_at(reference, rates.as_ref(), best.price) == BandCheck::InBand {
                    break;
                }
                let order = depth.poll().expect("peeked order must be removable");
                logs.push(LogPayload::OrderPended { order });
            }
        }

        logs
    }

    /// The crossing loop shared by `place_order` and `take_order`
    ///
    /// Returns true when the taker was cancelled by a zero-sized trade (a
    /// market-buy whose funds cannot buy the smallest unit); the caller then
    /// emits nothing further.
    fn cross(&mut self, taker: &mut Order, logs: &mut Vec<LogPayload>) -> bool {
        let reference = self.reference_price;
        let rates = self.band_rates;
        let scale = self.product.base_scale;
        let opposite = match taker.side {
            Side::BUY => &mut self.asks,
            Side::SELL => &mut self.bids,
        };

        loop {
            let step = match opposite.peek_mut() {
                None => Step::Stop,
                Some(maker) => {
                    // Stop crossing against liquidity outside today's band
                    if band_check_at(reference, rates.as_ref(), maker.price) != BandCheck::InBand {
                        Step::Stop
                    } else {
                        match taker.take(maker, scale) {
                            TakeResult::NotCrossed => Step::Stop,
                            TakeResult::Trade { amount, .. } if amount.is_zero() => Step::ZeroTrade,
                            TakeResult::Trade { amount, funds } => {
                                logs.push(LogPayload::OrderMatched {
                                    taker: taker.clone(),
                                    maker: maker.clone(),
                                    price: maker.price,
                                    amount,
                                    funds,
                                });
                                Step::Traded {
                                    maker_completed: maker.completed,
                                }
                            }
                        }
                    }
                }
            };

            match step {
                Step::Stop => break,
                Step::ZeroTrade => {
                    logs.push(LogPayload::TakerOrderCancelled {
                        order: taker.clone(),
                    });
                    return true;
                }
                Step::Traded { maker_completed } => {
                    if maker_completed {
                        let maker = opposite.poll().expect("completed maker must be resting");
                        logs.push(LogPayload::MakerOrderCompleted { order: maker });
                    }
                    if taker.completed {
                        break;
                    }
                }
            }
        }

        false
    }
}

fn band_check_at(reference: Option<Price>, rates: Option<&BandRates>, price: Price) -> BandCheck {
    let (Some(reference), Some(rates)) = (reference, rates) else {
        return BandCheck::InBand;
    };
    let upper = reference.as_decimal() * (Decimal::ONE + rates.upper);
    let lower = reference.as_decimal() * (Decimal::ONE - rates.lower);
    if price.as_decimal() > upper {
        BandCheck::Above
    } else if price.as_decimal() < lower {
        BandCheck::Below
    } else {
        BandCheck::InBand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{ProductId, UserId};

    fn book() -> OrderBook {
        OrderBook::new(Product::from_symbol("BTC/USDT", 8, 2), None)
    }

    fn limit(id: u64, side: Side, price: &str, amount: &str) -> Order {
        Order::limit(
            OrderId::new(id),
            UserId::new(id),
            ProductId::new("BTC/USDT"),
            side,
            Price::from_str(price).unwrap(),
            Amount::from_str(amount).unwrap(),
            1708123456789000000,
        )
    }

    fn labels(logs: &[LogPayload]) -> Vec<&'static str> {
        logs.iter().map(|l| l.label()).collect()
    }

    #[test]
    fn test_taker_fully_filled_against_partial_maker() {
        let mut book = book();
        book.place_order(limit(10, Side::SELL, "0.01", "100"));

        let logs = book.place_order(limit(11, Side::BUY, "0.02", "20"));
        assert_eq!(labels(&logs), vec!["OrderMatched", "TakerOrderCompleted"]);

        match &logs[0] {
            LogPayload::OrderMatched {
                price,
                amount,
                maker,
                ..
            } => {
                assert_eq!(*price, Price::from_str("0.01").unwrap());
                assert_eq!(*amount, Amount::from_u64(20));
                assert_eq!(maker.remaining, Amount::from_u64(80));
            }
            other => panic!("expected OrderMatched, got {:?}", other),
        }

        // Maker stays resting with the remainder
        assert_eq!(
            book.depth(Side::SELL).peek().unwrap().remaining,
            Amount::from_u64(80)
        );
    }

    #[test]
    fn test_taker_remainder_rests_after_completing_maker() {
        let mut book = book();
        book.place_order(limit(10, Side::SELL, "0.01", "100"));

        let logs = book.place_order(limit(12, Side::BUY, "0.01", "200"));
        assert_eq!(
            labels(&logs),
            vec!["OrderMatched", "MakerOrderCompleted", "TakerOrderOpened"]
        );

        assert!(book.depth(Side::SELL).is_empty());
        let resting = book.depth(Side::BUY).peek().unwrap();
        assert_eq!(resting.id, OrderId::new(12));
        assert_eq!(resting.remaining, Amount::from_u64(100));
    }

    #[test]
    fn test_closed_book_pends_without_mutation() {
        let mut book = book();
        book.set_open(false);

        let logs = book.place_order(limit(1, Side::BUY, "0.01", "5"));
        assert_eq!(labels(&logs), vec!["OrderPended"]);
        assert!(book.depth(Side::BUY).is_empty());
        assert!(book.depth(Side::SELL).is_empty());
    }

    #[test]
    fn test_duplicate_resting_id_dropped_silently() {
        let mut book = book();
        book.place_order(limit(1, Side::BUY, "0.01", "5"));
        let logs = book.place_order(limit(1, Side::BUY, "0.02", "9"));

        assert!(logs.is_empty());
        assert_eq!(book.depth(Side::BUY).len(), 1);
        assert_eq!(
            book.depth(Side::BUY).peek().unwrap().price,
            Price::from_str("0.01").unwrap()
        );
    }

    #[test]
    fn test_market_buy_zero_trade_cancels_taker() {
        let mut book = OrderBook::new(Product::from_symbol("BTC/USDT", 2, 8), None);
        book.place_order(limit(1, Side::SELL, "3", "1000"));

        // 0.01 funds cannot buy a 0.01 base unit at price 3
        let taker = Order::market(
            OrderId::new(2),
            UserId::new(2),
            ProductId::new("BTC/USDT"),
            Side::BUY,
            Amount::from_str("0.01").unwrap(),
            0,
        );
        let logs = book.place_order(taker);
        assert_eq!(labels(&logs), vec!["TakerOrderCancelled"]);
        assert_eq!(
            book.depth(Side::SELL).peek().unwrap().remaining,
            Amount::from_u64(1000)
        );
    }

    #[test]
    fn test_market_sell_remainder_cancelled() {
        let mut book = book();
        book.place_order(limit(1, Side::BUY, "100", "1"));

        let taker = Order::market(
            OrderId::new(2),
            UserId::new(2),
            ProductId::new("BTC/USDT"),
            Side::SELL,
            Amount::from_u64(3),
            0,
        );
        let logs = book.place_order(taker);
        assert_eq!(
            labels(&logs),
            vec!["OrderMatched", "MakerOrderCompleted", "TakerOrderCancelled"]
        );
        match &logs[2] {
            LogPayload::TakerOrderCancelled { order } => {
                assert_eq!(order.remaining, Amount::from_u64(2));
            }
            other => panic!("expected TakerOrderCancelled, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_band_limit_order_pends() {
        let mut book = OrderBook::new(
            Product::from_symbol("BTC/USDT", 8, 2),
            Some(BandRates {
                upper: Decimal::new(1, 1), // +10%
                lower: Decimal::new(1, 1), // -10%
            }),
        );
        book.set_reference_price(Some(Price::from_u64(100)));

        let logs = book.place_order(limit(1, Side::BUY, "111", "1"));
        assert_eq!(labels(&logs), vec!["OrderPended"]);
        assert!(book.depth(Side::BUY).is_empty());

        let logs = book.place_order(limit(2, Side::BUY, "109", "1"));
        assert_eq!(labels(&logs), vec!["TakerOrderOpened"]);
    }

    #[test]
    fn test_band_stops_crossing_against_invalid_liquidity() {
        let mut book = OrderBook::new(
            Product::from_symbol("BTC/USDT", 8, 2),
            Some(BandRates {
                upper: Decimal::new(1, 1),
                lower: Decimal::new(1, 1),
            }),
        );
        // No reference yet: resting an out-of-band-to-be sell is allowed
        book.place_order(limit(1, Side::SELL, "80", "1"));
        book.set_reference_price(Some(Price::from_u64(100)));

        // 80 is below the band now; the buy must not cross it
        let logs = book.place_order(limit(2, Side::BUY, "95", "1"));
        assert_eq!(labels(&logs), vec!["TakerOrderOpened"]);
        assert_eq!(book.depth(Side::SELL).len(), 1);
    }

    #[test]
    fn test_filter_orders_pends_out_of_band_from_best_inward() {
        let mut book = OrderBook::new(
            Product::from_symbol("BTC/USDT", 8, 2),
            Some(BandRates {
                upper: Decimal::new(1, 1),
                lower: Decimal::new(1, 1),
            }),
        );
        book.place_order(limit(1, Side::BUY, "120", "1"));
        book.place_order(limit(2, Side::BUY, "105", "1"));
        book.place_order(limit(3, Side::SELL, "130", "1"));

        book.set_reference_price(Some(Price::from_u64(100)));
        let logs = book.filter_orders();

        // Best bid 120 is above band and pended; 105 is in band and stays;
        // ask 130 is above band and pended
        assert_eq!(labels(&logs), vec!["OrderPended", "OrderPended"]);
        assert_eq!(book.depth(Side::BUY).len(), 1);
        assert!(book.depth(Side::SELL).is_empty());
    }

    #[test]
    fn test_plan_match_mutates_nothing() {
        let mut book = book();
        book.place_order(limit(1, Side::SELL, "10", "5"));
        book.place_order(limit(2, Side::SELL, "11", "5"));

        let taker = Order::market(
            OrderId::new(3),
            UserId::new(3),
            ProductId::new("BTC/USDT"),
            Side::BUY,
            Amount::from_u64(80),
            0,
        );

        let before: Vec<Order> = book.depth(Side::SELL).iter().cloned().collect();
        let plan = book.plan_match(&taker);
        let after: Vec<Order> = book.depth(Side::SELL).iter().cloned().collect();

        assert_eq!(before, after);
        // 50 funds fill maker 1 entirely, 30 buy 2.72727272 at 11
        assert_eq!(plan.maker_fills, 2);
        assert!(plan.filled_amount > Amount::from_u64(7));
        assert!(plan.unfilled < Amount::from_str("0.01").unwrap());
    }

    #[test]
    fn test_plan_then_take_commits_the_plan() {
        let mut book = book();
        book.place_order(limit(1, Side::SELL, "10", "5"));

        let mut taker = Order::market(
            OrderId::new(2),
            UserId::new(2),
            ProductId::new("BTC/USDT"),
            Side::BUY,
            Amount::from_u64(50),
            0,
        );

        let plan = book.plan_match(&taker);
        assert!(plan.unfilled.is_zero());

        let logs = book.take_order(&mut taker);
        assert_eq!(labels(&logs), vec!["OrderMatched", "MakerOrderCompleted", "TakerOrderCompleted"]);
        assert_eq!(taker.filled_amount, plan.filled_amount);
        assert_eq!(taker.filled_funds, plan.filled_funds);
        assert!(book.depth(Side::SELL).is_empty());
    }
}
