//! Instant-exchange (triangulated) matching
//!
//! Serves a pair with no directly-quoted book by routing through two listed
//! products that share a medium currency: `A/B` trades as a market-sell on
//! `A/M` followed by a market-buy on `B/M` (or the reverse leg order for a
//! buy). Both legs are first planned against immutable views of the books;
//! only if each trial clears within epsilon are they committed, in the same
//! order. A two-hop trade therefore either fully occurs on both legs or
//! leaves both books untouched.
//!
//! The engine straddles two products' books, so both products' entire
//! command streams route through this one sequential processor; the
//! single-writer contract replaces any cross-book locking.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use types::errors::EngineError;
use types::ids::ProductId;
use types::numeric::Amount;
use types::order::{Order, OrderType, Side};

use crate::book::OrderBook;
use crate::commands::{Command, DailyLimitOp, Signal};
use crate::engine::Engine;
use crate::logs::{
    InstantExchangeLog, InstantExchangeLogHandler, InstantExchangeLogPayload, Log, LogSequence,
};
use crate::store::ExchangeStore;

/// Configuration for one synthetic pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantExchangeConfig {
    /// Largest leg-trial remainder still treated as fully cleared
    ///
    /// Denominated in the leg taker's own unit, so it should track the
    /// medium currency's minimum unit for the pair.
    pub epsilon: Amount,
}

impl Default for InstantExchangeConfig {
    fn default() -> Self {
        Self {
            epsilon: Amount::new(Decimal::new(1, 3)), // 0.001
        }
    }
}

/// One command for the instant-exchange processor
///
/// Commands for either underlying product are routed through this processor
/// unchanged, preserving the single writer for both books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InstantExchangeCommand {
    /// A regular command for one of the two underlying products
    Leg {
        product_id: ProductId,
        command: Command,
    },
    /// An order for the synthetic pair
    PlaceOrder(Order),
    /// Cancel of a synthetic order (they never rest)
    CancelOrder(Order),
}

/// Which underlying book a leg executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Base,
    Quote,
}

/// Sequential processor synthesizing two-hop trades over two product books
pub struct InstantExchangeEngine {
    /// The synthetic pair (e.g. "BTC/ETH")
    product_id: ProductId,
    /// Book for BASE/MEDIUM
    base: Engine,
    /// Book for QUOTE/MEDIUM
    quote: Engine,
    base_ready: bool,
    quote_ready: bool,
    epsilon: Amount,
    store: Arc<dyn ExchangeStore>,
    sequence: LogSequence,
    handler: Box<dyn InstantExchangeLogHandler>,
}

impl InstantExchangeEngine {
    /// Create the processor for a synthetic pair over two leg engines
    ///
    /// # Panics
    /// Panics if the legs do not share a medium currency or the synthetic
    /// pair's currencies do not match the legs' base currencies; both
    /// indicate a mis-wired dispatcher.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: ProductId,
        base: Engine,
        quote: Engine,
        store: Arc<dyn ExchangeStore>,
        sequence: LogSequence,
        handler: Box<dyn InstantExchangeLogHandler>,
        config: InstantExchangeConfig,
    ) -> Self {
        let base_product = base.book().product();
        let quote_product = quote.book().product();
        assert_eq!(
            base_product.quote_currency, quote_product.quote_currency,
            "legs must share a medium currency"
        );
        let (synthetic_base, synthetic_quote) = product_id.split();
        assert_eq!(
            synthetic_base, base_product.base_currency,
            "synthetic base must match the base leg's base currency"
        );
        assert_eq!(
            synthetic_quote, quote_product.base_currency,
            "synthetic quote must match the quote leg's base currency"
        );

        Self {
            product_id: product_id.clone(),
            base,
            quote,
            base_ready: false,
            quote_ready: false,
            epsilon: config.epsilon,
            store,
            sequence,
            handler,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Process one command to completion
    pub fn process(&mut self, command: InstantExchangeCommand) -> Result<(), EngineError> {
        match command {
            InstantExchangeCommand::Leg {
                product_id,
                command,
            } => {
                if let Command::Signal(Signal::OrderBookInitialized {
                    product_id: initialized,
                }) = &command
                {
                    self.mark_ready(initialized.clone())?;
                }
                let reopening = matches!(&command, Command::DailyLimit(DailyLimitOp::Open))
                    && !self.leg_engine_mut(&product_id).book().is_open();
                self.leg_engine_mut(&product_id).process(command)?;
                // A leg reopening mirrors the initialized transition: pended
                // synthetic orders get another chance to clear
                if reopening && self.base_ready && self.quote_ready {
                    self.replay_pending()?;
                }
                Ok(())
            }
            InstantExchangeCommand::PlaceOrder(order) => self.place(order),
            InstantExchangeCommand::CancelOrder(order) => {
                self.emit(InstantExchangeLogPayload::PendingOrderCancelled {
                    order_id: order.id,
                    user_id: order.user_id,
                });
                Ok(())
            }
        }
    }

    /// Consume the command stream until the channel closes
    pub fn run(mut self, commands: Receiver<InstantExchangeCommand>) {
        let product = self.product_id.to_string();
        info!(product = %product, "instant exchange loop started");
        for command in commands {
            if let Err(err) = self.process(command) {
                error!(product = %product, error = %err, "command failed");
            }
        }
        info!(product = %product, "command stream closed");
    }

    fn leg_engine_mut(&mut self, product_id: &ProductId) -> &mut Engine {
        if product_id == self.base.product_id() {
            &mut self.base
        } else if product_id == self.quote.product_id() {
            &mut self.quote
        } else {
            panic!("command for {product_id} routed to instant engine {}", self.product_id);
        }
    }

    fn leg_book_mut(&mut self, leg: Leg) -> &mut OrderBook {
        match leg {
            Leg::Base => self.base.book_mut(),
            Leg::Quote => self.quote.book_mut(),
        }
    }

    fn leg_book(&self, leg: Leg) -> &OrderBook {
        match leg {
            Leg::Base => self.base.book(),
            Leg::Quote => self.quote.book(),
        }
    }

    /// Record an underlying book's initialized signal; once both legs are
    /// ready, replay persisted pending synthetic orders
    fn mark_ready(&mut self, product_id: ProductId) -> Result<(), EngineError> {
        let was_ready = self.base_ready && self.quote_ready;
        if &product_id == self.base.product_id() {
            self.base_ready = true;
        } else if &product_id == self.quote.product_id() {
            self.quote_ready = true;
        }

        if !was_ready && self.base_ready && self.quote_ready {
            info!(product = %self.product_id, "both legs initialized");
            self.replay_pending()?;
        }
        Ok(())
    }

    /// Replay persisted pending synthetic orders in persisted order
    fn replay_pending(&mut self) -> Result<(), EngineError> {
        let pending = self.store.pending_orders(&self.product_id)?;
        info!(
            product = %self.product_id,
            replayed = pending.len(),
            "replaying pending orders"
        );
        for order in pending {
            self.place(order)?;
        }
        Ok(())
    }

    /// Trial both legs; commit only if each clears within epsilon
    ///
    /// # Panics
    /// Panics on a limit-type order: synthetic orders never rest, and a
    /// limit BUY's base-denominated amount would be misread as quote funds.
    fn place(&mut self, order: Order) -> Result<(), EngineError> {
        assert!(
            order.order_type == OrderType::Market,
            "synthetic orders must be market orders"
        );
        if !(self.base_ready && self.quote_ready) {
            debug!(order_id = %order.id, "legs not initialized, pending order");
            self.emit(InstantExchangeLogPayload::OrderPended { order });
            return Ok(());
        }

        // Leg order: sell the asset the customer gives, then buy the asset
        // the customer wants with the medium proceeds. A SELL gives the
        // synthetic base; a BUY gives the synthetic quote.
        let (first, second) = match order.side {
            Side::SELL => (Leg::Base, Leg::Quote),
            Side::BUY => (Leg::Quote, Leg::Base),
        };

        let mut leg1 = Order::market(
            order.id,
            order.user_id,
            self.leg_book(first).product().id.clone(),
            Side::SELL,
            order.remaining,
            order.created_at,
        );
        let plan1 = self.leg_book(first).plan_match(&leg1);
        if plan1.unfilled > self.epsilon {
            debug!(order_id = %order.id, unfilled = %plan1.unfilled, "first leg trial failed");
            self.emit(InstantExchangeLogPayload::OrderUnmatched { order });
            return Ok(());
        }

        let mut leg2 = Order::market(
            order.id,
            order.user_id,
            self.leg_book(second).product().id.clone(),
            Side::BUY,
            plan1.filled_funds,
            order.created_at,
        );
        let plan2 = self.leg_book(second).plan_match(&leg2);
        if plan2.unfilled > self.epsilon {
            debug!(order_id = %order.id, unfilled = %plan2.unfilled, "second leg trial failed");
            self.emit(InstantExchangeLogPayload::OrderUnmatched { order });
            return Ok(());
        }

        // Both trials cleared: commit in the same order. The books were not
        // touched between trial and commit, so the commit reproduces the
        // plans exactly.
        let first_logs = self.commit_leg(first, &mut leg1);
        let second_logs = self.commit_leg(second, &mut leg2);

        let (base_logs, quote_logs) = match order.side {
            Side::SELL => (first_logs, second_logs),
            Side::BUY => (second_logs, first_logs),
        };
        info!(
            product = %self.product_id,
            order_id = %order.id,
            medium_funds = %plan1.filled_funds,
            "instant exchange matched"
        );
        self.emit(InstantExchangeLogPayload::OrderMatched {
            order,
            base_logs,
            quote_logs,
        });
        Ok(())
    }

    fn commit_leg(&mut self, leg: Leg, taker: &mut Order) -> Vec<Log> {
        let product_id = self.leg_book(leg).product().id.clone();
        let payloads = self.leg_book_mut(leg).take_order(taker);
        payloads
            .into_iter()
            .map(|payload| self.sequence.stamp(product_id.clone(), payload))
            .collect()
    }

    fn emit(&mut self, payload: InstantExchangeLogPayload) {
        let log: InstantExchangeLog = self
            .sequence
            .stamp_instant(self.product_id.clone(), payload);
        self.handler.on_log(log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogPayload, MemoryInstantLogHandler, MemoryLogHandler};
    use crate::store::MemoryStore;
    use types::ids::{OrderId, UserId};
    use types::numeric::Price;
    use types::product::Product;

    const BASE: &str = "BTC/USDT";
    const QUOTE: &str = "ETH/USDT";
    const SYNTHETIC: &str = "BTC/ETH";

    struct Fixture {
        engine: InstantExchangeEngine,
        instant_logs: MemoryInstantLogHandler,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sequence = LogSequence::new();
        let base = Engine::new(
            Product::from_symbol(BASE, 8, 8),
            store.clone(),
            sequence.clone(),
            Box::new(MemoryLogHandler::new()),
        )
        .unwrap();
        let quote = Engine::new(
            Product::from_symbol(QUOTE, 8, 8),
            store.clone(),
            sequence.clone(),
            Box::new(MemoryLogHandler::new()),
        )
        .unwrap();

        let instant_logs = MemoryInstantLogHandler::new();
        let engine = InstantExchangeEngine::new(
            ProductId::new(SYNTHETIC),
            base,
            quote,
            store.clone(),
            sequence,
            Box::new(instant_logs.clone()),
            InstantExchangeConfig::default(),
        );
        Fixture {
            engine,
            instant_logs,
            store,
        }
    }

    fn initialize_legs(engine: &mut InstantExchangeEngine) {
        for product in [BASE, QUOTE] {
            let product_id = ProductId::new(product);
            engine
                .process(InstantExchangeCommand::Leg {
                    product_id: product_id.clone(),
                    command: Command::Signal(Signal::OrderBookInitialized { product_id }),
                })
                .unwrap();
        }
    }

    fn leg_limit(id: u64, product: &str, side: Side, price: u64, amount: u64) -> Order {
        Order::limit(
            OrderId::new(id),
            UserId::new(id),
            ProductId::new(product),
            side,
            Price::from_u64(price),
            Amount::from_u64(amount),
            1_000,
        )
    }

    fn seed_liquidity(engine: &mut InstantExchangeEngine) {
        // Bid for 10 BTC at 10_000 USDT; ask of 100 ETH at 1_000 USDT
        for order in [
            leg_limit(1, BASE, Side::BUY, 10_000, 10),
            leg_limit(2, QUOTE, Side::SELL, 1_000, 100),
        ] {
            let product_id = order.product_id.clone();
            engine
                .process(InstantExchangeCommand::Leg {
                    product_id,
                    command: Command::PlaceOrder(order),
                })
                .unwrap();
        }
    }

    fn synthetic_order(id: u64, side: Side, amount: u64) -> Order {
        Order::market(
            OrderId::new(id),
            UserId::new(id),
            ProductId::new(SYNTHETIC),
            side,
            Amount::from_u64(amount),
            2_000,
        )
    }

    fn instant_labels(handler: &MemoryInstantLogHandler) -> Vec<String> {
        handler
            .collected()
            .iter()
            .map(|l| l.payload.label().to_string())
            .collect()
    }

    #[test]
    fn test_command_serialization_roundtrip() {
        let commands = vec![
            InstantExchangeCommand::Leg {
                product_id: ProductId::new(BASE),
                command: Command::Signal(Signal::OrderImported),
            },
            InstantExchangeCommand::Leg {
                product_id: ProductId::new(QUOTE),
                command: Command::Signal(Signal::OrderBookInitialized {
                    product_id: ProductId::new(QUOTE),
                }),
            },
            InstantExchangeCommand::PlaceOrder(synthetic_order(10, Side::SELL, 5)),
            InstantExchangeCommand::CancelOrder(synthetic_order(11, Side::BUY, 3)),
        ];

        for command in commands {
            let json = serde_json::to_string(&command).unwrap();
            let deserialized: InstantExchangeCommand = serde_json::from_str(&json).unwrap();
            assert_eq!(command, deserialized);
        }
    }

    #[test]
    #[should_panic(expected = "synthetic orders must be market orders")]
    fn test_limit_synthetic_order_panics() {
        let mut fx = fixture();
        initialize_legs(&mut fx.engine);
        let order = Order::limit(
            OrderId::new(10),
            UserId::new(10),
            ProductId::new(SYNTHETIC),
            Side::SELL,
            Price::from_u64(1),
            Amount::from_u64(5),
            2_000,
        );
        let _ = fx.engine.process(InstantExchangeCommand::PlaceOrder(order));
    }

    #[test]
    fn test_orders_pend_until_both_legs_initialized() {
        let mut fx = fixture();
        fx.engine
            .process(InstantExchangeCommand::PlaceOrder(synthetic_order(
                10,
                Side::SELL,
                5,
            )))
            .unwrap();
        assert_eq!(instant_labels(&fx.instant_logs), vec!["OrderPended"]);
    }

    #[test]
    fn test_two_leg_sell_matches_atomically() {
        let mut fx = fixture();
        initialize_legs(&mut fx.engine);
        seed_liquidity(&mut fx.engine);

        // Sell 5 BTC for ETH: 5 BTC -> 50_000 USDT -> 50 ETH
        fx.engine
            .process(InstantExchangeCommand::PlaceOrder(synthetic_order(
                10,
                Side::SELL,
                5,
            )))
            .unwrap();

        let logs = fx.instant_logs.collected();
        assert_eq!(logs.len(), 1);
        match &logs[0].payload {
            InstantExchangeLogPayload::OrderMatched {
                base_logs,
                quote_logs,
                ..
            } => {
                assert!(base_logs
                    .iter()
                    .any(|l| matches!(l.payload, LogPayload::OrderMatched { .. })));
                assert!(quote_logs
                    .iter()
                    .any(|l| matches!(l.payload, LogPayload::OrderMatched { .. })));
                // Leg logs carry the underlying products, in sequence order
                assert_eq!(base_logs[0].product_id, ProductId::new(BASE));
                assert_eq!(quote_logs[0].product_id, ProductId::new(QUOTE));
            }
            other => panic!("expected OrderMatched, got {:?}", other),
        }

        // Both books were debited for real
        assert_eq!(
            fx.engine.base.book().depth(Side::BUY).peek().unwrap().remaining,
            Amount::from_u64(5)
        );
        assert_eq!(
            fx.engine.quote.book().depth(Side::SELL).peek().unwrap().remaining,
            Amount::from_u64(50)
        );
    }

    #[test]
    fn test_two_leg_buy_routes_through_quote_leg_first() {
        let mut fx = fixture();
        initialize_legs(&mut fx.engine);
        // Bid for ETH and ask of BTC so a BUY of BTC paying ETH can clear:
        // 40 ETH -> 40_000 USDT -> 4 BTC
        for order in [
            leg_limit(1, QUOTE, Side::BUY, 1_000, 100),
            leg_limit(2, BASE, Side::SELL, 10_000, 10),
        ] {
            let product_id = order.product_id.clone();
            fx.engine
                .process(InstantExchangeCommand::Leg {
                    product_id,
                    command: Command::PlaceOrder(order),
                })
                .unwrap();
        }

        fx.engine
            .process(InstantExchangeCommand::PlaceOrder(synthetic_order(
                10,
                Side::BUY,
                40,
            )))
            .unwrap();

        assert_eq!(instant_labels(&fx.instant_logs), vec!["OrderMatched"]);
        assert_eq!(
            fx.engine.quote.book().depth(Side::BUY).peek().unwrap().remaining,
            Amount::from_u64(60)
        );
        assert_eq!(
            fx.engine.base.book().depth(Side::SELL).peek().unwrap().remaining,
            Amount::from_u64(6)
        );
    }

    #[test]
    fn test_failed_second_leg_leaves_both_books_untouched() {
        let mut fx = fixture();
        initialize_legs(&mut fx.engine);
        // First leg has depth, second leg can only absorb 10 of the needed
        // 50 ETH
        for order in [
            leg_limit(1, BASE, Side::BUY, 10_000, 10),
            leg_limit(2, QUOTE, Side::SELL, 1_000, 10),
        ] {
            let product_id = order.product_id.clone();
            fx.engine
                .process(InstantExchangeCommand::Leg {
                    product_id,
                    command: Command::PlaceOrder(order),
                })
                .unwrap();
        }

        let base_before: Vec<Order> =
            fx.engine.base.book().depth(Side::BUY).iter().cloned().collect();
        let quote_before: Vec<Order> =
            fx.engine.quote.book().depth(Side::SELL).iter().cloned().collect();

        fx.engine
            .process(InstantExchangeCommand::PlaceOrder(synthetic_order(
                10,
                Side::SELL,
                5,
            )))
            .unwrap();

        assert_eq!(instant_labels(&fx.instant_logs), vec!["OrderUnmatched"]);
        let base_after: Vec<Order> =
            fx.engine.base.book().depth(Side::BUY).iter().cloned().collect();
        let quote_after: Vec<Order> =
            fx.engine.quote.book().depth(Side::SELL).iter().cloned().collect();
        assert_eq!(base_before, base_after);
        assert_eq!(quote_before, quote_after);
    }

    #[test]
    fn test_failed_first_leg_emits_unmatched() {
        let mut fx = fixture();
        initialize_legs(&mut fx.engine);
        // No liquidity at all on the base leg
        fx.engine
            .process(InstantExchangeCommand::PlaceOrder(synthetic_order(
                10,
                Side::SELL,
                5,
            )))
            .unwrap();
        assert_eq!(instant_labels(&fx.instant_logs), vec!["OrderUnmatched"]);
    }

    #[test]
    fn test_cancel_always_emits_pending_cancelled() {
        let mut fx = fixture();
        fx.engine
            .process(InstantExchangeCommand::CancelOrder(synthetic_order(
                10,
                Side::SELL,
                5,
            )))
            .unwrap();
        assert_eq!(
            instant_labels(&fx.instant_logs),
            vec!["PendingOrderCancelled"]
        );
    }

    #[test]
    fn test_pending_orders_replay_once_both_legs_ready() {
        let mut fx = fixture();
        fx.store.push_pending(synthetic_order(10, Side::SELL, 5));
        seed_liquidity(&mut fx.engine);

        initialize_legs(&mut fx.engine);

        assert_eq!(instant_labels(&fx.instant_logs), vec!["OrderMatched"]);
    }

    #[test]
    fn test_leg_reopen_replays_pending_orders() {
        let mut fx = fixture();
        initialize_legs(&mut fx.engine);
        fx.store.push_pending(synthetic_order(10, Side::SELL, 5));
        seed_liquidity(&mut fx.engine);

        for op in [DailyLimitOp::Close, DailyLimitOp::Open] {
            fx.engine
                .process(InstantExchangeCommand::Leg {
                    product_id: ProductId::new(BASE),
                    command: Command::DailyLimit(op),
                })
                .unwrap();
        }

        assert_eq!(instant_labels(&fx.instant_logs), vec!["OrderMatched"]);
    }

    #[test]
    #[should_panic(expected = "legs must share a medium currency")]
    fn test_mismatched_medium_panics() {
        let store = Arc::new(MemoryStore::new());
        let sequence = LogSequence::new();
        let base = Engine::new(
            Product::from_symbol("BTC/USDT", 8, 8),
            store.clone(),
            sequence.clone(),
            Box::new(MemoryLogHandler::new()),
        )
        .unwrap();
        let quote = Engine::new(
            Product::from_symbol("ETH/USDC", 8, 8),
            store.clone(),
            sequence.clone(),
            Box::new(MemoryLogHandler::new()),
        )
        .unwrap();

        InstantExchangeEngine::new(
            ProductId::new(SYNTHETIC),
            base,
            quote,
            store,
            sequence,
            Box::new(MemoryInstantLogHandler::new()),
            InstantExchangeConfig::default(),
        );
    }
}
