//! Per-product sequential command processor
//!
//! One engine instance owns one product's book and consumes that product's
//! command stream one command at a time, in arrival order. Correctness
//! (price/time priority, filled-amount conservation, no lost updates) rests
//! on that single-writer contract, which `run` makes structural: the engine
//! owns its inbound channel and a dedicated processing loop, and different
//! products' engines share no mutable state.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info};

use types::errors::EngineError;
use types::ids::ProductId;
use types::order::Side;
use types::product::Product;

use crate::book::OrderBook;
use crate::commands::{Command, DailyLimitOp, PruneRequest, Signal};
use crate::logs::{LogHandler, LogPayload, LogPublisher, LogSequence};
use crate::store::ExchangeStore;

/// Sequential processor for one product
pub struct Engine {
    book: OrderBook,
    store: Arc<dyn ExchangeStore>,
    publisher: LogPublisher,
    /// Total place commands processed.
    orders_placed: u64,
    /// Total non-zero trades emitted.
    trades_executed: u64,
    /// Total cancel commands processed (resting or absent).
    orders_cancelled: u64,
}

impl Engine {
    /// Create an engine for a product, reading its band configuration from
    /// the store
    pub fn new(
        product: Product,
        store: Arc<dyn ExchangeStore>,
        sequence: LogSequence,
        handler: Box<dyn LogHandler>,
    ) -> Result<Self, EngineError> {
        let rates = store.band_rates(&product.id)?;
        let publisher = LogPublisher::new(product.id.clone(), sequence, handler);
        Ok(Self {
            book: OrderBook::new(product, rates),
            store,
            publisher,
            orders_placed: 0,
            trades_executed: 0,
            orders_cancelled: 0,
        })
    }

    pub fn product_id(&self) -> &ProductId {
        &self.book.product().id
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub(crate) fn book_mut(&mut self) -> &mut OrderBook {
        &mut self.book
    }

    /// Total place commands processed since creation.
    pub fn orders_placed(&self) -> u64 {
        self.orders_placed
    }

    /// Total non-zero trades emitted since creation.
    pub fn trades_executed(&self) -> u64 {
        self.trades_executed
    }

    /// Total cancel commands processed since creation.
    pub fn orders_cancelled(&self) -> u64 {
        self.orders_cancelled
    }

    /// Process one command to completion
    pub fn process(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::PlaceOrder(order) => {
                debug!(product = %order.product_id, order_id = %order.id, "placing order");
                let logs = self.book.place_order(order);
                self.orders_placed += 1;
                self.trades_executed += logs
                    .iter()
                    .filter(|l| matches!(l, LogPayload::OrderMatched { .. }))
                    .count() as u64;
                self.publisher.publish_all(logs);
                Ok(())
            }
            Command::CancelOrder(order) => {
                self.orders_cancelled += 1;
                match self.book.cancel(&order.id, order.side) {
                    Some(resting) => {
                        // The unfilled remainder is what the cancel accounts
                        self.publisher
                            .publish(LogPayload::TakerOrderCancelled { order: resting });
                    }
                    None => {
                        // Already consumed as a taker, or settling: a common
                        // race, never an error
                        debug!(order_id = %order.id, "cancel of absent order");
                        self.publisher.publish(LogPayload::PendingOrderCancelled {
                            order_id: order.id,
                            user_id: order.user_id,
                        });
                    }
                }
                Ok(())
            }
            Command::DailyLimit(DailyLimitOp::Open) => self.open_trading(),
            Command::DailyLimit(DailyLimitOp::Close) => {
                if self.book.is_open() {
                    info!(product = %self.product_id(), "trading closed");
                    self.book.set_open(false);
                }
                Ok(())
            }
            Command::Signal(Signal::OrderImported) => {
                self.publisher.publish(LogPayload::OrderBookInitialized);
                Ok(())
            }
            // Consumed by layered processors (instant exchange); nothing to
            // do on a plain book
            Command::Signal(Signal::OrderBookInitialized { .. }) => Ok(()),
            Command::Signal(Signal::CancelAllOrders) => {
                self.cancel_all();
                Ok(())
            }
            Command::Prune(request) => {
                self.prune(request);
                Ok(())
            }
        }
    }

    /// Open continuous trading: refresh the reference price, evict resting
    /// orders now outside the band, then replay persisted pending orders
    fn open_trading(&mut self) -> Result<(), EngineError> {
        if self.book.is_open() {
            return Ok(());
        }

        let product_id = self.product_id().clone();

        // All fallible store reads happen before any book mutation: on a
        // store error the book stays closed and a retried open still runs
        // the full eviction and replay.
        let reference = self.store.closing_price(&product_id)?;
        let pending = self.store.pending_orders(&product_id)?;

        self.book.set_open(true);
        self.book.set_reference_price(reference);

        let evicted = self.book.filter_orders();
        self.publisher.publish_all(evicted);

        let replayed = pending.len();
        for order in pending {
            let logs = self.book.place_order(order);
            self.publisher.publish_all(logs);
        }

        self.publisher
            .publish(LogPayload::OrderBookStatusChanged { open: true });
        info!(product = %product_id, replayed, "trading opened");
        Ok(())
    }

    /// Drain both depths, emitting one admin-cancel fact per order
    fn cancel_all(&mut self) {
        let mut cancelled = 0usize;
        for side in [Side::BUY, Side::SELL] {
            while let Some(order) = self.book.depth_mut(side).poll() {
                cancelled += 1;
                self.publisher.publish(LogPayload::MakerOrderCancelled {
                    order,
                    by_admin: true,
                });
            }
        }
        info!(product = %self.product_id(), cancelled, "cancelled all resting orders");
    }

    /// Sweep never-matched resting orders inside the request window and
    /// report them in one aggregated fact
    fn prune(&mut self, request: PruneRequest) {
        if !request.covers_product(self.product_id()) {
            return;
        }

        let mut pruned = Vec::new();
        for side in [Side::BUY, Side::SELL] {
            let matches = self
                .book
                .depth(side)
                .filter(|o| !o.ever_matched && request.contains(o.created_at));
            for order in matches {
                self.book.depth_mut(side).remove(&order.id);
                pruned.push(order);
            }
        }

        info!(product = %self.product_id(), pruned = pruned.len(), "prune sweep");
        self.publisher.publish(LogPayload::OrderPruned {
            request,
            orders: pruned,
        });
    }

    /// Consume the command stream until the channel closes
    ///
    /// This loop is the single writer for the product: no other code path
    /// mutates the book once it starts.
    pub fn run(mut self, commands: Receiver<Command>) {
        let product = self.product_id().to_string();
        info!(product = %product, "engine loop started");
        for command in commands {
            if let Err(err) = self.process(command) {
                error!(product = %product, error = %err, "command failed");
            }
        }
        info!(
            product = %product,
            orders_placed = self.orders_placed,
            trades_executed = self.trades_executed,
            orders_cancelled = self.orders_cancelled,
            "command stream closed"
        );
    }
}
