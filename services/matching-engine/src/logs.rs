//! The emitted-fact vocabulary and its dispatch interfaces
//!
//! Every state change the engines make is described by exactly one `Log`
//! (or `InstantExchangeLog`) handed to the registered sink. A log is
//! immutable once constructed; settlement, persistence, and market-data
//! consumers each read the same stream independently.
//!
//! Sequence numbers are assigned at the publishing point by a process-wide
//! monotonic `LogSequence`, so log ids are strictly increasing across all
//! products and give external consumers a total order for resumption and
//! auditing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use types::ids::{OrderId, ProductId, UserId};
use types::numeric::{Amount, Price};
use types::order::Order;

use crate::commands::PruneRequest;

/// One emitted fact about a book state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Process-wide monotonic sequence, strictly increasing across products
    pub sequence: u64,
    pub product_id: ProductId,
    /// Unix nanos at emission
    pub created_at: i64,
    pub payload: LogPayload,
}

/// Fact payloads
///
/// Each variant carries enough order/trade detail for a consumer to update
/// its own persisted state without re-deriving it from the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "log_type")]
pub enum LogPayload {
    /// Taker crossed a resting maker; snapshots are post-trade
    OrderMatched {
        taker: Order,
        maker: Order,
        /// Execution price (the maker's price)
        price: Price,
        /// Base-asset quantity traded
        amount: Amount,
        /// Quote funds traded
        funds: Amount,
    },
    /// Order deferred instead of crossed (closed book or out-of-band price)
    OrderPended { order: Order },
    /// Taker rested on its own side of the book
    TakerOrderOpened { order: Order },
    /// Resting maker fully filled and removed
    MakerOrderCompleted { order: Order },
    /// Taker fully filled
    TakerOrderCompleted { order: Order },
    /// Resting order removed by cancel-all or another admin sweep
    MakerOrderCancelled { order: Order, by_admin: bool },
    /// Cancel arrived for an order not resting (already consumed or settling)
    PendingOrderCancelled { order_id: OrderId, user_id: UserId },
    /// Taker cancelled with an unfilled remainder
    TakerOrderCancelled { order: Order },
    /// Book finished importing persisted orders
    OrderBookInitialized,
    /// Continuous trading opened or closed
    OrderBookStatusChanged { open: bool },
    /// Aggregated prune sweep result: never-matched orders in the window
    OrderPruned {
        request: PruneRequest,
        orders: Vec<Order>,
    },
}

impl LogPayload {
    /// Fact type as a string label for logging
    pub fn label(&self) -> &'static str {
        match self {
            LogPayload::OrderMatched { .. } => "OrderMatched",
            LogPayload::OrderPended { .. } => "OrderPended",
            LogPayload::TakerOrderOpened { .. } => "TakerOrderOpened",
            LogPayload::MakerOrderCompleted { .. } => "MakerOrderCompleted",
            LogPayload::TakerOrderCompleted { .. } => "TakerOrderCompleted",
            LogPayload::MakerOrderCancelled { .. } => "MakerOrderCancelled",
            LogPayload::PendingOrderCancelled { .. } => "PendingOrderCancelled",
            LogPayload::TakerOrderCancelled { .. } => "TakerOrderCancelled",
            LogPayload::OrderBookInitialized => "OrderBookInitialized",
            LogPayload::OrderBookStatusChanged { .. } => "OrderBookStatusChanged",
            LogPayload::OrderPruned { .. } => "OrderPruned",
        }
    }
}

/// One emitted fact from the instant-exchange engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantExchangeLog {
    pub sequence: u64,
    /// The synthetic pair (not either underlying product)
    pub product_id: ProductId,
    pub created_at: i64,
    pub payload: InstantExchangeLogPayload,
}

/// Instant-exchange fact payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "log_type")]
pub enum InstantExchangeLogPayload {
    /// Both legs cleared and were committed; carries both legs' trade logs
    OrderMatched {
        order: Order,
        base_logs: Vec<Log>,
        quote_logs: Vec<Log>,
    },
    /// A leg trial left more than epsilon unfilled; no book was mutated
    OrderUnmatched { order: Order },
    /// Order deferred until both underlying books are initialized
    OrderPended { order: Order },
    /// Cancel of a synthetic order (they never rest, so always "pending")
    PendingOrderCancelled { order_id: OrderId, user_id: UserId },
}

impl InstantExchangeLogPayload {
    pub fn label(&self) -> &'static str {
        match self {
            InstantExchangeLogPayload::OrderMatched { .. } => "OrderMatched",
            InstantExchangeLogPayload::OrderUnmatched { .. } => "OrderUnmatched",
            InstantExchangeLogPayload::OrderPended { .. } => "OrderPended",
            InstantExchangeLogPayload::PendingOrderCancelled { .. } => "PendingOrderCancelled",
        }
    }
}

/// Process-wide monotonic log sequence
///
/// Owned by the publishing layer, shared by every engine in the process, so
/// the matching core itself carries no global mutable state.
#[derive(Debug, Clone, Default)]
pub struct LogSequence(Arc<AtomicU64>);

impl LogSequence {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// Build a stamped log for `product_id`
    pub fn stamp(&self, product_id: ProductId, payload: LogPayload) -> Log {
        Log {
            sequence: self.next(),
            product_id,
            created_at: now_nanos(),
            payload,
        }
    }

    /// Build a stamped instant-exchange log for the synthetic pair
    pub fn stamp_instant(
        &self,
        product_id: ProductId,
        payload: InstantExchangeLogPayload,
    ) -> InstantExchangeLog {
        InstantExchangeLog {
            sequence: self.next(),
            product_id,
            created_at: now_nanos(),
            payload,
        }
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Sink for one product's log stream; fan-out happens downstream
pub trait LogHandler: Send {
    fn on_log(&mut self, log: Log);
}

/// Sink for one synthetic pair's instant-exchange log stream
pub trait InstantExchangeLogHandler: Send {
    fn on_log(&mut self, log: InstantExchangeLog);
}

/// Publisher binding one product's stream to its registered sink
pub struct LogPublisher {
    product_id: ProductId,
    sequence: LogSequence,
    handler: Box<dyn LogHandler>,
}

impl LogPublisher {
    pub fn new(product_id: ProductId, sequence: LogSequence, handler: Box<dyn LogHandler>) -> Self {
        Self {
            product_id,
            sequence,
            handler,
        }
    }

    /// Stamp and hand one fact to the sink
    pub fn publish(&mut self, payload: LogPayload) {
        let log = self.sequence.stamp(self.product_id.clone(), payload);
        self.handler.on_log(log);
    }

    /// Stamp and hand a batch of facts to the sink, in order
    pub fn publish_all(&mut self, payloads: Vec<LogPayload>) {
        for payload in payloads {
            self.publish(payload);
        }
    }
}

/// In-memory sink collecting logs into a shared Vec
///
/// Backs tests and demos; production sinks forward to settlement,
/// persistence, and market-data pipelines.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogHandler {
    pub logs: Arc<Mutex<Vec<Log>>>,
}

impl MemoryLogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn collected(&self) -> Vec<Log> {
        self.logs.lock().expect("log sink poisoned").clone()
    }
}

impl LogHandler for MemoryLogHandler {
    fn on_log(&mut self, log: Log) {
        self.logs.lock().expect("log sink poisoned").push(log);
    }
}

/// In-memory instant-exchange sink
#[derive(Debug, Clone, Default)]
pub struct MemoryInstantLogHandler {
    pub logs: Arc<Mutex<Vec<InstantExchangeLog>>>,
}

impl MemoryInstantLogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<InstantExchangeLog> {
        self.logs.lock().expect("log sink poisoned").clone()
    }
}

impl InstantExchangeLogHandler for MemoryInstantLogHandler {
    fn on_log(&mut self, log: InstantExchangeLog) {
        self.logs.lock().expect("log sink poisoned").push(log);
    }
}
