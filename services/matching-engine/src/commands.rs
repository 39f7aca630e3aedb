//! The command vocabulary consumed by the engines
//!
//! A closed sum type matched exhaustively by every dispatcher: adding a
//! command kind is a compile error until every engine handles it, so no
//! "unsupported operation" path can be reached at runtime.

use serde::{Deserialize, Serialize};
use types::ids::ProductId;
use types::order::Order;

/// One command for a single product's sequential processor
///
/// The dispatcher guarantees commands for one product arrive strictly
/// one-at-a-time, in submission order, to exactly one processor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    /// Cross an incoming order against the book
    PlaceOrder(Order),
    /// Cancel a previously placed order
    CancelOrder(Order),
    /// Toggle continuous trading (aggregate-auction boundary)
    DailyLimit(DailyLimitOp),
    /// Control-plane signal; carries no book-mutating payload
    Signal(Signal),
    /// Scheduled maintenance sweep of never-matched orders
    Prune(PruneRequest),
}

/// Open or close continuous trading for the product
///
/// Tagged so the variant serializes as a map: the internally tagged
/// `Command` envelope cannot carry a bare-string payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum DailyLimitOp {
    Open,
    Close,
}

/// Control-plane signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum Signal {
    /// Persisted orders for this product have all been imported
    OrderImported,
    /// Another product's book finished initializing (observed by layered
    /// processors such as the instant-exchange engine)
    OrderBookInitialized { product_id: ProductId },
    /// Administrative drain of every resting order
    CancelAllOrders,
}

/// Time-window sweep request for never-matched resting orders
///
/// Sweeps are sharded across processors by product id; the engine only acts
/// on a request whose shard covers its product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneRequest {
    /// Window start, unix nanos (inclusive)
    pub start_inclusive: i64,
    /// Window end, unix nanos (exclusive)
    pub end_exclusive: i64,
    pub shard_index: u32,
    pub shard_total: u32,
}

impl PruneRequest {
    /// Whether a creation timestamp falls inside the sweep window
    pub fn contains(&self, created_at: i64) -> bool {
        created_at >= self.start_inclusive && created_at < self.end_exclusive
    }

    /// Whether this request's shard covers the given product
    ///
    /// crc32c gives a deterministic assignment that is stable across
    /// processes, unlike the std hasher.
    pub fn covers_product(&self, product_id: &ProductId) -> bool {
        if self.shard_total <= 1 {
            return true;
        }
        let hash = crc32c::crc32c(product_id.as_str().as_bytes());
        hash % self.shard_total == self.shard_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization_roundtrip() {
        let commands = vec![
            Command::DailyLimit(DailyLimitOp::Open),
            Command::DailyLimit(DailyLimitOp::Close),
            Command::Signal(Signal::OrderImported),
            Command::Signal(Signal::OrderBookInitialized {
                product_id: ProductId::new("BTC/USDT"),
            }),
            Command::Signal(Signal::CancelAllOrders),
            Command::Prune(PruneRequest {
                start_inclusive: 0,
                end_exclusive: 1_000,
                shard_index: 2,
                shard_total: 4,
            }),
        ];

        for command in commands {
            let json = serde_json::to_string(&command).unwrap();
            let deserialized: Command = serde_json::from_str(&json).unwrap();
            assert_eq!(command, deserialized);
        }
    }

    #[test]
    fn test_prune_window_is_half_open() {
        let request = PruneRequest {
            start_inclusive: 100,
            end_exclusive: 200,
            shard_index: 0,
            shard_total: 1,
        };

        assert!(request.contains(100));
        assert!(request.contains(199));
        assert!(!request.contains(200));
        assert!(!request.contains(99));
    }

    #[test]
    fn test_shard_assignment_is_exhaustive_and_disjoint() {
        let product = ProductId::new("BTC/USDT");
        let total = 4;

        let covering: Vec<u32> = (0..total)
            .filter(|&shard_index| {
                PruneRequest {
                    start_inclusive: 0,
                    end_exclusive: 1,
                    shard_index,
                    shard_total: total,
                }
                .covers_product(&product)
            })
            .collect();

        assert_eq!(covering.len(), 1);
    }

    #[test]
    fn test_single_shard_covers_everything() {
        let request = PruneRequest {
            start_inclusive: 0,
            end_exclusive: 1,
            shard_index: 0,
            shard_total: 1,
        };
        assert!(request.covers_product(&ProductId::new("BTC/USDT")));
        assert!(request.covers_product(&ProductId::new("ETH/USDC")));
    }
}
