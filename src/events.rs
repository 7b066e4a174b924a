use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side on a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// The three tick families the feed delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickKind {
    Snapshot,
    Transaction,
    Order,
}

/// One book level: price and resting volume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub volume: u64,
}

/// Full per-symbol book/price summary, up to ten levels per side.
/// `bids[0]` / `asks[0]` are the best levels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub last_price: Decimal,
    pub volume: u64,
    pub amount: Decimal,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl Snapshot {
    /// Best-bid resting volume, zero when the bid side is empty.
    pub fn bid_volume_1(&self) -> u64 {
        self.bids.first().map(|l| l.volume).unwrap_or(0)
    }
}

/// A single trade print.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: u64,
    pub buy_order_no: u64,
    pub sell_order_no: u64,
    pub side_flag: Side,
}

/// A single order print.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub order_no: u64,
    pub price: Decimal,
    pub volume: u64,
    pub side: Side,
}

/// Any tick coming off the feed.
#[derive(Clone, Debug)]
pub enum TickEvent {
    Snapshot(Snapshot),
    Transaction(Transaction),
    Order(OrderEvent),
}

impl TickEvent {
    pub fn kind(&self) -> TickKind {
        match self {
            TickEvent::Snapshot(_) => TickKind::Snapshot,
            TickEvent::Transaction(_) => TickKind::Transaction,
            TickEvent::Order(_) => TickKind::Order,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            TickEvent::Snapshot(s) => &s.symbol,
            TickEvent::Transaction(t) => &t.symbol,
            TickEvent::Order(o) => &o.symbol,
        }
    }
}

// Global event enum carried on the bus: validated ticks flowing downstream
// plus break events produced by the analytics side.
#[derive(Clone, Debug)]
pub enum Event {
    Tick(TickEvent),
    Break(crate::analytics::BreakEvent),
}
