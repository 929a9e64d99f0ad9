use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One leg of a binary market.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate market emitted by the scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub market_id: String,
    pub question: String,
    pub price_yes: f64,
    pub price_no: f64,
    pub discovered_at: DateTime<Utc>,
}

/// Normalized price update from the feed adapter
///
/// Delivery is at-least-once and possibly reordered; `observed_at` is the
/// exchange-side observation time, not our receive time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub market_id: String,
    pub side: Side,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// An order we want the execution service to place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub market_id: String,
    pub side: Side,
    pub order_side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub ttl_seconds: u64,
    pub client_order_id: String,
}

/// Partial exit demanded by a threshold crossing
///
/// `fraction` is incremental: cumulative_fraction(level) minus the cumulative
/// fraction already scheduled at previously hit levels. Consumed exactly once
/// by the execution coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitIntent {
    pub market_id: String,
    pub side: Side,
    pub level: f64,
    pub fraction: f64,
}

impl ExitIntent {
    /// Idempotency key: one exit order per (market, side, level), ever.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.market_id,
            self.side,
            crate::thresholds::level_key(self.level)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Fill confirmation pushed by the execution service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_ref: String,
    pub market_id: String,
    pub side: Side,
    pub order_side: OrderSide,
    pub price: f64,
    pub filled_size: f64,
    pub fee: f64,
    pub observed_at: DateTime<Utc>,
}

/// Market settlement from the resolution feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub market_id: String,
    pub winning_side: Side,
    pub resolved_at: DateTime<Utc>,
}

/// Append-only journal record; replaying these rebuilds the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    PositionOpened {
        market_id: String,
        yes_price: f64,
        yes_size: f64,
        no_price: f64,
        no_size: f64,
        opened_at: DateTime<Utc>,
    },
    ThresholdCrossed {
        market_id: String,
        side: Side,
        level: f64,
        fraction: f64,
        crossed_at: DateTime<Utc>,
    },
    ExitSubmitted {
        market_id: String,
        side: Side,
        level: f64,
        size: f64,
        order_ref: String,
        submitted_at: DateTime<Utc>,
    },
    FillRecorded {
        market_id: String,
        side: Side,
        order_side: OrderSide,
        price: f64,
        size: f64,
        fee: f64,
        filled_at: DateTime<Utc>,
    },
    PositionResolved {
        market_id: String,
        winning_side: Side,
        realized_pnl: f64,
        resolved_at: DateTime<Utc>,
    },
    PositionFailed {
        market_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn market_id(&self) -> &str {
        match self {
            LedgerEvent::PositionOpened { market_id, .. }
            | LedgerEvent::ThresholdCrossed { market_id, .. }
            | LedgerEvent::ExitSubmitted { market_id, .. }
            | LedgerEvent::FillRecorded { market_id, .. }
            | LedgerEvent::PositionResolved { market_id, .. }
            | LedgerEvent::PositionFailed { market_id, .. } => market_id,
        }
    }
}

/// Generate a client order id for entry orders
pub fn new_client_order_id(market_id: &str, side: Side) -> String {
    format!("{}-{}-{}", market_id, side, Uuid::new_v4())
}
