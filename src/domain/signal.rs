//! Signals, trade intents, and order reports.

use chrono::NaiveDateTime;
use std::fmt;

/// A strategy's intent for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::Buy => "buy",
            SignalKind::Sell => "sell",
            SignalKind::Hold => "hold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Whether the broker will make no further progress on the order.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "new" => Some(OrderStatus::New),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "canceled" => Some(OrderStatus::Canceled),
            "rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::New => "new",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
        })
    }
}

/// A raw signal emitted by a strategy function. Hold carries no target
/// price; buy and sell always do.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub kind: SignalKind,
    pub target_value: Option<f64>,
    pub order_type: OrderType,
    pub timestamp: NaiveDateTime,
}

/// A sized signal that has passed the risk gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub kind: SignalKind,
    pub symbol: String,
    pub units: i64,
    pub target_value: f64,
}

impl Trade {
    /// Bread-crumb payload fragment for this trade.
    pub fn describe(&self) -> String {
        format!(
            "{} {} x{} @ {:.2}",
            self.kind, self.symbol, self.units, self.target_value
        )
    }
}

/// Broker-side view of a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub units: i64,
    pub filled_units: i64,
    pub filled_mean_price: f64,
}

/// Two or more signal kinds were emitted for one symbol in a single run.
/// Returned as a value so the caller decides whether to record and drop or
/// to surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConflict {
    pub symbol: String,
    pub signals: Vec<Signal>,
}

impl fmt::Display for SignalConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<String> = self
            .signals
            .iter()
            .map(|s| match s.target_value {
                Some(v) => format!("{} @ {v:.2}", s.kind),
                None => s.kind.to_string(),
            })
            .collect();
        write!(
            f,
            "conflicting signals for {}: {}",
            self.symbol,
            kinds.join(", ")
        )
    }
}
