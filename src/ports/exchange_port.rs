//! Brokerage port trait, implemented by the live broker adapter and the
//! deterministic simulator.

use crate::domain::error::TraderError;
use crate::domain::signal::{OrderReport, OrderSide};

/// A held position as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub symbol: String,
    pub units: i64,
    pub market_value: f64,
}

pub trait ExchangePort {
    fn is_open(&self) -> Result<bool, TraderError>;

    /// Available cash, or `None` when the broker does not report it.
    fn cash(&self) -> Result<Option<f64>, TraderError>;

    /// The position held in `symbol`, or `None` when flat.
    fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, TraderError>;

    /// Submit an order. Selling against a symbol with no position is an
    /// error. `Ok(None)` means the broker accepted nothing (no order id).
    fn submit(
        &self,
        symbol: &str,
        units: i64,
        side: OrderSide,
    ) -> Result<Option<String>, TraderError>;

    /// Current state of a previously submitted order.
    fn order(&self, id: &str) -> Result<OrderReport, TraderError>;
}
