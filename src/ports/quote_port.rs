//! Market-data source port trait.

use crate::domain::error::TraderError;
use crate::domain::tick::Tick;

/// A current quote for one symbol, normalised from the provider payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
}

pub trait QuotePort {
    /// Fetch the current quote for `symbol`. A response missing its
    /// configured parent field is `Ok(None)`, not an error.
    fn quote(&self, symbol: &str) -> Result<Option<Quote>, TraderError>;

    /// Fetch the intraday series for `symbol`, timestamps converted to the
    /// configured timezone, in the provider's ascending order.
    fn intraday(&self, symbol: &str) -> Result<Option<Vec<Tick>>, TraderError>;
}
