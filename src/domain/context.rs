//! Per-run strategy evaluation sandbox.
//!
//! The context is what a user strategy function sees: the run time, the
//! loaded data series, an optional live data source, a signal sink, and
//! persistent per-strategy variables. One context per run, single-threaded.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use super::error::TraderError;
use super::ids::stable_id;
use super::signal::{OrderType, Signal, SignalKind};
use super::tick::format_wire;
use super::twap_loader::SeriesPoint;
use crate::ports::quote_port::QuotePort;
use crate::ports::store_port::StorePort;

/// Loaded data, keyed by requirement kind then symbol.
pub type LoadedData = HashMap<String, HashMap<String, Vec<SeriesPoint>>>;

pub struct StrategyContext<'a> {
    /// Run time in the configured timezone.
    pub now: NaiveDateTime,
    pub data: LoadedData,
    /// Live data source, when the strategy asked for one.
    pub ds: Option<&'a dyn QuotePort>,
    strategy_name: String,
    store: &'a dyn StorePort,
    signals: Vec<Signal>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        strategy_name: &str,
        now: NaiveDateTime,
        data: LoadedData,
        store: &'a dyn StorePort,
        ds: Option<&'a dyn QuotePort>,
    ) -> Self {
        StrategyContext {
            now,
            data,
            ds,
            strategy_name: strategy_name.to_string(),
            store,
            signals: Vec::new(),
        }
    }

    /// Ticker series loaded for `symbol`, if the data requirements included
    /// one. Convenience accessor for strategy functions.
    pub fn ticker(&self, symbol: &str) -> Option<&[SeriesPoint]> {
        self.data
            .get("ticker")
            .and_then(|by_symbol| by_symbol.get(symbol))
            .map(Vec::as_slice)
    }

    /// Record a signal. Buy and sell require a target value; hold must not
    /// carry one.
    pub fn add_signal(
        &mut self,
        symbol: &str,
        kind: SignalKind,
        order_type: OrderType,
        target_value: Option<f64>,
    ) -> Result<(), TraderError> {
        match kind {
            SignalKind::Buy | SignalKind::Sell if target_value.is_none() => {
                return Err(TraderError::Strategy {
                    name: self.strategy_name.clone(),
                    reason: format!("{kind} signal for {symbol} without target value"),
                });
            }
            _ => {}
        }
        let target = if kind == SignalKind::Hold {
            None
        } else {
            target_value
        };
        let seq = self.signals.len().to_string();
        self.signals.push(Signal {
            id: stable_id(&[&self.strategy_name, symbol, &format_wire(self.now), &seq]),
            symbol: symbol.to_string(),
            kind,
            target_value: target,
            order_type,
            timestamp: self.now,
        });
        Ok(())
    }

    /// Signals recorded so far, consuming the context.
    pub fn into_signals(self) -> Vec<Signal> {
        self.signals
    }

    /// Stable id of a persistent variable. Derived from strategy and
    /// variable name only, so it is identical across processes and runs.
    pub fn variable_id(strategy: &str, name: &str) -> String {
        stable_id(&[strategy, name])
    }

    /// Read a persistent variable, falling back to `default` when unset.
    pub fn get_variable(&self, name: &str, default: &str) -> Result<String, TraderError> {
        let id = Self::variable_id(&self.strategy_name, name);
        let row = self
            .store
            .query_one("strategy_variables", &[("id", &id)])?;
        Ok(row
            .and_then(|r| r.get("value").cloned())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Write a persistent variable, creating it on first use.
    pub fn set_variable(&self, name: &str, value: &str) -> Result<(), TraderError> {
        let id = Self::variable_id(&self.strategy_name, name);
        let existing = self
            .store
            .query_one("strategy_variables", &[("id", &id)])?;
        if existing.is_some() {
            self.store
                .update_value("strategy_variables", &[("id", &id)], "value", value)?;
        } else {
            let mut row = HashMap::new();
            row.insert("id".to_string(), id);
            row.insert("value".to_string(), value.to_string());
            self.store.insert_row("strategy_variables", &row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite_store::SqliteStore;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory(SqliteStore::default_schemas()).unwrap();
        store.initialize_schema().unwrap();
        store
    }

    fn context<'a>(store: &'a SqliteStore) -> StrategyContext<'a> {
        StrategyContext::new("momentum", now(), LoadedData::new(), store, None)
    }

    #[test]
    fn buy_without_target_is_rejected() {
        let store = store();
        let mut ctx = context(&store);
        let err = ctx
            .add_signal("AAPL", SignalKind::Buy, OrderType::Limit, None)
            .unwrap_err();
        assert!(err.to_string().contains("without target value"));
    }

    #[test]
    fn hold_drops_any_target() {
        let store = store();
        let mut ctx = context(&store);
        ctx.add_signal("AAPL", SignalKind::Hold, OrderType::Market, Some(99.0))
            .unwrap();
        let signals = ctx.into_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Hold);
        assert_eq!(signals[0].target_value, None);
    }

    #[test]
    fn signals_accumulate_with_distinct_ids() {
        let store = store();
        let mut ctx = context(&store);
        ctx.add_signal("AAPL", SignalKind::Buy, OrderType::Limit, Some(100.0))
            .unwrap();
        ctx.add_signal("AAPL", SignalKind::Buy, OrderType::Limit, Some(101.0))
            .unwrap();
        let signals = ctx.into_signals();
        assert_eq!(signals.len(), 2);
        assert_ne!(signals[0].id, signals[1].id);
    }

    #[test]
    fn variable_round_trip_and_default() {
        let store = store();
        let ctx = context(&store);
        assert_eq!(ctx.get_variable("position", "flat").unwrap(), "flat");
        ctx.set_variable("position", "long").unwrap();
        assert_eq!(ctx.get_variable("position", "flat").unwrap(), "long");
        ctx.set_variable("position", "flat").unwrap();
        assert_eq!(ctx.get_variable("position", "long").unwrap(), "flat");
    }

    #[test]
    fn variable_id_is_stable_and_scoped_by_strategy() {
        let a = StrategyContext::variable_id("momentum", "position");
        let b = StrategyContext::variable_id("momentum", "position");
        let c = StrategyContext::variable_id("reversion", "position");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn variables_persist_across_contexts() {
        let store = store();
        {
            let ctx = context(&store);
            ctx.set_variable("entries", "3").unwrap();
        }
        let ctx = context(&store);
        assert_eq!(ctx.get_variable("entries", "0").unwrap(), "3");
    }
}
