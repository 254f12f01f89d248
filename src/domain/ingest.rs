//! Market-data capture: quotes and intraday series written as ticks.
//!
//! Symbol fan-out runs on a bounded worker pool sized to the available
//! cores and joins before returning, so strategies only ever see fully
//! ingested data.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use tracing::{info, warn};

use super::error::TraderError;
use super::ids::stable_id;
use super::tick::{format_wire, Tick};
use crate::ports::quote_port::QuotePort;
use crate::ports::store_port::StorePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    pub ticks_written: usize,
    pub symbols_skipped: usize,
    pub symbols_failed: usize,
}

pub struct Ingester<'a> {
    store: &'a (dyn StorePort + Sync),
    source: &'a (dyn QuotePort + Sync),
    now: NaiveDateTime,
}

impl<'a> Ingester<'a> {
    pub fn new(
        store: &'a (dyn StorePort + Sync),
        source: &'a (dyn QuotePort + Sync),
        now: NaiveDateTime,
    ) -> Self {
        Ingester { store, source, now }
    }

    /// Capture one quote per symbol, stamped with the ingest time.
    pub fn capture_quotes(&self, symbols: &[String]) -> IngestSummary {
        self.fan_out(symbols, |symbol| self.capture_quote(symbol))
    }

    /// Capture the full intraday series per symbol.
    pub fn capture_intraday(&self, symbols: &[String]) -> IngestSummary {
        self.fan_out(symbols, |symbol| self.capture_series(symbol))
    }

    fn fan_out<F>(&self, symbols: &[String], capture: F) -> IngestSummary
    where
        F: Fn(&str) -> Result<usize, TraderError> + Sync + Send,
    {
        let results: Vec<Result<usize, TraderError>> = symbols
            .par_iter()
            .map(|symbol| retry_once(symbol, || capture(symbol)))
            .collect();

        let mut summary = IngestSummary::default();
        for result in results {
            match result {
                Ok(0) => summary.symbols_skipped += 1,
                Ok(n) => summary.ticks_written += n,
                Err(e) => {
                    warn!(error = %e, "symbol capture failed");
                    summary.symbols_failed += 1;
                }
            }
        }
        info!(
            ticks = summary.ticks_written,
            skipped = summary.symbols_skipped,
            failed = summary.symbols_failed,
            "ingest complete"
        );
        summary
    }

    fn capture_quote(&self, symbol: &str) -> Result<usize, TraderError> {
        match self.source.quote(symbol)? {
            Some(quote) => {
                self.write_tick(&Tick {
                    date_time: self.now,
                    symbol: quote.symbol,
                    value: quote.price,
                    volume: quote.volume,
                })?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn capture_series(&self, symbol: &str) -> Result<usize, TraderError> {
        match self.source.intraday(symbol)? {
            Some(ticks) => {
                for tick in &ticks {
                    self.write_tick(tick)?;
                }
                Ok(ticks.len())
            }
            None => Ok(0),
        }
    }

    fn write_tick(&self, tick: &Tick) -> Result<(), TraderError> {
        let row = HashMap::from([
            ("id".to_string(), tick.id()),
            ("date_time".to_string(), format_wire(tick.date_time)),
            ("symbol".to_string(), tick.symbol.clone()),
            ("value".to_string(), tick.value.to_string()),
        ]);
        self.store.insert_row("ticks", &row)
    }
}

/// Record a data-source descriptor row for audit.
pub fn onboard_source(
    store: &dyn StorePort,
    name: &str,
    configs: &str,
) -> Result<(), TraderError> {
    let row = HashMap::from([
        ("id".to_string(), stable_id(&[name])),
        ("name".to_string(), name.to_string()),
        ("configs".to_string(), configs.to_string()),
    ]);
    store.insert_row("data_sources", &row)
}

/// One retry for transient I/O, then the error surfaces to the caller.
fn retry_once<T>(
    symbol: &str,
    attempt: impl Fn() -> Result<T, TraderError>,
) -> Result<T, TraderError> {
    match attempt() {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(symbol, error = %first, "capture failed, retrying once");
            attempt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite_store::SqliteStore;
    use crate::ports::quote_port::Quote;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory(SqliteStore::default_schemas()).unwrap();
        store.initialize_schema().unwrap();
        store
    }

    struct ScriptedSource {
        prices: HashMap<String, f64>,
        /// Symbols that fail on the first call and succeed on the retry.
        flaky: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(prices: &[(&str, f64)]) -> Self {
            ScriptedSource {
                prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
                flaky: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl QuotePort for ScriptedSource {
        fn quote(&self, symbol: &str) -> Result<Option<Quote>, TraderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.flaky.iter().any(|s| s == symbol) && call == 0 {
                return Err(TraderError::Transport {
                    endpoint: "test".into(),
                    reason: "connection reset".into(),
                });
            }
            Ok(self.prices.get(symbol).map(|price| Quote {
                symbol: symbol.to_string(),
                price: *price,
                volume: 1_000,
            }))
        }

        fn intraday(&self, symbol: &str) -> Result<Option<Vec<Tick>>, TraderError> {
            if !self.prices.contains_key(symbol) {
                return Ok(None);
            }
            Ok(Some(
                (0..3)
                    .map(|i| Tick {
                        date_time: now() - chrono::Duration::minutes(3 - i),
                        symbol: symbol.to_string(),
                        value: 100.0 + i as f64,
                        volume: 500,
                    })
                    .collect(),
            ))
        }
    }

    #[test]
    fn quotes_become_ticks() {
        let store = store();
        let source = ScriptedSource::new(&[("AAPL", 101.0), ("CBA", 55.5)]);
        let ingester = Ingester::new(&store, &source, now());

        let summary = ingester.capture_quotes(&["AAPL".to_string(), "CBA".to_string()]);
        assert_eq!(summary.ticks_written, 2);
        assert_eq!(summary.symbols_failed, 0);

        let rows = store
            .query("ticks", &[("symbol", "AAPL")], None)
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], "101");
    }

    #[test]
    fn missing_payload_is_skipped_not_failed() {
        let store = store();
        let source = ScriptedSource::new(&[]);
        let ingester = Ingester::new(&store, &source, now());
        let summary = ingester.capture_quotes(&["AAPL".to_string()]);
        assert_eq!(summary.symbols_skipped, 1);
        assert_eq!(summary.symbols_failed, 0);
    }

    #[test]
    fn flaky_source_succeeds_on_retry() {
        let store = store();
        let mut source = ScriptedSource::new(&[("AAPL", 101.0)]);
        source.flaky.push("AAPL".to_string());
        let ingester = Ingester::new(&store, &source, now());

        let summary = ingester.capture_quotes(&["AAPL".to_string()]);
        assert_eq!(summary.ticks_written, 1);
        assert_eq!(summary.symbols_failed, 0);
    }

    #[test]
    fn intraday_series_written_in_full() {
        let store = store();
        let source = ScriptedSource::new(&[("AAPL", 101.0)]);
        let ingester = Ingester::new(&store, &source, now());

        let summary = ingester.capture_intraday(&["AAPL".to_string()]);
        assert_eq!(summary.ticks_written, 3);
        let rows = store
            .query("ticks", &[("symbol", "AAPL")], None)
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn recapture_is_idempotent_per_second() {
        let store = store();
        let source = ScriptedSource::new(&[("AAPL", 101.0)]);
        let ingester = Ingester::new(&store, &source, now());
        ingester.capture_quotes(&["AAPL".to_string()]);
        ingester.capture_quotes(&["AAPL".to_string()]);
        let rows = store
            .query("ticks", &[("symbol", "AAPL")], None)
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn source_descriptor_row_recorded() {
        let store = store();
        onboard_source(&store, "intraquote", "{\"limit\":5}").unwrap();
        let row = store
            .query_one("data_sources", &[("name", "intraquote")])
            .unwrap()
            .unwrap();
        assert_eq!(row["configs"], "{\"limit\":5}");
    }
}
