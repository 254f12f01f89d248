//! Tick series loading and TWAP computation.

use chrono::NaiveDateTime;
use tracing::warn;

use super::error::TraderError;
use super::tick::{format_wire, parse_wire, Twap};
use crate::ports::store_port::StorePort;

/// One loaded observation: (timestamp, price).
pub type SeriesPoint = (NaiveDateTime, f64);

pub struct TwapLoader<'a> {
    store: &'a dyn StorePort,
}

impl<'a> TwapLoader<'a> {
    pub fn new(store: &'a dyn StorePort) -> Self {
        TwapLoader { store }
    }

    /// Load ticks for `symbol` with `after < timestamp < before` (strict on
    /// both ends), ordered ascending. When `stale_scope` is set, staleness
    /// is measured over the loaded values and the first stale window emits
    /// a `stale_ticker_<symbol>` warning; loading always continues.
    pub fn load(
        &self,
        symbol: &str,
        before: NaiveDateTime,
        after: NaiveDateTime,
        stale_scope: Option<usize>,
    ) -> Result<Vec<SeriesPoint>, TraderError> {
        let rows = self
            .store
            .query("ticks", &[("symbol", symbol)], None)?
            .unwrap_or_default();

        let mut series = Vec::new();
        for row in rows {
            let ts_raw = row.get("date_time").map(String::as_str).unwrap_or("-");
            let value_raw = row.get("value").map(String::as_str).unwrap_or("-");
            if ts_raw == "-" || value_raw == "-" {
                continue;
            }
            let ts = parse_wire(ts_raw)?;
            if ts <= after || ts >= before {
                continue;
            }
            let value: f64 = value_raw.parse().map_err(|e| TraderError::Store {
                reason: format!("invalid tick value {value_raw}: {e}"),
            })?;
            series.push((ts, value));
        }
        series.sort_by_key(|(ts, _)| *ts);

        if let Some(scope) = stale_scope {
            let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
            let ratio = staleness(&values, scope);
            if ratio > 0.0 {
                warn!(
                    symbol,
                    ratio,
                    "stale_ticker_{symbol}: repeated values in loaded series"
                );
            }
        }

        Ok(series)
    }

    /// Compute the TWAP over [start, end] (inclusive window) and persist a
    /// `twaps` row. Zero ticks yield a 0.0 TWAP and a warning.
    pub fn compute_and_store(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Twap, TraderError> {
        let rows = self
            .store
            .query("ticks", &[("symbol", symbol)], None)?
            .unwrap_or_default();

        let mut prices = Vec::new();
        for row in rows {
            let ts_raw = row.get("date_time").map(String::as_str).unwrap_or("-");
            let value_raw = row.get("value").map(String::as_str).unwrap_or("-");
            if ts_raw == "-" || value_raw == "-" {
                continue;
            }
            let ts = parse_wire(ts_raw)?;
            if ts < start || ts > end {
                continue;
            }
            prices.push(value_raw.parse::<f64>().map_err(|e| TraderError::Store {
                reason: format!("invalid tick value {value_raw}: {e}"),
            })?);
        }

        if prices.is_empty() {
            warn!(symbol, "no ticks in TWAP window, recording 0.0");
        }
        let twap = Twap {
            symbol: symbol.to_string(),
            start_time: start,
            end_time: end,
            value: twap_value(&prices),
        };

        let mut row = std::collections::HashMap::new();
        row.insert("id".to_string(), twap.id());
        row.insert("start_time".to_string(), format_wire(start));
        row.insert("end_time".to_string(), format_wire(end));
        row.insert("symbol".to_string(), symbol.to_string());
        row.insert("value".to_string(), format!("{:.6}", twap.value));
        self.store.insert_row("twaps", &row)?;

        Ok(twap)
    }
}

/// Arithmetic mean of tick prices; 0.0 for an empty set.
pub fn twap_value(prices: &[f64]) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    prices.iter().sum::<f64>() / prices.len() as f64
}

/// Windowed staleness ratio. For each position i, take the window of up to
/// `scope` consecutive values starting at i; a window of size > 1 holding
/// fewer distinct values than its length counts as stale. The ratio is
/// stale windows over sequence length.
pub fn staleness(values: &[f64], scope: usize) -> f64 {
    if values.is_empty() || scope < 1 {
        return 0.0;
    }
    let mut stale = 0usize;
    for i in 0..values.len() {
        let window = &values[i..values.len().min(i + scope)];
        if window.len() > 1 && distinct_count(window) < window.len() {
            stale += 1;
        }
    }
    stale as f64 / values.len() as f64
}

fn distinct_count(window: &[f64]) -> usize {
    let mut bits: Vec<u64> = window.iter().map(|v| v.to_bits()).collect();
    bits.sort_unstable();
    bits.dedup();
    bits.len()
}
