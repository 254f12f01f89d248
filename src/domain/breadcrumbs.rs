//! Bread crumbs: the append-only run trace.
//!
//! Every noteworthy observation inside a run is dropped as a typed,
//! timestamped crumb. Crumbs are the one in-run artifact promoted to
//! durable state besides portfolio mutations, and they feed the run
//! report used to score regression replays.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use super::error::TraderError;
use super::ids::stable_id;
use super::tick::{format_wire, parse_wire};
use crate::ports::store_port::StorePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrumbKind {
    General,
    Signal,
    Trade,
    Valuation,
    DataWarning,
    StrategyError,
}

impl fmt::Display for CrumbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrumbKind::General => "general",
            CrumbKind::Signal => "signal",
            CrumbKind::Trade => "trade",
            CrumbKind::Valuation => "valuation",
            CrumbKind::DataWarning => "data_warning",
            CrumbKind::StrategyError => "strategy_error",
        })
    }
}

impl CrumbKind {
    pub fn parse(s: &str) -> Option<CrumbKind> {
        match s {
            "general" => Some(CrumbKind::General),
            "signal" => Some(CrumbKind::Signal),
            "trade" => Some(CrumbKind::Trade),
            "valuation" => Some(CrumbKind::Valuation),
            "data_warning" => Some(CrumbKind::DataWarning),
            "strategy_error" => Some(CrumbKind::StrategyError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreadCrumb {
    pub id: String,
    pub strategy: String,
    pub kind: CrumbKind,
    pub timestamp: NaiveDateTime,
    pub data: String,
}

/// Writer/reader for one strategy's crumbs.
pub struct BreadCrumbs<'a> {
    store: &'a dyn StorePort,
    strategy: String,
}

impl<'a> BreadCrumbs<'a> {
    pub fn new(store: &'a dyn StorePort, strategy: &str) -> Self {
        BreadCrumbs {
            store,
            strategy: strategy.to_string(),
        }
    }

    /// Append one crumb. The id is derived from strategy and run time,
    /// salted with kind and payload so several crumbs from the same run
    /// stay distinct rows.
    pub fn drop(
        &self,
        run_datetime: NaiveDateTime,
        kind: CrumbKind,
        data: &str,
    ) -> Result<(), TraderError> {
        let ts = format_wire(run_datetime);
        let mut row = HashMap::new();
        row.insert(
            "id".to_string(),
            stable_id(&[&self.strategy, &ts, &kind.to_string(), data]),
        );
        row.insert("strategy".to_string(), self.strategy.clone());
        row.insert("type".to_string(), kind.to_string());
        row.insert("timestamp".to_string(), ts);
        row.insert("data".to_string(), data.to_string());
        self.store.insert_row("strategy_bread_crumbs", &row)
    }

    /// Append a crumb whose payload is a `:`-joined list.
    pub fn drop_list(
        &self,
        run_datetime: NaiveDateTime,
        kind: CrumbKind,
        items: &[String],
    ) -> Result<(), TraderError> {
        self.drop(run_datetime, kind, &items.join(":"))
    }

    /// All crumbs for this strategy, ordered by timestamp.
    pub fn all(&self) -> Result<Vec<BreadCrumb>, TraderError> {
        let rows = self
            .store
            .query(
                "strategy_bread_crumbs",
                &[("strategy", &self.strategy)],
                None,
            )?
            .unwrap_or_default();

        let mut crumbs = Vec::new();
        for row in rows {
            let kind_raw = row.get("type").map(String::as_str).unwrap_or("-");
            let Some(kind) = CrumbKind::parse(kind_raw) else {
                continue;
            };
            crumbs.push(BreadCrumb {
                id: row.get("id").cloned().unwrap_or_default(),
                strategy: self.strategy.clone(),
                kind,
                timestamp: parse_wire(
                    row.get("timestamp").map(String::as_str).unwrap_or("-"),
                )?,
                data: row.get("data").cloned().unwrap_or_default(),
            });
        }
        crumbs.sort_by_key(|c| c.timestamp);
        Ok(crumbs)
    }
}

/// Aggregated view of a crumb trail.
#[derive(Debug, Clone, PartialEq)]
pub struct CrumbReport {
    pub signal_ratio: f64,
    pub trade_ratio: f64,
    pub pnl: f64,
    pub data_warning_count: usize,
    pub strategy_error_count: usize,
    pub run_days: usize,
}

/// Score a crumb trail: per-day signal and trade ratios, pnl as last minus
/// first valuation, and warning/error counts.
pub fn evaluate(crumbs: &[BreadCrumb]) -> CrumbReport {
    let days: BTreeSet<NaiveDate> = crumbs.iter().map(|c| c.timestamp.date()).collect();
    let run_days = days.len();

    let count = |kind: CrumbKind| crumbs.iter().filter(|c| c.kind == kind).count();

    let mut valuations: Vec<(NaiveDateTime, f64)> = crumbs
        .iter()
        .filter(|c| c.kind == CrumbKind::Valuation)
        .filter_map(|c| c.data.parse::<f64>().ok().map(|v| (c.timestamp, v)))
        .collect();
    valuations.sort_by_key(|(ts, _)| *ts);

    let pnl = match (valuations.first(), valuations.last()) {
        (Some((_, first)), Some((_, last))) => last - first,
        _ => 0.0,
    };

    let ratio = |n: usize| {
        if run_days == 0 {
            0.0
        } else {
            n as f64 / run_days as f64
        }
    };

    CrumbReport {
        signal_ratio: ratio(count(CrumbKind::Signal)),
        trade_ratio: ratio(count(CrumbKind::Trade)),
        pnl,
        data_warning_count: count(CrumbKind::DataWarning),
        strategy_error_count: count(CrumbKind::StrategyError),
        run_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite_store::SqliteStore;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory(SqliteStore::default_schemas()).unwrap();
        store.initialize_schema().unwrap();
        store
    }

    #[test]
    fn drop_and_read_back_ordered() {
        let store = store();
        let crumbs = BreadCrumbs::new(&store, "momentum");
        crumbs.drop(ts(5, 10), CrumbKind::Signal, "buy AAPL").unwrap();
        crumbs.drop(ts(4, 10), CrumbKind::General, "started").unwrap();

        let all = crumbs.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, CrumbKind::General);
        assert_eq!(all[1].data, "buy AAPL");
    }

    #[test]
    fn same_run_crumbs_do_not_collide() {
        let store = store();
        let crumbs = BreadCrumbs::new(&store, "momentum");
        crumbs.drop(ts(4, 10), CrumbKind::Signal, "buy AAPL").unwrap();
        crumbs.drop(ts(4, 10), CrumbKind::Trade, "buy AAPL x1").unwrap();
        crumbs
            .drop(ts(4, 10), CrumbKind::Valuation, "10000.0")
            .unwrap();
        assert_eq!(crumbs.all().unwrap().len(), 3);
    }

    #[test]
    fn list_payloads_join_with_colon() {
        let store = store();
        let crumbs = BreadCrumbs::new(&store, "momentum");
        crumbs
            .drop_list(
                ts(4, 10),
                CrumbKind::Trade,
                &["buy AAPL x1 @ 100.00".to_string(), "sell CBA x2 @ 50.00".to_string()],
            )
            .unwrap();
        let all = crumbs.all().unwrap();
        assert_eq!(all[0].data, "buy AAPL x1 @ 100.00:sell CBA x2 @ 50.00");
    }

    #[test]
    fn crumbs_are_scoped_by_strategy() {
        let store = store();
        BreadCrumbs::new(&store, "momentum")
            .drop(ts(4, 10), CrumbKind::General, "a")
            .unwrap();
        BreadCrumbs::new(&store, "reversion")
            .drop(ts(4, 10), CrumbKind::General, "b")
            .unwrap();
        assert_eq!(BreadCrumbs::new(&store, "momentum").all().unwrap().len(), 1);
    }

    fn crumb(day: u32, hour: u32, kind: CrumbKind, data: &str) -> BreadCrumb {
        BreadCrumb {
            id: format!("{day}-{hour}-{kind}"),
            strategy: "momentum".into(),
            kind,
            timestamp: ts(day, hour),
            data: data.into(),
        }
    }

    #[test]
    fn evaluate_ratios_and_pnl() {
        let crumbs = vec![
            crumb(4, 10, CrumbKind::Valuation, "10000.0"),
            crumb(4, 10, CrumbKind::Signal, "buy AAPL"),
            crumb(5, 10, CrumbKind::Signal, "sell AAPL"),
            crumb(5, 10, CrumbKind::Trade, "sell AAPL x1"),
            crumb(5, 16, CrumbKind::Valuation, "10150.0"),
        ];
        let report = evaluate(&crumbs);
        assert_eq!(report.run_days, 2);
        assert_relative_eq!(report.signal_ratio, 1.0);
        assert_relative_eq!(report.trade_ratio, 0.5);
        assert_relative_eq!(report.pnl, 150.0);
    }

    #[test]
    fn evaluate_without_valuations_has_zero_pnl() {
        let crumbs = vec![crumb(4, 10, CrumbKind::Signal, "buy AAPL")];
        let report = evaluate(&crumbs);
        assert_eq!(report.pnl, 0.0);
        assert_eq!(report.run_days, 1);
    }

    #[test]
    fn evaluate_empty_trail() {
        let report = evaluate(&[]);
        assert_eq!(report.run_days, 0);
        assert_eq!(report.signal_ratio, 0.0);
        assert_eq!(report.pnl, 0.0);
    }

    #[test]
    fn evaluate_counts_warnings_and_errors() {
        let crumbs = vec![
            crumb(4, 9, CrumbKind::DataWarning, "thin series AAPL"),
            crumb(4, 10, CrumbKind::StrategyError, "conflicting signals"),
            crumb(4, 11, CrumbKind::DataWarning, "thin series CBA"),
        ];
        let report = evaluate(&crumbs);
        assert_eq!(report.data_warning_count, 2);
        assert_eq!(report.strategy_error_count, 1);
    }

    #[test]
    fn drop_then_evaluate_round_trips() {
        let store = store();
        let crumbs = BreadCrumbs::new(&store, "momentum");
        crumbs
            .drop(ts(4, 9), CrumbKind::Valuation, "10000.0")
            .unwrap();
        crumbs.drop(ts(4, 10), CrumbKind::Signal, "buy AAPL").unwrap();
        crumbs.drop(ts(5, 10), CrumbKind::Signal, "hold AAPL").unwrap();
        crumbs
            .drop(ts(5, 16), CrumbKind::Valuation, "10100.0")
            .unwrap();

        let report = evaluate(&crumbs.all().unwrap());
        assert_relative_eq!(report.signal_ratio, 1.0);
        assert_relative_eq!(report.pnl, 100.0);
    }
}
