//! Deterministic historical replay of the strategy pipeline.
//!
//! The driver provisions an ephemeral store, on-boards the declared
//! portfolio and strategy, and replays the run calendar in ascending order
//! against the simulated exchange. The crumb trail is the scoring record;
//! the ephemeral database file is deleted on clean-up.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Weekday};
use tracing::info;

use super::breadcrumbs::{self, BreadCrumb, BreadCrumbs, CrumbReport};
use super::error::TraderError;
use super::ids::stable_id;
use super::registry::StrategyRegistry;
use super::strategy::{Strategy, StrategyDefinition};
use super::strategy_executor::StrategyExecutor;
use super::tick::{format_wire, Tick};
use crate::adapters::crumb_csv_adapter;
use crate::adapters::sim_exchange::SimulatedExchange;
use crate::adapters::sqlite_store::SqliteStore;
use crate::ports::store_port::StorePort;

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionResult {
    pub valuations: Vec<(NaiveDateTime, f64)>,
    pub crumbs: Vec<BreadCrumb>,
    pub report: CrumbReport,
}

pub struct RegressionDriver {
    definition: StrategyDefinition,
    calendar: Vec<NaiveDateTime>,
    db_path: PathBuf,
    include_weekends: bool,
}

impl RegressionDriver {
    /// Build a driver with an ephemeral database file under `db_root`,
    /// keyed by the strategy, the calendar bounds, and the process id.
    pub fn new(
        definition: StrategyDefinition,
        mut calendar: Vec<NaiveDateTime>,
        db_root: &Path,
    ) -> Self {
        calendar.sort();
        let first = calendar.first().map(|d| format_wire(*d)).unwrap_or_default();
        let last = calendar.last().map(|d| format_wire(*d)).unwrap_or_default();
        let key = stable_id(&[
            &definition.name,
            &first,
            &last,
            &std::process::id().to_string(),
        ]);
        let db_path = db_root.join(format!("regression_{key}.db"));
        RegressionDriver {
            definition,
            calendar,
            db_path,
            include_weekends: false,
        }
    }

    pub fn include_weekends(mut self, include: bool) -> Self {
        self.include_weekends = include;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Seed historical ticks into the ephemeral store before a run.
    pub fn seed_ticks(&self, ticks: &[Tick]) -> Result<(), TraderError> {
        let store = self.open_store()?;
        for tick in ticks {
            let row = std::collections::HashMap::from([
                ("id".to_string(), tick.id()),
                ("date_time".to_string(), format_wire(tick.date_time)),
                ("symbol".to_string(), tick.symbol.clone()),
                ("value".to_string(), tick.value.to_string()),
            ]);
            store.insert_row("ticks", &row)?;
        }
        Ok(())
    }

    fn open_store(&self) -> Result<SqliteStore, TraderError> {
        let store = SqliteStore::open(&self.db_path, SqliteStore::default_schemas())?;
        store.initialize_schema()?;
        Ok(store)
    }

    /// Replay the calendar. Weekends are skipped unless included.
    pub fn run(&self, registry: &StrategyRegistry) -> Result<RegressionResult, TraderError> {
        let store = self.open_store()?;

        let first_run = self
            .calendar
            .first()
            .copied()
            .ok_or_else(|| TraderError::Descriptor {
                reason: "regression calendar is empty".into(),
            })?;

        let onboarding = Strategy::new(self.definition.clone(), first_run, &store);
        onboarding.onboard("regression")?;
        let mut portfolio = onboarding.load_portfolio()?;

        let exchange =
            SimulatedExchange::with_store(self.definition.portfolio.cash, &store, first_run);
        for (symbol, units) in &self.definition.portfolio.assets {
            exchange.seed_position(symbol, *units);
        }

        let mut valuations = Vec::new();
        for run_datetime in &self.calendar {
            if !self.include_weekends
                && matches!(run_datetime.weekday(), Weekday::Sat | Weekday::Sun)
            {
                continue;
            }
            exchange.set_run_datetime(*run_datetime);
            let strategy = Strategy::new(self.definition.clone(), *run_datetime, &store);
            let executor = StrategyExecutor::new(&strategy, &store, &exchange, registry);
            let outcome = executor.run(&mut portfolio)?;
            valuations.push((*run_datetime, outcome.valuation));
        }
        info!(
            strategy = %self.definition.name,
            runs = valuations.len(),
            "regression replay complete"
        );

        let crumbs = BreadCrumbs::new(&store, &self.definition.name).all()?;
        let report = breadcrumbs::evaluate(&crumbs);
        Ok(RegressionResult {
            valuations,
            crumbs,
            report,
        })
    }

    /// Export the crumb trail as CSV: strategy meta-data header rows, then
    /// one (timestamp, type, data) row per crumb.
    pub fn export_csv(&self, result: &RegressionResult, path: &Path) -> Result<(), TraderError> {
        crumb_csv_adapter::write(path, &self.definition, &result.crumbs)
    }

    /// Delete the ephemeral database file.
    pub fn clean_up(&self) -> Result<(), TraderError> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)?;
        }
        Ok(())
    }
}
