//! Single-run orchestration: load, evaluate, propose, execute, process,
//! persist, with bread crumbs at every noteworthy point.
//!
//! Non-fatal problems inside a run are converted to crumbs so the run
//! always ends with a valuation; only configuration and store failures
//! propagate.

use tracing::{info, warn};

use super::breadcrumbs::{BreadCrumbs, CrumbKind};
use super::error::TraderError;
use super::job::JobRecorder;
use super::portfolio::Portfolio;
use super::registry::StrategyRegistry;
use super::signal::Signal;
use super::strategy::Strategy;
use super::trade_executor::{CancelToken, TradeExecutor};
use crate::ports::exchange_port::ExchangePort;
use crate::ports::quote_port::QuotePort;
use crate::ports::store_port::StorePort;
use std::time::Duration;

/// What a completed run looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub valuation: f64,
    pub signals: usize,
    pub trades_proposed: usize,
    pub trades_filled: usize,
    pub warnings: usize,
    pub strategy_errors: usize,
    pub cancelled: bool,
}

pub struct StrategyExecutor<'a> {
    strategy: &'a Strategy<'a>,
    store: &'a dyn StorePort,
    exchange: &'a dyn ExchangePort,
    registry: &'a StrategyRegistry,
    quotes: Option<&'a dyn QuotePort>,
    job: Option<&'a JobRecorder<'a>>,
    cancel: CancelToken,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl<'a> StrategyExecutor<'a> {
    pub fn new(
        strategy: &'a Strategy<'a>,
        store: &'a dyn StorePort,
        exchange: &'a dyn ExchangePort,
        registry: &'a StrategyRegistry,
    ) -> Self {
        StrategyExecutor {
            strategy,
            store,
            exchange,
            registry,
            quotes: None,
            job: None,
            cancel: CancelToken::new(),
            poll_interval: Duration::from_millis(500),
            poll_deadline: Duration::from_secs(300),
        }
    }

    pub fn with_quotes(mut self, quotes: &'a dyn QuotePort) -> Self {
        self.quotes = Some(quotes);
        self
    }

    pub fn with_job(mut self, job: &'a JobRecorder<'a>) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_polling(mut self, interval: Duration, deadline: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_deadline = deadline;
        self
    }

    fn phase(&self, name: &str) -> Result<(), TraderError> {
        if let Some(job) = self.job {
            job.phase(self.strategy.run_datetime, name)?;
        }
        Ok(())
    }

    /// Drive one full run against `portfolio`.
    pub fn run(&self, portfolio: &mut Portfolio) -> Result<RunOutcome, TraderError> {
        let definition = &self.strategy.definition;
        let now = self.strategy.run_datetime;
        let crumbs = BreadCrumbs::new(self.store, &definition.name);
        let mut warnings = 0usize;
        let mut strategy_errors = 0usize;

        // Load.
        self.phase("load")?;
        let (data, data_warnings) = self.strategy.load_required_data()?;
        for warning in &data_warnings {
            crumbs.drop(now, CrumbKind::DataWarning, warning)?;
            warnings += 1;
        }

        // Evaluate and normalise.
        self.phase("evaluate")?;
        let signals: Vec<Signal> = match self.strategy.evaluate(self.registry, data, self.quotes)
        {
            Ok(raw) => match Strategy::clean_signals(raw) {
                Ok(cleaned) => cleaned,
                Err(conflict) => {
                    warn!(strategy = %definition.name, %conflict, "signal conflict");
                    crumbs.drop(now, CrumbKind::StrategyError, &conflict.to_string())?;
                    strategy_errors += 1;
                    Vec::new()
                }
            },
            Err(TraderError::Strategy { name, reason }) => {
                warn!(strategy = %name, reason = %reason, "strategy function failed");
                crumbs.drop(now, CrumbKind::StrategyError, &reason)?;
                strategy_errors += 1;
                Vec::new()
            }
            Err(fatal) => return Err(fatal),
        };

        if !signals.is_empty() {
            let described: Vec<String> = signals
                .iter()
                .map(|s| match s.target_value {
                    Some(target) => format!("{} {} @ {:.2}", s.kind, s.symbol, target),
                    None => format!("{} {}", s.kind, s.symbol),
                })
                .collect();
            crumbs.drop_list(now, CrumbKind::Signal, &described)?;
        }

        // Propose.
        self.phase("propose")?;
        let mut executor = TradeExecutor::new(
            self.exchange,
            definition.risk_profile.clone(),
            definition.options,
        )
        .with_polling(self.poll_interval, self.poll_deadline)
        .with_cancel(self.cancel.clone());

        let trades = executor.generate_trades(portfolio, &signals)?;
        if !trades.is_empty() {
            let described: Vec<String> = trades.iter().map(|t| t.describe()).collect();
            crumbs.drop_list(now, CrumbKind::Trade, &described)?;
        }

        let mut trades_filled = 0usize;
        if definition.options.suppress_trades {
            info!(strategy = %definition.name, "suppress_trades set, stopping after propose");
        } else if !trades.is_empty() {
            if self.exchange.is_open()? {
                // Execute.
                self.phase("execute")?;
                let order_ids = executor.execute_trades(&trades)?;

                // Process fills.
                self.phase("process")?;
                let (filled, fill_warnings) =
                    executor.process_executed(portfolio, &order_ids)?;
                trades_filled = filled.len();
                for warning in &fill_warnings {
                    crumbs.drop(now, CrumbKind::General, warning)?;
                    warnings += 1;
                }

                // Persist.
                self.phase("persist")?;
                executor.update_portfolio_db(portfolio, self.store, &definition.name)?;
            } else {
                crumbs.drop(now, CrumbKind::General, "market closed, trades not submitted")?;
                warnings += 1;
            }
        }

        let valuation = portfolio.valuate();
        crumbs.drop(now, CrumbKind::Valuation, &format!("{valuation:.6}"))?;

        Ok(RunOutcome {
            valuation,
            signals: signals.len(),
            trades_proposed: trades.len(),
            trades_filled,
            warnings,
            strategy_errors,
            cancelled: self.cancel.is_cancelled(),
        })
    }
}
