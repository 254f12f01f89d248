//! Trade proposal, submission, and fill reconciliation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::error::TraderError;
use super::exposure::ExposureManager;
use super::portfolio::Portfolio;
use super::risk::RiskProfile;
use super::signal::{OrderReport, OrderSide, OrderStatus, Signal, SignalKind, Trade};
use super::strategy::ExecutionOptions;
use crate::ports::exchange_port::ExchangePort;
use crate::ports::store_port::StorePort;

/// Cooperative cancellation flag carried through the executor and checked
/// before every suspension. In-flight orders are never rolled back; the
/// broker is authoritative.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TradeExecutor<'a> {
    exchange: &'a dyn ExchangePort,
    risk: RiskProfile,
    options: ExecutionOptions,
    default_units: i64,
    poll_interval: Duration,
    poll_deadline: Duration,
    cancel: CancelToken,
    /// Trades dropped by the risk gate in the last proposal pass.
    pub rejected: usize,
}

impl<'a> TradeExecutor<'a> {
    pub fn new(
        exchange: &'a dyn ExchangePort,
        risk: RiskProfile,
        options: ExecutionOptions,
    ) -> Self {
        TradeExecutor {
            exchange,
            risk,
            options,
            default_units: 1,
            poll_interval: Duration::from_millis(500),
            poll_deadline: Duration::from_secs(300),
            cancel: CancelToken::new(),
            rejected: 0,
        }
    }

    pub fn with_polling(mut self, interval: Duration, deadline: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Propose trades from normalised signals: sync the portfolio, size
    /// each non-hold signal against a candidate copy, apply the
    /// hypothetical delta, and keep the trade only when the candidate
    /// passes the risk gate.
    pub fn generate_trades(
        &mut self,
        portfolio: &mut Portfolio,
        signals: &[Signal],
    ) -> Result<Vec<Trade>, TraderError> {
        self.rejected = 0;
        let manager = self
            .options
            .manage_exposure
            .then(ExposureManager::default);

        portfolio.sync_with_exchange(self.exchange)?;
        let mut candidate = portfolio.clone();
        let mut trades = Vec::new();

        for signal in signals {
            if signal.kind == SignalKind::Hold {
                continue;
            }
            let Some(price) = signal.target_value else {
                warn!(symbol = %signal.symbol, "non-hold signal without target, skipping");
                continue;
            };

            let units = match &manager {
                Some(m) => m.units_to_trade(signal, &candidate, &self.risk),
                None => self.default_units,
            };
            if units <= 0 {
                debug!(symbol = %signal.symbol, "sized to zero units, skipping");
                continue;
            }

            let snapshot = candidate.clone();
            match signal.kind {
                SignalKind::Buy => candidate.apply_buy(&signal.symbol, units, price),
                SignalKind::Sell => candidate.apply_sell(&signal.symbol, units, price),
                SignalKind::Hold => unreachable!(),
            }

            if self.risk.assess(&candidate) {
                trades.push(Trade {
                    kind: signal.kind,
                    symbol: signal.symbol.clone(),
                    units,
                    target_value: price,
                });
            } else {
                candidate = snapshot;
                self.rejected += 1;
                debug!(symbol = %signal.symbol, "trade dropped by risk gate");
            }
        }
        Ok(trades)
    }

    /// Submit trades in acceptance order, skipping anything the broker
    /// declines without an order id. Stops submitting once cancelled.
    pub fn execute_trades(&self, trades: &[Trade]) -> Result<Vec<String>, TraderError> {
        let mut order_ids = Vec::new();
        for trade in trades {
            if self.cancel.is_cancelled() {
                warn!("cancelled, no further orders submitted");
                break;
            }
            let side = match trade.kind {
                SignalKind::Buy => OrderSide::Buy,
                SignalKind::Sell => OrderSide::Sell,
                SignalKind::Hold => continue,
            };
            match self.exchange.submit(&trade.symbol, trade.units, side)? {
                Some(id) => order_ids.push(id),
                None => warn!(symbol = %trade.symbol, "broker accepted no order"),
            }
        }
        Ok(order_ids)
    }

    /// Poll each order to a terminal state, bounded by the per-order
    /// deadline, and apply fills to the real portfolio. Terminal
    /// non-filled states and timeouts come back as warnings.
    pub fn process_executed(
        &self,
        portfolio: &mut Portfolio,
        order_ids: &[String],
    ) -> Result<(Vec<OrderReport>, Vec<String>), TraderError> {
        let mut filled = Vec::new();
        let mut warnings = Vec::new();

        for id in order_ids {
            let deadline = Instant::now() + self.poll_deadline;
            let mut report = self.exchange.order(id)?;
            while !report.status.is_terminal() {
                if self.cancel.is_cancelled() {
                    warnings.push(format!("cancelled while polling order {id}"));
                    break;
                }
                if Instant::now() >= deadline {
                    warnings.push(format!(
                        "order {id} still {} after deadline, declared failed",
                        report.status
                    ));
                    break;
                }
                std::thread::sleep(self.poll_interval);
                report = self.exchange.order(id)?;
            }

            match report.status {
                OrderStatus::Filled => {
                    match report.side {
                        OrderSide::Buy => portfolio.apply_buy(
                            &report.symbol,
                            report.filled_units,
                            report.filled_mean_price,
                        ),
                        OrderSide::Sell => portfolio.apply_sell(
                            &report.symbol,
                            report.filled_units,
                            report.filled_mean_price,
                        ),
                    }
                    filled.push(report);
                }
                status if status.is_terminal() => {
                    warnings.push(format!("order {id} ended {status}, portfolio untouched"));
                }
                _ => {}
            }
        }
        Ok((filled, warnings))
    }

    /// Re-sync against the exchange and persist cash plus per-asset units
    /// and exposure.
    pub fn update_portfolio_db(
        &self,
        portfolio: &mut Portfolio,
        store: &dyn StorePort,
        updated_by: &str,
    ) -> Result<(), TraderError> {
        portfolio.sync_with_exchange(self.exchange)?;
        portfolio.save(store, updated_by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim_exchange::SimulatedExchange;
    use crate::adapters::sqlite_store::SqliteStore;
    use crate::domain::signal::OrderType;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::HashMap;

    fn run_time() -> NaiveDateTime {
        // A Monday.
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn signal(symbol: &str, kind: SignalKind, target: Option<f64>) -> Signal {
        Signal {
            id: "s".into(),
            symbol: symbol.into(),
            kind,
            target_value: target,
            order_type: OrderType::Limit,
            timestamp: run_time(),
        }
    }

    fn exchange_with<'a>(prices: &'a [(&'a str, f64)], cash: f64) -> SimulatedExchange<'a> {
        let oracle: HashMap<String, f64> = prices
            .iter()
            .map(|(s, p)| (s.to_string(), *p))
            .collect();
        SimulatedExchange::with_fixed_prices(cash, oracle, run_time())
    }

    fn fast_executor<'a>(
        exchange: &'a SimulatedExchange,
        risk: RiskProfile,
        options: ExecutionOptions,
    ) -> TradeExecutor<'a> {
        TradeExecutor::new(exchange, risk, options)
            .with_polling(Duration::from_millis(1), Duration::from_millis(50))
    }

    #[test]
    fn hold_signals_produce_no_trades() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        let mut executor = fast_executor(
            &exchange,
            RiskProfile::default(),
            ExecutionOptions::default(),
        );
        let mut portfolio = Portfolio::new("p1", "simulated", 10_000.0, 1.0);
        let trades = executor
            .generate_trades(&mut portfolio, &[signal("AAPL", SignalKind::Hold, None)])
            .unwrap();
        assert!(trades.is_empty());
    }

    #[test]
    fn accepted_trades_pass_the_risk_gate() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        let risk = RiskProfile::new(HashMap::from([("max_exposure".to_string(), 1_000.0)]));
        let mut executor = fast_executor(&exchange, risk, ExecutionOptions::default());
        let mut portfolio = Portfolio::new("p1", "simulated", 10_000.0, 1.0);

        let trades = executor
            .generate_trades(
                &mut portfolio,
                &[signal("AAPL", SignalKind::Buy, Some(101.0))],
            )
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].units, 1);
        assert_eq!(executor.rejected, 0);
    }

    #[test]
    fn risk_gate_drops_and_counts() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        // Cap far below one unit of AAPL.
        let risk = RiskProfile::new(HashMap::from([("max_exposure".to_string(), 50.0)]));
        let mut executor = fast_executor(&exchange, risk, ExecutionOptions::default());
        let mut portfolio = Portfolio::new("p1", "simulated", 10_000.0, 1.0);

        let trades = executor
            .generate_trades(
                &mut portfolio,
                &[signal("AAPL", SignalKind::Buy, Some(101.0))],
            )
            .unwrap();
        assert!(trades.is_empty());
        assert_eq!(executor.rejected, 1);
    }

    #[test]
    fn sell_without_position_is_dropped_not_fatal() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        let mut executor = fast_executor(
            &exchange,
            RiskProfile::default(),
            ExecutionOptions::default(),
        );
        let mut portfolio = Portfolio::new("p1", "simulated", 10_000.0, 1.0);

        // Candidate goes to -1 units, negative_units check rejects.
        let trades = executor
            .generate_trades(
                &mut portfolio,
                &[signal("AAPL", SignalKind::Sell, Some(101.0))],
            )
            .unwrap();
        assert!(trades.is_empty());
        assert_eq!(executor.rejected, 1);
    }

    #[test]
    fn execute_and_process_reconciles_portfolio() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        let mut executor = fast_executor(
            &exchange,
            RiskProfile::default(),
            ExecutionOptions::default(),
        );
        let mut portfolio = Portfolio::new("p1", "simulated", 10_000.0, 1.0);

        let trades = executor
            .generate_trades(
                &mut portfolio,
                &[signal("AAPL", SignalKind::Buy, Some(101.0))],
            )
            .unwrap();
        let order_ids = executor.execute_trades(&trades).unwrap();
        assert_eq!(order_ids.len(), 1);

        let (filled, warnings) = executor
            .process_executed(&mut portfolio, &order_ids)
            .unwrap();
        assert_eq!(filled.len(), 1);
        assert!(warnings.is_empty());
        assert!((portfolio.cash - 9_899.0).abs() < 1e-9);
        assert_eq!(portfolio.units("AAPL"), 1);
        assert!((portfolio.exposure("AAPL") - 101.0).abs() < 1e-9);
    }

    #[test]
    fn cancelled_executor_submits_nothing() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let executor = TradeExecutor::new(
            &exchange,
            RiskProfile::default(),
            ExecutionOptions::default(),
        )
        .with_cancel(cancel);

        let trades = vec![Trade {
            kind: SignalKind::Buy,
            symbol: "AAPL".into(),
            units: 1,
            target_value: 101.0,
        }];
        let order_ids = executor.execute_trades(&trades).unwrap();
        assert!(order_ids.is_empty());
    }

    #[test]
    fn update_portfolio_db_matches_exchange_state() {
        let exchange = exchange_with(&[("AAPL", 101.0)], 10_000.0);
        let store = SqliteStore::in_memory(SqliteStore::default_schemas()).unwrap();
        store.initialize_schema().unwrap();

        let mut executor = fast_executor(
            &exchange,
            RiskProfile::default(),
            ExecutionOptions::default(),
        );
        let mut portfolio = Portfolio::new("p1", "simulated", 10_000.0, 1.0);

        let trades = executor
            .generate_trades(
                &mut portfolio,
                &[signal("AAPL", SignalKind::Buy, Some(101.0))],
            )
            .unwrap();
        let ids = executor.execute_trades(&trades).unwrap();
        executor.process_executed(&mut portfolio, &ids).unwrap();
        executor
            .update_portfolio_db(&mut portfolio, &store, "test")
            .unwrap();

        // Persisted cash equals exchange cash at sync time.
        let row = store
            .query_one("portfolios", &[("id", "p1")])
            .unwrap()
            .unwrap();
        let persisted_cash: f64 = row["cash"].parse().unwrap();
        assert!((persisted_cash - exchange.cash().unwrap().unwrap()).abs() < 1e-9);

        let assets = store
            .query("assets", &[("portfolio_id", "p1")], None)
            .unwrap()
            .unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0]["units"], "1");
    }
}
