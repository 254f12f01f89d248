//! Deterministic in-memory exchange for back-testing.
//!
//! Orders fill immediately at the latest oracle price at or before the run
//! time, and the internal cash/position ledger mirrors what a broker would
//! report. The same run calendar therefore always produces the same fills.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use tracing::warn;

use crate::domain::error::TraderError;
use crate::domain::signal::{OrderReport, OrderSide, OrderStatus};
use crate::domain::tick::parse_wire;
use crate::ports::exchange_port::{ExchangePort, PositionInfo};
use crate::ports::store_port::StorePort;

enum Oracle<'a> {
    Fixed(HashMap<String, f64>),
    Store(&'a dyn StorePort),
}

impl Oracle<'_> {
    /// Latest available price for `symbol` at or before `at`.
    fn price_at(&self, symbol: &str, at: NaiveDateTime) -> Result<Option<f64>, TraderError> {
        match self {
            Oracle::Fixed(prices) => Ok(prices.get(symbol).copied()),
            Oracle::Store(store) => {
                let rows = store
                    .query("ticks", &[("symbol", symbol)], None)?
                    .unwrap_or_default();
                let mut latest: Option<(NaiveDateTime, f64)> = None;
                for row in rows {
                    let ts_raw = row.get("date_time").map(String::as_str).unwrap_or("-");
                    let value_raw = row.get("value").map(String::as_str).unwrap_or("-");
                    if ts_raw == "-" || value_raw == "-" {
                        continue;
                    }
                    let ts = parse_wire(ts_raw)?;
                    if ts > at {
                        continue;
                    }
                    let value: f64 = value_raw.parse().map_err(|e| TraderError::Store {
                        reason: format!("invalid tick value {value_raw}: {e}"),
                    })?;
                    if latest.map_or(true, |(best, _)| ts > best) {
                        latest = Some((ts, value));
                    }
                }
                Ok(latest.map(|(_, value)| value))
            }
        }
    }
}

struct Ledger {
    cash: f64,
    positions: HashMap<String, i64>,
    orders: HashMap<String, OrderReport>,
    next_order: u64,
}

pub struct SimulatedExchange<'a> {
    ledger: Mutex<Ledger>,
    oracle: Oracle<'a>,
    run_datetime: Mutex<NaiveDateTime>,
    open_from: NaiveTime,
    open_until: NaiveTime,
}

impl<'a> SimulatedExchange<'a> {
    /// Simulator with a fixed symbol → price oracle.
    pub fn with_fixed_prices(
        cash: f64,
        prices: HashMap<String, f64>,
        run_datetime: NaiveDateTime,
    ) -> Self {
        Self::build(cash, Oracle::Fixed(prices), run_datetime)
    }

    /// Simulator pricing from the persisted tick history.
    pub fn with_store(cash: f64, store: &'a dyn StorePort, run_datetime: NaiveDateTime) -> Self {
        Self::build(cash, Oracle::Store(store), run_datetime)
    }

    fn build(cash: f64, oracle: Oracle<'a>, run_datetime: NaiveDateTime) -> Self {
        SimulatedExchange {
            ledger: Mutex::new(Ledger {
                cash,
                positions: HashMap::new(),
                orders: HashMap::new(),
                next_order: 1,
            }),
            oracle,
            run_datetime: Mutex::new(run_datetime),
            open_from: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            open_until: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    pub fn with_hours(mut self, from: NaiveTime, until: NaiveTime) -> Self {
        self.open_from = from;
        self.open_until = until;
        self
    }

    /// Seed a starting position, as if carried over from earlier trading.
    pub fn seed_position(&self, symbol: &str, units: i64) {
        self.ledger
            .lock()
            .unwrap()
            .positions
            .insert(symbol.to_string(), units);
    }

    /// Advance the simulated clock; the regression driver steps this
    /// through the run calendar.
    pub fn set_run_datetime(&self, run_datetime: NaiveDateTime) {
        *self.run_datetime.lock().unwrap() = run_datetime;
    }

    fn now(&self) -> NaiveDateTime {
        *self.run_datetime.lock().unwrap()
    }
}

impl ExchangePort for SimulatedExchange<'_> {
    fn is_open(&self) -> Result<bool, TraderError> {
        let now = self.now();
        let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
        let time = now.time();
        Ok(!weekend && time >= self.open_from && time <= self.open_until)
    }

    fn cash(&self) -> Result<Option<f64>, TraderError> {
        Ok(Some(self.ledger.lock().unwrap().cash))
    }

    fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, TraderError> {
        let units = match self.ledger.lock().unwrap().positions.get(symbol) {
            Some(units) => *units,
            None => return Ok(None),
        };
        let price = self.oracle.price_at(symbol, self.now())?.unwrap_or(0.0);
        Ok(Some(PositionInfo {
            symbol: symbol.to_string(),
            units,
            market_value: units as f64 * price,
        }))
    }

    fn submit(
        &self,
        symbol: &str,
        units: i64,
        side: OrderSide,
    ) -> Result<Option<String>, TraderError> {
        let now = self.now();
        let held = self
            .ledger
            .lock()
            .unwrap()
            .positions
            .get(symbol)
            .copied()
            .unwrap_or(0);
        if side == OrderSide::Sell && held == 0 {
            return Err(TraderError::NoPosition {
                symbol: symbol.to_string(),
            });
        }

        let Some(price) = self.oracle.price_at(symbol, now)? else {
            warn!(symbol, "no price available at run time, order not created");
            return Ok(None);
        };

        let mut ledger = self.ledger.lock().unwrap();
        let id = format!("sim-{}", ledger.next_order);
        ledger.next_order += 1;

        match side {
            OrderSide::Buy => {
                ledger.cash -= units as f64 * price;
                *ledger.positions.entry(symbol.to_string()).or_insert(0) += units;
            }
            OrderSide::Sell => {
                ledger.cash += units as f64 * price;
                *ledger.positions.entry(symbol.to_string()).or_insert(0) -= units;
            }
        }

        ledger.orders.insert(
            id.clone(),
            OrderReport {
                id: id.clone(),
                symbol: symbol.to_string(),
                side,
                status: OrderStatus::Filled,
                units,
                filled_units: units,
                filled_mean_price: price,
            },
        );
        Ok(Some(id))
    }

    fn order(&self, id: &str) -> Result<OrderReport, TraderError> {
        self.ledger
            .lock()
            .unwrap()
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| TraderError::Exchange {
                reason: format!("unknown order {id}"),
            })
    }
}
