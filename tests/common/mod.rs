#![allow(dead_code)]

use autotrader::adapters::sqlite_store::SqliteStore;
use autotrader::domain::registry::StrategyParams;
use autotrader::domain::risk::RiskProfile;
use autotrader::domain::strategy::{
    ExecutionOptions, PortfolioSetup, StrategyDefinition, TickerRequirement,
};
use autotrader::domain::tick::{format_wire, Tick};
use autotrader::ports::store_port::StorePort;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// A Monday at 10:00, inside simulated trading hours.
pub fn run_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn in_memory_store() -> SqliteStore {
    let store = SqliteStore::in_memory(SqliteStore::default_schemas()).unwrap();
    store.initialize_schema().unwrap();
    store
}

pub fn seed_tick(store: &dyn StorePort, symbol: &str, date_time: NaiveDateTime, value: f64) {
    let tick = Tick {
        date_time,
        symbol: symbol.to_string(),
        value,
        volume: 100,
    };
    let row = HashMap::from([
        ("id".to_string(), tick.id()),
        ("date_time".to_string(), format_wire(tick.date_time)),
        ("symbol".to_string(), tick.symbol.clone()),
        ("value".to_string(), tick.value.to_string()),
    ]);
    store.insert_row("ticks", &row).unwrap();
}

/// Definition with one AAPL ticker requirement and the given function and
/// risk checks.
pub fn make_definition(
    name: &str,
    function: &str,
    cash: f64,
    checks: &[(&str, f64)],
) -> StrategyDefinition {
    StrategyDefinition {
        name: name.to_string(),
        run_datetime: Some(run_time()),
        portfolio: PortfolioSetup {
            cash,
            allocation: 1.0,
            assets: vec![],
        },
        jobs: vec![],
        data_requirements: vec![TickerRequirement {
            symbol: "AAPL".into(),
            after: None,
            before: None,
            required: None,
            stale_scope: None,
        }],
        function: function.to_string(),
        parameters: StrategyParams::new(),
        risk_profile: RiskProfile::new(
            checks.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        ),
        options: ExecutionOptions::default(),
    }
}
