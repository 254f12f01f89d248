//! Portfolio state: cash plus per-symbol units and exposure.
//!
//! A portfolio holds no exchange reference; synchronisation takes the
//! exchange as an argument so that Strategy, Portfolio, and Exchange stay
//! independent entities composed by the trade executor.

use std::collections::HashMap;

use tracing::warn;

use super::error::TraderError;
use super::ids::stable_id;
use crate::ports::exchange_port::ExchangePort;
use crate::ports::store_port::StorePort;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Asset {
    pub units: i64,
    pub exposure: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub id: String,
    pub exchange: String,
    pub cash: f64,
    /// Fraction of cash the strategy may deploy, in (0, 1].
    pub allocation: f64,
    pub assets: HashMap<String, Asset>,
}

impl Portfolio {
    pub fn new(id: &str, exchange: &str, cash: f64, allocation: f64) -> Self {
        Portfolio {
            id: id.to_string(),
            exchange: exchange.to_string(),
            cash,
            allocation,
            assets: HashMap::new(),
        }
    }

    pub fn units(&self, symbol: &str) -> i64 {
        self.assets.get(symbol).map_or(0, |a| a.units)
    }

    pub fn exposure(&self, symbol: &str) -> f64 {
        self.assets.get(symbol).map_or(0.0, |a| a.exposure)
    }

    pub fn total_exposure(&self) -> f64 {
        self.assets.values().map(|a| a.exposure).sum()
    }

    pub fn mean_exposure(&self) -> f64 {
        if self.assets.is_empty() {
            return 0.0;
        }
        self.total_exposure() / self.assets.len() as f64
    }

    /// Total portfolio value: cash plus the sum of asset exposures.
    pub fn valuate(&self) -> f64 {
        self.cash + self.total_exposure()
    }

    /// Apply a hypothetical or filled buy: cash down, units up, exposure
    /// recomputed at `price`.
    pub fn apply_buy(&mut self, symbol: &str, units: i64, price: f64) {
        self.cash -= units as f64 * price;
        let asset = self.assets.entry(symbol.to_string()).or_default();
        asset.units += units;
        asset.exposure = asset.units as f64 * price;
    }

    /// Apply a hypothetical or filled sell: cash up, units down, exposure
    /// recomputed at `price`. Candidate portfolios may go negative here;
    /// the risk gate rejects them before anything real happens.
    pub fn apply_sell(&mut self, symbol: &str, units: i64, price: f64) {
        self.cash += units as f64 * price;
        let asset = self.assets.entry(symbol.to_string()).or_default();
        asset.units -= units;
        asset.exposure = asset.units as f64 * price;
    }

    /// Recompute one asset's exposure from the latest known price.
    pub fn reprice(&mut self, symbol: &str, price: f64) {
        if let Some(asset) = self.assets.get_mut(symbol) {
            asset.exposure = asset.units as f64 * price;
        }
    }

    /// Refresh cash and per-symbol units from the exchange. Cash becomes
    /// the exchange cash at sync time; every symbol already tracked takes
    /// the exchange position's units and market value, or goes flat when
    /// the exchange reports no position.
    pub fn sync_with_exchange(&mut self, exchange: &dyn ExchangePort) -> Result<(), TraderError> {
        if let Some(cash) = exchange.cash()? {
            self.cash = cash;
        }
        let symbols: Vec<String> = self.assets.keys().cloned().collect();
        for symbol in symbols {
            let position = exchange.position(&symbol)?;
            if let Some(asset) = self.assets.get_mut(&symbol) {
                match position {
                    Some(position) => {
                        asset.units = position.units;
                        asset.exposure = position.market_value;
                    }
                    None => {
                        asset.units = 0;
                        asset.exposure = 0.0;
                    }
                }
            }
        }
        Ok(())
    }

    /// Load a portfolio row and its asset rows by portfolio id.
    pub fn load(store: &dyn StorePort, id: &str) -> Result<Portfolio, TraderError> {
        let row = store
            .query_one("portfolios", &[("id", id)])?
            .ok_or_else(|| TraderError::Store {
                reason: format!("portfolio {id} not found"),
            })?;

        let mut portfolio = Portfolio::new(
            id,
            row.get("exchange").map(String::as_str).unwrap_or("-"),
            parse_numeric(&row, "cash")?,
            parse_numeric(&row, "allocation")?,
        );

        let asset_rows = store
            .query("assets", &[("portfolio_id", id)], None)?
            .unwrap_or_default();
        for asset_row in asset_rows {
            let symbol = asset_row
                .get("symbol")
                .cloned()
                .ok_or_else(|| TraderError::Store {
                    reason: "asset row missing symbol".into(),
                })?;
            portfolio.assets.insert(
                symbol,
                Asset {
                    units: parse_numeric(&asset_row, "units")? as i64,
                    exposure: parse_numeric(&asset_row, "current_exposure")?,
                },
            );
        }
        Ok(portfolio)
    }

    /// Persist cash and per-asset units/exposure.
    pub fn save(&self, store: &dyn StorePort, updated_by: &str) -> Result<(), TraderError> {
        let mut row = HashMap::new();
        row.insert("id".to_string(), self.id.clone());
        row.insert("exchange".to_string(), self.exchange.clone());
        row.insert("cash".to_string(), format!("{:.6}", self.cash));
        row.insert("allocation".to_string(), format!("{:.6}", self.allocation));
        row.insert("updated_by".to_string(), updated_by.to_string());
        store.insert_row("portfolios", &row)?;

        for (symbol, asset) in &self.assets {
            let mut asset_row = HashMap::new();
            asset_row.insert("id".to_string(), stable_id(&[&self.id, symbol]));
            asset_row.insert("portfolio_id".to_string(), self.id.clone());
            asset_row.insert("symbol".to_string(), symbol.clone());
            asset_row.insert("units".to_string(), asset.units.to_string());
            asset_row.insert(
                "current_exposure".to_string(),
                format!("{:.6}", asset.exposure),
            );
            store.insert_row("assets", &asset_row)?;
        }
        Ok(())
    }
}

fn parse_numeric(row: &crate::ports::store_port::Row, column: &str) -> Result<f64, TraderError> {
    let raw = row.get(column).map(String::as_str).unwrap_or("-");
    if raw == "-" {
        warn!(column, "numeric column absent, defaulting to 0");
        return Ok(0.0);
    }
    raw.parse().map_err(|e| TraderError::Store {
        reason: format!("invalid numeric {column}={raw}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{OrderReport, OrderSide, OrderStatus};
    use crate::ports::exchange_port::PositionInfo;

    struct FixedExchange {
        cash: Option<f64>,
        positions: HashMap<String, PositionInfo>,
    }

    impl ExchangePort for FixedExchange {
        fn is_open(&self) -> Result<bool, TraderError> {
            Ok(true)
        }
        fn cash(&self) -> Result<Option<f64>, TraderError> {
            Ok(self.cash)
        }
        fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, TraderError> {
            Ok(self.positions.get(symbol).cloned())
        }
        fn submit(
            &self,
            _symbol: &str,
            _units: i64,
            _side: OrderSide,
        ) -> Result<Option<String>, TraderError> {
            Ok(None)
        }
        fn order(&self, id: &str) -> Result<OrderReport, TraderError> {
            Ok(OrderReport {
                id: id.to_string(),
                symbol: String::new(),
                side: OrderSide::Buy,
                status: OrderStatus::Rejected,
                units: 0,
                filled_units: 0,
                filled_mean_price: 0.0,
            })
        }
    }

    fn sample_portfolio() -> Portfolio {
        let mut p = Portfolio::new("p1", "simulated", 10_000.0, 1.0);
        p.assets.insert(
            "AAPL".into(),
            Asset {
                units: 10,
                exposure: 1_000.0,
            },
        );
        p.assets.insert(
            "CBA".into(),
            Asset {
                units: 5,
                exposure: 500.0,
            },
        );
        p
    }

    #[test]
    fn valuate_sums_cash_and_exposure() {
        let p = sample_portfolio();
        assert!((p.valuate() - 11_500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mean_exposure_over_assets() {
        let p = sample_portfolio();
        assert!((p.mean_exposure() - 750.0).abs() < f64::EPSILON);
        let empty = Portfolio::new("p2", "simulated", 0.0, 1.0);
        assert_eq!(empty.mean_exposure(), 0.0);
    }

    #[test]
    fn apply_buy_moves_cash_and_units() {
        let mut p = Portfolio::new("p1", "simulated", 1_000.0, 1.0);
        p.apply_buy("AAPL", 3, 100.0);
        assert!((p.cash - 700.0).abs() < f64::EPSILON);
        assert_eq!(p.units("AAPL"), 3);
        assert!((p.exposure("AAPL") - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn apply_sell_can_go_negative_on_candidates() {
        let mut p = Portfolio::new("p1", "simulated", 0.0, 1.0);
        p.apply_sell("AAPL", 2, 50.0);
        assert_eq!(p.units("AAPL"), -2);
        assert!((p.cash - 100.0).abs() < f64::EPSILON);
        assert!((p.exposure("AAPL") + 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sync_takes_exchange_cash_and_units() {
        let mut p = sample_portfolio();
        let mut positions = HashMap::new();
        positions.insert(
            "AAPL".to_string(),
            PositionInfo {
                symbol: "AAPL".into(),
                units: 7,
                market_value: 770.0,
            },
        );
        let exchange = FixedExchange {
            cash: Some(9_500.0),
            positions,
        };

        p.sync_with_exchange(&exchange).unwrap();

        assert!((p.cash - 9_500.0).abs() < f64::EPSILON);
        assert_eq!(p.units("AAPL"), 7);
        assert!((p.exposure("AAPL") - 770.0).abs() < f64::EPSILON);
        // CBA absent at the exchange: flat.
        assert_eq!(p.units("CBA"), 0);
        assert_eq!(p.exposure("CBA"), 0.0);
    }

    #[test]
    fn sync_keeps_cash_when_exchange_reports_none() {
        let mut p = sample_portfolio();
        let exchange = FixedExchange {
            cash: None,
            positions: HashMap::new(),
        };
        p.sync_with_exchange(&exchange).unwrap();
        assert!((p.cash - 10_000.0).abs() < f64::EPSILON);
    }
}
