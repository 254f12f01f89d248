//! Trade sizing against portfolio exposure.

use tracing::warn;

use super::portfolio::Portfolio;
use super::risk::RiskProfile;
use super::signal::{Signal, SignalKind};

/// Chooses units for a single signal so that selling rebalances or caps
/// exposure. Sizing is computed against the caller's candidate portfolio;
/// the caller applies the resulting delta before the risk gate.
#[derive(Debug, Clone, Copy)]
pub struct ExposureManager {
    pub default_units: i64,
}

impl Default for ExposureManager {
    fn default() -> Self {
        ExposureManager { default_units: 1 }
    }
}

impl ExposureManager {
    /// Units to trade for `signal`.
    ///
    /// Short positions size to zero. When the exposure cap is breached a
    /// sell liquidates up to the whole holding; otherwise a sell above the
    /// portfolio's mean asset exposure shrinks the asset back to the mean,
    /// floored at `default_units` and capped at the held units.
    pub fn units_to_trade(
        &self,
        signal: &Signal,
        candidate: &Portfolio,
        risk: &RiskProfile,
    ) -> i64 {
        let symbol = &signal.symbol;
        let held = candidate.units(symbol);
        if held < 0 {
            warn!(symbol = %symbol, held, "short position, refusing to size trade");
            return 0;
        }

        let Some(price) = signal.target_value else {
            return 0;
        };
        if price <= 0.0 {
            warn!(symbol = %symbol, price, "non-positive target price, refusing to size trade");
            return 0;
        }

        if signal.kind == SignalKind::Sell {
            if let Some(cap) = risk.max_exposure() {
                if candidate.total_exposure() > cap {
                    let units = (candidate.exposure(symbol) / price).floor() as i64;
                    return units.min(held).max(0);
                }
            }

            let mean = candidate.mean_exposure();
            if candidate.total_exposure() > mean {
                let excess = candidate.exposure(symbol) - mean;
                let units = (excess / price).floor() as i64;
                return units.max(self.default_units).min(held);
            }
        }

        self.default_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::Asset;
    use crate::domain::signal::OrderType;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn signal(symbol: &str, kind: SignalKind, target: f64) -> Signal {
        Signal {
            id: "s".into(),
            symbol: symbol.into(),
            kind,
            target_value: Some(target),
            order_type: OrderType::Limit,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        }
    }

    fn portfolio(assets: &[(&str, i64, f64)]) -> Portfolio {
        let mut p = Portfolio::new("p1", "simulated", 10_000.0, 1.0);
        for (symbol, units, exposure) in assets {
            p.assets.insert(
                symbol.to_string(),
                Asset {
                    units: *units,
                    exposure: *exposure,
                },
            );
        }
        p
    }

    fn profile(cap: f64) -> RiskProfile {
        RiskProfile::new(HashMap::from([("max_exposure".to_string(), cap)]))
    }

    #[test]
    fn default_is_one_unit() {
        let manager = ExposureManager::default();
        let p = portfolio(&[]);
        let units = manager.units_to_trade(
            &signal("AAPL", SignalKind::Buy, 100.0),
            &p,
            &RiskProfile::default(),
        );
        assert_eq!(units, 1);
    }

    #[test]
    fn short_position_sizes_to_zero() {
        let manager = ExposureManager::default();
        let p = portfolio(&[("AAPL", -3, 0.0)]);
        let units = manager.units_to_trade(
            &signal("AAPL", SignalKind::Sell, 100.0),
            &p,
            &RiskProfile::default(),
        );
        assert_eq!(units, 0);
    }

    #[test]
    fn breached_cap_sells_whole_holding() {
        // 20 units at 60: exposure 1200 over a 1000 cap.
        let manager = ExposureManager::default();
        let p = portfolio(&[("AAPL", 20, 1_200.0)]);
        let units =
            manager.units_to_trade(&signal("AAPL", SignalKind::Sell, 60.0), &p, &profile(1_000.0));
        assert_eq!(units, 20);
    }

    #[test]
    fn breached_cap_sell_capped_at_held_units() {
        // Exposure says 25 units but only 10 are held.
        let manager = ExposureManager::default();
        let p = portfolio(&[("AAPL", 10, 1_500.0)]);
        let units =
            manager.units_to_trade(&signal("AAPL", SignalKind::Sell, 60.0), &p, &profile(1_000.0));
        assert_eq!(units, 10);
    }

    #[test]
    fn sell_above_mean_shrinks_to_mean() {
        // AAPL 900, CBA 300: mean 600, excess 300 at price 50 -> 6 units.
        let manager = ExposureManager::default();
        let p = portfolio(&[("AAPL", 18, 900.0), ("CBA", 6, 300.0)]);
        let units = manager.units_to_trade(
            &signal("AAPL", SignalKind::Sell, 50.0),
            &p,
            &RiskProfile::default(),
        );
        assert_eq!(units, 6);
    }

    #[test]
    fn balance_sell_floors_at_default_units() {
        // Tiny excess still trades at least default_units.
        let manager = ExposureManager::default();
        let p = portfolio(&[("AAPL", 10, 501.0), ("CBA", 10, 499.0)]);
        let units = manager.units_to_trade(
            &signal("AAPL", SignalKind::Sell, 50.0),
            &p,
            &RiskProfile::default(),
        );
        assert_eq!(units, 1);
    }

    #[test]
    fn buy_is_default_even_when_cap_breached() {
        let manager = ExposureManager::default();
        let p = portfolio(&[("AAPL", 20, 1_200.0)]);
        let units =
            manager.units_to_trade(&signal("AAPL", SignalKind::Buy, 60.0), &p, &profile(1_000.0));
        assert_eq!(units, 1);
    }
}
