//! Risk profile: a named predicate set evaluated against a portfolio.

use std::collections::HashMap;

use tracing::warn;

use super::portfolio::Portfolio;

/// Check names recognised beyond the always-applied `negative_units`.
const MAX_EXPOSURE: &str = "max_exposure";
const MIN_LIQUIDITY: &str = "min_liquidity";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskProfile {
    pub checks: HashMap<String, f64>,
}

impl RiskProfile {
    pub fn new(checks: HashMap<String, f64>) -> Self {
        RiskProfile { checks }
    }

    pub fn max_exposure(&self) -> Option<f64> {
        self.checks.get(MAX_EXPOSURE).copied()
    }

    /// Evaluate every check against `portfolio`. Violations log a warning
    /// each; the caller gates on the returned bool.
    pub fn assess(&self, portfolio: &Portfolio) -> bool {
        let mut passed = true;

        for (symbol, asset) in &portfolio.assets {
            if asset.units < 0 {
                warn!(
                    portfolio = %portfolio.id,
                    symbol = %symbol,
                    units = asset.units,
                    "risk check negative_units violated"
                );
                passed = false;
            }
        }

        for (name, threshold) in &self.checks {
            match name.as_str() {
                MAX_EXPOSURE => {
                    let exposure = portfolio.total_exposure();
                    if exposure > *threshold {
                        warn!(
                            portfolio = %portfolio.id,
                            exposure,
                            threshold,
                            "risk check max_exposure violated"
                        );
                        passed = false;
                    }
                }
                MIN_LIQUIDITY => {
                    // Reserved. Always passes while unimplemented.
                }
                other => {
                    warn!(check = other, "unrecognised risk check, skipping");
                }
            }
        }

        passed
    }
}
