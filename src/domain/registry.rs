//! Strategy function registry.
//!
//! User functions are resolved by name through an explicit table populated
//! at startup. An unknown name is a configuration error, caught before any
//! data is loaded.

use std::collections::HashMap;

use super::context::StrategyContext;
use super::error::TraderError;
use super::signal::{OrderType, SignalKind};

pub type StrategyParams = HashMap<String, String>;

/// A user strategy function: reads the context, emits signals through it.
pub type StrategyFn =
    fn(&mut StrategyContext<'_>, &StrategyParams) -> Result<(), TraderError>;

pub struct StrategyRegistry {
    functions: HashMap<String, StrategyFn>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        StrategyRegistry {
            functions: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the shipped strategy functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("hold", hold);
        registry.register("twap_momentum", twap_momentum);
        registry.register("mean_reversion", mean_reversion);
        registry
    }

    pub fn register(&mut self, name: &str, f: StrategyFn) {
        self.functions.insert(name.to_string(), f);
    }

    pub fn get(&self, name: &str) -> Result<StrategyFn, TraderError> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| TraderError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn param_usize(params: &StrategyParams, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn param_f64(params: &StrategyParams, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Emit a hold for every loaded ticker. The do-nothing baseline.
fn hold(ctx: &mut StrategyContext, _params: &StrategyParams) -> Result<(), TraderError> {
    let symbols: Vec<String> = ctx
        .data
        .get("ticker")
        .map(|by_symbol| by_symbol.keys().cloned().collect())
        .unwrap_or_default();
    for symbol in symbols {
        ctx.add_signal(&symbol, SignalKind::Hold, OrderType::Market, None)?;
    }
    Ok(())
}

/// Fast/slow mean crossover on the loaded tick series.
///
/// Parameters: `fast` (default 3), `slow` (default 10). Tracks a persistent
/// `position_<symbol>` variable so a crossover only signals once per flip.
fn twap_momentum(ctx: &mut StrategyContext, params: &StrategyParams) -> Result<(), TraderError> {
    let fast = param_usize(params, "fast", 3);
    let slow = param_usize(params, "slow", 10);

    let symbols: Vec<String> = ctx
        .data
        .get("ticker")
        .map(|by_symbol| by_symbol.keys().cloned().collect())
        .unwrap_or_default();

    for symbol in symbols {
        let values: Vec<f64> = ctx
            .ticker(&symbol)
            .map(|series| series.iter().map(|(_, v)| *v).collect())
            .unwrap_or_default();
        if values.len() < slow {
            continue;
        }
        let latest = values[values.len() - 1];
        let fast_mean = mean(&values[values.len() - fast..]);
        let slow_mean = mean(&values[values.len() - slow..]);

        let variable = format!("position_{symbol}");
        let position = ctx.get_variable(&variable, "flat")?;

        if fast_mean > slow_mean && position == "flat" {
            ctx.add_signal(&symbol, SignalKind::Buy, OrderType::Limit, Some(latest))?;
            ctx.set_variable(&variable, "long")?;
        } else if fast_mean < slow_mean && position == "long" {
            ctx.add_signal(&symbol, SignalKind::Sell, OrderType::Limit, Some(latest))?;
            ctx.set_variable(&variable, "flat")?;
        } else {
            ctx.add_signal(&symbol, SignalKind::Hold, OrderType::Market, None)?;
        }
    }
    Ok(())
}

/// Buy below and sell above a band around the window mean.
///
/// Parameters: `window` (default 10), `band_pct` (default 2.0).
fn mean_reversion(ctx: &mut StrategyContext, params: &StrategyParams) -> Result<(), TraderError> {
    let window = param_usize(params, "window", 10);
    let band_pct = param_f64(params, "band_pct", 2.0);

    let symbols: Vec<String> = ctx
        .data
        .get("ticker")
        .map(|by_symbol| by_symbol.keys().cloned().collect())
        .unwrap_or_default();

    for symbol in symbols {
        let values: Vec<f64> = ctx
            .ticker(&symbol)
            .map(|series| series.iter().map(|(_, v)| *v).collect())
            .unwrap_or_default();
        if values.len() < window {
            continue;
        }
        let latest = values[values.len() - 1];
        let window_mean = mean(&values[values.len() - window..]);
        let band = window_mean * band_pct / 100.0;

        if latest < window_mean - band {
            ctx.add_signal(&symbol, SignalKind::Buy, OrderType::Limit, Some(latest))?;
        } else if latest > window_mean + band {
            ctx.add_signal(&symbol, SignalKind::Sell, OrderType::Limit, Some(latest))?;
        } else {
            ctx.add_signal(&symbol, SignalKind::Hold, OrderType::Market, None)?;
        }
    }
    Ok(())
}
