//! Declarative strategy definition, data loading, evaluation, and signal
//! normalisation.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use super::context::{LoadedData, StrategyContext};
use super::error::TraderError;
use super::ids::stable_id;
use super::portfolio::Portfolio;
use super::registry::{StrategyParams, StrategyRegistry};
use super::risk::RiskProfile;
use super::signal::{Signal, SignalConflict, SignalKind};
use super::twap_loader::TwapLoader;
use crate::ports::quote_port::QuotePort;
use crate::ports::store_port::StorePort;

/// One ticker data requirement. `after` defaults to start-of-day of the run
/// time and `before` to the run time itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerRequirement {
    pub symbol: String,
    pub after: Option<NaiveDateTime>,
    pub before: Option<NaiveDateTime>,
    /// Minimum tick count; fewer is a data warning, not a failure.
    pub required: Option<usize>,
    pub stale_scope: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionOptions {
    pub manage_exposure: bool,
    pub suppress_trades: bool,
}

impl ExecutionOptions {
    /// Parse a comma-separated option flag list; unknown flags error.
    pub fn parse(raw: &str) -> Result<Self, TraderError> {
        let mut options = ExecutionOptions::default();
        for flag in raw.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "manage_exposure" => options.manage_exposure = true,
                "suppress_trades" => options.suppress_trades = true,
                other => {
                    return Err(TraderError::Descriptor {
                        reason: format!("unknown execution option: {other}"),
                    })
                }
            }
        }
        Ok(options)
    }
}

/// Portfolio declared in the strategy descriptor's setup block.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSetup {
    pub cash: f64,
    pub allocation: f64,
    pub assets: Vec<(String, i64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSetup {
    pub name: String,
    pub script: String,
    pub schedule: String,
}

/// Parsed declarative strategy description.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDefinition {
    pub name: String,
    pub run_datetime: Option<NaiveDateTime>,
    pub portfolio: PortfolioSetup,
    pub jobs: Vec<JobSetup>,
    pub data_requirements: Vec<TickerRequirement>,
    pub function: String,
    pub parameters: StrategyParams,
    pub risk_profile: RiskProfile,
    pub options: ExecutionOptions,
}

/// A strategy bound to a store for one run.
pub struct Strategy<'a> {
    pub definition: StrategyDefinition,
    pub run_datetime: NaiveDateTime,
    store: &'a dyn StorePort,
}

impl<'a> Strategy<'a> {
    pub fn new(
        definition: StrategyDefinition,
        run_datetime: NaiveDateTime,
        store: &'a dyn StorePort,
    ) -> Self {
        Strategy {
            definition,
            run_datetime,
            store,
        }
    }

    /// Deterministic id of the strategy's portfolio.
    pub fn portfolio_id(&self) -> String {
        stable_id(&[&self.definition.name, "portfolio"])
    }

    /// Write the strategy row plus the declared portfolio and asset rows.
    /// Used on first run and by the regression driver's on-boarding.
    pub fn onboard(&self, updated_by: &str) -> Result<String, TraderError> {
        let portfolio_id = self.portfolio_id();

        let mut portfolio = Portfolio::new(
            &portfolio_id,
            "simulated",
            self.definition.portfolio.cash,
            self.definition.portfolio.allocation,
        );
        for (symbol, units) in &self.definition.portfolio.assets {
            portfolio.assets.insert(
                symbol.clone(),
                super::portfolio::Asset {
                    units: *units,
                    exposure: 0.0,
                },
            );
        }
        portfolio.save(self.store, updated_by)?;

        let mut row = HashMap::new();
        row.insert("id".to_string(), stable_id(&[&self.definition.name]));
        row.insert("name".to_string(), self.definition.name.clone());
        row.insert("portfolio_id".to_string(), portfolio_id.clone());
        row.insert("updated_by".to_string(), updated_by.to_string());
        self.store.insert_row("strategies", &row)?;

        Ok(portfolio_id)
    }

    /// Load the persisted portfolio by strategy name → portfolio id → rows.
    pub fn load_portfolio(&self) -> Result<Portfolio, TraderError> {
        let row = self
            .store
            .query_one("strategies", &[("name", &self.definition.name)])?
            .ok_or_else(|| TraderError::Store {
                reason: format!("strategy {} not on-boarded", self.definition.name),
            })?;
        let portfolio_id = row
            .get("portfolio_id")
            .cloned()
            .ok_or_else(|| TraderError::Store {
                reason: "strategy row missing portfolio_id".into(),
            })?;
        Portfolio::load(self.store, &portfolio_id)
    }

    /// Load every declared data requirement. Returns the loaded data plus
    /// data-quality warnings for series thinner than `required`.
    pub fn load_required_data(&self) -> Result<(LoadedData, Vec<String>), TraderError> {
        let loader = TwapLoader::new(self.store);
        let mut by_symbol: HashMap<String, Vec<(NaiveDateTime, f64)>> = HashMap::new();
        let mut warnings = Vec::new();

        for requirement in &self.definition.data_requirements {
            let after = requirement
                .after
                .unwrap_or_else(|| self.run_datetime.date().and_time(chrono::NaiveTime::MIN));
            let before = requirement.before.unwrap_or(self.run_datetime);

            let series = loader.load(
                &requirement.symbol,
                before,
                after,
                requirement.stale_scope,
            )?;

            if let Some(required) = requirement.required {
                if series.len() < required {
                    warnings.push(format!(
                        "insufficient ticks for {}: have {}, need {}",
                        requirement.symbol,
                        series.len(),
                        required
                    ));
                }
            }
            by_symbol.insert(requirement.symbol.clone(), series);
        }

        let mut data = LoadedData::new();
        data.insert("ticker".to_string(), by_symbol);
        Ok((data, warnings))
    }

    /// Run the user function against a fresh context and normalise its
    /// signals. A user-function failure surfaces as
    /// `TraderError::Strategy`; an unregistered function name as
    /// `TraderError::UnknownFunction` (configuration, fatal).
    pub fn evaluate(
        &self,
        registry: &StrategyRegistry,
        data: LoadedData,
        ds: Option<&dyn QuotePort>,
    ) -> Result<Vec<Signal>, TraderError> {
        let function = registry.get(&self.definition.function)?;
        let mut ctx = StrategyContext::new(
            &self.definition.name,
            self.run_datetime,
            data,
            self.store,
            ds,
        );
        function(&mut ctx, &self.definition.parameters).map_err(|e| match e {
            err @ TraderError::Strategy { .. } => err,
            other => TraderError::Strategy {
                name: self.definition.name.clone(),
                reason: other.to_string(),
            },
        })?;
        Ok(ctx.into_signals())
    }

    /// Normalise raw signals to at most one per symbol.
    ///
    /// Duplicate buys keep the lowest target (best ask), duplicate sells
    /// the highest (best bid), duplicate holds the first. Mixed kinds for
    /// one symbol are a conflict, returned as a value.
    pub fn clean_signals(signals: Vec<Signal>) -> Result<Vec<Signal>, SignalConflict> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Signal>> = HashMap::new();
        for signal in signals {
            if !groups.contains_key(&signal.symbol) {
                order.push(signal.symbol.clone());
            }
            groups.entry(signal.symbol.clone()).or_default().push(signal);
        }

        let mut cleaned = Vec::new();
        for symbol in order {
            let Some(group) = groups.remove(&symbol) else {
                continue;
            };
            let kinds: std::collections::HashSet<SignalKind> =
                group.iter().map(|s| s.kind).collect();
            if kinds.len() > 1 {
                return Err(SignalConflict {
                    symbol,
                    signals: group,
                });
            }

            let target = |s: &Signal| s.target_value.unwrap_or(0.0);
            let mut rest = group.into_iter();
            let Some(first) = rest.next() else {
                continue;
            };
            let selected = match first.kind {
                SignalKind::Buy => {
                    rest.fold(first, |best, s| if target(&s) < target(&best) { s } else { best })
                }
                SignalKind::Sell => {
                    rest.fold(first, |best, s| if target(&s) > target(&best) { s } else { best })
                }
                SignalKind::Hold => first,
            };
            cleaned.push(selected);
        }
        Ok(cleaned)
    }
}
