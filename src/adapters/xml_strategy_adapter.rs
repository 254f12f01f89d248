//! XML strategy-descriptor parser.
//!
//! Descriptor shape:
//!
//! ```xml
//! <strategy name="momentum" run_datetime="20240304100000">
//!   <setup>
//!     <portfolio>
//!       <cash value="10000" allocation="1.0"/>
//!       <asset symbol="AAPL" units="5"/>
//!     </portfolio>
//!     <job name="nightly" script="autotrader run" schedule="0 17 * * 1-5"/>
//!   </setup>
//!   <data_requirements>
//!     <ticker symbol="AAPL" required="10" stale_scope="3"/>
//!   </data_requirements>
//!   <execution options="manage_exposure">
//!     <function name="twap_momentum"/>
//!     <parameter key="fast" value="3"/>
//!     <risk_profile>
//!       <check name="max_exposure" threshold="1000"/>
//!     </risk_profile>
//!   </execution>
//! </strategy>
//! ```

use std::collections::HashMap;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::domain::error::TraderError;
use crate::domain::registry::StrategyParams;
use crate::domain::risk::RiskProfile;
use crate::domain::strategy::{
    ExecutionOptions, JobSetup, PortfolioSetup, StrategyDefinition, TickerRequirement,
};
use crate::domain::tick::parse_wire;

fn descriptor_err(reason: impl Into<String>) -> TraderError {
    TraderError::Descriptor {
        reason: reason.into(),
    }
}

fn required_attr(node: &Node, name: &str) -> Result<String, TraderError> {
    node.attribute(name)
        .map(str::to_string)
        .ok_or_else(|| descriptor_err(format!("<{}> missing {name}", node.tag_name().name())))
}

fn numeric_attr<T: std::str::FromStr>(node: &Node, name: &str) -> Result<T, TraderError>
where
    T::Err: std::fmt::Display,
{
    let raw = required_attr(node, name)?;
    raw.parse().map_err(|e| {
        descriptor_err(format!(
            "<{}> {name}=\"{raw}\": {e}",
            node.tag_name().name()
        ))
    })
}

fn child<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn children<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Vec<Node<'a, 'input>> {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().name() == name)
        .collect()
}

pub fn parse_file(path: &Path) -> Result<StrategyDefinition, TraderError> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

pub fn parse_str(xml: &str) -> Result<StrategyDefinition, TraderError> {
    let doc = Document::parse(xml).map_err(|e| descriptor_err(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "strategy" {
        return Err(descriptor_err("root element must be <strategy>"));
    }

    let name = required_attr(&root, "name")?;
    let run_datetime = match root.attribute("run_datetime") {
        Some(raw) => Some(parse_wire(raw).map_err(|_| {
            descriptor_err(format!("run_datetime=\"{raw}\" is not YYYYMMDDHHMMSS"))
        })?),
        None => None,
    };

    // Setup: portfolio and jobs.
    let setup = child(&root, "setup")
        .ok_or_else(|| descriptor_err("<strategy> missing <setup>"))?;
    let portfolio_node = child(&setup, "portfolio")
        .ok_or_else(|| descriptor_err("<setup> missing <portfolio>"))?;
    let cash_node = child(&portfolio_node, "cash")
        .ok_or_else(|| descriptor_err("<portfolio> missing <cash>"))?;
    let cash: f64 = numeric_attr(&cash_node, "value")?;
    let allocation: f64 = numeric_attr(&cash_node, "allocation")?;
    if !(allocation > 0.0 && allocation <= 1.0) {
        return Err(descriptor_err(format!(
            "allocation {allocation} outside (0, 1]"
        )));
    }

    let mut assets = Vec::new();
    for asset in children(&portfolio_node, "asset") {
        assets.push((
            required_attr(&asset, "symbol")?,
            numeric_attr::<i64>(&asset, "units")?,
        ));
    }

    let mut jobs = Vec::new();
    for job in children(&setup, "job") {
        jobs.push(JobSetup {
            name: required_attr(&job, "name")?,
            script: required_attr(&job, "script")?,
            schedule: required_attr(&job, "schedule")?,
        });
    }

    // Data requirements.
    let mut data_requirements = Vec::new();
    if let Some(requirements) = child(&root, "data_requirements") {
        for ticker in children(&requirements, "ticker") {
            let bound = |attr: &str| -> Result<Option<chrono::NaiveDateTime>, TraderError> {
                match ticker.attribute(attr) {
                    Some(raw) => parse_wire(raw).map(Some).map_err(|_| {
                        descriptor_err(format!("{attr}=\"{raw}\" is not YYYYMMDDHHMMSS"))
                    }),
                    None => Ok(None),
                }
            };
            data_requirements.push(TickerRequirement {
                symbol: required_attr(&ticker, "symbol")?,
                after: bound("after")?,
                before: bound("before")?,
                required: ticker
                    .attribute("required")
                    .map(|raw| {
                        raw.parse().map_err(|e| {
                            descriptor_err(format!("required=\"{raw}\": {e}"))
                        })
                    })
                    .transpose()?,
                stale_scope: ticker
                    .attribute("stale_scope")
                    .map(|raw| {
                        raw.parse().map_err(|e| {
                            descriptor_err(format!("stale_scope=\"{raw}\": {e}"))
                        })
                    })
                    .transpose()?,
            });
        }
    }

    // Execution: function, parameters, risk profile, options.
    let execution = child(&root, "execution")
        .ok_or_else(|| descriptor_err("<strategy> missing <execution>"))?;
    let options = ExecutionOptions::parse(execution.attribute("options").unwrap_or(""))?;

    let function_node = child(&execution, "function")
        .ok_or_else(|| descriptor_err("<execution> missing <function>"))?;
    let function = required_attr(&function_node, "name")?;

    let mut parameters = StrategyParams::new();
    for parameter in children(&execution, "parameter") {
        parameters.insert(
            required_attr(&parameter, "key")?,
            required_attr(&parameter, "value")?,
        );
    }

    let mut checks = HashMap::new();
    if let Some(profile) = child(&execution, "risk_profile") {
        for check in children(&profile, "check") {
            checks.insert(
                required_attr(&check, "name")?,
                numeric_attr::<f64>(&check, "threshold")?,
            );
        }
    }

    Ok(StrategyDefinition {
        name,
        run_datetime,
        portfolio: PortfolioSetup {
            cash,
            allocation,
            assets,
        },
        jobs,
        data_requirements,
        function,
        parameters,
        risk_profile: RiskProfile::new(checks),
        options,
    })
}
