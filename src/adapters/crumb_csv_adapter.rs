//! CSV export of bread-crumb trails.

use std::path::Path;

use crate::domain::breadcrumbs::BreadCrumb;
use crate::domain::error::TraderError;
use crate::domain::strategy::StrategyDefinition;
use crate::domain::tick::format_wire;

/// Write strategy meta-data header rows followed by one
/// (timestamp, type, data) row per crumb.
pub fn write(
    path: &Path,
    definition: &StrategyDefinition,
    crumbs: &[BreadCrumb],
) -> Result<(), TraderError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| TraderError::Io(
        std::io::Error::other(e),
    ))?;

    writer
        .write_record(["strategy", &definition.name, ""])
        .and_then(|_| writer.write_record(["function", &definition.function, ""]))
        .and_then(|_| {
            writer.write_record([
                "portfolio_cash",
                &format!("{:.2}", definition.portfolio.cash),
                "",
            ])
        })
        .and_then(|_| writer.write_record(["timestamp", "type", "data"]))
        .map_err(|e| TraderError::Io(std::io::Error::other(e)))?;

    for crumb in crumbs {
        writer
            .write_record([
                format_wire(crumb.timestamp).as_str(),
                &crumb.kind.to_string(),
                &crumb.data,
            ])
            .map_err(|e| TraderError::Io(std::io::Error::other(e)))?;
    }
    writer
        .flush()
        .map_err(|e| TraderError::Io(std::io::Error::other(e)))?;
    Ok(())
}
