//! Code for reading named portfolios from a CSV file.
use super::*;
use crate::intervention::{InterventionID, InterventionMap};
use crate::portfolio::{Portfolio, PortfolioID, PortfolioMap};
use serde::Deserialize;
use std::path::Path;

const PORTFOLIOS_FILE_NAME: &str = "portfolios.csv";

#[derive(Debug, Deserialize, PartialEq)]
struct PortfolioEntryRaw {
    portfolio_id: String,
    intervention_id: String,
    quantity: u32,
}

/// Read named portfolios from the model directory.
///
/// The file is optional; if it is absent, no portfolios are defined.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
/// * `interventions` - The intervention catalog
pub fn read_portfolios(model_dir: &Path, interventions: &InterventionMap) -> Result<PortfolioMap> {
    let file_path = model_dir.join(PORTFOLIOS_FILE_NAME);
    let Some(entries) = read_csv_optional(&file_path)? else {
        return Ok(PortfolioMap::new());
    };

    read_portfolios_from_iter(entries, interventions).with_context(|| input_err_msg(&file_path))
}

fn read_portfolios_from_iter<I>(iter: I, interventions: &InterventionMap) -> Result<PortfolioMap>
where
    I: Iterator<Item = PortfolioEntryRaw>,
{
    let mut portfolios = PortfolioMap::new();
    for entry in iter {
        let (intervention_id, _) = interventions
            .get_key_value(entry.intervention_id.as_str())
            .with_context(|| format!("Unknown intervention: {}", entry.intervention_id))?;
        let portfolio: &mut Portfolio = portfolios
            .entry(PortfolioID::from(entry.portfolio_id.as_str()))
            .or_default();
        ensure!(
            portfolio.quantity(&intervention_id.0) == 0,
            "Intervention {} appears more than once in portfolio {}",
            intervention_id,
            entry.portfolio_id
        );
        portfolio.set_quantity(InterventionID::clone(intervention_id), entry.quantity);
    }

    Ok(portfolios)
}
