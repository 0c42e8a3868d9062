//! The module responsible for writing output data to disk.
use crate::climate::ScenarioID;
use crate::grid::DistrictID;
use crate::intervention::{InterventionID, InterventionKind};
use crate::model::Model;
use crate::simulation::pareto::ParetoFrontier;
use crate::simulation::statistics::Statistics;
use crate::simulation::{CostOfInaction, OptimisationResult, PortfolioAppraisal};
use anyhow::{Context, Result, ensure};
use serde::Serialize;
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod metadata;
pub use metadata::write_metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "nbsopt_results";

/// The output file name for the cost of inaction under each scenario
const COST_OF_INACTION_FILE_NAME: &str = "cost_of_inaction.csv";

/// The output file name for loss percentiles
const LOSS_PERCENTILES_FILE_NAME: &str = "loss_percentiles.csv";

/// The output file name for loss components
const LOSS_BREAKDOWN_FILE_NAME: &str = "loss_breakdown.csv";

/// The output file name for the headline figures of an appraised portfolio
const APPRAISAL_FILE_NAME: &str = "appraisal.csv";

/// The output file name for the quantity and spend per intervention
const ALLOCATION_FILE_NAME: &str = "allocation.csv";

/// The output file name for avoided damage per district
const DISTRICT_BENEFITS_FILE_NAME: &str = "district_benefits.csv";

/// The output file name for flood damage and its reduction per return period
const RESILIENCE_FILE_NAME: &str = "resilience.csv";

/// The output file name for the Pareto frontier
const FRONTIER_FILE_NAME: &str = "frontier.csv";

/// Get the model name from the specified directory path
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Get the model name from the dir path. This ends up being convoluted because we need to check
    // for all possible errors. Ugh.
    let model_dir = model_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    // Construct path
    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create a new output directory for the model specified at `model_dir`.
///
/// # Returns
///
/// Whether an existing, non-empty folder was deleted. If `allow_overwrite` is false, this is an
/// error.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    // If the folder already exists, then delete it
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Folder exists and is empty: nothing to do
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. \
            Please delete the folder or pass the --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir)?;
        true
    } else {
        false
    };

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

fn new_writer(output_path: &Path, file_name: &str) -> Result<csv::Writer<File>> {
    let file_path = output_path.join(file_name);
    csv::Writer::from_path(&file_path)
        .with_context(|| format!("Failed to create {}", file_path.display()))
}

/// Represents a row in the cost of inaction CSV file
#[derive(Serialize, Debug, PartialEq)]
struct CostOfInactionRow {
    scenario: ScenarioID,
    mean_loss_pv: f64,
    std_dev: f64,
    std_error: f64,
    annual_equivalent_loss: f64,
    structural_liability: f64,
    relative_to_reference: Option<f64>,
    iterations_used: u32,
    iterations_requested: u32,
}

/// Represents a row in the loss percentiles CSV file
#[derive(Serialize, Debug, PartialEq)]
struct PercentileRow<'a> {
    label: &'a str,
    percentile: f64,
    value: f64,
}

/// Represents a row in the loss breakdown CSV file
#[derive(Serialize, Debug, PartialEq)]
struct LossComponentRow<'a> {
    label: &'a str,
    component: String,
    value: f64,
}

/// Write the cost of inaction under each scenario
pub fn write_baseline(output_path: &Path, results: &[CostOfInaction]) -> Result<()> {
    let mut writer = new_writer(output_path, COST_OF_INACTION_FILE_NAME)?;
    let mut percentiles_writer = new_writer(output_path, LOSS_PERCENTILES_FILE_NAME)?;
    let mut breakdown_writer = new_writer(output_path, LOSS_BREAKDOWN_FILE_NAME)?;
    for result in results {
        writer.serialize(CostOfInactionRow {
            scenario: result.scenario.clone(),
            mean_loss_pv: result.loss.mean.value(),
            std_dev: result.loss.std_dev.value(),
            std_error: result.loss.std_error.value(),
            annual_equivalent_loss: result.annual_equivalent_loss.value(),
            structural_liability: result.structural_liability.value(),
            relative_to_reference: result.relative_to_reference.map(|x| x.value()),
            iterations_used: result.iterations_used,
            iterations_requested: result.iterations_requested,
        })?;
        write_percentiles(&mut percentiles_writer, &result.scenario.0, &result.loss)?;
        for (component, value) in result.breakdown.components() {
            breakdown_writer.serialize(LossComponentRow {
                label: &result.scenario.0,
                component,
                value: value.value(),
            })?;
        }
    }
    writer.flush()?;
    percentiles_writer.flush()?;
    breakdown_writer.flush()?;

    Ok(())
}

fn write_percentiles(
    writer: &mut csv::Writer<File>,
    label: &str,
    statistics: &Statistics,
) -> Result<()> {
    for (percentile, value) in &statistics.percentiles {
        writer.serialize(PercentileRow {
            label,
            percentile: percentile.value(),
            value: value.value(),
        })?;
    }

    Ok(())
}

/// Represents a row in the appraisal CSV file
#[derive(Serialize, Debug, PartialEq)]
struct AppraisalRow {
    portfolio: String,
    scenario: ScenarioID,
    total_spend: f64,
    expected_npv: f64,
    npv_std_error: f64,
    benefit_cost_ratio: Option<f64>,
    flood_risk_reduction: f64,
    pollutant_load_reduction: f64,
    payback_year: Option<u32>,
    mean_loss_pv: f64,
    baseline_mean_loss_pv: f64,
    inequity: f64,
    ecological_integrity: f64,
    iterations_used: u32,
    iterations_requested: u32,
}

/// Represents a row in the allocation CSV file
#[derive(Serialize, Debug, PartialEq)]
struct AllocationRow {
    intervention_id: InterventionID,
    kind: InterventionKind,
    quantity: u32,
    spend: f64,
}

/// Represents a row in the district benefits CSV file
#[derive(Serialize, Debug, PartialEq)]
struct DistrictBenefitRow {
    district: DistrictID,
    annual_avoided_damage: f64,
}

/// Represents a row in the resilience CSV file
#[derive(Serialize, Debug, PartialEq)]
struct ResilienceRow {
    return_period: u32,
    annual_flood_damage: f64,
    baseline_annual_flood_damage: f64,
    reduction: f64,
}

/// Write the headline figures, allocation and distribution of benefits for a portfolio
pub fn write_appraisal(
    output_path: &Path,
    model: &Model,
    appraisal: &PortfolioAppraisal,
) -> Result<()> {
    let candidate = &appraisal.candidate;
    let result = &candidate.result;
    let mut writer = new_writer(output_path, APPRAISAL_FILE_NAME)?;
    writer.serialize(AppraisalRow {
        portfolio: candidate.portfolio.to_string(),
        scenario: result.scenario.clone(),
        total_spend: appraisal.total_spend.value(),
        expected_npv: appraisal.expected_npv.value(),
        npv_std_error: result.net_npv.std_error.value(),
        benefit_cost_ratio: appraisal.benefit_cost_ratio.map(|x| x.value()),
        flood_risk_reduction: appraisal.flood_risk_reduction.value(),
        pollutant_load_reduction: appraisal.pollutant_load_reduction.value(),
        payback_year: appraisal.payback_year,
        mean_loss_pv: result.loss.mean.value(),
        baseline_mean_loss_pv: result.baseline_loss.mean.value(),
        inequity: candidate.objectives.inequity,
        ecological_integrity: candidate.objectives.ecological_integrity,
        iterations_used: result.iterations_used,
        iterations_requested: result.iterations_requested,
    })?;
    writer.flush()?;

    let mut writer = new_writer(output_path, ALLOCATION_FILE_NAME)?;
    for allocation in &appraisal.allocation {
        writer.serialize(AllocationRow {
            intervention_id: allocation.intervention.clone(),
            kind: allocation.kind,
            quantity: allocation.quantity,
            spend: allocation.spend.value(),
        })?;
    }
    writer.flush()?;

    let mut writer = new_writer(output_path, DISTRICT_BENEFITS_FILE_NAME)?;
    for (district, avoided) in model.grid.districts().iter().zip(&result.district_avoided_damage) {
        writer.serialize(DistrictBenefitRow {
            district: district.clone(),
            annual_avoided_damage: avoided.value(),
        })?;
    }
    writer.flush()?;

    let mut writer = new_writer(output_path, RESILIENCE_FILE_NAME)?;
    for damage in &result.return_period_damage {
        writer.serialize(ResilienceRow {
            return_period: damage.return_period,
            annual_flood_damage: damage.flood_damage.value(),
            baseline_annual_flood_damage: damage.baseline_flood_damage.value(),
            reduction: damage.reduction().value(),
        })?;
    }
    writer.flush()?;

    let mut writer = new_writer(output_path, LOSS_BREAKDOWN_FILE_NAME)?;
    for (label, breakdown) in [
        ("portfolio", &result.loss_breakdown),
        ("baseline", &result.baseline_breakdown),
    ] {
        for (component, value) in breakdown.components() {
            writer.serialize(LossComponentRow {
                label,
                component,
                value: value.value(),
            })?;
        }
    }
    writer.flush()?;

    let mut writer = new_writer(output_path, LOSS_PERCENTILES_FILE_NAME)?;
    write_percentiles(&mut writer, "portfolio", &result.loss)?;
    write_percentiles(&mut writer, "baseline", &result.baseline_loss)?;
    write_percentiles(&mut writer, "net_npv", &result.net_npv)?;
    writer.flush()?;

    Ok(())
}

/// Represents a row in the frontier CSV file
#[derive(Serialize, Debug, PartialEq)]
struct FrontierRow {
    portfolio: String,
    total_spend: f64,
    npv: f64,
    inequity: f64,
    ecological_integrity: f64,
    benefit_cost_ratio: Option<f64>,
    flood_risk_reduction: f64,
    pollutant_load_reduction: f64,
    recommended: bool,
}

fn write_frontier(
    output_path: &Path,
    model: &Model,
    frontier: &ParetoFrontier,
    recommended: Option<&PortfolioAppraisal>,
) -> Result<()> {
    let mut writer = new_writer(output_path, FRONTIER_FILE_NAME)?;
    for member in frontier.members() {
        let result = &member.result;
        writer.serialize(FrontierRow {
            portfolio: member.portfolio.to_string(),
            total_spend: member
                .portfolio
                .implementation_cost(&model.interventions)?
                .value(),
            npv: member.objectives.npv.value(),
            inequity: member.objectives.inequity,
            ecological_integrity: member.objectives.ecological_integrity,
            benefit_cost_ratio: result.benefit_cost_ratio().map(|x| x.value()),
            flood_risk_reduction: result.flood_risk_reduction().value(),
            pollutant_load_reduction: result.pollutant_load_reduction().value(),
            recommended: recommended
                .is_some_and(|r| r.candidate.portfolio == member.portfolio),
        })?;
    }
    writer.flush()?;

    Ok(())
}

/// Write the frontier and, if there is one, the recommended portfolio's appraisal
pub fn write_optimisation(
    output_path: &Path,
    model: &Model,
    result: &OptimisationResult,
) -> Result<()> {
    let recommendation = result.recommendation.as_ref();
    write_frontier(output_path, model, &result.search.frontier, recommendation)?;
    if let Some(recommendation) = recommendation {
        write_appraisal(output_path, model, recommendation)?;
    }

    Ok(())
}
