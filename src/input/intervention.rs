//! Code for reading the intervention catalog from CSV files.
use super::*;
use crate::grid::{CellIndex, SpatialGrid};
use crate::intervention::{
    DeploymentUnit, Footprint, Intervention, InterventionID, InterventionKind, InterventionMap,
};
use crate::units::{Dimensionless, Money};
use anyhow::bail;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const INTERVENTIONS_FILE_NAME: &str = "interventions.csv";
const SITES_FILE_NAME: &str = "intervention_sites.csv";

#[derive(Debug, Deserialize, PartialEq)]
struct InterventionRaw {
    id: String,
    description: String,
    kind: InterventionKind,
    unit: DeploymentUnit,
    unit_cost: Money,
    maintenance_cost: Money,
    coverage_per_unit: Dimensionless,
    runoff_reduction: Dimensionless,
    pollutant_retention: Dimensionless,
    co_benefit_score: Dimensionless,
    co_benefit_value: Money,
}

#[derive(Debug, Deserialize, PartialEq)]
struct SiteRaw {
    intervention_id: String,
    row: usize,
    col: usize,
}

/// Read the intervention catalog from the model directory.
///
/// Candidate sites are read from `intervention_sites.csv`, which is optional. Interventions with no
/// listed sites may be deployed across the whole catchment.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
/// * `grid` - The catchment grid, used to locate sites
pub fn read_interventions(model_dir: &Path, grid: &SpatialGrid) -> Result<InterventionMap> {
    let sites_path = model_dir.join(SITES_FILE_NAME);
    let sites = match read_csv_optional(&sites_path)? {
        Some(iter) => {
            read_sites_from_iter(iter, grid).with_context(|| input_err_msg(&sites_path))?
        }
        None => HashMap::new(),
    };

    let file_path = model_dir.join(INTERVENTIONS_FILE_NAME);
    let interventions = read_csv(&file_path)?;
    read_interventions_from_iter(interventions, sites).with_context(|| input_err_msg(&file_path))
}

/// Candidate sites, keyed by intervention ID
type SiteMap = HashMap<String, Vec<CellIndex>>;

fn read_sites_from_iter<I>(iter: I, grid: &SpatialGrid) -> Result<SiteMap>
where
    I: Iterator<Item = SiteRaw>,
{
    let mut sites = SiteMap::new();
    for site in iter {
        let index = grid.index_of(site.row, site.col).with_context(|| {
            format!(
                "Site ({}, {}) for intervention {} lies outside the grid",
                site.row, site.col, site.intervention_id
            )
        })?;
        let cells = sites.entry(site.intervention_id.clone()).or_default();
        ensure!(
            !cells.contains(&index),
            "Duplicate site ({}, {}) for intervention {}",
            site.row,
            site.col,
            site.intervention_id
        );
        cells.push(index);
    }

    Ok(sites)
}

fn read_interventions_from_iter<I>(
    iter: I,
    mut sites: SiteMap,
) -> Result<InterventionMap>
where
    I: Iterator<Item = InterventionRaw>,
{
    let mut interventions = InterventionMap::new();
    for raw in iter {
        let footprint = match sites.remove(&raw.id) {
            Some(mut cells) => {
                cells.sort_unstable();
                Footprint::Cells(cells)
            }
            None => Footprint::Catchment,
        };
        let id = InterventionID::from(raw.id);
        let intervention = Intervention {
            id: id.clone(),
            description: raw.description,
            kind: raw.kind,
            unit: raw.unit,
            unit_cost: raw.unit_cost,
            maintenance_cost: raw.maintenance_cost,
            footprint,
            coverage_per_unit: raw.coverage_per_unit,
            runoff_reduction: raw.runoff_reduction,
            pollutant_retention: raw.pollutant_retention,
            co_benefit_score: raw.co_benefit_score,
            co_benefit_value: raw.co_benefit_value,
        };
        intervention
            .validate()
            .with_context(|| format!("Invalid intervention {id}"))?;

        let existing = interventions.insert(id.clone(), Arc::new(intervention)).is_some();
        ensure!(!existing, "Duplicate intervention ID: {id}");
    }

    if let Some(id) = sites.keys().sorted().next() {
        bail!("Sites given for unknown intervention {id}");
    }

    Ok(interventions)
}
