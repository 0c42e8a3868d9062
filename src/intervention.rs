//! The catalog of Nature-Based Solution interventions which can be funded.
use crate::grid::CellIndex;
use crate::id::define_id_type;
use crate::units::{Dimensionless, Money};
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::sync::Arc;

define_id_type! {InterventionID}

/// A map of interventions, keyed by intervention ID
pub type InterventionMap = IndexMap<InterventionID, Arc<Intervention>>;

/// The type of Nature-Based Solution
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeLabeledStringEnum, SerializeLabeledStringEnum,
)]
pub enum InterventionKind {
    /// Constructed or restored wetland storing floodwater
    #[string = "wetland"]
    Wetland,
    /// Vegetated strip alongside a watercourse
    #[string = "riparian_buffer"]
    RiparianBuffer,
    /// Vegetated channel slowing and filtering urban runoff
    #[string = "bioswale"]
    Bioswale,
    /// Linear green space connecting habitats
    #[string = "green_corridor"]
    GreenCorridor,
}

/// The unit in which an intervention is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum DeploymentUnit {
    /// Units of area (e.g. 5 ha of wetland)
    #[string = "area"]
    Area,
    /// Units of length (e.g. 1 km of buffer)
    #[string = "length"]
    Length,
    /// Discrete installations
    #[string = "count"]
    Count,
}

/// The cells in which an intervention can be deployed
#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    /// A specific set of candidate sites
    Cells(Vec<CellIndex>),
    /// Spread across the whole catchment
    Catchment,
}

/// An immutable catalog entry describing one type of intervention
#[derive(Debug, Clone, PartialEq)]
pub struct Intervention {
    /// Unique identifier
    pub id: InterventionID,
    /// Human-readable description
    pub description: String,
    /// The type of intervention
    pub kind: InterventionKind,
    /// The unit of deployment
    pub unit: DeploymentUnit,
    /// Implementation cost per unit
    pub unit_cost: Money,
    /// Annual maintenance cost per unit
    pub maintenance_cost: Money,
    /// Where the intervention may be deployed
    pub footprint: Footprint,
    /// Fraction of one footprint cell covered by one unit
    pub coverage_per_unit: Dimensionless,
    /// Fraction of runoff removed from a fully covered cell
    pub runoff_reduction: Dimensionless,
    /// Fraction of pollutant load retained in a fully covered cell
    pub pollutant_retention: Dimensionless,
    /// Non-monetary ecosystem/attractiveness score per unit
    pub co_benefit_score: Dimensionless,
    /// Monetised annual co-benefit per unit
    pub co_benefit_value: Money,
}

impl Intervention {
    /// Check that the catalog entry is internally consistent
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.unit_cost.is_finite() && self.unit_cost > Money(0.0),
            "unit_cost must be a finite number greater than zero"
        );
        ensure!(
            self.maintenance_cost.is_finite() && self.maintenance_cost >= Money(0.0),
            "maintenance_cost must be a finite non-negative number"
        );
        ensure!(
            self.coverage_per_unit.is_finite() && self.coverage_per_unit > Dimensionless(0.0),
            "coverage_per_unit must be a finite number greater than zero"
        );
        for (name, value) in [
            ("runoff_reduction", self.runoff_reduction),
            ("pollutant_retention", self.pollutant_retention),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value.value()),
                "{name} must be between 0 and 1"
            );
        }
        ensure!(
            self.co_benefit_score.is_finite() && self.co_benefit_score >= Dimensionless(0.0),
            "co_benefit_score must be a finite non-negative number"
        );
        ensure!(
            self.co_benefit_value.is_finite(),
            "co_benefit_value must be finite"
        );
        if let Footprint::Cells(cells) = &self.footprint {
            ensure!(!cells.is_empty(), "Footprint has no cells");
        }

        Ok(())
    }

    /// The number of cells the intervention may be spread over
    pub fn footprint_size(&self, num_grid_cells: usize) -> usize {
        match &self.footprint {
            Footprint::Cells(cells) => cells.len(),
            Footprint::Catchment => num_grid_cells,
        }
    }

    /// The fraction of each footprint cell covered when `quantity` units are deployed
    pub fn coverage(&self, quantity: u32, num_grid_cells: usize) -> Dimensionless {
        let footprint_size = self.footprint_size(num_grid_cells) as f64;
        let coverage = f64::from(quantity) * self.coverage_per_unit.value() / footprint_size;
        Dimensionless(coverage.min(1.0))
    }

    /// The number of units beyond which extra units no longer increase coverage
    pub fn saturation_units(&self, num_grid_cells: usize) -> u32 {
        let footprint_size = self.footprint_size(num_grid_cells) as f64;
        let units = (footprint_size / self.coverage_per_unit.value()).ceil();
        if units >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            units as u32
        }
    }
}
