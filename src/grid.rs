//! The spatial grid describing the catchment.
//!
//! The grid is built once from static exposure data and is never mutated afterwards. The effect
//! of a portfolio of interventions is represented by a separate [`ModifierLayer`], so that
//! evaluations of different portfolios cannot observe each other's state.
use crate::asset::Asset;
use crate::error::SimulationError;
use crate::id::define_id_type;
use crate::intervention::{Footprint, InterventionMap};
use crate::portfolio::Portfolio;
use crate::units::{Dimensionless, KilogramsPerMillimetre, Metres, Millimetres, Money};
use anyhow::{Context, Result, ensure};
use indexmap::IndexSet;
use serde_string_enum::DeserializeLabeledStringEnum;

define_id_type! {DistrictID}

/// The index of a cell in row-major order
pub type CellIndex = usize;

/// The land-use class of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeLabeledStringEnum)]
pub enum LandUse {
    /// Dense urban fabric
    #[string = "urban"]
    Urban,
    /// Low-density housing
    #[string = "suburban"]
    Suburban,
    /// Industrial and commercial estates
    #[string = "industrial"]
    Industrial,
    /// Arable and pasture
    #[string = "agricultural"]
    Agricultural,
    /// Parks and meadows
    #[string = "grassland"]
    Grassland,
    /// Woodland
    #[string = "forest"]
    Forest,
    /// Existing wetland
    #[string = "wetland"]
    Wetland,
    /// Open water
    #[string = "water"]
    Water,
}

impl LandUse {
    /// Whether interventions can be built on this type of land
    pub fn is_developable(self) -> bool {
        self != LandUse::Water
    }
}

/// A single grid cell with its static physical and exposure attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Row in the grid
    pub row: usize,
    /// Column in the grid
    pub col: usize,
    /// Ground elevation
    pub elevation: Metres,
    /// Land-use class
    pub land_use: LandUse,
    /// Fraction of rainfall which infiltrates the soil
    pub infiltration_capacity: Dimensionless,
    /// Depth of water the cell can convey before ponding
    pub drainage_capacity: Millimetres,
    /// Pollutant generated per mm of runoff
    pub pollutant_export: KilogramsPerMillimetre,
    /// Annual economic output exposed in the cell
    pub gdp: Money,
    /// The district the cell belongs to
    pub district: DistrictID,
    /// Assets exposed to flooding
    pub assets: Vec<Asset>,
}

impl Cell {
    /// Check that the cell's attributes are in range
    fn validate(&self) -> Result<()> {
        ensure!(self.elevation.is_finite(), "elevation must be finite");
        ensure!(
            (0.0..=1.0).contains(&self.infiltration_capacity.value()),
            "infiltration_capacity must be between 0 and 1"
        );
        ensure!(
            self.drainage_capacity.is_finite() && self.drainage_capacity >= Millimetres(0.0),
            "drainage_capacity must be a finite non-negative number"
        );
        ensure!(
            self.pollutant_export.is_finite()
                && self.pollutant_export >= KilogramsPerMillimetre(0.0),
            "pollutant_export must be a finite non-negative number"
        );
        ensure!(
            self.gdp.is_finite() && self.gdp >= Money(0.0),
            "gdp must be a finite non-negative number"
        );
        for asset in &self.assets {
            ensure!(
                asset.value.is_finite() && asset.value >= Money(0.0),
                "Asset values must be finite non-negative numbers"
            );
        }

        Ok(())
    }
}

/// Effect modifiers for a single cell
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CellModifiers {
    /// Fraction of water removed as it passes through the cell
    pub runoff_reduction: Dimensionless,
    /// Fraction of pollutant load retained in the cell
    pub pollutant_retention: Dimensionless,
}

/// Per-cell intervention effects derived from a portfolio
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierLayer(Vec<CellModifiers>);

impl ModifierLayer {
    /// A layer with no intervention effects
    pub fn none(num_cells: usize) -> Self {
        Self(vec![CellModifiers::default(); num_cells])
    }

    /// The modifiers for a cell
    pub fn get(&self, index: CellIndex) -> CellModifiers {
        self.0[index]
    }

    /// Whether no cell has a non-zero effect
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|m| *m == CellModifiers::default())
    }
}

/// Combine independent fractional effects as `1 - Π(1 - e)`, which stays within [0, 1]
fn combine_effect(current: Dimensionless, effect: Dimensionless) -> Dimensionless {
    Dimensionless(1.0) - (Dimensionless(1.0) - current) * (Dimensionless(1.0) - effect)
}

/// A regular grid of cells
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
    districts: IndexSet<DistrictID>,
    cell_districts: Vec<usize>,
}

impl SpatialGrid {
    /// Create a grid from an unordered collection of cells.
    ///
    /// Every position in the `rows × cols` rectangle must be supplied exactly once.
    pub fn new(rows: usize, cols: usize, cells: Vec<Cell>) -> Result<Self> {
        ensure!(rows > 0 && cols > 0, "Grid must have at least one row and column");
        ensure!(
            cells.len() == rows * cols,
            "Expected {} cells for a {rows}x{cols} grid, but found {}",
            rows * cols,
            cells.len()
        );

        let mut slots: Vec<Option<Cell>> = vec![None; rows * cols];
        for cell in cells {
            ensure!(
                cell.row < rows && cell.col < cols,
                "Cell ({}, {}) lies outside the grid",
                cell.row,
                cell.col
            );
            cell.validate()
                .with_context(|| format!("Invalid cell ({}, {})", cell.row, cell.col))?;
            let index = cell.row * cols + cell.col;
            ensure!(
                slots[index].is_none(),
                "Duplicate cell ({}, {})",
                cell.row,
                cell.col
            );
            slots[index] = Some(cell);
        }
        let cells: Vec<Cell> = slots.into_iter().flatten().collect();

        let mut districts = IndexSet::new();
        let cell_districts = cells
            .iter()
            .map(|cell| districts.insert_full(cell.district.clone()).0)
            .collect();

        Ok(Self {
            rows,
            cols,
            cells,
            districts,
            cell_districts,
        })
    }

    /// The number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The total number of cells
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Get a cell by index
    pub fn cell(&self, index: CellIndex) -> &Cell {
        &self.cells[index]
    }

    /// Iterate over all cells in index order
    pub fn iter_cells(&self) -> impl Iterator<Item = (CellIndex, &Cell)> {
        self.cells.iter().enumerate()
    }

    /// The index of the cell at the given position, if it exists
    pub fn index_of(&self, row: usize, col: usize) -> Option<CellIndex> {
        (row < self.rows && col < self.cols).then_some(row * self.cols + col)
    }

    /// Iterate over the (up to eight) neighbours of a cell in ascending index order, along with
    /// their distance in cell widths
    pub fn neighbours(&self, index: CellIndex) -> impl Iterator<Item = (CellIndex, f64)> + '_ {
        let row = index / self.cols;
        let col = index % self.cols;
        (-1isize..=1)
            .flat_map(|dr| (-1isize..=1).map(move |dc| (dr, dc)))
            .filter(|&offset| offset != (0, 0))
            .filter_map(move |(dr, dc)| {
                let r = row.checked_add_signed(dr)?;
                let c = col.checked_add_signed(dc)?;
                let neighbour = self.index_of(r, c)?;
                let distance = if dr != 0 && dc != 0 {
                    std::f64::consts::SQRT_2
                } else {
                    1.0
                };
                Some((neighbour, distance))
            })
    }

    /// All districts, in order of first appearance
    pub fn districts(&self) -> &IndexSet<DistrictID> {
        &self.districts
    }

    /// The index into [`Self::districts`] of the cell's district
    pub fn district_index(&self, index: CellIndex) -> usize {
        self.cell_districts[index]
    }

    /// The total replacement value of all exposed assets
    pub fn total_exposed_value(&self) -> Money {
        self.cells
            .iter()
            .flat_map(|cell| cell.assets.iter())
            .map(|asset| asset.value)
            .sum()
    }

    /// The cells covered by a footprint
    pub fn footprint_cells<'a>(
        &'a self,
        footprint: &'a Footprint,
    ) -> Box<dyn Iterator<Item = CellIndex> + 'a> {
        match footprint {
            Footprint::Cells(cells) => Box::new(cells.iter().copied()),
            Footprint::Catchment => Box::new(0..self.num_cells()),
        }
    }

    /// Derive the modifier layer for a portfolio.
    ///
    /// The grid itself is left untouched; each call returns a fresh layer.
    pub fn apply_portfolio(
        &self,
        portfolio: &Portfolio,
        interventions: &InterventionMap,
    ) -> Result<ModifierLayer> {
        let mut layer = ModifierLayer::none(self.num_cells());
        for (id, quantity) in portfolio.iter() {
            let Some(intervention) = interventions.get(id) else {
                return Err(SimulationError::InvalidParameter(format!(
                    "Portfolio references unknown intervention {id}"
                ))
                .into());
            };

            let coverage = intervention.coverage(quantity, self.num_cells());
            let runoff_effect = coverage * intervention.runoff_reduction;
            let retention_effect = coverage * intervention.pollutant_retention;
            for index in self.footprint_cells(&intervention.footprint) {
                ensure!(index < self.num_cells(), "Footprint cell {index} out of range");
                let modifiers = &mut layer.0[index];
                modifiers.runoff_reduction =
                    combine_effect(modifiers.runoff_reduction, runoff_effect);
                modifiers.pollutant_retention =
                    combine_effect(modifiers.pollutant_retention, retention_effect);
            }
        }

        Ok(layer)
    }
}
