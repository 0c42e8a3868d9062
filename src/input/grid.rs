//! Code for reading the catchment grid and its exposed assets from CSV files.
use super::*;
use crate::asset::{Asset, AssetClass, DamageCurveMap};
use crate::grid::{Cell, LandUse, SpatialGrid};
use crate::units::{Dimensionless, KilogramsPerMillimetre, Metres, Millimetres, Money};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

const CELLS_FILE_NAME: &str = "cells.csv";
const ASSETS_FILE_NAME: &str = "assets.csv";

#[derive(Debug, Deserialize, PartialEq)]
struct CellRaw {
    row: usize,
    col: usize,
    elevation: Metres,
    land_use: LandUse,
    #[serde(deserialize_with = "deserialise_proportion")]
    infiltration_capacity: Dimensionless,
    drainage_capacity: Millimetres,
    pollutant_export: KilogramsPerMillimetre,
    gdp: Money,
    district: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct AssetRaw {
    row: usize,
    col: usize,
    class: AssetClass,
    value: Money,
    curve_id: String,
}

/// Read the grid from the model directory.
///
/// The grid's dimensions are taken from the largest row and column indices in `cells.csv`. Every
/// position must then appear exactly once. Exposed assets are read from `assets.csv`, which is
/// optional.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
/// * `curves` - Depth-damage curves which assets may refer to
pub fn read_grid(model_dir: &Path, curves: &DamageCurveMap) -> Result<SpatialGrid> {
    let cells_path = model_dir.join(CELLS_FILE_NAME);
    let cells = read_csv(&cells_path)?;
    let mut grid = read_cells_from_iter(cells).with_context(|| input_err_msg(&cells_path))?;

    let assets_path = model_dir.join(ASSETS_FILE_NAME);
    if let Some(assets) = read_csv_optional(&assets_path)? {
        grid = add_assets_from_iter(grid, assets, curves)
            .with_context(|| input_err_msg(&assets_path))?;
    }

    Ok(grid)
}

fn read_cells_from_iter<I>(iter: I) -> Result<SpatialGrid>
where
    I: Iterator<Item = CellRaw>,
{
    let cells = iter
        .map(|raw| Cell {
            row: raw.row,
            col: raw.col,
            elevation: raw.elevation,
            land_use: raw.land_use,
            infiltration_capacity: raw.infiltration_capacity,
            drainage_capacity: raw.drainage_capacity,
            pollutant_export: raw.pollutant_export,
            gdp: raw.gdp,
            district: raw.district.into(),
            assets: Vec::new(),
        })
        .collect_vec();
    let rows = cells.iter().map(|cell| cell.row + 1).max().unwrap_or(0);
    let cols = cells.iter().map(|cell| cell.col + 1).max().unwrap_or(0);

    SpatialGrid::new(rows, cols, cells)
}

fn add_assets_from_iter<I>(
    grid: SpatialGrid,
    iter: I,
    curves: &DamageCurveMap,
) -> Result<SpatialGrid>
where
    I: Iterator<Item = AssetRaw>,
{
    let rows = grid.rows();
    let cols = grid.cols();
    let mut cells = grid.iter_cells().map(|(_, cell)| cell.clone()).collect_vec();
    for raw in iter {
        let index = grid.index_of(raw.row, raw.col).with_context(|| {
            format!("Asset in cell ({}, {}) lies outside the grid", raw.row, raw.col)
        })?;
        let curve = curves
            .get(raw.curve_id.as_str())
            .with_context(|| format!("Unknown depth-damage curve: {}", raw.curve_id))?;
        cells[index].assets.push(Asset {
            class: raw.class,
            value: raw.value,
            curve: Arc::clone(curve),
        });
    }

    SpatialGrid::new(rows, cols, cells)
}
