//! Appraisal and optimisation of Nature-Based Solution investments in a river catchment.
//!
//! A model describes a gridded catchment, its exposed assets and a catalog of candidate
//! interventions. Stochastic climate events are routed over the grid, turned into monetary losses
//! and discounted, giving the cost of inaction and the net benefit of any affordable portfolio. A
//! multi-objective search then traces the trade-off between value, equity and ecological
//! integrity.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod asset;
pub mod cli;
pub mod climate;
pub mod damage;
pub mod error;
pub mod finance;
pub mod grid;
pub mod hydrology;
pub mod id;
pub mod input;
pub mod intervention;
pub mod log;
pub mod model;
pub mod output;
pub mod portfolio;
pub mod settings;
pub mod simulation;
pub mod units;

#[cfg(test)]
mod fixture;

/// Get the folder in which the user's nbsopt configuration is stored
pub fn get_nbsopt_config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("nbsopt");

    path
}
