//! Defines the `ModelParameters` struct, which represents the contents of `model.toml`.
use crate::climate::{ClimateParameters, ScenarioID};
use crate::damage::DamageParameters;
use crate::error::ensure_sim;
use crate::input::{input_err_msg, read_toml};
use crate::simulation::objectives::ObjectiveParameters;
use crate::simulation::pareto::SelectionPolicy;
use crate::units::{Dimensionless, Money};
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

const MODEL_PARAMETERS_FILE_NAME: &str = "model.toml";

macro_rules! define_unit_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            <$type>::new($value)
        }
    };
}

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_horizon_years, u32, 30);
define_unit_param_default!(default_discount_rate, Dimensionless, 0.03);
define_param_default!(default_iterations, u32, 1000);
define_param_default!(
    default_percentiles,
    Vec<Dimensionless>,
    vec![
        Dimensionless(0.05),
        Dimensionless(0.5),
        Dimensionless(0.95)
    ]
);
define_unit_param_default!(default_max_excluded_fraction, Dimensionless, 0.01);
define_param_default!(default_max_evaluations, u32, 200);
define_param_default!(default_batch_size, u32, 8);
define_param_default!(default_patience, u32, 50);
define_param_default!(default_enumeration_limit, u64, 1000);
define_param_default!(default_epsilon, f64, 1e-9);

/// Represents the contents of the entire model file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelParameters {
    /// The budget available for implementing interventions
    pub budget: Money,
    /// The number of years over which costs and benefits are appraised
    #[serde(default = "default_horizon_years")]
    pub horizon_years: u32,
    /// The central discount rate
    #[serde(default = "default_discount_rate")]
    pub discount_rate: Dimensionless,
    /// Half-width of the uniform band the discount rate is drawn from in each iteration
    #[serde(default)]
    pub discount_rate_uncertainty: Dimensionless,
    /// Half-width of the uniform band around 1 that the cost escalation factor is drawn from
    #[serde(default)]
    pub cost_escalation_uncertainty: Dimensionless,
    /// The number of Monte Carlo iterations per evaluation
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Base seed for all random streams
    #[serde(default)]
    pub seed: u64,
    /// The climate scenario used when evaluating and optimising portfolios
    pub scenario: ScenarioID,
    /// Percentiles reported for loss distributions, as fractions
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<Dimensionless>,
    /// The largest fraction of iterations which may be discarded as non-finite
    #[serde(default = "default_max_excluded_fraction")]
    pub max_excluded_fraction: Dimensionless,
    /// Rainfall distributions and climate scenarios
    pub climate: ClimateParameters,
    /// Loss valuation parameters
    #[serde(default)]
    pub damage: DamageParameters,
    /// Choice of equity and ecological metrics
    pub objectives: ObjectiveParameters,
    /// Settings for the Pareto search
    #[serde(default)]
    pub search: SearchParameters,
    /// The policy used to recommend a single portfolio from the frontier, if any
    pub selection: Option<SelectionPolicy>,
}

/// The `[search]` section of the model file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SearchParameters {
    /// The maximum number of portfolios to evaluate
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: u32,
    /// The number of portfolios evaluated in parallel between frontier updates
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Stop after this many consecutive evaluations leave the frontier unchanged
    #[serde(default = "default_patience")]
    pub patience: u32,
    /// Enumerate the portfolio space exhaustively if it has at most this many members
    #[serde(default = "default_enumeration_limit")]
    pub enumeration_limit: u64,
    /// Objective differences smaller than this are treated as ties
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Monte Carlo iterations per candidate during the search (defaults to `iterations`)
    pub iterations: Option<u32>,
    /// Stop the search after this many seconds
    pub timeout_seconds: Option<u64>,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            max_evaluations: default_max_evaluations(),
            batch_size: default_batch_size(),
            patience: default_patience(),
            enumeration_limit: default_enumeration_limit(),
            epsilon: default_epsilon(),
            iterations: None,
            timeout_seconds: None,
        }
    }
}

/// Check that the `budget` parameter is valid
fn check_budget(budget: Money) -> Result<()> {
    ensure_sim!(
        budget.is_finite() && budget > Money(0.0),
        InvalidParameter,
        "budget must be a finite number greater than zero"
    );

    Ok(())
}

/// Check that the `horizon_years` parameter is valid
fn check_horizon_years(horizon_years: u32) -> Result<()> {
    ensure_sim!(
        horizon_years > 0,
        InvalidHorizon,
        "horizon_years must be greater than zero"
    );

    Ok(())
}

/// Check the discount rate, including the lowest rate which can be drawn
fn check_discount_rate(rate: Dimensionless, uncertainty: Dimensionless) -> Result<()> {
    ensure_sim!(
        rate.is_finite(),
        InvalidParameter,
        "discount_rate must be finite"
    );
    ensure_sim!(
        uncertainty.is_finite() && uncertainty >= Dimensionless(0.0),
        InvalidParameter,
        "discount_rate_uncertainty must be a finite non-negative number"
    );
    ensure_sim!(
        rate - uncertainty > Dimensionless(-1.0),
        InvalidParameter,
        "discount_rate minus discount_rate_uncertainty must be greater than -100%"
    );

    Ok(())
}

/// Check that the `cost_escalation_uncertainty` parameter is valid
fn check_cost_escalation_uncertainty(value: Dimensionless) -> Result<()> {
    ensure_sim!(
        value.is_finite() && (0.0..1.0).contains(&value.value()),
        InvalidParameter,
        "cost_escalation_uncertainty must be at least zero and less than one"
    );

    Ok(())
}

/// Check that the `iterations` parameter is valid
fn check_iterations(value: u32) -> Result<()> {
    ensure_sim!(value > 0, InvalidParameter, "iterations cannot be zero");

    Ok(())
}

/// Check that the `percentiles` parameter is valid
fn check_percentiles(percentiles: &[Dimensionless]) -> Result<()> {
    ensure_sim!(
        percentiles
            .iter()
            .all(|p| (0.0..=1.0).contains(&p.value())),
        InvalidParameter,
        "percentiles must be between 0 and 1"
    );

    Ok(())
}

/// Check that the `max_excluded_fraction` parameter is valid
fn check_max_excluded_fraction(value: Dimensionless) -> Result<()> {
    ensure_sim!(
        (0.0..=1.0).contains(&value.value()),
        InvalidParameter,
        "max_excluded_fraction must be between 0 and 1"
    );

    Ok(())
}

/// Check the `[search]` section
fn check_search(search: &SearchParameters) -> Result<()> {
    ensure!(search.max_evaluations > 0, "max_evaluations cannot be zero");
    ensure!(search.batch_size > 0, "batch_size cannot be zero");
    ensure!(search.patience > 0, "patience cannot be zero");
    ensure!(
        search.epsilon.is_finite() && search.epsilon >= 0.0,
        "epsilon must be a finite non-negative number"
    );
    if let Some(iterations) = search.iterations {
        check_iterations(iterations)?;
    }
    if let Some(timeout) = search.timeout_seconds {
        ensure!(timeout > 0, "timeout_seconds cannot be zero");
    }

    Ok(())
}

impl ModelParameters {
    /// Read a model file from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The model file contents as a [`ModelParameters`] struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<ModelParameters> {
        let file_path = model_dir.as_ref().join(MODEL_PARAMETERS_FILE_NAME);
        let model_params: ModelParameters = read_toml(&file_path)?;

        model_params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(model_params)
    }

    /// Validate parameters after reading in file
    pub fn validate(&self) -> Result<()> {
        check_budget(self.budget)?;
        check_horizon_years(self.horizon_years)?;
        check_discount_rate(self.discount_rate, self.discount_rate_uncertainty)?;
        check_cost_escalation_uncertainty(self.cost_escalation_uncertainty)?;
        check_iterations(self.iterations)?;
        check_percentiles(&self.percentiles)?;
        check_max_excluded_fraction(self.max_excluded_fraction)?;
        check_search(&self.search).context("Invalid search parameters")?;
        if let Some(selection) = &self.selection {
            selection.validate().context("Invalid selection policy")?;
        }

        Ok(())
    }

    /// The number of Monte Carlo iterations to use per candidate during the search
    pub fn search_iterations(&self) -> u32 {
        self.search.iterations.unwrap_or(self.iterations)
    }
}
