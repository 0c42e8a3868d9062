//! The model represents the static input data provided by the user.
use crate::climate::{ClimateGenerator, ClimateScenario};
use crate::damage::DamageValuation;
use crate::error::{SimulationError, ensure_sim};
use crate::grid::{ModifierLayer, SpatialGrid};
use crate::hydrology::HydrologicalModel;
use crate::intervention::{Footprint, InterventionMap};
use crate::portfolio::{Portfolio, PortfolioMap, PortfolioSpace};
use anyhow::{Context, Result};

pub mod parameters;
pub use parameters::{ModelParameters, SearchParameters};

/// Model definition.
///
/// All data is immutable once loaded and can be shared between worker threads.
#[derive(Debug)]
pub struct Model {
    /// Parameters from the model TOML file
    pub parameters: ModelParameters,
    /// The catchment
    pub grid: SpatialGrid,
    /// The catalog of interventions which can be funded
    pub interventions: InterventionMap,
    /// Named portfolios which can be evaluated
    pub portfolios: PortfolioMap,
    /// Drainage network derived from the grid
    pub hydrology: HydrologicalModel,
    /// Rainfall event generator
    pub climate: ClimateGenerator,
    /// Loss valuation
    pub damage: DamageValuation,
    /// Modifier layer for the catchment with no interventions
    baseline_layer: ModifierLayer,
}

impl Model {
    /// Assemble a model, checking that all parts are consistent.
    ///
    /// Every parameter is validated here so that no simulation work starts with bad input.
    pub fn new(
        parameters: ModelParameters,
        grid: SpatialGrid,
        interventions: InterventionMap,
        portfolios: PortfolioMap,
    ) -> Result<Self> {
        parameters.validate()?;
        let climate =
            ClimateGenerator::new(&parameters.climate).context("Invalid climate parameters")?;
        climate.scenario(&parameters.scenario.0)?;
        let damage =
            DamageValuation::new(parameters.damage.clone()).context("Invalid damage parameters")?;

        for (id, intervention) in &interventions {
            intervention
                .validate()
                .with_context(|| format!("Invalid intervention {id}"))?;
            if let Footprint::Cells(cells) = &intervention.footprint {
                ensure_sim!(
                    cells.iter().all(|&cell| cell < grid.num_cells()),
                    InvalidParameter,
                    "Footprint of intervention {id} lies outside the grid"
                );
                if let Some(cell) = cells
                    .iter()
                    .find(|&&cell| !grid.cell(cell).land_use.is_developable())
                {
                    return Err(SimulationError::InvalidParameter(format!(
                        "Footprint of intervention {id} includes undevelopable cell {cell}"
                    ))
                    .into());
                }
            }
        }

        let space = PortfolioSpace::new(&interventions, parameters.budget, grid.num_cells())?;
        for (id, portfolio) in &portfolios {
            space
                .check(portfolio)
                .with_context(|| format!("Invalid portfolio {id}"))?;
        }

        let hydrology = HydrologicalModel::new(&grid);
        let baseline_layer = ModifierLayer::none(grid.num_cells());

        Ok(Self {
            parameters,
            grid,
            interventions,
            portfolios,
            hydrology,
            climate,
            damage,
            baseline_layer,
        })
    }

    /// The scenario used for evaluation and optimisation
    pub fn scenario(&self) -> Result<&ClimateScenario> {
        self.climate.scenario(&self.parameters.scenario.0)
    }

    /// The modifier layer with no interventions applied
    pub fn baseline_layer(&self) -> &ModifierLayer {
        &self.baseline_layer
    }

    /// The modifier layer for a portfolio
    pub fn layer_for(&self, portfolio: &Portfolio) -> Result<ModifierLayer> {
        self.grid.apply_portfolio(portfolio, &self.interventions)
    }

    /// The space of portfolios affordable within the budget
    pub fn portfolio_space(&self) -> Result<PortfolioSpace<'_>> {
        PortfolioSpace::new(
            &self.interventions,
            self.parameters.budget,
            self.grid.num_cells(),
        )
    }

    /// Look up a named portfolio
    pub fn portfolio(&self, id: &str) -> Result<&Portfolio> {
        self.portfolios
            .get(id)
            .with_context(|| format!("Unknown portfolio: {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::simulation_error;
    use crate::fixture::{assert_error, catalog, model_parameters, slope_grid};
    use crate::intervention::InterventionID;
    use crate::units::Money;
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    fn test_new(
        model_parameters: ModelParameters,
        slope_grid: SpatialGrid,
        catalog: InterventionMap,
    ) {
        let model =
            Model::new(model_parameters, slope_grid, catalog, PortfolioMap::new()).unwrap();
        assert_eq!(model.scenario().unwrap().id.0.as_ref(), "current");
        assert!(model.baseline_layer().is_empty());
        assert_error!(model.portfolio("none"), "Unknown portfolio: none");
    }

    #[rstest]
    fn test_new_unknown_scenario(
        mut model_parameters: ModelParameters,
        slope_grid: SpatialGrid,
        catalog: InterventionMap,
    ) {
        model_parameters.scenario = "hot".into();
        assert_error!(
            Model::new(model_parameters, slope_grid, catalog, PortfolioMap::new()),
            "Invalid parameter: Unknown climate scenario: hot"
        );
    }

    #[rstest]
    fn test_new_portfolio_over_budget(
        mut model_parameters: ModelParameters,
        slope_grid: SpatialGrid,
        catalog: InterventionMap,
    ) {
        model_parameters.budget = Money(1_000_000.0);
        let portfolios = [(
            "big".into(),
            Portfolio::from_iter([(InterventionID::new("wetland"), 2)]),
        )]
        .into_iter()
        .collect();
        let err = Model::new(model_parameters, slope_grid, catalog, portfolios).unwrap_err();
        assert_eq!(err.to_string(), "Invalid portfolio big");
        assert!(matches!(
            simulation_error(&err),
            Some(SimulationError::BudgetInfeasible(_))
        ));
    }

    #[rstest]
    fn test_new_footprint_outside_grid(
        model_parameters: ModelParameters,
        slope_grid: SpatialGrid,
        mut catalog: InterventionMap,
    ) {
        let mut wetland = (*catalog["wetland"]).clone();
        wetland.footprint = Footprint::Cells(vec![7]);
        catalog.insert(wetland.id.clone(), Arc::new(wetland));
        assert_error!(
            Model::new(model_parameters, slope_grid, catalog, PortfolioMap::new()),
            "Invalid parameter: Footprint of intervention wetland lies outside the grid"
        );
    }
}
