//! Fixtures for tests

use crate::asset::{Asset, AssetClass, DepthDamageCurve};
use crate::climate::{ClimateParameters, ClimateScenario, EventSampling, ReturnPeriodParameters};
use crate::damage::DamageParameters;
use crate::grid::{Cell, LandUse, SpatialGrid};
use crate::intervention::{
    DeploymentUnit, Footprint, Intervention, InterventionKind, InterventionMap,
};
use crate::model::{Model, ModelParameters, SearchParameters};
use crate::portfolio::PortfolioMap;
use crate::simulation::objectives::{EcologicalMetric, EquityMetric, ObjectiveParameters};
use crate::units::{Dimensionless, KilogramsPerMillimetre, Metres, Millimetres, Money};
use indexmap::indexmap;
use rstest::fixture;
use std::sync::Arc;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A cell on grassland in the "north" district with no assets
pub fn cell(row: usize, col: usize, elevation: f64) -> Cell {
    Cell {
        row,
        col,
        elevation: Metres(elevation),
        land_use: LandUse::Grassland,
        infiltration_capacity: Dimensionless(0.2),
        drainage_capacity: Millimetres(50.0),
        pollutant_export: KilogramsPerMillimetre(0.1),
        gdp: Money(0.0),
        district: "north".into(),
        assets: Vec::new(),
    }
}

#[fixture]
pub fn residential_curve() -> DepthDamageCurve {
    DepthDamageCurve::new(vec![
        (Metres(0.0), Dimensionless(0.0)),
        (Metres(0.5), Dimensionless(0.25)),
        (Metres(1.5), Dimensionless(0.6)),
    ])
    .unwrap()
}

/// Three cells draining west to east, with a €1M home in the lowest
#[fixture]
pub fn slope_grid(residential_curve: DepthDamageCurve) -> SpatialGrid {
    let mut outlet = cell(0, 2, 1.0);
    outlet.land_use = LandUse::Urban;
    outlet.district = "south".into();
    outlet.assets.push(Asset {
        class: AssetClass::Residential,
        value: Money(1_000_000.0),
        curve: Arc::new(residential_curve),
    });

    SpatialGrid::new(1, 3, vec![cell(0, 0, 3.0), cell(0, 1, 2.0), outlet]).unwrap()
}

#[fixture]
pub fn wetland() -> Intervention {
    Intervention {
        id: "wetland".into(),
        description: "Restored floodplain wetland".into(),
        kind: InterventionKind::Wetland,
        unit: DeploymentUnit::Area,
        unit_cost: Money(750_000.0),
        maintenance_cost: Money(15_000.0),
        footprint: Footprint::Cells(vec![0, 1]),
        coverage_per_unit: Dimensionless(0.5),
        runoff_reduction: Dimensionless(0.6),
        pollutant_retention: Dimensionless(0.5),
        co_benefit_score: Dimensionless(3.0),
        co_benefit_value: Money(5_000.0),
    }
}

#[fixture]
pub fn bioswale() -> Intervention {
    Intervention {
        id: "bioswale".into(),
        description: "Roadside bioswale".into(),
        kind: InterventionKind::Bioswale,
        unit: DeploymentUnit::Count,
        unit_cost: Money(25_000.0),
        maintenance_cost: Money(1_500.0),
        footprint: Footprint::Catchment,
        coverage_per_unit: Dimensionless(0.4),
        runoff_reduction: Dimensionless(0.2),
        pollutant_retention: Dimensionless(0.65),
        co_benefit_score: Dimensionless(1.0),
        co_benefit_value: Money(500.0),
    }
}

#[fixture]
pub fn catalog(wetland: Intervention, bioswale: Intervention) -> InterventionMap {
    indexmap! {
        wetland.id.clone() => Arc::new(wetland),
        bioswale.id.clone() => Arc::new(bioswale),
    }
}

#[fixture]
pub fn climate_parameters() -> ClimateParameters {
    let scenario = |id: &str, intensity_factor: f64, frequency_factor: f64| ClimateScenario {
        id: id.into(),
        intensity_factor: Dimensionless(intensity_factor),
        frequency_factor: Dimensionless(frequency_factor),
    };

    ClimateParameters {
        sampling: EventSampling::MajorEvents,
        annual_rainfall: Millimetres(800.0),
        return_periods: vec![
            ReturnPeriodParameters {
                years: 10,
                location: Millimetres(60.0),
                scale: Millimetres(12.0),
            },
            ReturnPeriodParameters {
                years: 100,
                location: Millimetres(110.0),
                scale: Millimetres(20.0),
            },
        ],
        scenarios: vec![
            scenario("current", 1.0, 1.0),
            scenario("moderate", 1.2, 1.333),
            scenario("severe", 1.4, 2.0),
        ],
    }
}

#[fixture]
pub fn model_parameters(climate_parameters: ClimateParameters) -> ModelParameters {
    ModelParameters {
        budget: Money(10_000_000.0),
        horizon_years: 30,
        discount_rate: Dimensionless(0.03),
        discount_rate_uncertainty: Dimensionless(0.0),
        cost_escalation_uncertainty: Dimensionless(0.0),
        iterations: 200,
        seed: 0,
        scenario: "current".into(),
        percentiles: vec![Dimensionless(0.05), Dimensionless(0.5), Dimensionless(0.95)],
        max_excluded_fraction: Dimensionless(0.01),
        climate: climate_parameters,
        damage: DamageParameters::default(),
        objectives: ObjectiveParameters {
            equity_metric: EquityMetric::Gini,
            ecological_metric: EcologicalMetric::TotalCoBenefit,
        },
        search: SearchParameters::default(),
        selection: None,
    }
}

#[fixture]
pub fn model(
    model_parameters: ModelParameters,
    slope_grid: SpatialGrid,
    catalog: InterventionMap,
) -> Model {
    Model::new(model_parameters, slope_grid, catalog, PortfolioMap::new()).unwrap()
}
