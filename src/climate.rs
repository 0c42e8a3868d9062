//! Stochastic generation of rainfall events under climate scenarios.
//!
//! Rainfall intensity for a return period follows a Gumbel (extreme value type I) distribution.
//! All sampling takes an explicit random number generator so that a fixed seed reproduces the same
//! event sequence.
use crate::error::{SimulationError, ensure_sim};
use crate::id::define_id_type;
use crate::units::{Dimensionless, Millimetres};
use anyhow::Result;
use indexmap::IndexMap;
use rand::Rng;
use rand::distributions::Open01;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

define_id_type! {ScenarioID}

/// Gumbel parameters for the rainfall of one return period
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnPeriodParameters {
    /// The return period in years
    pub years: u32,
    /// Location parameter (μ)
    pub location: Millimetres,
    /// Scale parameter (β)
    pub scale: Millimetres,
}

/// A warming scenario
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClimateScenario {
    /// Scenario identifier
    pub id: ScenarioID,
    /// Multiplier applied to sampled rainfall intensity
    pub intensity_factor: Dimensionless,
    /// Multiplier applied to the annual probability of each major event
    pub frequency_factor: Dimensionless,
}

/// How events are drawn for each year of the horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum EventSampling {
    /// Each return period fires independently with probability `frequency_factor / years`
    #[string = "major_events"]
    MajorEvents,
    /// One event per year drawn from the shortest return period
    #[string = "annual_maximum"]
    AnnualMaximum,
}

/// The `[climate]` section of the model parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClimateParameters {
    /// How events are drawn for each year
    pub sampling: EventSampling,
    /// Background (non-event) rainfall per year, driving chronic pollutant load
    #[serde(default)]
    pub annual_rainfall: Millimetres,
    /// Gumbel parameters for each supported return period
    pub return_periods: Vec<ReturnPeriodParameters>,
    /// Available climate scenarios
    pub scenarios: Vec<ClimateScenario>,
}

/// A single sampled rainfall event
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateEvent {
    /// The return period the event was drawn for
    pub return_period: u32,
    /// Sampled rainfall depth
    pub rainfall: Millimetres,
    /// The scenario under which the event was drawn
    pub scenario: ScenarioID,
}

/// Draw from a Gumbel distribution by inverting its CDF
pub fn sample_gumbel<R: Rng + ?Sized>(
    location: Millimetres,
    scale: Millimetres,
    rng: &mut R,
) -> Result<Millimetres> {
    ensure_sim!(
        scale.is_finite() && scale > Millimetres(0.0),
        InvalidParameter,
        "Gumbel scale must be a finite number greater than zero (got {scale})"
    );
    ensure_sim!(
        location.is_finite(),
        InvalidParameter,
        "Gumbel location must be finite (got {location})"
    );

    let u: f64 = rng.sample(Open01);
    Ok(Millimetres(location.value() - scale.value() * (-u.ln()).ln()))
}

/// Samples rainfall events for the configured return periods and scenarios
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateGenerator {
    sampling: EventSampling,
    annual_rainfall: Millimetres,
    return_periods: IndexMap<u32, ReturnPeriodParameters>,
    shortest_return_period: u32,
    scenarios: IndexMap<ScenarioID, ClimateScenario>,
}

impl ClimateGenerator {
    /// Create a generator, checking all distribution parameters
    pub fn new(parameters: &ClimateParameters) -> Result<Self> {
        ensure_sim!(
            !parameters.return_periods.is_empty(),
            InvalidParameter,
            "At least one return period must be configured"
        );
        ensure_sim!(
            parameters.annual_rainfall.is_finite()
                && parameters.annual_rainfall >= Millimetres(0.0),
            InvalidParameter,
            "annual_rainfall must be a finite non-negative number"
        );

        let mut return_periods = IndexMap::new();
        for rp in &parameters.return_periods {
            ensure_sim!(
                rp.years > 0,
                InvalidParameter,
                "Return periods must be at least one year"
            );
            ensure_sim!(
                rp.scale.is_finite() && rp.scale > Millimetres(0.0),
                InvalidParameter,
                "Gumbel scale for {}-year return period must be greater than zero",
                rp.years
            );
            ensure_sim!(
                rp.location.is_finite(),
                InvalidParameter,
                "Gumbel location for {}-year return period must be finite",
                rp.years
            );
            let existing = return_periods.insert(rp.years, rp.clone()).is_some();
            ensure_sim!(
                !existing,
                InvalidParameter,
                "Duplicate return period: {}",
                rp.years
            );
        }
        return_periods.sort_keys();
        let shortest_return_period = parameters
            .return_periods
            .iter()
            .map(|rp| rp.years)
            .min()
            .unwrap_or_default();

        ensure_sim!(
            !parameters.scenarios.is_empty(),
            InvalidParameter,
            "At least one climate scenario must be configured"
        );
        let mut scenarios = IndexMap::new();
        for scenario in &parameters.scenarios {
            for (name, value) in [
                ("intensity_factor", scenario.intensity_factor),
                ("frequency_factor", scenario.frequency_factor),
            ] {
                ensure_sim!(
                    value.is_finite() && value >= Dimensionless(0.0),
                    InvalidParameter,
                    "{name} for scenario {} must be a finite non-negative number",
                    scenario.id
                );
            }
            let existing = scenarios
                .insert(scenario.id.clone(), scenario.clone())
                .is_some();
            ensure_sim!(
                !existing,
                InvalidParameter,
                "Duplicate scenario: {}",
                scenario.id
            );
        }

        Ok(Self {
            sampling: parameters.sampling,
            annual_rainfall: parameters.annual_rainfall,
            return_periods,
            shortest_return_period,
            scenarios,
        })
    }

    /// All configured scenarios
    pub fn scenarios(&self) -> impl Iterator<Item = &ClimateScenario> {
        self.scenarios.values()
    }

    /// The configured return periods, shortest first
    pub fn return_periods(&self) -> impl Iterator<Item = u32> + '_ {
        self.return_periods.keys().copied()
    }

    /// The position of a return period in [`Self::return_periods`]
    pub fn return_period_index(&self, years: u32) -> Option<usize> {
        self.return_periods.get_index_of(&years)
    }

    /// Look up a scenario by ID
    pub fn scenario(&self, id: &str) -> Result<&ClimateScenario> {
        self.scenarios.get(id).ok_or_else(|| {
            SimulationError::InvalidParameter(format!("Unknown climate scenario: {id}")).into()
        })
    }

    /// Sample the rainfall of an event with the given return period under a scenario.
    ///
    /// The sampled intensity is clamped at zero before the scenario's intensity factor is applied.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        return_period: u32,
        scenario: &ClimateScenario,
        rng: &mut R,
    ) -> Result<ClimateEvent> {
        let Some(params) = self.return_periods.get(&return_period) else {
            return Err(SimulationError::InvalidParameter(format!(
                "Return period {return_period} is not configured"
            ))
            .into());
        };

        let rainfall = sample_gumbel(params.location, params.scale, rng)?;
        Ok(ClimateEvent {
            return_period,
            rainfall: rainfall.max(Millimetres(0.0)) * scenario.intensity_factor,
            scenario: scenario.id.clone(),
        })
    }

    /// Sample the events occurring in a single year
    pub fn sample_year<R: Rng + ?Sized>(
        &self,
        scenario: &ClimateScenario,
        rng: &mut R,
    ) -> Result<Vec<ClimateEvent>> {
        match self.sampling {
            EventSampling::AnnualMaximum => {
                let event = self.sample(self.shortest_return_period, scenario, rng)?;
                Ok(vec![event])
            }
            EventSampling::MajorEvents => {
                let mut events = Vec::new();
                for &years in self.return_periods.keys() {
                    let probability =
                        (scenario.frequency_factor.value() / f64::from(years)).min(1.0);
                    // Always draw so the number of random draws per year is fixed
                    let draw: f64 = rng.r#gen();
                    let event = self.sample(years, scenario, rng)?;
                    if draw < probability {
                        events.push(event);
                    }
                }
                Ok(events)
            }
        }
    }

    /// The chronic (non-event) rainfall for one year under a scenario
    pub fn chronic_rainfall(&self, scenario: &ClimateScenario) -> Millimetres {
        self.annual_rainfall * scenario.intensity_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, climate_parameters};
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rstest::rstest;

    #[rstest]
    fn test_sample_reproducible(climate_parameters: ClimateParameters) {
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let scenario = generator.scenario("current").unwrap();
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..10)
                .map(|_| generator.sample(10, scenario, &mut rng).unwrap().rainfall)
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));
    }

    #[rstest]
    fn test_sample_intensity_factor(climate_parameters: ClimateParameters) {
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let current = generator.scenario("current").unwrap();
        let severe = generator.scenario("severe").unwrap();
        let mut rng1 = ChaCha8Rng::seed_from_u64(1);
        let mut rng2 = ChaCha8Rng::seed_from_u64(1);
        let base = generator.sample(100, current, &mut rng1).unwrap();
        let inflated = generator.sample(100, severe, &mut rng2).unwrap();
        assert_approx_eq!(Millimetres, inflated.rainfall, base.rainfall * Dimensionless(1.4));
        assert_eq!(inflated.scenario, ScenarioID::new("severe"));
    }

    #[test]
    fn test_sample_gumbel_mean() {
        // Mean of Gumbel(μ, β) is μ + γβ
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 50_000;
        let total: f64 = (0..n)
            .map(|_| {
                sample_gumbel(Millimetres(50.0), Millimetres(10.0), &mut rng)
                    .unwrap()
                    .value()
            })
            .sum();
        let mean = total / f64::from(n);
        let expected = 50.0 + 0.577_215_664_9 * 10.0;
        assert!((mean - expected).abs() < 0.3, "mean was {mean}");
    }

    #[test]
    fn test_sample_gumbel_invalid() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_error!(
            sample_gumbel(Millimetres(50.0), Millimetres(0.0), &mut rng),
            "Invalid parameter: Gumbel scale must be a finite number greater than zero (got 0)"
        );
        assert_error!(
            sample_gumbel(Millimetres(f64::NAN), Millimetres(1.0), &mut rng),
            "Invalid parameter: Gumbel location must be finite (got NaN)"
        );
    }

    #[rstest]
    fn test_sample_clamped(mut climate_parameters: ClimateParameters) {
        climate_parameters.return_periods[0].location = Millimetres(-1000.0);
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let scenario = generator.scenario("current").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..100 {
            let event = generator.sample(10, scenario, &mut rng).unwrap();
            assert_eq!(event.rainfall, Millimetres(0.0));
        }
    }

    #[rstest]
    fn test_sample_unknown_return_period(climate_parameters: ClimateParameters) {
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let scenario = generator.scenario("current").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_error!(
            generator.sample(25, scenario, &mut rng),
            "Invalid parameter: Return period 25 is not configured"
        );
    }

    #[rstest]
    fn test_new_invalid(climate_parameters: ClimateParameters) {
        let mut params = climate_parameters.clone();
        params.return_periods[1].scale = Millimetres(-1.0);
        assert_error!(
            ClimateGenerator::new(&params),
            "Invalid parameter: Gumbel scale for 100-year return period must be greater than zero"
        );

        let mut params = climate_parameters.clone();
        params.scenarios.push(params.scenarios[0].clone());
        assert_error!(
            ClimateGenerator::new(&params),
            "Invalid parameter: Duplicate scenario: current"
        );

        let mut params = climate_parameters;
        params.return_periods.clear();
        assert_error!(
            ClimateGenerator::new(&params),
            "Invalid parameter: At least one return period must be configured"
        );
    }

    #[rstest]
    fn test_sample_year_annual_maximum(mut climate_parameters: ClimateParameters) {
        climate_parameters.sampling = EventSampling::AnnualMaximum;
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let scenario = generator.scenario("severe").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..20 {
            let events = generator.sample_year(scenario, &mut rng).unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].return_period, 10);
        }
    }

    #[rstest]
    fn test_sample_year_major_events_frequency(climate_parameters: ClimateParameters) {
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let count_events = |scenario: &str| {
            let scenario = generator.scenario(scenario).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(11);
            (0..20_000)
                .map(|_| {
                    generator
                        .sample_year(scenario, &mut rng)
                        .unwrap()
                        .iter()
                        .filter(|event| event.return_period == 10)
                        .count()
                })
                .sum::<usize>()
        };

        // Expect 10% of years under current climate and 20% when frequency doubles
        let current = count_events("current") as f64 / 20_000.0;
        let severe = count_events("severe") as f64 / 20_000.0;
        assert!((current - 0.1).abs() < 0.01, "frequency was {current}");
        assert!((severe - 0.2).abs() < 0.015, "frequency was {severe}");
    }

    #[rstest]
    fn test_chronic_rainfall(climate_parameters: ClimateParameters) {
        let generator = ClimateGenerator::new(&climate_parameters).unwrap();
        let severe = generator.scenario("severe").unwrap();
        assert_approx_eq!(
            Millimetres,
            generator.chronic_rainfall(severe),
            Millimetres(800.0 * 1.4)
        );
    }
}
