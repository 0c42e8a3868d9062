//! Monte Carlo estimation of the losses, costs and benefits of a portfolio.
//!
//! Each iteration owns a private random stream derived from the base seed and the iteration index,
//! so results do not depend on how iterations are scheduled across threads. Within an iteration,
//! the catchment with and without the portfolio is exposed to the same sampled events.
use super::statistics::Statistics;
use crate::climate::{ClimateScenario, ScenarioID};
use crate::damage::{EventLoss, LossBreakdown};
use crate::error::{SimulationError, ensure_sim, simulation_error};
use crate::finance::{benefit_cost_ratio, discount_factors, discounted_payback_year, npv};
use crate::grid::ModifierLayer;
use crate::hydrology::HydrologicalResponse;
use crate::model::Model;
use crate::portfolio::Portfolio;
use crate::units::{Dimensionless, Kilograms, Millimetres, Money};
use anyhow::Result;
use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// The aggregated outcome of simulating one portfolio under one scenario
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// The portfolio simulated
    pub portfolio: Portfolio,
    /// The climate scenario simulated
    pub scenario: ScenarioID,
    /// The number of iterations requested
    pub iterations_requested: u32,
    /// The number of iterations which produced finite results
    pub iterations_used: u32,
    /// Present value of losses with the portfolio in place, for each used iteration
    pub loss_samples: Vec<Money>,
    /// Distribution of the present value of losses with the portfolio in place
    pub loss: Statistics,
    /// Distribution of the present value of losses with no interventions
    pub baseline_loss: Statistics,
    /// Distribution of the net present value of the investment
    pub net_npv: Statistics,
    /// Mean present value of each loss component with the portfolio in place
    pub loss_breakdown: LossBreakdown,
    /// Mean present value of each loss component with no interventions
    pub baseline_breakdown: LossBreakdown,
    /// Mean present value of avoided losses and co-benefits
    pub benefit_pv: Money,
    /// Mean present value of implementation and maintenance costs
    pub cost_pv: Money,
    /// Mean annual flood damage (undiscounted) with the portfolio in place
    pub annual_flood_damage: Money,
    /// Mean annual flood damage (undiscounted) with no interventions
    pub baseline_annual_flood_damage: Money,
    /// Mean annual pollutant load exported with the portfolio in place
    pub annual_exported_load: Kilograms,
    /// Mean annual pollutant load exported with no interventions
    pub baseline_annual_exported_load: Kilograms,
    /// Mean annual flood damage avoided in each district
    pub district_avoided_damage: Vec<Money>,
    /// Mean annual flood damage caused by events of each return period, shortest first
    pub return_period_damage: Vec<ReturnPeriodDamage>,
    /// Mean discounted net cash flow for each year of the horizon, starting at year zero
    pub discounted_cash_flows: Vec<Money>,
}

/// Flood damage attributed to events drawn for one return period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnPeriodDamage {
    /// The return period in years
    pub return_period: u32,
    /// Mean annual damage (undiscounted) with the portfolio in place
    pub flood_damage: Money,
    /// Mean annual damage (undiscounted) with no interventions
    pub baseline_flood_damage: Money,
}

impl ReturnPeriodDamage {
    /// Fractional reduction in damage from these events relative to no intervention
    pub fn reduction(&self) -> Dimensionless {
        relative_reduction(
            self.baseline_flood_damage.value(),
            self.flood_damage.value(),
        )
    }
}

impl SimulationResult {
    /// Ratio of discounted benefits to discounted costs
    pub fn benefit_cost_ratio(&self) -> Option<Dimensionless> {
        benefit_cost_ratio(self.benefit_pv, self.cost_pv)
    }

    /// Fractional reduction in expected flood damage relative to no intervention
    pub fn flood_risk_reduction(&self) -> Dimensionless {
        relative_reduction(
            self.baseline_annual_flood_damage.value(),
            self.annual_flood_damage.value(),
        )
    }

    /// Fractional reduction in exported pollutant load relative to no intervention
    pub fn pollutant_load_reduction(&self) -> Dimensionless {
        relative_reduction(
            self.baseline_annual_exported_load.value(),
            self.annual_exported_load.value(),
        )
    }

    /// Fractional reduction in flood damage from events of the given return period.
    ///
    /// Returns `None` if the return period is not configured. Under annual-maximum sampling only
    /// the shortest return period is ever drawn, so the others report no reduction.
    pub fn resilience(&self, return_period: u32) -> Option<Dimensionless> {
        self.return_period_damage
            .iter()
            .find(|damage| damage.return_period == return_period)
            .map(ReturnPeriodDamage::reduction)
    }

    /// The first year in which the expected discounted cash flow has paid back the investment
    pub fn payback_year(&self) -> Option<u32> {
        discounted_payback_year(&self.discounted_cash_flows)
    }

    /// The fraction of requested iterations which were used
    pub fn quality(&self) -> Dimensionless {
        Dimensionless(f64::from(self.iterations_used) / f64::from(self.iterations_requested))
    }
}

fn relative_reduction(baseline: f64, with_portfolio: f64) -> Dimensionless {
    if baseline > 0.0 {
        Dimensionless(1.0 - with_portfolio / baseline)
    } else {
        Dimensionless(0.0)
    }
}

/// The result of a single iteration
#[derive(Debug, Clone)]
struct IterationOutcome {
    loss_pv: LossBreakdown,
    baseline_loss_pv: LossBreakdown,
    net_npv: Money,
    benefit_pv: Money,
    cost_pv: Money,
    flood_damage: Money,
    baseline_flood_damage: Money,
    exported_load: Kilograms,
    baseline_exported_load: Kilograms,
    district_avoided: Vec<Money>,
    /// Flood damage with and without the portfolio, indexed like the model's return periods
    return_period_damage: Vec<(Money, Money)>,
    discounted_cash_flows: Vec<Money>,
}

impl IterationOutcome {
    fn is_finite(&self) -> bool {
        self.loss_pv.is_finite()
            && self.baseline_loss_pv.is_finite()
            && self.net_npv.is_finite()
            && self.benefit_pv.is_finite()
            && self.cost_pv.is_finite()
            && self.flood_damage.is_finite()
            && self.baseline_flood_damage.is_finite()
            && self.exported_load.is_finite()
            && self.baseline_exported_load.is_finite()
            && self.district_avoided.iter().all(|x| x.is_finite())
            && self
                .return_period_damage
                .iter()
                .all(|(with, base)| with.is_finite() && base.is_finite())
            && self.discounted_cash_flows.iter().all(|x| x.is_finite())
    }
}

/// Costs and benefits of a portfolio which do not vary between iterations
struct PortfolioTerms {
    layer: ModifierLayer,
    implementation_cost: Money,
    maintenance_cost: Money,
    co_benefit_value: Money,
    chronic_load: Kilograms,
    baseline_chronic_load: Kilograms,
}

/// Draw uniformly from `[-band, band]`
fn uniform_band<R: Rng + ?Sized>(rng: &mut R, band: Dimensionless) -> Dimensionless {
    let u: f64 = rng.r#gen();
    Dimensionless((2.0 * u - 1.0) * band.value())
}

/// Estimates loss and NPV distributions for portfolios
#[derive(Debug)]
pub struct MonteCarloEngine<'a> {
    model: &'a Model,
    scenario: &'a ClimateScenario,
    iterations: u32,
    seed: u64,
}

impl<'a> MonteCarloEngine<'a> {
    /// Create an engine for the given scenario.
    ///
    /// The base seed is taken from the model parameters.
    pub fn new(model: &'a Model, scenario: &str, iterations: u32) -> Result<Self> {
        ensure_sim!(
            iterations > 0,
            InvalidParameter,
            "The number of iterations must be greater than zero"
        );
        let scenario = model.climate.scenario(scenario)?;

        Ok(Self {
            model,
            scenario,
            iterations,
            seed: model.parameters.seed,
        })
    }

    /// Use a different base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The scenario simulated
    pub fn scenario(&self) -> &ClimateScenario {
        self.scenario
    }

    /// Simulate a portfolio.
    ///
    /// Iterations which produce non-finite values are discarded. Unless the discarded share is
    /// below the configured fraction, the whole evaluation fails.
    pub fn evaluate(&self, portfolio: &Portfolio) -> Result<SimulationResult> {
        let terms = self.portfolio_terms(portfolio)?;
        let outcomes: Vec<Result<IterationOutcome>> = (0..self.iterations)
            .into_par_iter()
            .map(|index| self.run_iteration(index, &terms))
            .collect();

        let mut used = Vec::with_capacity(outcomes.len());
        let mut excluded = 0u32;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(outcome) => used.push(outcome),
                Err(err) => match simulation_error(&err) {
                    Some(SimulationError::NumericalInstability(_)) => {
                        debug!("Excluding iteration {index}: {err}");
                        excluded += 1;
                    }
                    _ => return Err(err),
                },
            }
        }

        // The excluded share must stay strictly below the tolerance
        let excluded_fraction = f64::from(excluded) / f64::from(self.iterations);
        let max_excluded = self.model.parameters.max_excluded_fraction.value();
        ensure_sim!(
            !used.is_empty() && (excluded == 0 || excluded_fraction < max_excluded),
            NumericalInstability,
            "{excluded} of {} iterations produced non-finite results (tolerance is {:.1}%)",
            self.iterations,
            max_excluded * 100.0
        );
        if excluded > 0 {
            warn!(
                "Excluded {excluded} of {} iterations for portfolio {portfolio}",
                self.iterations
            );
        }

        Ok(self.aggregate(portfolio, &used))
    }

    fn portfolio_terms(&self, portfolio: &Portfolio) -> Result<PortfolioTerms> {
        let model = self.model;
        let layer = model.layer_for(portfolio)?;
        let chronic_rainfall = model.climate.chronic_rainfall(self.scenario);
        let chronic_load = model
            .hydrology
            .simulate(&model.grid, &layer, chronic_rainfall)
            .exported_load;
        let baseline_chronic_load = model
            .hydrology
            .simulate(&model.grid, model.baseline_layer(), chronic_rainfall)
            .exported_load;

        Ok(PortfolioTerms {
            layer,
            implementation_cost: portfolio.implementation_cost(&model.interventions)?,
            maintenance_cost: portfolio.maintenance_cost(&model.interventions)?,
            co_benefit_value: portfolio.co_benefit_value(&model.interventions)?,
            chronic_load,
            baseline_chronic_load,
        })
    }

    /// Simulate the response and loss for one event
    fn simulate_event(
        &self,
        layer: &ModifierLayer,
        rainfall: Millimetres,
    ) -> (HydrologicalResponse, EventLoss) {
        let model = self.model;
        let response = model.hydrology.simulate(&model.grid, layer, rainfall);
        let loss = model.damage.value_event(&model.grid, &response);
        (response, loss)
    }

    fn run_iteration(&self, index: u32, terms: &PortfolioTerms) -> Result<IterationOutcome> {
        let model = self.model;
        let params = &model.parameters;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(u64::from(index));

        let rate = params.discount_rate + uniform_band(&mut rng, params.discount_rate_uncertainty);
        let escalation =
            Dimensionless(1.0) + uniform_band(&mut rng, params.cost_escalation_uncertainty);
        let factors = discount_factors(rate, params.horizon_years)?;

        let num_districts = model.grid.districts().len();
        let unchanged = terms.layer.is_empty();
        let mut outcome = IterationOutcome {
            loss_pv: LossBreakdown::default(),
            baseline_loss_pv: LossBreakdown::default(),
            net_npv: Money(0.0),
            benefit_pv: Money(0.0),
            cost_pv: terms.implementation_cost * escalation,
            flood_damage: Money(0.0),
            baseline_flood_damage: Money(0.0),
            exported_load: Kilograms(0.0),
            baseline_exported_load: Kilograms(0.0),
            district_avoided: vec![Money(0.0); num_districts],
            return_period_damage: vec![
                (Money(0.0), Money(0.0));
                model.climate.return_periods().count()
            ],
            discounted_cash_flows: Vec::with_capacity(factors.len()),
        };
        let mut cash_flows = vec![-(terms.implementation_cost * escalation)];

        for factor in factors.iter().skip(1) {
            let mut loss = LossBreakdown {
                pollution: model.damage.pollution_cost(terms.chronic_load),
                ..LossBreakdown::default()
            };
            let mut baseline_loss = LossBreakdown {
                pollution: model.damage.pollution_cost(terms.baseline_chronic_load),
                ..LossBreakdown::default()
            };
            outcome.exported_load += terms.chronic_load;
            outcome.baseline_exported_load += terms.baseline_chronic_load;

            for event in model.climate.sample_year(self.scenario, &mut rng)? {
                let (baseline_response, baseline_event) =
                    self.simulate_event(model.baseline_layer(), event.rainfall);
                let (response, event_loss) = if unchanged {
                    (baseline_response.clone(), baseline_event.clone())
                } else {
                    self.simulate_event(&terms.layer, event.rainfall)
                };

                for ((avoided, base), with) in outcome
                    .district_avoided
                    .iter_mut()
                    .zip(&baseline_event.district_damage)
                    .zip(&event_loss.district_damage)
                {
                    *avoided += *base - *with;
                }
                if let Some(index) = model.climate.return_period_index(event.return_period) {
                    let (with, base) = &mut outcome.return_period_damage[index];
                    *with += event_loss.breakdown.flood_damage();
                    *base += baseline_event.breakdown.flood_damage();
                }
                outcome.exported_load += response.exported_load;
                outcome.baseline_exported_load += baseline_response.exported_load;
                loss += event_loss.breakdown;
                baseline_loss += baseline_event.breakdown;
            }

            outcome.flood_damage += loss.flood_damage();
            outcome.baseline_flood_damage += baseline_loss.flood_damage();
            outcome.loss_pv += loss.scaled(*factor);
            outcome.baseline_loss_pv += baseline_loss.scaled(*factor);

            let benefit = baseline_loss.total() - loss.total() + terms.co_benefit_value;
            let cost = terms.maintenance_cost * escalation;
            outcome.benefit_pv += benefit * *factor;
            outcome.cost_pv += cost * *factor;
            cash_flows.push(benefit - cost);
        }

        outcome.net_npv = npv(&cash_flows, rate)?;
        outcome.discounted_cash_flows = cash_flows
            .iter()
            .zip(&factors)
            .map(|(cash_flow, factor)| *cash_flow * *factor)
            .collect();
        ensure_sim!(
            outcome.is_finite(),
            NumericalInstability,
            "Iteration {index} produced a non-finite result"
        );

        Ok(outcome)
    }

    fn aggregate(&self, portfolio: &Portfolio, outcomes: &[IterationOutcome]) -> SimulationResult {
        let params = &self.model.parameters;
        let n = Dimensionless(outcomes.len() as f64);
        let years = Dimensionless(f64::from(params.horizon_years));
        let mean_money =
            |f: &dyn Fn(&IterationOutcome) -> Money| outcomes.iter().map(f).sum::<Money>() / n;
        let mean_breakdown = |f: &dyn Fn(&IterationOutcome) -> LossBreakdown| {
            let mut total = LossBreakdown::default();
            for outcome in outcomes {
                total += f(outcome);
            }
            total.scaled(Dimensionless(1.0) / n)
        };

        let loss_samples = outcomes.iter().map(|o| o.loss_pv.total()).collect::<Vec<_>>();
        let baseline_samples = outcomes
            .iter()
            .map(|o| o.baseline_loss_pv.total())
            .collect::<Vec<_>>();
        let npv_samples = outcomes.iter().map(|o| o.net_npv).collect::<Vec<_>>();

        let num_districts = self.model.grid.districts().len();
        let district_avoided_damage = (0..num_districts)
            .map(|d| mean_money(&|o| o.district_avoided[d]) / years)
            .collect();
        let return_period_damage = self
            .model
            .climate
            .return_periods()
            .enumerate()
            .map(|(i, return_period)| ReturnPeriodDamage {
                return_period,
                flood_damage: mean_money(&|o| o.return_period_damage[i].0) / years,
                baseline_flood_damage: mean_money(&|o| o.return_period_damage[i].1) / years,
            })
            .collect();
        let num_years = params.horizon_years as usize + 1;
        let discounted_cash_flows = (0..num_years)
            .map(|t| mean_money(&|o| o.discounted_cash_flows[t]))
            .collect();
        let mean_load = |f: &dyn Fn(&IterationOutcome) -> Kilograms| {
            outcomes.iter().map(f).sum::<Kilograms>() / n / years
        };

        debug!(
            "Simulated portfolio {portfolio} under scenario {}: mean NPV {}",
            self.scenario.id,
            mean_money(&|o| o.net_npv)
        );

        SimulationResult {
            portfolio: portfolio.clone(),
            scenario: self.scenario.id.clone(),
            iterations_requested: self.iterations,
            iterations_used: outcomes.len() as u32,
            loss: Statistics::from_samples(&loss_samples, &params.percentiles),
            baseline_loss: Statistics::from_samples(&baseline_samples, &params.percentiles),
            net_npv: Statistics::from_samples(&npv_samples, &params.percentiles),
            loss_samples,
            loss_breakdown: mean_breakdown(&|o| o.loss_pv),
            baseline_breakdown: mean_breakdown(&|o| o.baseline_loss_pv),
            benefit_pv: mean_money(&|o| o.benefit_pv),
            cost_pv: mean_money(&|o| o.cost_pv),
            annual_flood_damage: mean_money(&|o| o.flood_damage) / years,
            baseline_annual_flood_damage: mean_money(&|o| o.baseline_flood_damage) / years,
            annual_exported_load: mean_load(&|o| o.exported_load),
            baseline_annual_exported_load: mean_load(&|o| o.baseline_exported_load),
            district_avoided_damage,
            return_period_damage,
            discounted_cash_flows,
        }
    }
}
