//! The operation modes of the engine: baseline, single-portfolio evaluation and optimisation.
use crate::climate::ScenarioID;
use crate::damage::LossBreakdown;
use crate::finance::annual_equivalent;
use crate::intervention::{InterventionID, InterventionKind};
use crate::model::Model;
use crate::portfolio::Portfolio;
use crate::units::{Dimensionless, Money};
use anyhow::{Context, Result};
use log::info;
use std::sync::atomic::AtomicBool;

pub mod monte_carlo;
use monte_carlo::MonteCarloEngine;
pub mod objectives;
pub mod pareto;
use pareto::{ParetoCandidate, ParetoOptimiser, SearchOutcome, select};
pub mod statistics;
use statistics::Statistics;

/// The cost of doing nothing under one climate scenario
#[derive(Debug, Clone, PartialEq)]
pub struct CostOfInaction {
    /// The climate scenario
    pub scenario: ScenarioID,
    /// Distribution of the present value of losses over the horizon
    pub loss: Statistics,
    /// The constant annual loss with the same present value as the expected loss
    pub annual_equivalent_loss: Money,
    /// Annual equivalent loss as a fraction of the total exposed asset value
    pub structural_liability: Dimensionless,
    /// Mean present value of each loss component
    pub breakdown: LossBreakdown,
    /// Expected loss relative to the first configured scenario
    pub relative_to_reference: Option<Dimensionless>,
    /// The number of iterations which produced finite results
    pub iterations_used: u32,
    /// The number of iterations requested
    pub iterations_requested: u32,
}

/// Estimate the cost of inaction under every configured climate scenario.
///
/// All scenarios use the same base seed, so differences between them are due to the scenario
/// alone.
pub fn run_baseline(model: &Model) -> Result<Vec<CostOfInaction>> {
    let params = &model.parameters;
    let exposed_value = model.grid.total_exposed_value();
    let mut results: Vec<CostOfInaction> = Vec::new();
    for scenario in model.climate.scenarios() {
        info!("Estimating cost of inaction for scenario {}", scenario.id);
        let engine = MonteCarloEngine::new(model, &scenario.id.0, params.iterations)?;
        let result = engine
            .evaluate(&Portfolio::default())
            .with_context(|| format!("Baseline failed for scenario {}", scenario.id))?;

        let annual_equivalent_loss = annual_equivalent(
            result.baseline_loss.mean,
            params.horizon_years,
            params.discount_rate,
        );
        let structural_liability = if exposed_value > Money(0.0) {
            annual_equivalent_loss / exposed_value
        } else {
            Dimensionless(0.0)
        };
        let relative_to_reference = match results.first() {
            None => Some(Dimensionless(1.0)),
            Some(reference) if reference.loss.mean > Money(0.0) => {
                Some(result.baseline_loss.mean / reference.loss.mean)
            }
            Some(_) => None,
        };
        info!(
            "Scenario {}: expected loss {:.0}, annual equivalent {:.0}",
            scenario.id,
            result.baseline_loss.mean.value(),
            annual_equivalent_loss.value()
        );

        results.push(CostOfInaction {
            scenario: scenario.id.clone(),
            loss: result.baseline_loss,
            annual_equivalent_loss,
            structural_liability,
            breakdown: result.baseline_breakdown,
            relative_to_reference,
            iterations_used: result.iterations_used,
            iterations_requested: result.iterations_requested,
        });
    }

    Ok(results)
}

/// The quantity of and spend on one intervention in a portfolio
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// The intervention
    pub intervention: InterventionID,
    /// The type of intervention
    pub kind: InterventionKind,
    /// Units deployed
    pub quantity: u32,
    /// Implementation cost of those units
    pub spend: Money,
}

/// The headline figures for a portfolio
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioAppraisal {
    /// The evaluated portfolio and its objectives
    pub candidate: ParetoCandidate,
    /// Quantity and spend per intervention
    pub allocation: Vec<Allocation>,
    /// Total implementation cost
    pub total_spend: Money,
    /// Mean net present value
    pub expected_npv: Money,
    /// Discounted benefits over discounted costs
    pub benefit_cost_ratio: Option<Dimensionless>,
    /// Fractional reduction in expected flood damage
    pub flood_risk_reduction: Dimensionless,
    /// Fractional reduction in exported pollutant load
    pub pollutant_load_reduction: Dimensionless,
    /// First year by which the investment has paid for itself
    pub payback_year: Option<u32>,
}

impl PortfolioAppraisal {
    /// Summarise an evaluated candidate
    pub fn new(model: &Model, candidate: ParetoCandidate) -> Result<Self> {
        let mut allocation = Vec::new();
        for (id, quantity) in candidate.portfolio.iter() {
            let intervention = model
                .interventions
                .get(id)
                .with_context(|| format!("Unknown intervention: {id}"))?;
            allocation.push(Allocation {
                intervention: id.clone(),
                kind: intervention.kind,
                quantity,
                spend: intervention.unit_cost * Dimensionless(f64::from(quantity)),
            });
        }

        let result = &candidate.result;
        Ok(Self {
            total_spend: allocation.iter().map(|a| a.spend).sum(),
            allocation,
            expected_npv: result.net_npv.mean,
            benefit_cost_ratio: result.benefit_cost_ratio(),
            flood_risk_reduction: result.flood_risk_reduction(),
            pollutant_load_reduction: result.pollutant_load_reduction(),
            payback_year: result.payback_year(),
            candidate,
        })
    }

    /// Fractional reduction in flood damage from events of the given return period, if configured
    pub fn resilience(&self, return_period: u32) -> Option<Dimensionless> {
        self.candidate.result.resilience(return_period)
    }
}

/// Evaluate a single portfolio under the model's scenario with the full number of iterations
pub fn evaluate_portfolio(model: &Model, portfolio: &Portfolio) -> Result<PortfolioAppraisal> {
    model.portfolio_space()?.check(portfolio)?;
    let engine = MonteCarloEngine::new(
        model,
        &model.parameters.scenario.0,
        model.parameters.iterations,
    )?;
    info!(
        "Evaluating portfolio {portfolio} under scenario {}",
        engine.scenario().id
    );
    let result = engine.evaluate(portfolio)?;
    let candidate = ParetoCandidate::new(model, result)?;

    PortfolioAppraisal::new(model, candidate)
}

/// The outcome of an optimisation run
#[derive(Debug, Clone)]
pub struct OptimisationResult {
    /// The frontier and search statistics
    pub search: SearchOutcome,
    /// The portfolio recommended by the configured selection policy, if any
    pub recommendation: Option<PortfolioAppraisal>,
}

/// Search for the Pareto frontier within the budget and recommend a portfolio from it.
///
/// No recommendation is made unless a selection policy is configured. The recommended portfolio is
/// re-evaluated with the full number of iterations if the search used fewer.
pub fn run_optimisation(model: &Model, cancel: &AtomicBool) -> Result<OptimisationResult> {
    let optimiser = ParetoOptimiser::new(model)?;
    let search = optimiser.run(cancel)?;

    let recommendation = match &model.parameters.selection {
        None => {
            info!("No selection policy configured; not recommending a portfolio");
            None
        }
        Some(policy) => match select(&search.frontier, policy) {
            None => None,
            Some(candidate)
                if model.parameters.search_iterations() == model.parameters.iterations =>
            {
                Some(PortfolioAppraisal::new(model, candidate.clone())?)
            }
            Some(candidate) => Some(evaluate_portfolio(model, &candidate.portfolio)?),
        },
    };
    if let Some(recommendation) = &recommendation {
        info!(
            "Recommended portfolio: {}",
            recommendation.candidate.portfolio
        );
    }

    Ok(OptimisationResult {
        search,
        recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::model;
    use crate::intervention::InterventionID;
    use pareto::{SelectionPolicy, TerminationReason};
    use rstest::rstest;

    #[rstest]
    fn test_run_baseline(model: Model) {
        let results = run_baseline(&model).unwrap();
        let ids = results.iter().map(|r| r.scenario.0.as_ref()).collect::<Vec<_>>();
        assert_eq!(ids, ["current", "moderate", "severe"]);
        assert_eq!(results[0].relative_to_reference, Some(Dimensionless(1.0)));

        // Wetter scenarios cost more
        assert!(results[1].loss.mean > results[0].loss.mean);
        assert!(results[2].loss.mean > results[1].loss.mean);
        assert!(results[2].relative_to_reference.unwrap() > Dimensionless(1.0));
        assert!(results[0].structural_liability > Dimensionless(0.0));
    }

    #[rstest]
    fn test_evaluate_portfolio(model: Model) {
        let portfolio = Portfolio::from_iter([
            (InterventionID::new("wetland"), 1),
            (InterventionID::new("bioswale"), 2),
        ]);
        let appraisal = evaluate_portfolio(&model, &portfolio).unwrap();
        assert_eq!(appraisal.allocation.len(), 2);
        assert_eq!(appraisal.total_spend, Money(800_000.0));
        let bioswale = &appraisal.allocation[0];
        assert_eq!(bioswale.intervention.0.as_ref(), "bioswale");
        assert_eq!(bioswale.kind, InterventionKind::Bioswale);
        assert_eq!(bioswale.spend, Money(50_000.0));
        assert!(appraisal.flood_risk_reduction > Dimensionless(0.0));
        assert!(appraisal.resilience(100).is_some());
        assert!(appraisal.resilience(50).is_none());
    }

    #[rstest]
    fn test_evaluate_portfolio_over_budget(mut model: Model) {
        model.parameters.budget = Money(100_000.0);
        let portfolio = Portfolio::from_iter([(InterventionID::new("bioswale"), 5)]);
        assert!(evaluate_portfolio(&model, &portfolio).is_err());
    }

    #[rstest]
    fn test_run_optimisation(mut model: Model) {
        model.parameters.iterations = 50;
        model.parameters.search.iterations = Some(20);
        model.parameters.selection = Some(SelectionPolicy::MaxBenefitCostRatio);
        let result = run_optimisation(&model, &AtomicBool::new(false)).unwrap();
        assert_eq!(result.search.termination, TerminationReason::Exhausted);

        // The recommendation was re-evaluated with the full number of iterations
        let recommendation = result.recommendation.unwrap();
        assert_eq!(recommendation.candidate.result.iterations_requested, 50);
        assert!(
            result
                .search
                .frontier
                .members()
                .iter()
                .any(|m| m.portfolio == recommendation.candidate.portfolio)
        );
    }

    #[rstest]
    fn test_run_optimisation_without_policy(model: Model) {
        let result = run_optimisation(&model, &AtomicBool::new(true)).unwrap();
        assert_eq!(result.search.termination, TerminationReason::Cancelled);
        assert!(result.recommendation.is_none());
    }
}
