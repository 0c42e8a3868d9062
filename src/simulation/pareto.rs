//! Multi-objective search over the portfolio space.
//!
//! Candidates are compared on three objectives: expected NPV (maximised), inequity of benefits
//! across districts (minimised) and ecological integrity (maximised). The search keeps the running
//! set of non-dominated candidates, from which a single portfolio can optionally be recommended
//! according to a configured [`SelectionPolicy`].
use super::monte_carlo::{MonteCarloEngine, SimulationResult};
use super::objectives::{ecological_integrity, inequity};
use crate::error::{SimulationError, simulation_error};
use crate::model::Model;
use crate::portfolio::{Portfolio, PortfolioSpace};
use crate::units::Money;
use anyhow::{Result, ensure};
use itertools::Itertools;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Random stream used for proposing candidates, kept apart from the Monte Carlo streams
const PROPOSAL_STREAM: u64 = u64::MAX;

/// Number of proposals tried per batch slot before the space is considered exhausted
const MAX_PROPOSAL_ATTEMPTS: usize = 100;

/// The objectives of a candidate portfolio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveVector {
    /// Mean net present value of the investment
    pub npv: Money,
    /// Dispersion of benefits across districts (lower is better)
    pub inequity: f64,
    /// Ecological-integrity proxy (higher is better)
    pub ecological_integrity: f64,
}

impl ObjectiveVector {
    /// The objectives with signs chosen so that higher is better for all of them
    pub fn normalised(&self) -> [f64; 3] {
        [self.npv.value(), -self.inequity, self.ecological_integrity]
    }

    /// Whether all objectives are finite
    pub fn is_finite(&self) -> bool {
        self.normalised().iter().all(|x| x.is_finite())
    }

    /// Whether these objectives dominate `other`.
    ///
    /// `self` dominates `other` if it is no worse on every objective and better by more than
    /// `epsilon` on at least one. Improvements within `epsilon` count as ties, but any shortfall
    /// at all rules out dominance, which keeps the relation transitive.
    pub fn dominates(&self, other: &Self, epsilon: f64) -> bool {
        let (a, b) = (self.normalised(), other.normalised());
        let no_worse = a.iter().zip(&b).all(|(x, y)| x >= y);
        let better = a.iter().zip(&b).any(|(x, y)| *x > y + epsilon);
        no_worse && better
    }
}

/// An evaluated portfolio
#[derive(Debug, Clone, PartialEq)]
pub struct ParetoCandidate {
    /// The portfolio
    pub portfolio: Portfolio,
    /// Its objectives
    pub objectives: ObjectiveVector,
    /// The simulation the objectives were derived from
    pub result: SimulationResult,
}

impl ParetoCandidate {
    /// Derive a candidate's objectives from its simulation result
    pub fn new(model: &Model, result: SimulationResult) -> Result<Self> {
        let metrics = &model.parameters.objectives;
        let objectives = ObjectiveVector {
            npv: result.net_npv.mean,
            inequity: inequity(metrics.equity_metric, &result.district_avoided_damage),
            ecological_integrity: ecological_integrity(
                metrics.ecological_metric,
                &result.portfolio,
                &model.interventions,
                model.grid.num_cells(),
            )?,
        };

        Ok(Self {
            portfolio: result.portfolio.clone(),
            objectives,
            result,
        })
    }
}

/// The set of mutually non-dominated candidates found so far
#[derive(Debug, Clone, PartialEq)]
pub struct ParetoFrontier {
    epsilon: f64,
    members: Vec<ParetoCandidate>,
}

impl ParetoFrontier {
    /// Create an empty frontier
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            members: Vec::new(),
        }
    }

    /// The members of the frontier, in the order they were added
    pub fn members(&self) -> &[ParetoCandidate] {
        &self.members
    }

    /// The number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the frontier is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Offer a candidate to the frontier.
    ///
    /// The candidate is rejected if it duplicates a member's portfolio, has non-finite objectives
    /// or is dominated by a member. Otherwise it is added and any members it dominates are removed.
    ///
    /// # Returns
    ///
    /// Whether the frontier changed.
    pub fn insert(&mut self, candidate: ParetoCandidate) -> bool {
        if !candidate.objectives.is_finite()
            || self.members.iter().any(|member| {
                member.portfolio == candidate.portfolio
                    || member
                        .objectives
                        .dominates(&candidate.objectives, self.epsilon)
            })
        {
            return false;
        }

        let epsilon = self.epsilon;
        self.members.retain(|member| {
            !candidate
                .objectives
                .dominates(&member.objectives, epsilon)
        });
        self.members.push(candidate);

        true
    }
}

/// How a single portfolio is recommended from the frontier
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case", deny_unknown_fields)]
pub enum SelectionPolicy {
    /// Maximise a weighted sum of objectives, each min-max normalised over the frontier
    WeightedSum {
        /// Weight on NPV
        npv_weight: f64,
        /// Weight on equity (the negated inequity)
        equity_weight: f64,
        /// Weight on ecological integrity
        ecological_weight: f64,
    },
    /// Maximise the benefit-cost ratio
    MaxBenefitCostRatio,
}

impl SelectionPolicy {
    /// Check the weights
    pub fn validate(&self) -> Result<()> {
        if let Self::WeightedSum {
            npv_weight,
            equity_weight,
            ecological_weight,
        } = self
        {
            let weights = [*npv_weight, *equity_weight, *ecological_weight];
            ensure!(
                weights.iter().all(|w| w.is_finite() && *w >= 0.0),
                "Weights must be finite non-negative numbers"
            );
            ensure!(
                weights.iter().sum::<f64>() > 0.0,
                "At least one weight must be greater than zero"
            );
        }

        Ok(())
    }
}

/// Recommend a single member of the frontier.
///
/// Ties go to the member which joined the frontier first. Returns `None` if the frontier is empty
/// or, for [`SelectionPolicy::MaxBenefitCostRatio`], no member has a defined ratio.
pub fn select<'a>(
    frontier: &'a ParetoFrontier,
    policy: &SelectionPolicy,
) -> Option<&'a ParetoCandidate> {
    let members = frontier.members();
    let scores: Vec<Option<f64>> = match policy {
        SelectionPolicy::WeightedSum {
            npv_weight,
            equity_weight,
            ecological_weight,
        } => {
            let weights = [*npv_weight, *equity_weight, *ecological_weight];
            let values = members
                .iter()
                .map(|member| member.objectives.normalised())
                .collect_vec();
            let ranges: Vec<(f64, f64)> = (0..3)
                .map(|i| {
                    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v[i]), hi.max(v[i]))
                    })
                })
                .collect();
            values
                .iter()
                .map(|v| {
                    let score = (0..3)
                        .map(|i| {
                            let (lo, hi) = ranges[i];
                            let scaled = if hi > lo { (v[i] - lo) / (hi - lo) } else { 0.0 };
                            weights[i] * scaled
                        })
                        .sum();
                    Some(score)
                })
                .collect()
        }
        SelectionPolicy::MaxBenefitCostRatio => members
            .iter()
            .map(|member| member.result.benefit_cost_ratio().map(|bcr| bcr.value()))
            .collect(),
    };

    let mut best: Option<(usize, f64)> = None;
    for (index, score) in scores.into_iter().enumerate() {
        let Some(score) = score else { continue };
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((index, score));
        }
    }

    best.map(|(index, _)| &members[index])
}

/// Why the search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TerminationReason {
    /// The maximum number of evaluations was reached
    #[display("evaluation budget reached")]
    EvaluationBudget,
    /// The frontier did not change for the configured number of evaluations
    #[display("converged")]
    Converged,
    /// Every feasible portfolio was evaluated
    #[display("portfolio space exhausted")]
    Exhausted,
    /// The time limit was reached
    #[display("timed out")]
    Timeout,
    /// The caller requested cancellation
    #[display("cancelled")]
    Cancelled,
}

/// The result of a search
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// The non-dominated candidates found
    pub frontier: ParetoFrontier,
    /// The number of portfolios evaluated
    pub evaluations: u32,
    /// Why the search stopped
    pub termination: TerminationReason,
}

/// Where candidate portfolios come from
enum Proposals {
    /// Every feasible portfolio, in a fixed order
    Exhaustive(VecDeque<Portfolio>),
    /// Random samples and perturbations of frontier members
    Stochastic,
}

/// Searches the portfolio space for the Pareto frontier
pub struct ParetoOptimiser<'a> {
    model: &'a Model,
    space: PortfolioSpace<'a>,
    engine: MonteCarloEngine<'a>,
}

impl<'a> ParetoOptimiser<'a> {
    /// Create an optimiser for the model's budget and scenario
    pub fn new(model: &'a Model) -> Result<Self> {
        let space = model.portfolio_space()?;
        let engine = MonteCarloEngine::new(
            model,
            &model.parameters.scenario.0,
            model.parameters.search_iterations(),
        )?;

        Ok(Self {
            model,
            space,
            engine,
        })
    }

    /// Evaluate a single portfolio
    pub fn evaluate(&self, portfolio: &Portfolio) -> Result<ParetoCandidate> {
        self.space.check(portfolio)?;
        let result = self.engine.evaluate(portfolio)?;
        ParetoCandidate::new(self.model, result)
    }

    /// Run the search.
    ///
    /// Candidates are evaluated in parallel batches and merged into the frontier once each batch
    /// completes. The `cancel` flag is checked between batches; whatever frontier has been found
    /// when the search stops is returned.
    pub fn run(&self, cancel: &AtomicBool) -> Result<SearchOutcome> {
        let search = &self.model.parameters.search;
        let started = Instant::now();
        let timeout = search.timeout_seconds.map(Duration::from_secs);
        let mut rng = ChaCha8Rng::seed_from_u64(self.model.parameters.seed);
        rng.set_stream(PROPOSAL_STREAM);

        let size = self.space.size();
        let mut proposals = if size <= u128::from(search.enumeration_limit) {
            let portfolios = self.space.enumerate();
            info!(
                "Evaluating all {} feasible portfolios",
                portfolios.len().min(search.max_evaluations as usize)
            );
            Proposals::Exhaustive(portfolios.into())
        } else {
            info!("Portfolio space has up to {size} portfolios; searching stochastically");
            Proposals::Stochastic
        };

        let mut frontier = ParetoFrontier::new(search.epsilon);
        let mut seen = HashSet::new();
        let mut evaluations = 0u32;
        let mut since_improvement = 0u32;
        let termination = loop {
            if cancel.load(Ordering::Relaxed) {
                break TerminationReason::Cancelled;
            }
            if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                break TerminationReason::Timeout;
            }
            if evaluations >= search.max_evaluations {
                break TerminationReason::EvaluationBudget;
            }
            if matches!(proposals, Proposals::Stochastic) && since_improvement >= search.patience {
                break TerminationReason::Converged;
            }

            let batch_size = search.batch_size.min(search.max_evaluations - evaluations) as usize;
            let batch = self.next_batch(&mut proposals, &frontier, &mut seen, batch_size, &mut rng);
            if batch.is_empty() {
                break TerminationReason::Exhausted;
            }

            let results: Vec<Result<ParetoCandidate>> =
                batch.par_iter().map(|p| self.evaluate(p)).collect();
            for (portfolio, result) in batch.iter().zip(results) {
                evaluations += 1;
                match result {
                    Ok(candidate) => {
                        if frontier.insert(candidate) {
                            debug!("Portfolio {portfolio} joined the frontier");
                            since_improvement = 0;
                        } else {
                            since_improvement += 1;
                        }
                    }
                    Err(err) => match simulation_error(&err) {
                        Some(SimulationError::NumericalInstability(_)) => {
                            warn!("Skipping portfolio {portfolio}: {err}");
                            since_improvement += 1;
                        }
                        _ => return Err(err),
                    },
                }
            }
            debug!(
                "Evaluated {evaluations} portfolios; frontier has {} members",
                frontier.len()
            );
        };

        info!(
            "Search finished ({termination}) after {evaluations} evaluations with {} portfolios on \
            the frontier",
            frontier.len()
        );

        Ok(SearchOutcome {
            frontier,
            evaluations,
            termination,
        })
    }

    /// Propose up to `batch_size` portfolios which have not been evaluated yet
    fn next_batch(
        &self,
        proposals: &mut Proposals,
        frontier: &ParetoFrontier,
        seen: &mut HashSet<Portfolio>,
        batch_size: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Portfolio> {
        let mut batch = Vec::with_capacity(batch_size);
        match proposals {
            Proposals::Exhaustive(queue) => {
                while batch.len() < batch_size {
                    let Some(portfolio) = queue.pop_front() else {
                        break;
                    };
                    if seen.insert(portfolio.clone()) {
                        batch.push(portfolio);
                    }
                }
            }
            Proposals::Stochastic => {
                for _ in 0..batch_size * MAX_PROPOSAL_ATTEMPTS {
                    if batch.len() == batch_size {
                        break;
                    }
                    let portfolio = match frontier.members().choose(rng) {
                        Some(member) if rng.gen_bool(0.5) => {
                            self.space.perturb(&member.portfolio, rng)
                        }
                        _ => self.space.sample(rng),
                    };
                    if seen.insert(portfolio.clone()) {
                        batch.push(portfolio);
                    }
                }
            }
        }

        batch
    }
}
