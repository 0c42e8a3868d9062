//! Portfolios of interventions and the budget-feasible space they are drawn from.
use crate::error::{SimulationError, ensure_sim};
use crate::id::define_id_type;
use crate::intervention::{Intervention, InterventionID, InterventionMap};
use crate::units::{Dimensionless, Money};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

define_id_type! {PortfolioID}

/// A map of named portfolios, keyed by portfolio ID
pub type PortfolioMap = IndexMap<PortfolioID, Portfolio>;

/// Absolute slack allowed when comparing spend against the budget.
///
/// Well below one unit of currency, so it only absorbs rounding in summed costs.
const BUDGET_TOLERANCE: Money = Money(1e-6);

/// The quantity of each intervention to deploy.
///
/// Interventions with zero quantity are not stored, so two portfolios deploying the same units
/// always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Portfolio(BTreeMap<InterventionID, u32>);

impl FromIterator<(InterventionID, u32)> for Portfolio {
    fn from_iter<I: IntoIterator<Item = (InterventionID, u32)>>(iter: I) -> Self {
        let mut portfolio = Portfolio::default();
        for (id, quantity) in iter {
            portfolio.set_quantity(id, quantity);
        }
        portfolio
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }

        write!(
            f,
            "{}",
            self.iter()
                .map(|(id, quantity)| format!("{id}:{quantity}"))
                .join(";")
        )
    }
}

impl FromStr for Portfolio {
    type Err = anyhow::Error;

    /// Parse the format produced by `Display`, e.g. `wetland:2;bioswale:5`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "none" {
            return Ok(Portfolio::default());
        }

        let mut portfolio = Portfolio::default();
        for entry in s.split(';') {
            let (id, quantity) = entry
                .split_once(':')
                .with_context(|| format!("Expected intervention:quantity, got \"{entry}\""))?;
            let id = id.trim();
            ensure!(!id.is_empty(), "Missing intervention ID in \"{entry}\"");
            ensure!(
                portfolio.quantity(id) == 0,
                "Intervention {id} appears more than once"
            );
            let quantity: u32 = quantity
                .trim()
                .parse()
                .with_context(|| format!("Invalid quantity for intervention {id}"))?;
            portfolio.set_quantity(InterventionID::new(id), quantity);
        }

        Ok(portfolio)
    }
}

/// Look up an intervention in the catalog
fn lookup<'a>(catalog: &'a InterventionMap, id: &InterventionID) -> Result<&'a Arc<Intervention>> {
    catalog.get(id).ok_or_else(|| {
        SimulationError::InvalidParameter(format!("Unknown intervention: {id}")).into()
    })
}

impl Portfolio {
    /// The deployed quantity of an intervention
    pub fn quantity(&self, id: &str) -> u32 {
        self.0.get(id).copied().unwrap_or_default()
    }

    /// Set the deployed quantity of an intervention
    pub fn set_quantity(&mut self, id: InterventionID, quantity: u32) {
        if quantity == 0 {
            self.0.remove(&id);
        } else {
            self.0.insert(id, quantity);
        }
    }

    /// Iterate over the interventions with non-zero quantity, in ID order
    pub fn iter(&self) -> impl Iterator<Item = (&InterventionID, u32)> {
        self.0.iter().map(|(id, quantity)| (id, *quantity))
    }

    /// Whether nothing is deployed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn sum_over<F>(&self, catalog: &InterventionMap, per_unit: F) -> Result<Money>
    where
        F: Fn(&Intervention) -> Money,
    {
        let mut total = Money(0.0);
        for (id, quantity) in self.iter() {
            let intervention = lookup(catalog, id)?;
            total += per_unit(intervention) * Dimensionless(f64::from(quantity));
        }

        Ok(total)
    }

    /// The up-front cost of implementing the portfolio (Σ quantity × unit cost)
    pub fn implementation_cost(&self, catalog: &InterventionMap) -> Result<Money> {
        self.sum_over(catalog, |intervention| intervention.unit_cost)
    }

    /// The annual cost of maintaining the portfolio
    pub fn maintenance_cost(&self, catalog: &InterventionMap) -> Result<Money> {
        self.sum_over(catalog, |intervention| intervention.maintenance_cost)
    }

    /// The monetised annual co-benefits of the portfolio
    pub fn co_benefit_value(&self, catalog: &InterventionMap) -> Result<Money> {
        self.sum_over(catalog, |intervention| intervention.co_benefit_value)
    }
}

/// The number of whole units affordable within a budget
pub fn max_units_from_budget(budget: Money, unit_cost: Money) -> u32 {
    if unit_cost <= Money(0.0) || budget <= Money(0.0) {
        return 0;
    }

    let units = ((budget + BUDGET_TOLERANCE) / unit_cost).value();
    if units >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        units.floor() as u32
    }
}

/// One intervention which can be deployed within the budget
#[derive(Debug, Clone)]
struct Dimension {
    id: InterventionID,
    unit_cost: Money,
    max_units: u32,
}

/// The set of portfolios which can be afforded within a budget
#[derive(Debug, Clone)]
pub struct PortfolioSpace<'a> {
    catalog: &'a InterventionMap,
    budget: Money,
    dimensions: Vec<Dimension>,
}

impl<'a> PortfolioSpace<'a> {
    /// Create the space of portfolios affordable within `budget`.
    ///
    /// The quantity of each intervention is capped at the point where extra units no longer
    /// increase its coverage. Fails if not even a single unit of any intervention is affordable.
    pub fn new(catalog: &'a InterventionMap, budget: Money, num_grid_cells: usize) -> Result<Self> {
        ensure_sim!(
            budget.is_finite() && budget > Money(0.0),
            InvalidParameter,
            "Budget must be a finite number greater than zero (got {budget})"
        );

        let mut dimensions = Vec::new();
        for intervention in catalog.values() {
            let max_units = max_units_from_budget(budget, intervention.unit_cost)
                .min(intervention.saturation_units(num_grid_cells));
            if max_units == 0 {
                debug!(
                    "Intervention {} is not affordable within the budget",
                    intervention.id
                );
                continue;
            }

            dimensions.push(Dimension {
                id: intervention.id.clone(),
                unit_cost: intervention.unit_cost,
                max_units,
            });
        }
        ensure_sim!(
            !dimensions.is_empty(),
            BudgetInfeasible,
            "No intervention can be deployed within a budget of {budget}"
        );

        Ok(Self {
            catalog,
            budget,
            dimensions,
        })
    }

    /// The budget
    pub fn budget(&self) -> Money {
        self.budget
    }

    /// The most units of an intervention which are worth deploying within the budget
    pub fn max_units(&self, id: &str) -> u32 {
        self.dimensions
            .iter()
            .find(|dim| &*dim.id.0 == id)
            .map_or(0, |dim| dim.max_units)
    }

    fn within_budget(&self, spend: Money) -> bool {
        spend <= self.budget + BUDGET_TOLERANCE
    }

    /// Check that a portfolio only uses known interventions and is within budget
    pub fn check(&self, portfolio: &Portfolio) -> Result<()> {
        let spend = portfolio.implementation_cost(self.catalog)?;
        ensure_sim!(
            self.within_budget(spend),
            BudgetInfeasible,
            "Portfolio {portfolio} costs {spend}, which exceeds the budget of {}",
            self.budget
        );

        Ok(())
    }

    /// Whether a portfolio is within budget
    pub fn is_feasible(&self, portfolio: &Portfolio) -> bool {
        self.check(portfolio).is_ok()
    }

    /// The number of quantity vectors in the box bounded by each intervention's maximum, which is
    /// an upper bound on the number of feasible portfolios
    pub fn size(&self) -> u128 {
        self.dimensions.iter().fold(1u128, |acc, dim| {
            acc.saturating_mul(u128::from(dim.max_units) + 1)
        })
    }

    fn portfolio_from(&self, quantities: &[u32]) -> Portfolio {
        self.dimensions
            .iter()
            .zip(quantities)
            .map(|(dim, quantity)| (dim.id.clone(), *quantity))
            .collect()
    }

    fn quantities_of(&self, portfolio: &Portfolio) -> Vec<u32> {
        self.dimensions
            .iter()
            .map(|dim| portfolio.quantity(&dim.id.0).min(dim.max_units))
            .collect()
    }

    fn spend_of(&self, quantities: &[u32]) -> Money {
        self.dimensions
            .iter()
            .zip(quantities)
            .map(|(dim, quantity)| dim.unit_cost * Dimensionless(f64::from(*quantity)))
            .sum()
    }

    /// List every feasible portfolio, including the empty one.
    ///
    /// Only use this when [`Self::size`] is small.
    pub fn enumerate(&self) -> Vec<Portfolio> {
        let mut portfolios = Vec::new();
        let mut quantities = vec![0; self.dimensions.len()];
        self.enumerate_from(0, Money(0.0), &mut quantities, &mut portfolios);
        portfolios
    }

    fn enumerate_from(
        &self,
        dim_index: usize,
        spent: Money,
        quantities: &mut [u32],
        portfolios: &mut Vec<Portfolio>,
    ) {
        let Some(dim) = self.dimensions.get(dim_index) else {
            portfolios.push(self.portfolio_from(quantities));
            return;
        };

        for quantity in 0..=dim.max_units {
            let spend = spent + dim.unit_cost * Dimensionless(f64::from(quantity));
            if !self.within_budget(spend) {
                break;
            }
            quantities[dim_index] = quantity;
            self.enumerate_from(dim_index + 1, spend, quantities, portfolios);
        }
        quantities[dim_index] = 0;
    }

    /// Draw a random feasible portfolio.
    ///
    /// Interventions are visited in random order and each is given a random quantity from what the
    /// remaining budget allows.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Portfolio {
        let mut order = (0..self.dimensions.len()).collect_vec();
        order.shuffle(rng);

        let mut quantities = vec![0; self.dimensions.len()];
        let mut remaining = self.budget;
        for index in order {
            let dim = &self.dimensions[index];
            let affordable = max_units_from_budget(remaining, dim.unit_cost).min(dim.max_units);
            let quantity = rng.gen_range(0..=affordable);
            quantities[index] = quantity;
            remaining -= dim.unit_cost * Dimensionless(f64::from(quantity));
        }
        self.repair(&mut quantities, None, rng);

        self.portfolio_from(&quantities)
    }

    /// Propose a feasible neighbour of a portfolio.
    ///
    /// One intervention's quantity is moved up or down by a random step. If that breaks the budget,
    /// units of other interventions are removed at random until it fits.
    pub fn perturb<R: Rng + ?Sized>(&self, portfolio: &Portfolio, rng: &mut R) -> Portfolio {
        let mut quantities = self.quantities_of(portfolio);
        let index = rng.gen_range(0..self.dimensions.len());
        let dim = &self.dimensions[index];
        let step = rng.gen_range(1..=(dim.max_units / 4).max(1));
        quantities[index] = if rng.gen_bool(0.5) {
            quantities[index].saturating_add(step).min(dim.max_units)
        } else {
            quantities[index].saturating_sub(step)
        };
        self.repair(&mut quantities, Some(index), rng);

        self.portfolio_from(&quantities)
    }

    /// Remove single units until the quantities are within budget, preferring not to touch `keep`
    fn repair<R: Rng + ?Sized>(&self, quantities: &mut [u32], keep: Option<usize>, rng: &mut R) {
        while !self.within_budget(self.spend_of(quantities)) {
            let mut candidates = (0..quantities.len())
                .filter(|&i| quantities[i] > 0 && Some(i) != keep)
                .collect_vec();
            if candidates.is_empty() {
                candidates = (0..quantities.len())
                    .filter(|&i| quantities[i] > 0)
                    .collect();
            }
            let Some(&index) = candidates.choose(rng) else {
                break;
            };
            quantities[index] -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::simulation_error;
    use crate::fixture::{assert_error, catalog};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rstest::rstest;
    use std::collections::HashSet;

    const NUM_CELLS: usize = 3;

    fn portfolio(quantities: &[(&str, u32)]) -> Portfolio {
        quantities
            .iter()
            .map(|(id, quantity)| (InterventionID::new(id), *quantity))
            .collect()
    }

    #[test]
    fn test_portfolio_normalised() {
        let a = portfolio(&[("wetland", 2), ("bioswale", 0)]);
        let b = portfolio(&[("wetland", 2)]);
        assert_eq!(a, b);
        assert_eq!(a.quantity("bioswale"), 0);
        assert_eq!(a.to_string(), "wetland:2");
        assert_eq!(Portfolio::default().to_string(), "none");
    }

    #[test]
    fn test_portfolio_from_str() {
        let parsed: Portfolio = "wetland:2; bioswale:0".parse().unwrap();
        assert_eq!(parsed, portfolio(&[("wetland", 2)]));
        assert_eq!("none".parse::<Portfolio>().unwrap(), Portfolio::default());

        let round_trip = portfolio(&[("bioswale", 3), ("wetland", 1)]);
        assert_eq!(round_trip.to_string().parse::<Portfolio>().unwrap(), round_trip);

        assert_error!(
            "wetland".parse::<Portfolio>(),
            "Expected intervention:quantity, got \"wetland\""
        );
        assert_error!(
            "wetland:x".parse::<Portfolio>(),
            "Invalid quantity for intervention wetland"
        );
        assert_error!(
            "wetland:1;wetland:2".parse::<Portfolio>(),
            "Intervention wetland appears more than once"
        );
    }

    #[rstest]
    fn test_portfolio_costs(catalog: InterventionMap) {
        let p = portfolio(&[("wetland", 2), ("bioswale", 4)]);
        assert_eq!(p.implementation_cost(&catalog).unwrap(), Money(1_600_000.0));
        assert_eq!(p.maintenance_cost(&catalog).unwrap(), Money(36_000.0));
        assert_eq!(p.co_benefit_value(&catalog).unwrap(), Money(12_000.0));

        let p = portfolio(&[("dam", 1)]);
        assert_error!(
            p.implementation_cost(&catalog),
            "Invalid parameter: Unknown intervention: dam"
        );
    }

    #[rstest]
    #[case(10_000_000.0, 750_000.0, 13)]
    #[case(1_500_000.0, 750_000.0, 2)]
    #[case(749_999.0, 750_000.0, 0)]
    #[case(0.0, 750_000.0, 0)]
    #[case(2_250_000_000.0, 750_000.0, 3000)]
    #[case(2_249_999_999.0, 750_000.0, 2999)]
    fn test_max_units_from_budget(#[case] budget: f64, #[case] cost: f64, #[case] expected: u32) {
        assert_eq!(max_units_from_budget(Money(budget), Money(cost)), expected);
    }

    #[rstest]
    fn test_new_infeasible(catalog: InterventionMap) {
        let err = PortfolioSpace::new(&catalog, Money(1_000.0), NUM_CELLS).unwrap_err();
        assert!(matches!(
            simulation_error(&err),
            Some(SimulationError::BudgetInfeasible(_))
        ));
    }

    #[rstest]
    fn test_max_units(catalog: InterventionMap) {
        let space = PortfolioSpace::new(&catalog, Money(10_000_000.0), NUM_CELLS).unwrap();

        // Capped by saturation rather than by budget
        assert_eq!(space.max_units("wetland"), 4);
        assert_eq!(space.max_units("bioswale"), 8);
        assert_eq!(space.max_units("dam"), 0);

        let space = PortfolioSpace::new(&catalog, Money(100_000.0), NUM_CELLS).unwrap();
        assert_eq!(space.max_units("wetland"), 0);
        assert_eq!(space.max_units("bioswale"), 4);
    }

    #[rstest]
    fn test_check_budget_boundary(catalog: InterventionMap) {
        let p = portfolio(&[("wetland", 1), ("bioswale", 1)]);

        // Exactly on budget is accepted
        let space = PortfolioSpace::new(&catalog, Money(775_000.0), NUM_CELLS).unwrap();
        assert!(space.check(&p).is_ok());
        assert!(space.enumerate().contains(&p));

        // One unit of currency over is rejected
        let space = PortfolioSpace::new(&catalog, Money(774_999.0), NUM_CELLS).unwrap();
        let err = space.check(&p).unwrap_err();
        assert!(matches!(
            simulation_error(&err),
            Some(SimulationError::BudgetInfeasible(_))
        ));
        assert!(!space.enumerate().contains(&p));
    }

    #[rstest]
    fn test_check_budget_boundary_large_budget(catalog: InterventionMap) {
        let p = portfolio(&[("wetland", 3000)]);

        let space = PortfolioSpace::new(&catalog, Money(2_250_000_000.0), NUM_CELLS).unwrap();
        assert!(space.check(&p).is_ok());

        let space = PortfolioSpace::new(&catalog, Money(2_249_999_999.0), NUM_CELLS).unwrap();
        let err = space.check(&p).unwrap_err();
        assert!(matches!(
            simulation_error(&err),
            Some(SimulationError::BudgetInfeasible(_))
        ));
    }

    #[rstest]
    fn test_enumerate(catalog: InterventionMap) {
        let space = PortfolioSpace::new(&catalog, Money(1_500_000.0), NUM_CELLS).unwrap();
        assert_eq!(space.size(), 3 * 9);

        let portfolios = space.enumerate();
        assert_eq!(portfolios.len(), 9 + 9 + 1);
        assert!(portfolios.contains(&Portfolio::default()));
        assert!(portfolios.iter().all(|p| space.is_feasible(p)));
        assert!(portfolios.iter().all_unique());
    }

    #[rstest]
    fn test_sample_and_perturb_feasible(catalog: InterventionMap) {
        let space = PortfolioSpace::new(&catalog, Money(1_000_000.0), NUM_CELLS).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let sampled = space.sample(&mut rng);
            assert!(space.is_feasible(&sampled), "{sampled} is over budget");
            let perturbed = space.perturb(&sampled, &mut rng);
            assert!(space.is_feasible(&perturbed), "{perturbed} is over budget");
            assert!(perturbed.quantity("bioswale") <= space.max_units("bioswale"));
            seen.insert(perturbed);
        }

        // The generators explore more than a handful of portfolios
        assert!(seen.len() > 5);
    }

    #[rstest]
    fn test_perturb_repairs_budget(catalog: InterventionMap) {
        let space = PortfolioSpace::new(&catalog, Money(800_000.0), NUM_CELLS).unwrap();
        let start = portfolio(&[("wetland", 1), ("bioswale", 2)]);
        assert!(space.is_feasible(&start));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..200 {
            assert!(space.is_feasible(&space.perturb(&start, &mut rng)));
        }
    }
}
