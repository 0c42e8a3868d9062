//! Conversion of hydrological responses into monetary losses.
use crate::asset::AssetClass;
use crate::grid::SpatialGrid;
use crate::hydrology::HydrologicalResponse;
use crate::units::{Dimensionless, Kilograms, Metres, Money, MoneyPerKilogram};
use anyhow::{Result, ensure};
use itertools::Itertools;
use serde::Deserialize;
use strum::{EnumCount, IntoEnumIterator};

/// The proportion of a flooded cell's economic output lost, for floods up to a given depth
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductivityTier {
    /// Tier applies to flood depths up to and including this value
    pub max_depth: Metres,
    /// Fraction of output lost while disrupted
    pub disruption: Dimensionless,
    /// Length of the disruption
    pub duration_days: f64,
}

fn default_productivity_tiers() -> Vec<ProductivityTier> {
    [(0.5, 0.05, 30.0), (1.5, 0.15, 90.0), (f64::INFINITY, 0.25, 180.0)]
        .into_iter()
        .map(|(max_depth, disruption, duration_days)| ProductivityTier {
            max_depth: Metres(max_depth),
            disruption: Dimensionless(disruption),
            duration_days,
        })
        .collect()
}

/// The `[damage]` section of the model parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DamageParameters {
    /// Cost of treating one kg of pollutant leaving the catchment
    #[serde(default)]
    pub pollutant_unit_cost: MoneyPerKilogram,
    /// Environmental restoration cost as a multiple of direct damage
    #[serde(default)]
    pub restoration_multiplier: Dimensionless,
    /// Productivity loss tiers, in increasing order of depth
    #[serde(default = "default_productivity_tiers")]
    pub productivity_tiers: Vec<ProductivityTier>,
}

impl Default for DamageParameters {
    fn default() -> Self {
        Self {
            pollutant_unit_cost: MoneyPerKilogram(0.0),
            restoration_multiplier: Dimensionless(0.0),
            productivity_tiers: default_productivity_tiers(),
        }
    }
}

/// Monetary losses, broken down by component
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossBreakdown {
    /// Direct damage to assets, indexed by [`AssetClass`]
    pub direct: [Money; AssetClass::COUNT],
    /// Lost economic output in flooded cells
    pub productivity: Money,
    /// Environmental restoration following flood damage
    pub restoration: Money,
    /// Treatment of pollutant leaving the catchment
    pub pollution: Money,
}

impl LossBreakdown {
    /// Direct damage to one asset class
    pub fn direct_for(&self, class: AssetClass) -> Money {
        self.direct[class as usize]
    }

    /// Total direct damage to assets
    pub fn total_direct(&self) -> Money {
        self.direct.iter().sum()
    }

    /// Losses caused by flooding (everything except pollution)
    pub fn flood_damage(&self) -> Money {
        self.total_direct() + self.productivity + self.restoration
    }

    /// All losses
    pub fn total(&self) -> Money {
        self.flood_damage() + self.pollution
    }

    /// Scale every component by a factor
    pub fn scaled(&self, factor: Dimensionless) -> Self {
        Self {
            direct: self.direct.map(|value| value * factor),
            productivity: self.productivity * factor,
            restoration: self.restoration * factor,
            pollution: self.pollution * factor,
        }
    }

    /// Whether every component is finite
    pub fn is_finite(&self) -> bool {
        self.direct.iter().all(|value| value.is_finite())
            && self.productivity.is_finite()
            && self.restoration.is_finite()
            && self.pollution.is_finite()
    }

    /// Labelled components, in a fixed order
    pub fn components(&self) -> Vec<(String, Money)> {
        AssetClass::iter()
            .map(|class| (format!("direct_{}", class.as_ref()), self.direct_for(class)))
            .chain([
                ("productivity".to_string(), self.productivity),
                ("restoration".to_string(), self.restoration),
                ("pollution".to_string(), self.pollution),
            ])
            .collect()
    }
}

impl std::ops::AddAssign for LossBreakdown {
    fn add_assign(&mut self, rhs: Self) {
        for (lhs, rhs) in self.direct.iter_mut().zip(rhs.direct) {
            *lhs += rhs;
        }
        self.productivity += rhs.productivity;
        self.restoration += rhs.restoration;
        self.pollution += rhs.pollution;
    }
}

/// The loss caused by a single event
#[derive(Debug, Clone, PartialEq)]
pub struct EventLoss {
    /// Loss components
    pub breakdown: LossBreakdown,
    /// Flood damage in each district, in the order of [`SpatialGrid::districts`]
    pub district_damage: Vec<Money>,
}

/// Values losses from hydrological responses
#[derive(Debug, Clone, PartialEq)]
pub struct DamageValuation {
    parameters: DamageParameters,
}

impl DamageValuation {
    /// Create a valuation, checking the parameters
    pub fn new(parameters: DamageParameters) -> Result<Self> {
        ensure!(
            parameters.pollutant_unit_cost.is_finite()
                && parameters.pollutant_unit_cost >= MoneyPerKilogram(0.0),
            "pollutant_unit_cost must be a finite non-negative number"
        );
        ensure!(
            parameters.restoration_multiplier.is_finite()
                && parameters.restoration_multiplier >= Dimensionless(0.0),
            "restoration_multiplier must be a finite non-negative number"
        );
        for tier in &parameters.productivity_tiers {
            ensure!(
                (0.0..=1.0).contains(&tier.disruption.value()),
                "Productivity disruption must be between 0 and 1"
            );
            ensure!(
                (0.0..=365.0).contains(&tier.duration_days),
                "Productivity disruption must last between 0 and 365 days"
            );
        }
        ensure!(
            parameters
                .productivity_tiers
                .iter()
                .tuple_windows()
                .all(|(a, b)| a.max_depth < b.max_depth),
            "Productivity tiers must be in strictly increasing order of depth"
        );

        Ok(Self { parameters })
    }

    /// Economic output lost in a cell with annual output `gdp` flooded to `depth`
    pub fn productivity_loss(&self, gdp: Money, depth: Metres) -> Money {
        if depth <= Metres(0.0) {
            return Money(0.0);
        }

        // Depths beyond the deepest tier use that tier
        let Some(tier) = self
            .parameters
            .productivity_tiers
            .iter()
            .find(|tier| depth <= tier.max_depth)
            .or(self.parameters.productivity_tiers.last())
        else {
            return Money(0.0);
        };

        gdp * tier.disruption * Dimensionless(tier.duration_days / 365.0)
    }

    /// The cost of treating pollutant exported from the catchment
    pub fn pollution_cost(&self, load: Kilograms) -> Money {
        load * self.parameters.pollutant_unit_cost
    }

    /// Value the losses of a single event: damage to assets, lost output, restoration and
    /// treatment of the pollutant washed out of the catchment
    pub fn value_event(&self, grid: &SpatialGrid, response: &HydrologicalResponse) -> EventLoss {
        let mut breakdown = LossBreakdown {
            pollution: self.pollution_cost(response.exported_load),
            ..LossBreakdown::default()
        };
        let mut district_damage = vec![Money(0.0); grid.districts().len()];
        for (index, cell) in grid.iter_cells() {
            let depth = response.flood_depth[index];
            if depth <= Metres(0.0) {
                continue;
            }

            let mut cell_direct = Money(0.0);
            for asset in &cell.assets {
                let damage = asset.damage(depth);
                breakdown.direct[asset.class as usize] += damage;
                cell_direct += damage;
            }
            let productivity = self.productivity_loss(cell.gdp, depth);
            let restoration = cell_direct * self.parameters.restoration_multiplier;
            breakdown.productivity += productivity;
            breakdown.restoration += restoration;
            district_damage[grid.district_index(index)] += cell_direct + productivity + restoration;
        }

        EventLoss {
            breakdown,
            district_damage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, slope_grid};
    use crate::grid::ModifierLayer;
    use crate::hydrology::HydrologicalModel;
    use crate::units::Millimetres;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(0.3, 1_000_000.0 * 0.05 * 30.0 / 365.0)]
    #[case(0.5, 1_000_000.0 * 0.05 * 30.0 / 365.0)]
    #[case(1.0, 1_000_000.0 * 0.15 * 90.0 / 365.0)]
    #[case(4.0, 1_000_000.0 * 0.25 * 180.0 / 365.0)]
    fn test_productivity_loss(#[case] depth: f64, #[case] expected: f64) {
        let valuation = DamageValuation::new(DamageParameters::default()).unwrap();
        assert_approx_eq!(
            Money,
            valuation.productivity_loss(Money(1_000_000.0), Metres(depth)),
            Money(expected)
        );
    }

    #[test]
    fn test_pollution_cost() {
        let valuation = DamageValuation::new(DamageParameters {
            pollutant_unit_cost: MoneyPerKilogram(12.5),
            ..DamageParameters::default()
        })
        .unwrap();
        assert_approx_eq!(
            Money,
            valuation.pollution_cost(Kilograms(4.0)),
            Money(50.0)
        );
    }

    #[test]
    fn test_new_invalid() {
        let mut params = DamageParameters::default();
        params.productivity_tiers.swap(0, 1);
        assert_error!(
            DamageValuation::new(params),
            "Productivity tiers must be in strictly increasing order of depth"
        );

        let params = DamageParameters {
            restoration_multiplier: Dimensionless(-1.0),
            ..DamageParameters::default()
        };
        assert_error!(
            DamageValuation::new(params),
            "restoration_multiplier must be a finite non-negative number"
        );
    }

    #[rstest]
    fn test_value_event(slope_grid: SpatialGrid) {
        let valuation = DamageValuation::new(DamageParameters {
            restoration_multiplier: Dimensionless(2.5),
            ..DamageParameters::default()
        })
        .unwrap();
        let model = HydrologicalModel::new(&slope_grid);
        let response = model.simulate(
            &slope_grid,
            &ModifierLayer::none(slope_grid.num_cells()),
            Millimetres(100.0),
        );

        // Only cell 2 holds an asset (residential, €1M); it floods to 0.19 m
        let loss = valuation.value_event(&slope_grid, &response);
        let direct = 1_000_000.0 * 0.25 * 0.19 / 0.5;
        assert_approx_eq!(
            Money,
            loss.breakdown.direct_for(AssetClass::Residential),
            Money(direct),
            epsilon = 1e-6
        );
        assert_approx_eq!(
            Money,
            loss.breakdown.restoration,
            Money(direct * 2.5),
            epsilon = 1e-6
        );
        assert_eq!(loss.breakdown.direct_for(AssetClass::Commercial), Money(0.0));

        // The district totals account for all flood damage
        let district_total: Money = loss.district_damage.iter().sum();
        assert_approx_eq!(
            Money,
            district_total,
            loss.breakdown.flood_damage(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_loss_breakdown_arithmetic() {
        let mut loss = LossBreakdown {
            productivity: Money(10.0),
            pollution: Money(5.0),
            ..LossBreakdown::default()
        };
        loss.direct[AssetClass::Industrial as usize] = Money(100.0);
        assert_eq!(loss.flood_damage(), Money(110.0));
        assert_eq!(loss.total(), Money(115.0));

        let mut doubled = loss;
        doubled += loss;
        assert_eq!(doubled, loss.scaled(Dimensionless(2.0)));
        assert_eq!(loss.components().len(), AssetClass::COUNT + 3);
        assert_eq!(loss.components()[2], ("direct_industrial".to_string(), Money(100.0)));
    }
}
