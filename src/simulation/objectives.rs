//! Equity and ecological objectives for a portfolio.
//!
//! Neither metric has a canonical definition, so both must be chosen explicitly in the model
//! parameters.
use crate::intervention::InterventionMap;
use crate::portfolio::Portfolio;
use crate::units::Money;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

/// How the dispersion of benefits across districts is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum EquityMetric {
    /// Gini coefficient of avoided damage per district
    #[string = "gini"]
    Gini,
    /// Standard deviation of avoided damage per district divided by its mean
    #[string = "coefficient_of_variation"]
    CoefficientOfVariation,
}

/// How ecological integrity is derived from intervention co-benefit scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum EcologicalMetric {
    /// Sum of co-benefit score over all deployed units
    #[string = "total_co_benefit"]
    TotalCoBenefit,
    /// Co-benefit score weighted by the fraction of the catchment each intervention covers
    #[string = "coverage_weighted_co_benefit"]
    CoverageWeightedCoBenefit,
}

/// The `[objectives]` section of the model parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectiveParameters {
    /// Metric for the equity objective
    pub equity_metric: EquityMetric,
    /// Metric for the ecological-integrity objective
    pub ecological_metric: EcologicalMetric,
}

/// Dispersion of benefits across districts (lower is fairer).
///
/// Negative benefits are treated as zero. If no district benefits, the result is zero.
pub fn inequity(metric: EquityMetric, district_benefits: &[Money]) -> f64 {
    let values: Vec<f64> = district_benefits
        .iter()
        .map(|benefit| benefit.value().max(0.0))
        .collect();
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }

    match metric {
        EquityMetric::Gini => {
            let total_difference: f64 = values
                .iter()
                .flat_map(|a| values.iter().map(move |b| (a - b).abs()))
                .sum();
            total_difference / (2.0 * n * n * mean)
        }
        EquityMetric::CoefficientOfVariation => {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            variance.sqrt() / mean
        }
    }
}

/// Ecological integrity proxy for a portfolio (higher is better)
pub fn ecological_integrity(
    metric: EcologicalMetric,
    portfolio: &Portfolio,
    interventions: &InterventionMap,
    num_grid_cells: usize,
) -> Result<f64> {
    let mut total = 0.0;
    for (id, quantity) in portfolio.iter() {
        let intervention = interventions
            .get(id)
            .with_context(|| format!("Unknown intervention: {id}"))?;
        let score = intervention.co_benefit_score.value();
        total += match metric {
            EcologicalMetric::TotalCoBenefit => score * f64::from(quantity),
            EcologicalMetric::CoverageWeightedCoBenefit => {
                let coverage = intervention.coverage(quantity, num_grid_cells).value();
                let share = intervention.footprint_size(num_grid_cells) as f64
                    / num_grid_cells as f64;
                score * coverage * share
            }
        };
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::catalog;
    use crate::intervention::InterventionID;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn money(values: &[f64]) -> Vec<Money> {
        values.iter().copied().map(Money).collect()
    }

    #[rstest]
    #[case(EquityMetric::Gini, &[10.0, 10.0, 10.0], 0.0)]
    #[case(EquityMetric::Gini, &[0.0, 0.0, 30.0], 2.0 / 3.0)]
    #[case(EquityMetric::Gini, &[1.0, 3.0], 0.25)]
    #[case(EquityMetric::Gini, &[0.0, 0.0], 0.0)]
    #[case(EquityMetric::CoefficientOfVariation, &[5.0, 5.0], 0.0)]
    #[case(EquityMetric::CoefficientOfVariation, &[1.0, 3.0], 0.5)]
    #[case(EquityMetric::CoefficientOfVariation, &[-4.0, 2.0], 1.0)]
    #[case(EquityMetric::CoefficientOfVariation, &[], 0.0)]
    fn test_inequity(#[case] metric: EquityMetric, #[case] values: &[f64], #[case] expected: f64) {
        assert_approx_eq!(f64, inequity(metric, &money(values)), expected, epsilon = 1e-12);
    }

    #[rstest]
    fn test_ecological_integrity(catalog: InterventionMap) {
        let portfolio = Portfolio::from_iter([
            (InterventionID::new("wetland"), 2),
            (InterventionID::new("bioswale"), 3),
        ]);

        // Wetland scores 3 per unit, bioswale 1 per unit
        let total =
            ecological_integrity(EcologicalMetric::TotalCoBenefit, &portfolio, &catalog, 3)
                .unwrap();
        assert_approx_eq!(f64, total, 9.0);

        // Wetland covers half of 2 of 3 cells; bioswale covers 40% of all cells
        let weighted = ecological_integrity(
            EcologicalMetric::CoverageWeightedCoBenefit,
            &portfolio,
            &catalog,
            3,
        )
        .unwrap();
        assert_approx_eq!(f64, weighted, 3.0 * 0.5 * 2.0 / 3.0 + 0.4, epsilon = 1e-12);

        let empty = ecological_integrity(
            EcologicalMetric::TotalCoBenefit,
            &Portfolio::default(),
            &catalog,
            3,
        )
        .unwrap();
        assert_eq!(empty, 0.0);
    }
}
