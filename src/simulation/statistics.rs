//! Summary statistics for Monte Carlo samples.
use crate::units::{Dimensionless, Money};
use itertools::Itertools;

/// Summary of a sample of monetary values
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    /// Sample mean
    pub mean: Money,
    /// Sample standard deviation (with Bessel's correction)
    pub std_dev: Money,
    /// Standard error of the mean
    pub std_error: Money,
    /// Requested percentiles as `(fraction, value)` pairs
    pub percentiles: Vec<(Dimensionless, Money)>,
}

impl Statistics {
    /// Summarise a non-empty sample.
    ///
    /// Percentiles are linearly interpolated between order statistics.
    pub fn from_samples(samples: &[Money], percentiles: &[Dimensionless]) -> Self {
        let n = samples.len();
        let mean = samples.iter().sum::<Money>() / Dimensionless(n as f64);
        let variance = if n > 1 {
            samples
                .iter()
                .map(|x| (*x - mean).value().powi(2))
                .sum::<f64>()
                / (n - 1) as f64
        } else {
            0.0
        };
        let std_dev = Money(variance.sqrt());
        let std_error = std_dev / Dimensionless((n as f64).sqrt());

        let sorted = samples
            .iter()
            .map(|x| x.value())
            .sorted_by(f64::total_cmp)
            .collect_vec();
        let percentiles = percentiles
            .iter()
            .map(|&p| (p, Money(percentile(&sorted, p.value()))))
            .collect();

        Self {
            mean,
            std_dev,
            std_error,
            percentiles,
        }
    }

    /// Look up a requested percentile
    pub fn percentile(&self, fraction: Dimensionless) -> Option<Money> {
        self.percentiles
            .iter()
            .find(|(p, _)| *p == fraction)
            .map(|(_, value)| *value)
    }
}

/// The `p`th quantile of sorted data, interpolating linearly between points
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted {
        [] => f64::NAN,
        [only] => *only,
        _ => {
            let rank = p * (sorted.len() - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn money(values: &[f64]) -> Vec<Money> {
        values.iter().copied().map(Money).collect()
    }

    #[test]
    fn test_from_samples() {
        let stats = Statistics::from_samples(
            &money(&[4.0, 1.0, 3.0, 2.0, 5.0]),
            &[Dimensionless(0.5), Dimensionless(0.9)],
        );
        assert_eq!(stats.mean, Money(3.0));
        assert_approx_eq!(Money, stats.std_dev, Money(2.5f64.sqrt()));
        assert_approx_eq!(Money, stats.std_error, Money(0.5f64.sqrt()));
        assert_eq!(stats.percentile(Dimensionless(0.5)), Some(Money(3.0)));
        assert_approx_eq!(
            Money,
            stats.percentile(Dimensionless(0.9)).unwrap(),
            Money(4.6)
        );
        assert_eq!(stats.percentile(Dimensionless(0.1)), None);
    }

    #[test]
    fn test_from_single_sample() {
        let stats = Statistics::from_samples(&money(&[7.0]), &[Dimensionless(0.05)]);
        assert_eq!(stats.mean, Money(7.0));
        assert_eq!(stats.std_dev, Money(0.0));
        assert_eq!(stats.percentiles, [(Dimensionless(0.05), Money(7.0))]);
    }

    #[rstest]
    #[case(0.0, 10.0)]
    #[case(1.0, 40.0)]
    #[case(0.5, 25.0)]
    #[case(0.25, 17.5)]
    fn test_percentile(#[case] p: f64, #[case] expected: f64) {
        assert_approx_eq!(f64, percentile(&[10.0, 20.0, 30.0, 40.0], p), expected);
    }
}
