//! General functions related to finance.
//!
//! Discount factors are calculated as `exp(-t ln(1 + r))`, which remains accurate for rates close
//! to zero and over long horizons.
use crate::error::ensure_sim;
use crate::units::{Dimensionless, Money};
use anyhow::Result;

/// Check that a discount rate can be used for discounting
fn check_rate(rate: Dimensionless) -> Result<()> {
    ensure_sim!(
        rate.is_finite() && rate > Dimensionless(-1.0),
        NumericalInstability,
        "Discount rate must be finite and greater than -100% (got {rate})"
    );

    Ok(())
}

/// The discount factor for a cash flow `year` years in the future
fn discount_factor(rate: Dimensionless, year: u32) -> Dimensionless {
    Dimensionless((-f64::from(year) * rate.value().ln_1p()).exp())
}

/// Discount factors for years `0..=horizon`
pub fn discount_factors(rate: Dimensionless, horizon: u32) -> Result<Vec<Dimensionless>> {
    check_rate(rate)?;
    Ok((0..=horizon).map(|t| discount_factor(rate, t)).collect())
}

/// Calculates the net present value of a series of annual cash flows.
///
/// The first cash flow occurs at year zero and is not discounted.
///
/// # Arguments
///
/// * `cash_flows` - Cash flows for years `0..=T`
/// * `rate` - The discount rate
///
/// # Returns
///
/// The NPV, or an error if the horizon `T` is not positive, the rate is not greater than -100% or
/// the result is not finite.
pub fn npv(cash_flows: &[Money], rate: Dimensionless) -> Result<Money> {
    ensure_sim!(
        cash_flows.len() > 1,
        InvalidHorizon,
        "At least two annual cash flows are needed (got {})",
        cash_flows.len()
    );
    check_rate(rate)?;

    let npv: Money = (0u32..)
        .zip(cash_flows)
        .map(|(t, cash_flow)| *cash_flow * discount_factor(rate, t))
        .sum();
    ensure_sim!(
        npv.is_finite(),
        NumericalInstability,
        "NPV is not finite"
    );

    Ok(npv)
}

/// The present value of a single amount received `year` years in the future
pub fn present_value(amount: Money, year: u32, rate: Dimensionless) -> Result<Money> {
    check_rate(rate)?;
    Ok(amount * discount_factor(rate, year))
}

/// The present value of a fixed amount received at the end of each of the next `years` years
pub fn annuity_present_value(annual: Money, years: u32, rate: Dimensionless) -> Result<Money> {
    check_rate(rate)?;
    Ok((1..=years).map(|t| annual * discount_factor(rate, t)).sum())
}

/// Calculates the capital recovery factor (CRF) for a given lifetime and discount rate.
///
/// The CRF converts a present value into an equivalent constant annual amount over the lifetime.
pub fn capital_recovery_factor(lifetime: u32, discount_rate: Dimensionless) -> Dimensionless {
    if lifetime == 0 {
        return Dimensionless(0.0);
    }
    if discount_rate == Dimensionless(0.0) {
        return Dimensionless(1.0) / Dimensionless(f64::from(lifetime));
    }
    let factor = (Dimensionless(1.0) + discount_rate).powi(lifetime as i32);
    (discount_rate * factor) / (factor - Dimensionless(1.0))
}

/// The constant annual amount equivalent to a present value spread over `years` years
pub fn annual_equivalent(present: Money, years: u32, discount_rate: Dimensionless) -> Money {
    present * capital_recovery_factor(years, discount_rate)
}

/// The ratio of discounted benefits to discounted costs, or `None` if there are no costs
pub fn benefit_cost_ratio(benefits: Money, costs: Money) -> Option<Dimensionless> {
    (costs > Money(0.0)).then(|| benefits / costs)
}

/// The first year in which cumulative discounted cash flow becomes non-negative.
///
/// Returns `None` if the investment does not pay back within the horizon.
pub fn discounted_payback_year(discounted_cash_flows: &[Money]) -> Option<u32> {
    let mut cumulative = Money(0.0);
    for (year, cash_flow) in (0u32..).zip(discounted_cash_flows) {
        cumulative += *cash_flow;
        if cumulative >= Money(0.0) {
            return Some(year);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SimulationError, simulation_error};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn money(values: &[f64]) -> Vec<Money> {
        values.iter().copied().map(Money).collect()
    }

    #[rstest]
    #[case(&[-100.0, 110.0], 0.1, 0.0)]
    #[case(&[-1000.0, 500.0, 500.0, 500.0], 0.05, 361.6240146)]
    #[case(&[0.0, 100.0, 100.0], 0.0, 200.0)]
    #[case(&[10.0, 10.0], -0.5, 30.0)]
    fn test_npv(#[case] cash_flows: &[f64], #[case] rate: f64, #[case] expected: f64) {
        let result = npv(&money(cash_flows), Dimensionless(rate)).unwrap();
        assert_approx_eq!(Money, result, Money(expected), epsilon = 1e-6);
    }

    #[test]
    fn test_npv_rate_zero_is_undiscounted_sum() {
        let cash_flows = money(&[-5.0, 1.5, 2.25, 3.0, 7.5]);
        let total: Money = cash_flows.iter().sum();
        assert_eq!(npv(&cash_flows, Dimensionless(0.0)).unwrap(), total);
    }

    #[test]
    fn test_npv_decreasing_in_rate() {
        let cash_flows = money(&[100.0; 31]);
        let mut last = Money(f64::INFINITY);
        for step in 0..50 {
            let rate = Dimensionless(-0.2 + f64::from(step) * 0.01);
            let value = npv(&cash_flows, rate).unwrap();
            assert!(value < last);
            last = value;
        }
    }

    #[rstest]
    #[case(&[])]
    #[case(&[100.0])]
    fn test_npv_invalid_horizon(#[case] cash_flows: &[f64]) {
        let err = npv(&money(cash_flows), Dimensionless(0.03)).unwrap_err();
        assert!(matches!(
            simulation_error(&err),
            Some(SimulationError::InvalidHorizon(_))
        ));
    }

    #[rstest]
    #[case(-1.0)]
    #[case(-1.5)]
    #[case(f64::NAN)]
    fn test_npv_invalid_rate(#[case] rate: f64) {
        let err = npv(&money(&[1.0, 1.0]), Dimensionless(rate)).unwrap_err();
        assert!(matches!(
            simulation_error(&err),
            Some(SimulationError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_npv_overflow() {
        let err = npv(&money(&[f64::MAX, f64::MAX]), Dimensionless(0.0)).unwrap_err();
        assert_eq!(err.to_string(), "Numerical instability: NPV is not finite");
    }

    #[test]
    fn test_discount_factors() {
        let factors = discount_factors(Dimensionless(0.03), 30).unwrap();
        assert_eq!(factors.len(), 31);
        assert_eq!(factors[0], Dimensionless(1.0));
        assert_approx_eq!(
            Dimensionless,
            factors[30],
            Dimensionless(1.03f64.powi(-30)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_present_value() {
        // €1M in 10 years at 3%
        let result = present_value(Money(1_000_000.0), 10, Dimensionless(0.03)).unwrap();
        assert_approx_eq!(Money, result, Money(744_093.914_896), epsilon = 1e-3);
    }

    #[rstest]
    #[case(100.0, 30, 0.03, 1960.044_135)]
    #[case(100.0, 10, 0.0, 1000.0)]
    #[case(100.0, 0, 0.05, 0.0)]
    fn test_annuity_present_value(
        #[case] annual: f64,
        #[case] years: u32,
        #[case] rate: f64,
        #[case] expected: f64,
    ) {
        let result = annuity_present_value(Money(annual), years, Dimensionless(rate)).unwrap();
        assert_approx_eq!(Money, result, Money(expected), epsilon = 1e-5);
    }

    #[rstest]
    #[case(0, 0.05, 0.0)] // Edge case: lifetime==0
    #[case(10, 0.0, 0.1)] // Other edge case: discount_rate==0
    #[case(10, 0.05, 0.1295045749654567)]
    #[case(5, 0.03, 0.2183545714005762)]
    fn test_capital_recovery_factor(
        #[case] lifetime: u32,
        #[case] discount_rate: f64,
        #[case] expected: f64,
    ) {
        let result = capital_recovery_factor(lifetime, Dimensionless(discount_rate));
        assert_approx_eq!(f64, result.0, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_annual_equivalent_inverts_annuity() {
        let rate = Dimensionless(0.03);
        let present = annuity_present_value(Money(250.0), 30, rate).unwrap();
        assert_approx_eq!(
            Money,
            annual_equivalent(present, 30, rate),
            Money(250.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_benefit_cost_ratio() {
        assert_eq!(
            benefit_cost_ratio(Money(300.0), Money(100.0)),
            Some(Dimensionless(3.0))
        );
        assert_eq!(benefit_cost_ratio(Money(300.0), Money(0.0)), None);
    }

    #[rstest]
    #[case(&[-100.0, 30.0, 30.0, 30.0, 30.0], Some(4))]
    #[case(&[-100.0, 100.0], Some(1))]
    #[case(&[0.0, 5.0], Some(0))]
    #[case(&[-100.0, 10.0, 10.0], None)]
    fn test_discounted_payback_year(#[case] cash_flows: &[f64], #[case] expected: Option<u32>) {
        assert_eq!(discounted_payback_year(&money(cash_flows)), expected);
    }
}
