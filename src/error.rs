//! The error taxonomy for the simulation and optimisation engine.
//!
//! Functions in this crate return [`anyhow::Result`]. Where a failure belongs to one of the
//! categories below, a [`SimulationError`] is raised so that callers can recover the category with
//! [`anyhow::Error::downcast_ref`], even after context has been attached.

/// A categorised failure of the engine
#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum SimulationError {
    /// A distribution, discount or model parameter is malformed
    #[display("Invalid parameter: {_0}")]
    InvalidParameter(String),
    /// No portfolio satisfies the budget (or the supplied portfolio exceeds it)
    #[display("Budget infeasible: {_0}")]
    BudgetInfeasible(String),
    /// The time horizon is not positive
    #[display("Invalid horizon: {_0}")]
    InvalidHorizon(String),
    /// A computation produced a non-finite result
    #[display("Numerical instability: {_0}")]
    NumericalInstability(String),
}

impl std::error::Error for SimulationError {}

/// Return early with a [`SimulationError`] of the given kind unless the condition holds.
///
/// Mirrors [`anyhow::ensure`], but with a typed error.
macro_rules! ensure_sim {
    ($cond:expr, $kind:ident, $($arg:tt)+) => {
        if !$cond {
            return Err(anyhow::Error::new(crate::error::SimulationError::$kind(format!(
                $($arg)+
            ))));
        }
    };
}
pub(crate) use ensure_sim;

/// Get the [`SimulationError`] at the root of an error chain, if there is one
pub fn simulation_error(err: &anyhow::Error) -> Option<&SimulationError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SimulationError>())
}
