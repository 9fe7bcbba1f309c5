//! Bounded derivative-free minimisers.
//!
//! Both minimisers stop on an evaluation budget and hand back the best point
//! seen; non-convergence is reported through [`OptimizeOutcome::converged`],
//! never as an error.

mod golden;
mod nelder_mead;

pub use golden::golden_section_minimize;
pub use nelder_mead::{nelder_mead_minimize, Bounds};

use serde::{Deserialize, Serialize};

/// Budget and tolerances shared by the minimisers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum objective evaluations per run.
    pub max_evaluations: usize,
    /// Stop when the simplex (or bracket) value spread falls below this.
    pub f_tolerance: f64,
    /// Stop when the simplex (or bracket) size falls below this, relative to
    /// the initial step.
    pub x_tolerance: f64,
    /// Nelder–Mead restarts from the best vertex after convergence.
    pub restarts: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 4000,
            f_tolerance: 1e-14,
            x_tolerance: 1e-10,
            restarts: 2,
        }
    }
}

/// Best point found by a minimiser.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOutcome<X> {
    /// Argument of the best value.
    pub x: X,
    /// Objective at `x`.
    pub value: f64,
    /// Objective evaluations spent.
    pub evaluations: usize,
    /// `false` when the budget ran out before the tolerances were met.
    pub converged: bool,
}
