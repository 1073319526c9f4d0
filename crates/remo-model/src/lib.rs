//! # remo-model: Regional Subproblem Wrapper
//!
//! Wraps one region's optimization model behind the small surface the ADMM
//! worker needs: fix coupling variables, solve, read boundary flows. The
//! worker never sees solver internals.
//!
//! ## The Subproblem contract
//!
//! The ADMM x-update solves, per region k:
//!
//! ```text
//!   min  f_k(x_k) + Σ_c [ λ_c·(f_c − z_c) + (ρ/2)·(f_c − z_c)² ]
//! ```
//!
//! where `f_c` are the region's boundary flows (the coupling variables),
//! `z_c` the current consensus values and `λ_c` the dual prices. The
//! [`Subproblem`] trait exposes exactly the operations the iteration loop
//! performs between solves; [`dispatch::DispatchSubproblem`] is the bundled
//! implementation (quadratic dispatch costs, per-site balance, line capacity
//! bounds) assembled as a sparse conic QP and handed to
//! [Clarabel](https://github.com/oxfordcontrol/Clarabel.rs).
//!
//! A worker-fatal distinction matters here: a coupling key the model does not
//! know ([`SubproblemError::MissingVariable`]) is a partitioning bug and never
//! retried, while [`SubproblemError::Infeasible`] marks a provably broken
//! regional problem, distinct from plain non-convergence.

use remo_core::CouplingKey;
use serde::Serialize;
use std::collections::HashMap;

pub mod dispatch;
pub mod error;

pub use dispatch::{solve_centralized, DispatchSubproblem};
pub use error::SubproblemError;

/// Outcome of one successful subproblem solve.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SolveResult {
    /// Local objective contribution: the region's true dispatch cost,
    /// excluding ADMM penalty and dual terms.
    pub objective: f64,
    /// Inner solver iteration count.
    pub solver_iterations: usize,
}

/// Operations a regional model must expose to the ADMM iteration loop.
pub trait Subproblem: Send {
    /// Coupling keys this model holds a decision variable for.
    fn coupling_keys(&self) -> &[CouplingKey];

    /// Fix the consensus flow and dual price for every coupling variable.
    ///
    /// Fails with [`SubproblemError::MissingVariable`] if a key has no
    /// matching decision variable; that indicates a partitioning bug and is
    /// fatal for the worker.
    fn fix_coupling(
        &mut self,
        flow_global: &HashMap<CouplingKey, f64>,
        lambda: &HashMap<CouplingKey, f64>,
    ) -> Result<(), SubproblemError>;

    /// Rewrite the quadratic penalty weight from `rho_old` to `rho_new`
    /// incrementally. Must be numerically equivalent to rebuilding the
    /// objective with `rho_new` from scratch.
    fn apply_penalty_update(&mut self, rho_old: f64, rho_new: f64);

    /// Run the underlying solver.
    fn solve(&mut self) -> Result<SolveResult, SubproblemError>;

    /// Read back solved flow values for the requested coupling keys.
    /// Returns exactly one value per requested key.
    fn extract_boundary_flows(
        &self,
        keys: &[CouplingKey],
    ) -> Result<HashMap<CouplingKey, f64>, SubproblemError>;
}
