//! Error types for subproblem construction and solving.

use remo_core::CouplingKey;
use thiserror::Error;

/// Errors surfaced by a regional subproblem.
#[derive(Debug, Error)]
pub enum SubproblemError {
    /// A coupling key expected by the ADMM protocol has no matching decision
    /// variable in this model. Indicates a partition/build bug; fatal, never
    /// retried.
    #[error("no decision variable for coupling key {key}")]
    MissingVariable { key: CouplingKey },

    /// The solver reported primal infeasibility or unboundedness. Fatal for
    /// the owning worker's run.
    #[error("subproblem infeasible or unbounded: solver status {status}")]
    Infeasible { status: String },

    /// Solver setup or numerical failure.
    #[error("solver error: {0}")]
    Numerical(String),

    /// Flow extraction requested before any successful solve.
    #[error("no solution available; solve() has not succeeded yet")]
    NotSolved,
}
