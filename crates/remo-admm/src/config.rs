//! ADMM run configuration.
//!
//! One [`AdmmConfig`] is created before any worker starts and shared read-only
//! afterwards; it is the primary tuning surface of the decomposition.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ADMM coordination parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmmConfig {
    /// Initial penalty parameter (ρ).
    ///
    /// Larger ρ = faster consensus but worse local solutions per iteration.
    pub rho_init: f64,

    /// Upper bound on ρ; adaptation never moves past it in either direction.
    pub rho_max: f64,

    /// Multiplicative ρ adaptation factor.
    pub tau: f64,

    /// Residual imbalance threshold: ρ is adapted when one residual exceeds
    /// `mu` times the other.
    pub mu: f64,

    /// Number of leading iterations during which ρ may be adapted; frozen
    /// afterwards so the penalty schedule settles.
    pub rho_update_nu: usize,

    /// Relative convergence tolerance. The effective tolerance is
    /// `conv_rel · (number of coupling variables + 1)`.
    pub conv_rel: f64,

    /// Raise the local ρ to the largest ρ reported by any neighbor, keeping
    /// both sides of a boundary on the same penalty weight over time.
    pub choose_max_rho: bool,

    /// Fraction of neighbors that must have responded before a polling cycle
    /// ends early.
    pub nwait_percent: f64,

    /// Per-attempt receive timeout within a polling cycle.
    #[serde(with = "duration_millis")]
    pub poll_wait: Duration,

    /// Maximum receive attempts per polling cycle.
    pub poll_rounds: usize,

    /// Per-worker iteration bound; reaching it without convergence ends the
    /// worker in the `MaxIterReached` state.
    pub iter_max_local: usize,

    /// Solve the monolithic problem as well and report the optimality gap of
    /// the decomposed objective against it (diagnostic only).
    pub centralized_reference: bool,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        Self {
            rho_init: 1.0,
            rho_max: 10.0,
            tau: 1.05,
            mu: 10.0,
            rho_update_nu: 50,
            conv_rel: 0.1,
            choose_max_rho: true,
            nwait_percent: 0.5,
            poll_wait: Duration::from_millis(10),
            poll_rounds: 10,
            iter_max_local: 50,
            centralized_reference: true,
        }
    }
}

impl AdmmConfig {
    /// Effective convergence tolerance for a run with `n_coupling` coupling
    /// variables. Scales with the coupling count since every boundary flow
    /// contributes numerical slack to the aggregate gap.
    pub fn convergence_tolerance(&self, n_coupling: usize) -> f64 {
        self.conv_rel * (n_coupling as f64 + 1.0)
    }

    /// Neighbor quorum for a worker with `n_neighbors` peers.
    pub fn quorum(&self, n_neighbors: usize) -> usize {
        (self.nwait_percent * n_neighbors as f64).ceil() as usize
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
