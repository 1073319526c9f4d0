//! Per-region ADMM worker.
//!
//! Each worker owns one [`Subproblem`] and its side of every coupling
//! variable on its boundary: the local flow estimate, the consensus flow, the
//! dual price and the penalty parameter. Workers iterate at their own pace
//! with no shared counter; the only cross-worker traffic is the per-edge
//! message exchange at the end of every iteration.

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::config::AdmmConfig;
use crate::message::Message;
use remo_core::{ClusterId, CouplingKey};
use remo_model::{Subproblem, SubproblemError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// One adjacent region, as seen from this worker: the channel pair plus the
/// coupling keys both sides hold a variable for.
pub struct Neighbor {
    pub id: ClusterId,
    pub tx: ChannelSender,
    pub rx: ChannelReceiver,
    pub shared_keys: Vec<CouplingKey>,
}

/// Terminal state of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Every entry of the gap table fell below the convergence tolerance.
    Converged,
    /// The local iteration bound was exhausted first. Not an error; the
    /// best-known values are still reported.
    MaxIterReached,
    /// The subproblem failed (infeasible, missing variable, numerical). The
    /// worker terminated immediately with the given reason.
    Failed(String),
}

impl WorkerOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, WorkerOutcome::Converged)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WorkerOutcome::Failed(_))
    }
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerOutcome::Converged => write!(f, "CONVERGED"),
            WorkerOutcome::MaxIterReached => write!(f, "MAX_ITER_REACHED"),
            WorkerOutcome::Failed(reason) => write!(f, "FAILED({reason})"),
        }
    }
}

/// Residual trace of one completed iteration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IterationRecord {
    pub nu: usize,
    /// `‖f_local − z‖` over this worker's coupling variables.
    pub primal: f64,
    /// `ρ·‖z − z_prev‖` over this worker's coupling variables.
    pub dual: f64,
    pub rho: f64,
    pub objective: f64,
    /// Largest entry of the gap table after this iteration's merge.
    pub max_gap: f64,
}

/// Final state handed to the aggregator when the worker's thread joins.
#[derive(Debug)]
pub struct WorkerReport {
    pub id: ClusterId,
    pub outcome: WorkerOutcome,
    /// Completed iterations.
    pub iterations: usize,
    /// Local objective contribution (true dispatch cost, penalty excluded).
    pub objective: f64,
    /// Final penalty parameter.
    pub rho: f64,
    /// Final consensus flows, one per coupling variable.
    pub flow_global: HashMap<CouplingKey, f64>,
    /// Final dual prices.
    pub lambda: HashMap<CouplingKey, f64>,
    /// Per-iteration residual history.
    pub history: Vec<IterationRecord>,
    pub elapsed: Duration,
}

/// The per-region iteration state machine.
pub struct AdmmWorker<S: Subproblem> {
    id: ClusterId,
    subproblem: S,
    neighbors: Vec<Neighbor>,
    config: AdmmConfig,
    /// This worker's coupling keys (union over all neighbors).
    keys: Vec<CouplingKey>,
    /// Consensus flows (z).
    flow_global: HashMap<CouplingKey, f64>,
    /// Locally solved flows (f) from the latest extract.
    flows_local: HashMap<CouplingKey, f64>,
    /// Dual prices (λ).
    lambda: HashMap<CouplingKey, f64>,
    rho: f64,
    /// ρ value currently baked into the subproblem's quadratic penalty.
    rho_applied: f64,
    /// Best-known primal gap per region of this worker's connected
    /// component; merged with element-wise minimum, so entries only decrease.
    gap_table: HashMap<ClusterId, f64>,
    tolerance: f64,
    /// Freshest unconsumed message per neighbor, filled by the receive step
    /// and consumed by the next iteration's consensus/harmonization/merge.
    received: HashMap<ClusterId, Message>,
    nu: usize,
    objective: f64,
    history: Vec<IterationRecord>,
}

impl<S: Subproblem> AdmmWorker<S> {
    /// Build a worker over its subproblem and channel endpoints.
    ///
    /// `component` lists every region reachable from this one in the cluster
    /// graph (itself included); only those regions can ever report a gap to
    /// this worker, so only they are tracked for convergence.
    /// `n_coupling_total` is the run-wide coupling-variable count feeding the
    /// tolerance.
    pub fn new(
        id: ClusterId,
        subproblem: S,
        neighbors: Vec<Neighbor>,
        component: &[ClusterId],
        n_coupling_total: usize,
        config: AdmmConfig,
    ) -> Self {
        let keys = subproblem.coupling_keys().to_vec();
        let flow_global = keys.iter().map(|k| (k.clone(), 0.0)).collect();
        let lambda: HashMap<CouplingKey, f64> =
            keys.iter().map(|k| (k.clone(), 0.0)).collect();
        let gap_table = component
            .iter()
            .map(|&region| (region, f64::INFINITY))
            .collect();
        let tolerance = config.convergence_tolerance(n_coupling_total);
        let rho = config.rho_init;
        Self {
            id,
            subproblem,
            neighbors,
            config,
            keys,
            flow_global,
            flows_local: HashMap::new(),
            lambda,
            rho,
            rho_applied: rho,
            gap_table,
            tolerance,
            received: HashMap::new(),
            nu: 0,
            objective: 0.0,
            history: Vec::new(),
        }
    }

    /// Run the iteration loop to a terminal state and report.
    pub fn run(mut self) -> WorkerReport {
        let started = Instant::now();
        info!(
            worker = %self.id,
            neighbors = self.neighbors.len(),
            coupling = self.keys.len(),
            tolerance = self.tolerance,
            "worker starting"
        );

        let mut outcome = WorkerOutcome::MaxIterReached;
        while self.nu < self.config.iter_max_local {
            match self.iterate() {
                Ok(true) => {
                    outcome = WorkerOutcome::Converged;
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    error!(worker = %self.id, nu = self.nu, %err, "subproblem failed");
                    outcome = WorkerOutcome::Failed(err.to_string());
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            worker = %self.id,
            outcome = %outcome,
            iterations = self.history.len(),
            objective = self.objective,
            ?elapsed,
            "worker finished"
        );
        WorkerReport {
            id: self.id,
            outcome,
            iterations: self.history.len(),
            objective: self.objective,
            rho: self.rho,
            flow_global: self.flow_global,
            lambda: self.lambda,
            history: self.history,
            elapsed,
        }
    }

    /// One full iteration. `Ok(true)` means locally converged.
    fn iterate(&mut self) -> Result<bool, SubproblemError> {
        let inbox = std::mem::take(&mut self.received);
        let z_old = self.flow_global.clone();

        // Consensus update: pairwise weighted average of the two sides of
        // every boundary line a fresh message covers. Skipped at ν=0 since no
        // local solution exists yet.
        if self.nu > 0 {
            for message in inbox.values() {
                for (key, &flow_neighbor) in &message.flows {
                    let (Some(&flow_self), Some(&lambda_neighbor), Some(&lambda_self)) = (
                        self.flows_local.get(key),
                        message.lambda.get(key),
                        self.lambda.get(key),
                    ) else {
                        continue;
                    };
                    let consensus = (lambda_self
                        + lambda_neighbor
                        + self.rho * flow_self
                        + message.rho * flow_neighbor)
                        / (self.rho + message.rho);
                    self.flow_global.insert(key.clone(), consensus);
                }
            }
        }

        // Penalty harmonization: raise only, never lower, so the penalty
        // schedule stays monotone across a boundary.
        if self.config.choose_max_rho {
            for message in inbox.values() {
                if message.rho > self.rho {
                    debug!(
                        worker = %self.id,
                        from = %message.sender,
                        rho = message.rho,
                        "raising rho to neighbor's"
                    );
                    self.rho = message.rho;
                }
            }
        }

        // Fix & solve. The quadratic penalty is rewritten incrementally only
        // when ρ actually moved since the last solve.
        if self.rho != self.rho_applied {
            self.subproblem.apply_penalty_update(self.rho_applied, self.rho);
            self.rho_applied = self.rho;
        }
        self.subproblem.fix_coupling(&self.flow_global, &self.lambda)?;
        let solved = self.subproblem.solve()?;
        self.objective = solved.objective;

        self.flows_local = self.subproblem.extract_boundary_flows(&self.keys)?;

        // Dual ascent, once a consensus exists to ascend against.
        if self.nu > 0 {
            for key in &self.keys {
                let flow = self.flows_local.get(key).copied().unwrap_or(0.0);
                let consensus = self.flow_global.get(key).copied().unwrap_or(0.0);
                if let Some(price) = self.lambda.get_mut(key) {
                    *price += self.rho * (flow - consensus);
                }
            }
        }

        let primal = self.residual_norm(&self.flows_local, &self.flow_global);
        let dual = self.rho * self.residual_norm(&self.flow_global, &z_old);

        // Residual balancing, frozen after the leading iterations. rho_max
        // caps the move in both directions.
        if self.nu < self.config.rho_update_nu {
            if primal > self.config.mu * dual {
                self.rho = (self.rho * self.config.tau).min(self.config.rho_max);
            } else if dual > self.config.mu * primal {
                self.rho = (self.rho / self.config.tau).min(self.config.rho_max);
            }
        }

        // This worker's own gap entry only ever improves, like every other.
        let own = self
            .gap_table
            .entry(self.id)
            .or_insert(f64::INFINITY);
        *own = own.min(primal);

        // Gossip merge: element-wise minimum over every table received this
        // iteration, then test the worst entry.
        for message in inbox.values() {
            for (&region, &gap) in &message.gap_table {
                if let Some(entry) = self.gap_table.get_mut(&region) {
                    if gap < *entry {
                        *entry = gap;
                    }
                }
            }
        }
        let max_gap = self
            .gap_table
            .values()
            .copied()
            .fold(0.0_f64, f64::max);
        let converged = max_gap < self.tolerance;

        self.history.push(IterationRecord {
            nu: self.nu,
            primal,
            dual,
            rho: self.rho,
            objective: self.objective,
            max_gap,
        });
        debug!(
            worker = %self.id,
            nu = self.nu,
            primal,
            dual,
            rho = self.rho,
            max_gap,
            "iteration complete"
        );

        for neighbor in &self.neighbors {
            let flows = restrict(&self.flows_local, &neighbor.shared_keys);
            let lambda = restrict(&self.lambda, &neighbor.shared_keys);
            neighbor.tx.send(Message {
                sender: self.id,
                flows,
                lambda,
                rho: self.rho,
                gap_table: self.gap_table.clone(),
            });
        }

        if converged {
            return Ok(true);
        }

        self.poll_neighbors();
        self.nu += 1;
        Ok(false)
    }

    /// Bounded polling receive: cycle the neighbors until the quorum has
    /// responded or the round budget runs out, keeping the freshest message
    /// per sender. A worker with no neighbors never waits at all.
    fn poll_neighbors(&mut self) {
        if self.neighbors.is_empty() {
            return;
        }
        let quorum = self.config.quorum(self.neighbors.len());
        let mut responded: HashSet<ClusterId> = HashSet::new();
        for _ in 0..self.config.poll_rounds {
            for neighbor in &self.neighbors {
                if let Some(message) = neighbor.rx.try_receive_latest(self.config.poll_wait) {
                    responded.insert(message.sender);
                    self.received.insert(message.sender, message);
                }
            }
            if responded.len() >= quorum {
                break;
            }
        }
    }

    fn residual_norm(
        &self,
        a: &HashMap<CouplingKey, f64>,
        b: &HashMap<CouplingKey, f64>,
    ) -> f64 {
        self.keys
            .iter()
            .map(|key| {
                let x = a.get(key).copied().unwrap_or(0.0);
                let y = b.get(key).copied().unwrap_or(0.0);
                (x - y) * (x - y)
            })
            .sum::<f64>()
            .sqrt()
    }
}

fn restrict(
    values: &HashMap<CouplingKey, f64>,
    keys: &[CouplingKey],
) -> HashMap<CouplingKey, f64> {
    keys.iter()
        .filter_map(|key| values.get(key).map(|&v| (key.clone(), v)))
        .collect()
}
