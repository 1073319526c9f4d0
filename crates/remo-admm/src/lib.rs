//! # remo-admm: Asynchronous ADMM Regional Decomposition
//!
//! Splits a multi-region dispatch problem into per-region subproblems, solves
//! them concurrently and repeatedly, exchanges boundary-flow state between
//! neighboring regions over point-to-point channels, and drives the collection
//! to a consensus solution equivalent to the monolithic optimum.
//!
//! # Algorithm Overview
//!
//! Each region repeatedly performs the consensus variant of ADMM on its
//! boundary flows:
//!
//! ```text
//!   min  Σ_k f_k(x_k)
//!   s.t. A_k x_k = b_k           (local constraints)
//!        f_k|_boundary = z       (consensus on boundary flows)
//! ```
//!
//! 1. **Consensus update**: pairwise weighted averaging of the two sides of
//!    each boundary line, `z = (λ_a + λ_b + ρ_a·f_a + ρ_b·f_b) / (ρ_a + ρ_b)`
//! 2. **x-update**: solve the local subproblem with the augmented Lagrangian
//! 3. **λ-update**: dual ascent, `λ += ρ·(f − z)`
//!
//! Unlike the synchronous textbook loop there is no global iteration counter:
//! workers run at their own pace, act only on the freshest message per
//! neighbor, and detect global convergence by gossiping a per-region gap
//! table that is merged with element-wise minimum.
//!
//! # Convergence
//!
//! A worker is locally converged once every entry of its gap table is below
//! `conv_rel · (n_coupling + 1)`. The penalty parameter is adapted per region
//! by residual balancing (increase ρ when the primal residual dominates,
//! decrease when the dual residual does) and optionally harmonized upward to
//! the largest ρ any neighbor reports.
//!
//! # References
//!
//! - Boyd et al., "Distributed Optimization and Statistical Learning via ADMM"
//!
//! # Modules
//!
//! - [`partition`] - region partitioner: boundary/internal lines, channel topology
//! - [`channel`] - per-edge asynchronous message channels (latest-wins drain)
//! - [`worker`] - the per-region ADMM state machine
//! - [`runner`] - thread spawning, channel wiring, report collection
//! - [`report`] - result aggregation, optimality gap, JSON persistence

pub mod channel;
pub mod config;
pub mod message;
pub mod partition;
pub mod report;
pub mod runner;
pub mod worker;

pub use channel::{channel, ChannelReceiver, ChannelSender};
pub use config::AdmmConfig;
pub use message::Message;
pub use partition::{partition_regions, BoundaryLine, ClusterView, PartitionError, RegionPartition};
pub use report::{aggregate, write_run_summary, AggregateError, RunSummary, WorkerSummary};
pub use runner::run_admm;
pub use worker::{AdmmWorker, Neighbor, WorkerOutcome, WorkerReport};
