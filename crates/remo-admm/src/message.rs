//! Inter-worker message payload.

use remo_core::{ClusterId, CouplingKey};
use std::collections::HashMap;

/// Everything one region publishes to a neighbor after an iteration.
///
/// The payload is self-contained: a receiver acts on the freshest message per
/// sender without any assumption about how many iterations the sender has run
/// in the meantime.
#[derive(Debug, Clone)]
pub struct Message {
    /// Publishing region.
    pub sender: ClusterId,
    /// The sender's local boundary-flow solution, keyed per coupling
    /// variable. Restricted to the keys shared with the receiving neighbor.
    pub flows: HashMap<CouplingKey, f64>,
    /// The sender's dual variables for the same keys.
    pub lambda: HashMap<CouplingKey, f64>,
    /// The sender's current penalty parameter.
    pub rho: f64,
    /// The sender's view of per-region convergence gaps, merged downstream
    /// with element-wise minimum.
    pub gap_table: HashMap<ClusterId, f64>,
}
