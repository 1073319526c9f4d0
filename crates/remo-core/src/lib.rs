//! # remo-core: Multi-Region Energy Model Core
//!
//! Provides the typed data model shared by the regional subproblem builder and
//! the distributed ADMM coordination layer.
//!
//! ## Design Philosophy
//!
//! A multi-region capacity/dispatch dataset is a set of flat, strongly typed
//! tables:
//! - **Sites**: named locations that host generators and demand
//! - **Generators**: dispatchable units with box limits and quadratic costs
//! - **Demands**: per-site demand time series
//! - **Transmission lines**: directed site-to-site links with capacity and
//!   transfer efficiency
//!
//! Regions ("clusters") group sites for decomposition. A transmission line
//! whose endpoints fall into two different clusters becomes a *boundary line*
//! and its per-timestep flow a *coupling variable* that the ADMM layer drives
//! to consensus.
//!
//! ## ID System
//!
//! Clusters carry a newtype ID ([`ClusterId`]) so region indices cannot be
//! confused with plain `usize` offsets. The reserved sentinel
//! [`ClusterId::UNASSIGNED`] never matches a declared cluster and marks the
//! "opposite endpoint not covered by any cluster" case during partitioning.
//!
//! ## Modules
//!
//! - [`dataset`] - Dataset loading and structural validation
//! - [`error`] - Unified error type for core operations

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod dataset;
pub mod error;

pub use dataset::load_full_dataset;
pub use error::{CoreError, CoreResult};

/// Region identifier for decomposed runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(usize);

impl ClusterId {
    /// Sentinel for "no owning cluster". Compares unequal to every ID that
    /// [`Cluster::from_site_lists`] can produce.
    pub const UNASSIGNED: ClusterId = ClusterId(usize::MAX);

    #[inline]
    pub fn new(value: usize) -> Self {
        ClusterId(value)
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unassigned() {
            write!(f, "cluster#?")
        } else {
            write!(f, "cluster#{}", self.0)
        }
    }
}

/// A dispatchable generator located at a site.
///
/// Cost is the usual quadratic polynomial `c1·P + c2·P²` (no-load cost is a
/// constant offset and irrelevant to dispatch, so it is omitted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    /// Unit name (unique within the dataset).
    pub name: String,
    /// Site the unit is connected to.
    pub site: String,
    /// Maximum output (MW).
    pub p_max: f64,
    /// Linear cost coefficient (currency/MWh).
    pub cost_linear: f64,
    /// Quadratic cost coefficient (currency/MW²h).
    pub cost_quadratic: f64,
}

/// A per-site demand time series, aligned with [`MultiRegionData::timesteps`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demand {
    pub site: String,
    /// One value per modeled timestep (MW).
    pub series: Vec<f64>,
}

/// A directed transmission line between two sites.
///
/// The flow variable is signed: positive means power moving from `site_in`
/// toward `site_out`. `efficiency` is applied on the importing side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionLine {
    pub site_in: String,
    pub site_out: String,
    /// Transported commodity (e.g. "Elec").
    pub commodity: String,
    /// Support timeframe (modeled year) this line belongs to.
    pub stf: u32,
    /// Transfer capacity (MW), bounds the flow in both directions.
    pub capacity: f64,
    /// Transfer efficiency in (0, 1].
    pub efficiency: f64,
}

impl TransmissionLine {
    /// True if exactly one endpoint lies inside `sites` (the XOR test that
    /// classifies a line as boundary for that site set).
    pub fn crosses(&self, sites: &std::collections::HashSet<&str>) -> bool {
        sites.contains(self.site_in.as_str()) != sites.contains(self.site_out.as_str())
    }

    /// True if both endpoints lie inside `sites`.
    pub fn within(&self, sites: &std::collections::HashSet<&str>) -> bool {
        sites.contains(self.site_in.as_str()) && sites.contains(self.site_out.as_str())
    }
}

/// Key of one coupling variable: the flow over one boundary line at one
/// timestep of one support timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CouplingKey {
    pub t: u32,
    pub stf: u32,
    pub site_in: String,
    pub site_out: String,
}

impl CouplingKey {
    pub fn new(t: u32, stf: u32, site_in: impl Into<String>, site_out: impl Into<String>) -> Self {
        Self {
            t,
            stf,
            site_in: site_in.into(),
            site_out: site_out.into(),
        }
    }
}

impl fmt::Display for CouplingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {} -> {})",
            self.t, self.stf, self.site_in, self.site_out
        )
    }
}

/// The full multi-region dataset handed to the coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiRegionData {
    /// Modeled timesteps, in order.
    pub timesteps: Vec<u32>,
    /// All site names.
    pub sites: Vec<String>,
    pub generators: Vec<Generator>,
    pub demands: Vec<Demand>,
    pub lines: Vec<TransmissionLine>,
}

impl MultiRegionData {
    /// Demand value for `site` at timestep position `t_idx`, zero if the site
    /// has no demand entry.
    pub fn demand_at(&self, site: &str, t_idx: usize) -> f64 {
        self.demands
            .iter()
            .find(|d| d.site == site)
            .and_then(|d| d.series.get(t_idx).copied())
            .unwrap_or(0.0)
    }

    /// Generators attached to any of the given sites.
    pub fn generators_in<'a>(
        &'a self,
        sites: &'a std::collections::HashSet<&str>,
    ) -> impl Iterator<Item = &'a Generator> {
        self.generators
            .iter()
            .filter(move |g| sites.contains(g.site.as_str()))
    }
}

/// A named group of sites assigned to one ADMM worker. Immutable after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub sites: Vec<String>,
}

impl Cluster {
    /// Build clusters from an ordered list of site-name lists (the external
    /// clustering input of the run). IDs are assigned by position.
    pub fn from_site_lists(lists: &[Vec<String>]) -> Vec<Cluster> {
        lists
            .iter()
            .enumerate()
            .map(|(idx, sites)| Cluster {
                id: ClusterId::new(idx),
                sites: sites.clone(),
            })
            .collect()
    }

    pub fn site_set(&self) -> std::collections::HashSet<&str> {
        self.sites.iter().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, site: &str) -> bool {
        self.sites.iter().any(|s| s == site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn cluster_id_sentinel_never_matches_real_ids() {
        let clusters = Cluster::from_site_lists(&[
            vec!["North".to_string()],
            vec!["South".to_string()],
        ]);
        for cluster in &clusters {
            assert_ne!(cluster.id, ClusterId::UNASSIGNED);
        }
        assert!(ClusterId::UNASSIGNED.is_unassigned());
        assert_eq!(ClusterId::UNASSIGNED.to_string(), "cluster#?");
    }

    #[test]
    fn line_boundary_xor_test() {
        let line = TransmissionLine {
            site_in: "North".into(),
            site_out: "South".into(),
            commodity: "Elec".into(),
            stf: 2030,
            capacity: 100.0,
            efficiency: 1.0,
        };

        let north: HashSet<&str> = ["North"].into_iter().collect();
        let both: HashSet<&str> = ["North", "South"].into_iter().collect();
        let neither: HashSet<&str> = ["East"].into_iter().collect();

        assert!(line.crosses(&north));
        assert!(!line.crosses(&both));
        assert!(!line.crosses(&neither));
        assert!(line.within(&both));
        assert!(!line.within(&north));
    }

    #[test]
    fn demand_lookup_defaults_to_zero() {
        let data = MultiRegionData {
            timesteps: vec![0, 1],
            sites: vec!["North".into()],
            demands: vec![Demand {
                site: "North".into(),
                series: vec![10.0, 12.0],
            }],
            ..Default::default()
        };
        assert_eq!(data.demand_at("North", 1), 12.0);
        assert_eq!(data.demand_at("South", 0), 0.0);
        assert_eq!(data.demand_at("North", 5), 0.0);
    }
}
