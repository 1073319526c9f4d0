//! Region partitioning for distributed ADMM.
//!
//! Splits the full transmission table into per-cluster boundary and internal
//! line sets, annotates each boundary line with the neighboring cluster, and
//! derives the sparse channel topology (one bidirectional channel per pair of
//! clusters that share at least one boundary line).
//!
//! Coverage is validated eagerly: a site referenced by any transmission line
//! but missing from every declared cluster would otherwise be silently
//! invisible to partitioning, so the run aborts before any worker is spawned.

use petgraph::graphmap::UnGraphMap;
use petgraph::unionfind::UnionFind;
use remo_core::{Cluster, ClusterId, CouplingKey, MultiRegionData, TransmissionLine};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

/// Error type for partitioning operations. All variants abort the run at
/// setup time, before any worker exists.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// No clusters were declared.
    #[error("no clusters declared")]
    NoClusters,

    /// A cluster declares no sites.
    #[error("{0} declares no sites")]
    EmptyCluster(ClusterId),

    /// A cluster declares a site the dataset does not know.
    #[error("{id} declares unknown site '{site}'")]
    UnknownSite { id: ClusterId, site: String },

    /// A site appears in more than one cluster.
    #[error("site '{site}' appears in both {first} and {second}")]
    OverlappingClusters {
        site: String,
        first: ClusterId,
        second: ClusterId,
    },

    /// A site referenced by a transmission line is covered by no cluster.
    #[error("site '{0}' is referenced by a transmission line but covered by no cluster")]
    UncoveredSite(String),
}

/// A transmission line crossing one cluster's boundary, seen from that
/// cluster's side. The same physical line appears once per bordering cluster.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryLine {
    pub line: TransmissionLine,
    /// Cluster this view belongs to.
    pub cluster: ClusterId,
    /// Cluster owning the opposite endpoint; [`ClusterId::UNASSIGNED`] if the
    /// opposite site is covered by no declared cluster.
    pub neighbor: ClusterId,
}

impl BoundaryLine {
    /// Coupling keys this line contributes, one per timestep.
    pub fn coupling_keys(&self, timesteps: &[u32]) -> Vec<CouplingKey> {
        timesteps
            .iter()
            .map(|&t| {
                CouplingKey::new(
                    t,
                    self.line.stf,
                    self.line.site_in.clone(),
                    self.line.site_out.clone(),
                )
            })
            .collect()
    }
}

/// One cluster's partition view: its sites plus the classified line tables.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterView {
    pub cluster: Cluster,
    /// Lines with exactly one endpoint inside the cluster.
    pub boundary: Vec<BoundaryLine>,
    /// Lines fully contained in the cluster; never communicated.
    pub internal: Vec<TransmissionLine>,
}

impl ClusterView {
    /// Neighbor cluster IDs, deduplicated, excluding the unassigned sentinel.
    pub fn neighbor_ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<ClusterId> = self
            .boundary
            .iter()
            .map(|b| b.neighbor)
            .filter(|n| !n.is_unassigned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Coupling keys shared with a specific neighbor.
    pub fn shared_keys_with(&self, neighbor: ClusterId, timesteps: &[u32]) -> Vec<CouplingKey> {
        self.boundary
            .iter()
            .filter(|b| b.neighbor == neighbor)
            .flat_map(|b| b.coupling_keys(timesteps))
            .collect()
    }

    /// All coupling keys of this cluster.
    pub fn coupling_keys(&self, timesteps: &[u32]) -> Vec<CouplingKey> {
        self.boundary
            .iter()
            .flat_map(|b| b.coupling_keys(timesteps))
            .collect()
    }
}

/// Full partition output distributed read-only to the workers at spawn time.
#[derive(Debug, Clone, Serialize)]
pub struct RegionPartition {
    pub views: Vec<ClusterView>,
    /// Undirected cluster pairs that require a message channel.
    pub channel_edges: Vec<(ClusterId, ClusterId)>,
    /// Connected components of the cluster graph (singletons included).
    pub components: Vec<Vec<ClusterId>>,
    /// Total number of distinct coupling variables across the run; feeds the
    /// convergence tolerance.
    pub n_coupling: usize,
}

impl RegionPartition {
    /// Component containing `id`. Every declared cluster is in exactly one.
    pub fn component_of(&self, id: ClusterId) -> &[ClusterId] {
        self.components
            .iter()
            .find(|c| c.contains(&id))
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }
}

/// Classify every transmission line against every cluster.
///
/// A line is boundary for a cluster when exactly one endpoint's site belongs
/// to it (XOR test) and internal when both do. Classification is computed
/// independently per cluster, so a line bordering two clusters appears in
/// both of their boundary tables.
pub fn partition(data: &MultiRegionData, clusters: &[Cluster]) -> Vec<ClusterView> {
    clusters
        .iter()
        .map(|cluster| {
            let sites = cluster.site_set();
            let mut boundary = Vec::new();
            let mut internal = Vec::new();
            for line in &data.lines {
                if line.within(&sites) {
                    internal.push(line.clone());
                } else if line.crosses(&sites) {
                    boundary.push(BoundaryLine {
                        line: line.clone(),
                        cluster: cluster.id,
                        neighbor: ClusterId::UNASSIGNED,
                    });
                }
            }
            ClusterView {
                cluster: cluster.clone(),
                boundary,
                internal,
            }
        })
        .collect()
}

/// Fill in the neighbor cluster ID of every boundary line.
///
/// The opposite endpoint is looked up in the declared clusters; if it is not
/// found anywhere the sentinel [`ClusterId::UNASSIGNED`] stays in place and
/// can never be mistaken for a peer.
pub fn annotate_neighbors(views: &mut [ClusterView], clusters: &[Cluster]) {
    let site_owner: HashMap<&str, ClusterId> = clusters
        .iter()
        .flat_map(|c| c.sites.iter().map(move |s| (s.as_str(), c.id)))
        .collect();

    for view in views.iter_mut() {
        let local = view.cluster.site_set();
        for boundary in view.boundary.iter_mut() {
            let opposite = if local.contains(boundary.line.site_in.as_str()) {
                boundary.line.site_out.as_str()
            } else {
                boundary.line.site_in.as_str()
            };
            boundary.neighbor = site_owner
                .get(opposite)
                .copied()
                .unwrap_or(ClusterId::UNASSIGNED);
        }
    }
}

/// Derive the undirected channel edge set from the annotated boundary tables.
///
/// Clusters that do not border each other get no channel, which keeps the
/// communication topology as sparse as the grid itself.
pub fn build_channels(views: &[ClusterView]) -> Vec<(ClusterId, ClusterId)> {
    let mut graph: UnGraphMap<usize, ()> = UnGraphMap::new();
    for view in views {
        graph.add_node(view.cluster.id.value());
        for neighbor in view.neighbor_ids() {
            graph.add_edge(view.cluster.id.value(), neighbor.value(), ());
        }
    }

    let mut edges: Vec<(ClusterId, ClusterId)> = graph
        .all_edges()
        .map(|(a, b, _)| {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            (ClusterId::new(lo), ClusterId::new(hi))
        })
        .collect();
    edges.sort();
    edges
}

/// Validate cluster declarations against the dataset and each other.
fn validate_clusters(data: &MultiRegionData, clusters: &[Cluster]) -> Result<(), PartitionError> {
    if clusters.is_empty() {
        return Err(PartitionError::NoClusters);
    }

    let known_sites: HashSet<&str> = data.sites.iter().map(|s| s.as_str()).collect();
    let mut owner: HashMap<&str, ClusterId> = HashMap::new();
    for cluster in clusters {
        if cluster.sites.is_empty() {
            return Err(PartitionError::EmptyCluster(cluster.id));
        }
        for site in &cluster.sites {
            if !known_sites.contains(site.as_str()) {
                return Err(PartitionError::UnknownSite {
                    id: cluster.id,
                    site: site.clone(),
                });
            }
            if let Some(&first) = owner.get(site.as_str()) {
                return Err(PartitionError::OverlappingClusters {
                    site: site.clone(),
                    first,
                    second: cluster.id,
                });
            }
            owner.insert(site.as_str(), cluster.id);
        }
    }

    // Fail fast on line endpoints no cluster covers; partitioning would
    // otherwise silently proceed with partial data.
    for line in &data.lines {
        for endpoint in [&line.site_in, &line.site_out] {
            if !owner.contains_key(endpoint.as_str()) {
                return Err(PartitionError::UncoveredSite(endpoint.clone()));
            }
        }
    }

    Ok(())
}

/// Partition the full dataset: validate coverage, classify lines, annotate
/// neighbors, derive the channel topology and the cluster-graph components.
pub fn partition_regions(
    data: &MultiRegionData,
    clusters: &[Cluster],
) -> Result<RegionPartition, PartitionError> {
    validate_clusters(data, clusters)?;

    let mut views = partition(data, clusters);
    annotate_neighbors(&mut views, clusters);
    let channel_edges = build_channels(&views);

    // Connected components over the cluster graph; a worker only waits on
    // gap-table entries of regions it can actually hear from.
    let mut uf = UnionFind::<usize>::new(clusters.len());
    for &(a, b) in &channel_edges {
        uf.union(a.value(), b.value());
    }
    let mut grouped: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    for cluster in clusters {
        grouped
            .entry(uf.find(cluster.id.value()))
            .or_default()
            .insert(cluster.id.value());
    }
    let mut components: Vec<Vec<ClusterId>> = grouped
        .into_values()
        .map(|set| set.into_iter().map(ClusterId::new).collect())
        .collect();
    components.sort();

    // Count each physical boundary line once, not once per bordering cluster.
    let unique_boundary: HashSet<(&str, &str, u32)> = views
        .iter()
        .flat_map(|v| v.boundary.iter())
        .map(|b| (b.line.site_in.as_str(), b.line.site_out.as_str(), b.line.stf))
        .collect();
    let n_coupling = unique_boundary.len() * data.timesteps.len();

    info!(
        clusters = views.len(),
        channels = channel_edges.len(),
        components = components.len(),
        n_coupling,
        "partitioned transmission network"
    );
    for view in &views {
        debug!(
            cluster = %view.cluster.id,
            boundary = view.boundary.len(),
            internal = view.internal.len(),
            "cluster line classification"
        );
    }

    Ok(RegionPartition {
        views,
        channel_edges,
        components,
        n_coupling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remo_core::{Demand, Generator};

    fn line(site_in: &str, site_out: &str) -> TransmissionLine {
        TransmissionLine {
            site_in: site_in.into(),
            site_out: site_out.into(),
            commodity: "Elec".into(),
            stf: 2030,
            capacity: 100.0,
            efficiency: 1.0,
        }
    }

    /// Four sites in three clusters: {A, B} - {C} plus isolated {D}.
    fn test_data() -> (MultiRegionData, Vec<Cluster>) {
        let data = MultiRegionData {
            timesteps: vec![0, 1],
            sites: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            generators: vec![Generator {
                name: "gen_a".into(),
                site: "A".into(),
                p_max: 100.0,
                cost_linear: 10.0,
                cost_quadratic: 0.0,
            }],
            demands: vec![Demand {
                site: "C".into(),
                series: vec![20.0, 25.0],
            }],
            lines: vec![line("A", "B"), line("B", "C")],
        };
        let clusters = Cluster::from_site_lists(&[
            vec!["A".to_string(), "B".to_string()],
            vec!["C".to_string()],
            vec!["D".to_string()],
        ]);
        (data, clusters)
    }

    #[test]
    fn classification_is_complete_and_disjoint() {
        let (data, clusters) = test_data();
        let result = partition_regions(&data, &clusters).unwrap();

        // A-B internal to cluster 0 only; B-C boundary for clusters 0 and 1.
        for line in &data.lines {
            let internal_owners: Vec<_> = result
                .views
                .iter()
                .filter(|v| {
                    v.internal
                        .iter()
                        .any(|l| l.site_in == line.site_in && l.site_out == line.site_out)
                })
                .collect();
            let boundary_owners: Vec<_> = result
                .views
                .iter()
                .filter(|v| {
                    v.boundary
                        .iter()
                        .any(|b| b.line.site_in == line.site_in && b.line.site_out == line.site_out)
                })
                .collect();

            assert!(internal_owners.len() <= 1);
            assert!(boundary_owners.len() <= 2);
            // Every covered line is exactly one of the two.
            assert!(
                (internal_owners.len() == 1 && boundary_owners.is_empty())
                    || (internal_owners.is_empty() && boundary_owners.len() == 2)
            );
        }
    }

    #[test]
    fn neighbors_are_annotated_symmetrically() {
        let (data, clusters) = test_data();
        let result = partition_regions(&data, &clusters).unwrap();

        let view0 = &result.views[0];
        let view1 = &result.views[1];
        assert_eq!(view0.boundary.len(), 1);
        assert_eq!(view0.boundary[0].neighbor, ClusterId::new(1));
        assert_eq!(view1.boundary[0].neighbor, ClusterId::new(0));
    }

    #[test]
    fn channels_only_between_bordering_clusters() {
        let (data, clusters) = test_data();
        let result = partition_regions(&data, &clusters).unwrap();
        assert_eq!(
            result.channel_edges,
            vec![(ClusterId::new(0), ClusterId::new(1))]
        );
    }

    #[test]
    fn components_separate_isolated_cluster() {
        let (data, clusters) = test_data();
        let result = partition_regions(&data, &clusters).unwrap();
        assert_eq!(result.components.len(), 2);
        assert_eq!(
            result.component_of(ClusterId::new(2)),
            &[ClusterId::new(2)]
        );
        assert_eq!(
            result.component_of(ClusterId::new(0)),
            &[ClusterId::new(0), ClusterId::new(1)]
        );
    }

    #[test]
    fn coupling_count_is_per_line_per_timestep() {
        let (data, clusters) = test_data();
        let result = partition_regions(&data, &clusters).unwrap();
        // One boundary line (B-C), two timesteps.
        assert_eq!(result.n_coupling, 2);
    }

    #[test]
    fn uncovered_line_endpoint_fails_fast() {
        let (data, _) = test_data();
        let clusters = Cluster::from_site_lists(&[
            vec!["A".to_string(), "B".to_string()],
            vec!["D".to_string()],
        ]);
        // Site C carries a line endpoint but no cluster.
        assert!(matches!(
            partition_regions(&data, &clusters),
            Err(PartitionError::UncoveredSite(site)) if site == "C"
        ));
    }

    #[test]
    fn overlapping_clusters_rejected() {
        let (data, _) = test_data();
        let clusters = Cluster::from_site_lists(&[
            vec!["A".to_string(), "B".to_string()],
            vec!["B".to_string(), "C".to_string()],
            vec!["D".to_string()],
        ]);
        assert!(matches!(
            partition_regions(&data, &clusters),
            Err(PartitionError::OverlappingClusters { site, .. }) if site == "B"
        ));
    }

    #[test]
    fn unassigned_sentinel_survives_when_validation_is_bypassed() {
        let (data, _) = test_data();
        // Call the raw stages directly, skipping coverage validation, to
        // exercise the sentinel default.
        let clusters = Cluster::from_site_lists(&[vec!["B".to_string()]]);
        let mut views = partition(&data, &clusters);
        annotate_neighbors(&mut views, &clusters);

        // Both lines touch B; their opposite endpoints (A, C) have no owner.
        assert_eq!(views[0].boundary.len(), 2);
        for boundary in &views[0].boundary {
            assert!(boundary.neighbor.is_unassigned());
        }
        // The sentinel is excluded from peer lists and channel edges.
        assert!(views[0].neighbor_ids().is_empty());
        assert!(build_channels(&views).is_empty());
    }
}
