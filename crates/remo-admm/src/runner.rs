//! Run orchestration: partition, wire, spawn, join, aggregate.
//!
//! The orchestration thread is only active before the first iteration
//! (partitioning and channel wiring) and after the last (joining and
//! aggregation); it takes no part in the iterative exchange.

use crate::channel::{channel, ChannelReceiver, ChannelSender};
use crate::config::AdmmConfig;
use crate::report::{aggregate, RunSummary};
use crate::worker::{AdmmWorker, Neighbor, WorkerReport};
use anyhow::{anyhow, Context};
use remo_core::{Cluster, ClusterId, MultiRegionData};
use remo_model::{solve_centralized, DispatchSubproblem};
use std::collections::HashMap;
use std::thread;
use tracing::info;

/// Solve a multi-region dispatch problem by asynchronous regional ADMM.
///
/// `cluster_lists` is the externally supplied clustering: an ordered list of
/// site-name groups, one worker per group. Setup-time errors (bad dataset,
/// bad clustering) abort before any worker is spawned; a worker failure
/// surfaces as an aggregation error after all threads have joined.
pub fn run_admm(
    data: &MultiRegionData,
    cluster_lists: &[Vec<String>],
    config: &AdmmConfig,
) -> anyhow::Result<RunSummary> {
    remo_core::dataset::validate(data).context("dataset validation failed")?;
    let clusters = Cluster::from_site_lists(cluster_lists);
    let partition = crate::partition::partition_regions(data, &clusters)
        .context("partitioning the transmission network failed")?;

    // One directed channel pair per bordering cluster pair, keyed by
    // (owner, peer) so each worker can claim its two endpoints.
    let mut endpoints: HashMap<(ClusterId, ClusterId), (ChannelSender, ChannelReceiver)> =
        HashMap::new();
    for &(a, b) in &partition.channel_edges {
        let (tx_ab, rx_ab) = channel(a, b);
        let (tx_ba, rx_ba) = channel(b, a);
        endpoints.insert((a, b), (tx_ab, rx_ba));
        endpoints.insert((b, a), (tx_ba, rx_ab));
    }

    info!(
        workers = partition.views.len(),
        channels = partition.channel_edges.len(),
        rho_init = config.rho_init,
        "spawning regional workers"
    );

    let mut handles = Vec::with_capacity(partition.views.len());
    for view in &partition.views {
        let id = view.cluster.id;
        let neighbors: Vec<Neighbor> = view
            .neighbor_ids()
            .into_iter()
            .map(|peer| {
                // Every annotated neighbor pair has a channel edge.
                let (tx, rx) = endpoints
                    .remove(&(id, peer))
                    .ok_or_else(|| anyhow!("no channel between {id} and {peer}"))?;
                Ok(Neighbor {
                    id: peer,
                    tx,
                    rx,
                    shared_keys: view.shared_keys_with(peer, &data.timesteps),
                })
            })
            .collect::<anyhow::Result<_>>()?;

        let subproblem = DispatchSubproblem::new(data, &view.cluster.sites, config.rho_init);
        let worker = AdmmWorker::new(
            id,
            subproblem,
            neighbors,
            partition.component_of(id),
            partition.n_coupling,
            config.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("admm-worker-{}", id.value()))
            .spawn(move || worker.run())
            .with_context(|| format!("spawning worker thread for {id}"))?;
        handles.push(handle);
    }

    let mut reports: Vec<WorkerReport> = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle
            .join()
            .map_err(|_| anyhow!("a worker thread panicked"))?;
        reports.push(report);
    }

    let centralized = if config.centralized_reference {
        Some(solve_centralized(data).context("centralized reference solve failed")?)
    } else {
        None
    };

    let expected: Vec<ClusterId> = clusters.iter().map(|c| c.id).collect();
    let summary = aggregate(&expected, &reports, centralized)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remo_core::{Demand, Generator};

    /// Single self-sufficient region; no coupling at all.
    fn single_region_data() -> MultiRegionData {
        MultiRegionData {
            timesteps: vec![0, 1],
            sites: vec!["A".into()],
            generators: vec![Generator {
                name: "gen_a".into(),
                site: "A".into(),
                p_max: 100.0,
                cost_linear: 10.0,
                cost_quadratic: 0.0,
            }],
            demands: vec![Demand {
                site: "A".into(),
                series: vec![30.0, 50.0],
            }],
            lines: Vec::new(),
        }
    }

    #[test]
    fn single_region_run_matches_centralized() {
        let data = single_region_data();
        let config = AdmmConfig::default();
        let summary = run_admm(&data, &[vec!["A".to_string()]], &config).unwrap();

        assert!(summary.converged);
        assert_eq!(summary.workers.len(), 1);
        assert_eq!(summary.workers[0].iterations, 1);
        // 30·10 + 50·10
        assert!((summary.objective - 800.0).abs() < 1.0);
        assert!(summary.optimality_gap.unwrap().abs() < 1e-3);
    }

    #[test]
    fn bad_clustering_aborts_before_spawning() {
        let data = single_region_data();
        let config = AdmmConfig::default();
        let err = run_admm(&data, &[vec!["Nowhere".to_string()]], &config).unwrap_err();
        assert!(err.to_string().contains("partitioning"));
    }
}
