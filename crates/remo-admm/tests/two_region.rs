//! End-to-end decomposed runs over small multi-region systems.

use remo_admm::{run_admm, AdmmConfig};
use remo_core::{Demand, Generator, MultiRegionData, TransmissionLine};
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Cheap generation at A, demand at B, one boundary line. The centralized
/// optimum ships 40 MW from A to B at every timestep.
fn two_region_data() -> MultiRegionData {
    MultiRegionData {
        timesteps: vec![0],
        sites: vec!["A".into(), "B".into()],
        generators: vec![
            Generator {
                name: "cheap_a".into(),
                site: "A".into(),
                p_max: 100.0,
                cost_linear: 10.0,
                cost_quadratic: 0.05,
            },
            Generator {
                name: "peaker_b".into(),
                site: "B".into(),
                p_max: 100.0,
                cost_linear: 50.0,
                cost_quadratic: 0.05,
            },
        ],
        demands: vec![Demand {
            site: "B".into(),
            series: vec![40.0],
        }],
        lines: vec![TransmissionLine {
            site_in: "A".into(),
            site_out: "B".into(),
            commodity: "Elec".into(),
            stf: 2030,
            capacity: 100.0,
            efficiency: 1.0,
        }],
    }
}

fn test_config() -> AdmmConfig {
    AdmmConfig {
        rho_init: 1.0,
        rho_max: 10.0,
        tau: 1.05,
        mu: 10.0,
        conv_rel: 0.1,
        iter_max_local: 50,
        poll_wait: Duration::from_millis(5),
        poll_rounds: 4,
        ..Default::default()
    }
}

#[test]
fn two_regions_converge_to_the_centralized_optimum() {
    init_logging();
    let data = two_region_data();
    let config = test_config();
    let clusters = vec![vec!["A".to_string()], vec!["B".to_string()]];

    let summary = run_admm(&data, &clusters, &config).unwrap();
    assert!(summary.converged, "outcomes: {:?}", summary.workers);
    assert_eq!(summary.workers.len(), 2);

    // One coupling variable: tolerance is conv_rel · 2.
    let tolerance = config.convergence_tolerance(1);

    // Both sides independently land on the 40 MW transfer.
    for worker in &summary.workers {
        assert_eq!(worker.flows.len(), 1);
        let flow = worker.flows[0].value;
        assert!(
            (flow - 40.0).abs() < tolerance,
            "{}: flow {flow}",
            worker.cluster
        );
    }

    // Consensus symmetry: the two independently held values agree.
    let flow_a = summary.workers[0].flows[0].value;
    let flow_b = summary.workers[1].flows[0].value;
    assert!((flow_a - flow_b).abs() < tolerance);

    // Decomposed objective within 1% of the monolithic solve.
    let gap = summary.optimality_gap.expect("centralized reference enabled");
    assert!(gap.abs() < 0.01, "optimality gap {gap}");
}

#[test]
fn isolated_region_converges_alongside_a_coupled_pair() {
    init_logging();
    let mut data = two_region_data();
    data.sites.push("C".into());
    data.generators.push(Generator {
        name: "island_c".into(),
        site: "C".into(),
        p_max: 50.0,
        cost_linear: 20.0,
        cost_quadratic: 0.0,
    });
    data.demands.push(Demand {
        site: "C".into(),
        series: vec![10.0],
    });

    let config = test_config();
    let clusters = vec![
        vec!["A".to_string()],
        vec!["B".to_string()],
        vec!["C".to_string()],
    ];

    let summary = run_admm(&data, &clusters, &config).unwrap();
    assert!(summary.converged, "outcomes: {:?}", summary.workers);

    // The island has no neighbors and no coupling: it settles immediately.
    let island = &summary.workers[2];
    assert_eq!(island.outcome, "CONVERGED");
    assert_eq!(island.iterations, 1);
    assert!(island.flows.is_empty());
    assert!((island.objective - 200.0).abs() < 1.0);
}

#[test]
fn undeliverable_demand_fails_the_run() {
    init_logging();
    let mut data = two_region_data();
    // More demand at B than generation plus imports can cover.
    data.demands[0].series = vec![500.0];

    let summary = run_admm(
        &data,
        &[vec!["A".to_string()], vec!["B".to_string()]],
        &test_config(),
    );
    let err = summary.unwrap_err();
    assert!(err.to_string().contains("failed"), "{err}");
}
