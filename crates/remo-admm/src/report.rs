//! Result aggregation and persistence.
//!
//! Collects the terminal state of every worker into one [`RunSummary`],
//! computes the diagnostic optimality gap against a centralized solve when
//! one is available, and writes the summary as pretty-printed JSON. A worker
//! that is missing or failed makes the whole aggregate an error; contributions
//! are never silently defaulted to zero.

use crate::worker::{IterationRecord, WorkerReport};
use anyhow::Context;
use chrono::{DateTime, Utc};
use remo_core::ClusterId;
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Aggregation failures. Both abort reporting for the whole run.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// A spawned worker produced no report (e.g. its thread died).
    #[error("{cluster} is missing from the result set")]
    MissingWorker { cluster: ClusterId },

    /// At least one worker terminated in the failed state.
    #[error("workers failed: {}", .failures.join("; "))]
    WorkersFailed { failures: Vec<String> },
}

/// One consensus flow value in serializable form.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub t: u32,
    pub stf: u32,
    pub site_in: String,
    pub site_out: String,
    pub value: f64,
}

/// Per-worker slice of the final report.
#[derive(Debug, Serialize)]
pub struct WorkerSummary {
    pub cluster: ClusterId,
    /// Terminal state: `CONVERGED`, `MAX_ITER_REACHED` or `FAILED(reason)`.
    pub outcome: String,
    pub iterations: usize,
    pub objective: f64,
    pub rho: f64,
    /// Final consensus flows, ordered by coupling key.
    pub flows: Vec<FlowRecord>,
    /// Primal/dual residual trace for later inspection or plotting.
    pub history: Vec<IterationRecord>,
    pub elapsed_ms: u64,
}

/// The aggregate outcome of one decomposed run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub created_at: DateTime<Utc>,
    /// Sum of the workers' local objective contributions.
    pub objective: f64,
    /// Objective of the monolithic solve, when one was requested.
    pub centralized_objective: Option<f64>,
    /// `(objective − centralized) / centralized`.
    pub optimality_gap: Option<f64>,
    /// True only if every worker converged.
    pub converged: bool,
    pub workers: Vec<WorkerSummary>,
}

fn flow_records(report: &WorkerReport) -> Vec<FlowRecord> {
    let mut entries: Vec<_> = report.flow_global.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(key, &value)| FlowRecord {
            t: key.t,
            stf: key.stf,
            site_in: key.site_in.clone(),
            site_out: key.site_out.clone(),
            value,
        })
        .collect()
}

/// Fold terminated workers into a [`RunSummary`].
///
/// `expected` is the full cluster list of the run; every entry must have a
/// report. Read-only over the reports, mutating nothing.
pub fn aggregate(
    expected: &[ClusterId],
    reports: &[WorkerReport],
    centralized_objective: Option<f64>,
) -> Result<RunSummary, AggregateError> {
    for &cluster in expected {
        if !reports.iter().any(|r| r.id == cluster) {
            return Err(AggregateError::MissingWorker { cluster });
        }
    }

    let failures: Vec<String> = reports
        .iter()
        .filter(|r| r.outcome.is_failed())
        .map(|r| format!("{}: {}", r.id, r.outcome))
        .collect();
    if !failures.is_empty() {
        return Err(AggregateError::WorkersFailed { failures });
    }

    let objective: f64 = reports.iter().map(|r| r.objective).sum();
    let converged = reports.iter().all(|r| r.outcome.is_converged());
    let optimality_gap = centralized_objective
        .filter(|c| c.abs() > f64::EPSILON)
        .map(|c| (objective - c) / c);

    let mut workers: Vec<WorkerSummary> = reports
        .iter()
        .map(|report| WorkerSummary {
            cluster: report.id,
            outcome: report.outcome.to_string(),
            iterations: report.iterations,
            objective: report.objective,
            rho: report.rho,
            flows: flow_records(report),
            history: report.history.clone(),
            elapsed_ms: report.elapsed.as_millis() as u64,
        })
        .collect();
    workers.sort_by_key(|w| w.cluster);

    info!(
        objective,
        ?optimality_gap,
        converged,
        workers = workers.len(),
        "run aggregated"
    );
    Ok(RunSummary {
        created_at: Utc::now(),
        objective,
        centralized_objective,
        optimality_gap,
        converged,
        workers,
    })
}

/// Persist a run summary as pretty-printed JSON.
pub fn write_run_summary(path: impl AsRef<Path>, summary: &RunSummary) -> anyhow::Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(summary).context("serializing run summary")?;
    fs::write(path, json).with_context(|| format!("writing run summary to {}", path.display()))?;
    info!(path = %path.display(), "run summary written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerOutcome;
    use remo_core::CouplingKey;
    use std::collections::HashMap;
    use std::time::Duration;

    fn report(id: usize, outcome: WorkerOutcome, objective: f64) -> WorkerReport {
        let key = CouplingKey::new(0, 2030, "A", "B");
        WorkerReport {
            id: ClusterId::new(id),
            outcome,
            iterations: 3,
            objective,
            rho: 2.0,
            flow_global: HashMap::from([(key, 40.0)]),
            lambda: HashMap::new(),
            history: Vec::new(),
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn aggregate_sums_objectives_and_computes_gap() {
        let expected = [ClusterId::new(0), ClusterId::new(1)];
        let reports = [
            report(0, WorkerOutcome::Converged, 600.0),
            report(1, WorkerOutcome::Converged, 410.0),
        ];
        let summary = aggregate(&expected, &reports, Some(1000.0)).unwrap();
        assert_eq!(summary.objective, 1010.0);
        assert!(summary.converged);
        assert!((summary.optimality_gap.unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(summary.workers[0].flows[0].value, 40.0);
    }

    #[test]
    fn max_iter_worker_marks_run_not_converged() {
        let expected = [ClusterId::new(0), ClusterId::new(1)];
        let reports = [
            report(0, WorkerOutcome::Converged, 600.0),
            report(1, WorkerOutcome::MaxIterReached, 410.0),
        ];
        let summary = aggregate(&expected, &reports, None).unwrap();
        assert!(!summary.converged);
        assert!(summary.optimality_gap.is_none());
        assert_eq!(summary.workers[1].outcome, "MAX_ITER_REACHED");
    }

    #[test]
    fn missing_worker_is_an_error_not_a_zero() {
        let expected = [ClusterId::new(0), ClusterId::new(1)];
        let reports = [report(0, WorkerOutcome::Converged, 600.0)];
        assert!(matches!(
            aggregate(&expected, &reports, None),
            Err(AggregateError::MissingWorker { cluster }) if cluster == ClusterId::new(1)
        ));
    }

    #[test]
    fn failed_worker_fails_the_whole_run() {
        let expected = [ClusterId::new(0), ClusterId::new(1)];
        let reports = [
            report(0, WorkerOutcome::Converged, 600.0),
            report(1, WorkerOutcome::Failed("subproblem infeasible".into()), 0.0),
        ];
        let err = aggregate(&expected, &reports, None).unwrap_err();
        assert!(err.to_string().contains("cluster#1"));
        assert!(err.to_string().contains("infeasible"));
    }

    #[test]
    fn summary_roundtrips_through_json() {
        let expected = [ClusterId::new(0)];
        let reports = [report(0, WorkerOutcome::Converged, 600.0)];
        let summary = aggregate(&expected, &reports, Some(600.0)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_run_summary(&path, &summary).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["objective"], 600.0);
        assert_eq!(parsed["workers"][0]["outcome"], "CONVERGED");
    }
}
