//! Executor seam and graph driver.

use serde::Serialize;
use uf_core::Result;

use crate::graph::{JobGraph, JobId, JobSpec};

/// State of a job after [`run_graph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobStatus {
    /// Handed to a batch system; completion is tracked there.
    Submitted,
    /// Ran to completion with exit status 0.
    Succeeded,
    /// Ran and failed, or could not be started or submitted.
    Failed {
        /// Exit code, when the process exited normally.
        code: Option<i32>,
        /// What went wrong.
        message: String,
    },
    /// Not run because a dependency failed or was skipped.
    Skipped,
}

impl JobStatus {
    /// True for jobs whose dependants must not run.
    pub fn blocks_dependants(&self) -> bool {
        matches!(self, JobStatus::Failed { .. } | JobStatus::Skipped)
    }
}

/// What an executor returns for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Job in the graph.
    pub id: JobId,
    /// Identifier assigned by the batch system, if any.
    pub external_id: Option<String>,
    /// State after submission.
    pub status: JobStatus,
}

/// Runs or submits jobs.
pub trait Executor {
    /// Short executor name for logs.
    fn name(&self) -> &str;

    /// Run or submit `job`. `deps` are the handles of its dependencies, all of
    /// which were returned earlier by this executor.
    fn submit(&mut self, id: JobId, job: &JobSpec, deps: &[JobHandle]) -> Result<JobHandle>;
}

/// Per-job record of a graph run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    /// Job in the graph.
    pub id: JobId,
    /// `<kind>_job_<name>`.
    pub label: String,
    /// Batch system identifier.
    pub external_id: Option<String>,
    /// Final state.
    #[serde(flatten)]
    pub status: JobStatus,
}

/// Hand every job of `graph` to `executor` in dependency order.
///
/// Jobs whose dependencies failed or were skipped are skipped. An executor
/// error marks the job as failed; the run continues with independent jobs.
pub fn run_graph(graph: &JobGraph, executor: &mut dyn Executor) -> Vec<JobOutcome> {
    let mut handles: Vec<Option<JobHandle>> = vec![None; graph.len()];
    let mut outcomes = Vec::with_capacity(graph.len());

    for id in graph.topological_order() {
        let Some(job) = graph.spec(id) else { continue };
        let deps: Vec<JobHandle> =
            graph.dependencies(id).iter().filter_map(|d| handles[d.0].clone()).collect();

        let handle = if deps.iter().any(|h| h.status.blocks_dependants()) {
            tracing::warn!(job = %job.label(), "skipping: a dependency did not succeed");
            JobHandle { id, external_id: None, status: JobStatus::Skipped }
        } else {
            match executor.submit(id, job, &deps) {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(job = %job.label(), executor = executor.name(), error = %e, "job failed");
                    JobHandle {
                        id,
                        external_id: None,
                        status: JobStatus::Failed { code: None, message: e.to_string() },
                    }
                }
            }
        };

        outcomes.push(JobOutcome {
            id,
            label: job.label(),
            external_id: handle.external_id.clone(),
            status: handle.status.clone(),
        });
        handles[id.0] = Some(handle);
    }
    outcomes
}
