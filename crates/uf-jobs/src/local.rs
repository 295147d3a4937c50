//! Run jobs one after another on the local machine.

use std::path::PathBuf;
use std::process::Command;

use uf_core::{Error, Result};

use crate::executor::{Executor, JobHandle, JobStatus};
use crate::graph::{JobId, JobSpec};

/// Runs every command through `sh -c` and waits for it; output is captured
/// and logged.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    /// Working directory of the commands; the current one when unset.
    pub workdir: Option<PathBuf>,
}

impl LocalExecutor {
    /// Executor running in the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { workdir: Some(dir.into()) }
    }
}

impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn submit(&mut self, id: JobId, job: &JobSpec, _deps: &[JobHandle]) -> Result<JobHandle> {
        tracing::info!(job = %job.label(), "running");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&job.command);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        // job output must stay off our stdout
        let output = cmd
            .output()
            .map_err(|e| Error::Job(format!("failed to start '{}': {e}", job.label())))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            tracing::debug!(job = %job.label(), "stdout:\n{}", stdout.trim_end());
        }

        let status = if output.status.success() {
            JobStatus::Succeeded
        } else {
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            tracing::warn!(job = %job.label(), status = %output.status, "job failed: {tail}");
            JobStatus::Failed {
                code: output.status.code(),
                message: if tail.is_empty() {
                    format!("{}", output.status)
                } else {
                    format!("{}: {tail}", output.status)
                },
            }
        };
        Ok(JobHandle { id, external_id: None, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_graph;
    use crate::graph::JobGraph;

    fn tmp_dir(tag: &str) -> PathBuf {
        let nanos =
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("uf_jobs_{tag}_{}_{}", std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_runs_in_dependency_order() {
        let dir = tmp_dir("order");
        let mut g = JobGraph::new();
        let r = g.add(JobSpec::new("rebin", "x", "echo rebin >> log.txt"), &[]).unwrap();
        let u = g.add(JobSpec::new("unfold", "x", "echo unfold >> log.txt"), &[r]).unwrap();
        g.add(JobSpec::new("linearity", "x", "echo linearity >> log.txt"), &[u]).unwrap();

        let out = run_graph(&g, &mut LocalExecutor::in_dir(&dir));
        assert!(out.iter().all(|o| o.status == JobStatus::Succeeded));
        let log = std::fs::read_to_string(dir.join("log.txt")).unwrap();
        assert_eq!(log, "rebin\nunfold\nlinearity\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failure_skips_dependants() {
        let dir = tmp_dir("fail");
        let mut g = JobGraph::new();
        let r = g.add(JobSpec::new("rebin", "x", "exit 3"), &[]).unwrap();
        g.add(JobSpec::new("unfold", "x", "touch should_not_exist"), &[r]).unwrap();

        let out = run_graph(&g, &mut LocalExecutor::in_dir(&dir));
        assert!(matches!(out[0].status, JobStatus::Failed { code: Some(3), .. }));
        assert_eq!(out[1].status, JobStatus::Skipped);
        assert!(!dir.join("should_not_exist").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
