//! Submission to a PBS/Torque batch system.
//!
//! Each job becomes a script under `<outdir>/batchSubmission/`; dependencies
//! are expressed with `-W depend=afterok:<ids>` using the ids `qsub` printed
//! for the producing jobs.

use std::path::{Path, PathBuf};
use std::process::Command;

use uf_core::{Error, Result};

use crate::executor::{Executor, JobHandle, JobStatus};
use crate::graph::{JobId, JobSpec};

/// Writes job scripts and submits them with `qsub`.
#[derive(Debug, Clone)]
pub struct PbsExecutor {
    /// Root of `batchSubmission/`.
    pub outdir: PathBuf,
    /// Queue passed to `qsub -q`.
    pub queue: String,
    /// Lines run before every command (environment setup).
    pub preamble: Vec<String>,
    /// Record the `qsub` invocations instead of running them.
    pub dry_run: bool,
    submissions: Vec<Vec<String>>,
}

impl PbsExecutor {
    /// Executor writing scripts below `outdir` and submitting to `queue`.
    pub fn new(outdir: impl Into<PathBuf>, queue: impl Into<String>) -> Self {
        Self {
            outdir: outdir.into(),
            queue: queue.into(),
            preamble: Vec::new(),
            dry_run: false,
            submissions: Vec::new(),
        }
    }

    /// Add setup lines to every script.
    pub fn with_preamble(mut self, lines: Vec<String>) -> Self {
        self.preamble = lines;
        self
    }

    /// Only write scripts and record the `qsub` arguments.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// `qsub` argument lists, in submission order.
    pub fn submissions(&self) -> &[Vec<String>] {
        &self.submissions
    }

    fn batch_dir(&self) -> PathBuf {
        self.outdir.join("batchSubmission")
    }

    /// Path of the script written for `job`.
    pub fn script_path(&self, job: &JobSpec) -> PathBuf {
        self.batch_dir().join(format!("{}.sh", job.label()))
    }

    fn script(&self, job: &JobSpec, logs: &Path) -> String {
        let mut s = String::from("#!/bin/bash\n");
        s.push_str("#PBS -j oe\n");
        s.push_str(&format!("#PBS -o {}/\n", logs.display()));
        s.push_str(&format!("#PBS -N {}\n", job.label()));
        for line in &self.preamble {
            s.push_str(line);
            s.push('\n');
        }
        s.push_str(&job.command);
        if !job.command.ends_with('\n') {
            s.push('\n');
        }
        s
    }

    fn qsub_args(&self, job: &JobSpec, script: &Path, deps: &[JobHandle]) -> Vec<String> {
        let mut args = vec!["-q".to_string(), self.queue.clone()];
        let ids: Vec<&str> = deps.iter().filter_map(|d| d.external_id.as_deref()).collect();
        if !ids.is_empty() {
            args.push("-W".into());
            args.push(format!("depend=afterok:{}", ids.join(":")));
        }
        args.push("-l".into());
        args.push(format!("mem={}", job.memory));
        args.push("-l".into());
        args.push(format!("vmem={}", job.memory));
        args.push(script.display().to_string());
        args
    }
}

impl Executor for PbsExecutor {
    fn name(&self) -> &str {
        "pbs"
    }

    fn submit(&mut self, id: JobId, job: &JobSpec, deps: &[JobHandle]) -> Result<JobHandle> {
        let logs = self.batch_dir().join("logs");
        std::fs::create_dir_all(&logs)?;
        let script = self.script_path(job);
        std::fs::write(&script, self.script(job, &logs))?;

        let args = self.qsub_args(job, &script, deps);
        self.submissions.push(args.clone());
        if self.dry_run {
            tracing::info!(job = %job.label(), "qsub {}", args.join(" "));
            return Ok(JobHandle {
                id,
                external_id: Some(job.label()),
                status: JobStatus::Submitted,
            });
        }

        let output = Command::new("qsub")
            .args(&args)
            .output()
            .map_err(|e| Error::Job(format!("failed to run qsub for '{}': {e}", job.label())))?;
        if !output.status.success() {
            return Err(Error::Job(format!(
                "qsub rejected '{}' ({}): {}",
                job.label(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let pbs_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!(job = %job.label(), pbs_id = %pbs_id, "submitted");
        Ok(JobHandle { id, external_id: Some(pbs_id), status: JobStatus::Submitted })
    }
}
