//! Helpers shared by the commands that build and run job graphs.

use std::path::Path;

use anyhow::{Result, bail};
use uf_jobs::{Executor, JobGraph, JobOutcome, JobSpec, LocalExecutor, PbsExecutor, run_graph};

pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe { s.to_string() } else { format!("'{}'", s.replace('\'', "'\\''")) }
}

pub fn quote_path(p: &Path) -> String {
    shell_quote(&p.display().to_string())
}

pub fn quote_all<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    items.into_iter().map(|s| shell_quote(s)).collect::<Vec<_>>().join(" ")
}

/// Paths substituted into a fitter command template.
pub struct FitPaths<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub config: &'a Path,
}

/// Substitute `{input}`, `{output}`, `{config}`, `{sample}` and `{variable}`.
pub fn fit_command(template: &str, paths: &FitPaths<'_>, sample: &str, variable: &str) -> String {
    template
        .replace("{input}", &quote_path(paths.input))
        .replace("{output}", &quote_path(paths.output))
        .replace("{config}", &quote_path(paths.config))
        .replace("{sample}", &shell_quote(sample))
        .replace("{variable}", &shell_quote(variable))
}

/// Jobs in run order with their commands and dependencies, for the report.
pub fn describe_jobs(graph: &JobGraph) -> Vec<serde_json::Value> {
    graph
        .topological_order()
        .into_iter()
        .filter_map(|id| {
            let spec = graph.spec(id)?;
            let deps: Vec<String> = graph
                .dependencies(id)
                .iter()
                .filter_map(|d| graph.spec(*d).map(JobSpec::label))
                .collect();
            Some(serde_json::json!({
                "label": spec.label(),
                "command": spec.command,
                "depends_on": deps,
            }))
        })
        .collect()
}

/// Where and how to run a graph.
pub struct Dispatch {
    /// Queue and preamble when submitting to PBS.
    pub pbs: Option<(String, Vec<String>)>,
    pub dry_run: bool,
}

impl Dispatch {
    /// Run locally, submit to PBS, or only write scripts on a dry run.
    /// A local dry run executes nothing.
    pub fn run(&self, graph: &JobGraph, outdir: &Path) -> Vec<JobOutcome> {
        match &self.pbs {
            Some((queue, preamble)) => {
                let mut ex = PbsExecutor::new(outdir, queue.as_str())
                    .with_preamble(preamble.clone())
                    .dry_run(self.dry_run);
                execute(graph, &mut ex)
            }
            None if self.dry_run => Vec::new(),
            None => execute(graph, &mut LocalExecutor::new()),
        }
    }
}

fn execute(graph: &JobGraph, executor: &mut dyn Executor) -> Vec<JobOutcome> {
    tracing::info!(executor = executor.name(), jobs = graph.len(), "running jobs");
    run_graph(graph, executor)
}

/// Fail when any job failed or was skipped.
pub fn check_outcomes(outcomes: &[JobOutcome]) -> Result<()> {
    let failed: Vec<&str> =
        outcomes.iter().filter(|o| o.status.blocks_dependants()).map(|o| o.label.as_str()).collect();
    if !failed.is_empty() {
        bail!("{} job(s) did not complete: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}
