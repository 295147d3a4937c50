//! Job descriptions and the dependency graph.

use serde::Serialize;
use uf_core::{Error, Result};

/// Index of a job in its [`JobGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(pub usize);

fn default_memory() -> String {
    "2gb".to_string()
}

/// One unit of work: a shell command plus bookkeeping for batch systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    /// Step kind (`rebin`, `unfold_mcdata`, `linearity`, ...).
    pub kind: String,
    /// Job name within its kind (typically the binning name).
    pub name: String,
    /// Shell command.
    pub command: String,
    /// Memory request for batch systems.
    pub memory: String,
}

impl JobSpec {
    /// Job with the default memory request.
    pub fn new(kind: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self { kind: kind.into(), name: name.into(), command: command.into(), memory: default_memory() }
    }

    /// Override the memory request.
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    /// `<kind>_job_<name>`, used for scripts and batch job names.
    pub fn label(&self) -> String {
        format!("{}_job_{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone)]
struct Node {
    spec: JobSpec,
    deps: Vec<JobId>,
}

/// Jobs with producer/consumer edges.
///
/// A job can only depend on jobs added before it, so the graph is acyclic and
/// insertion order is a valid execution order.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: Vec<Node>,
}

impl JobGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `spec`, consuming the outputs of `deps`.
    pub fn add(&mut self, spec: JobSpec, deps: &[JobId]) -> Result<JobId> {
        if let Some(bad) = deps.iter().find(|d| d.0 >= self.nodes.len()) {
            return Err(Error::Job(format!(
                "job '{}' depends on unknown job #{}",
                spec.label(),
                bad.0
            )));
        }
        let mut deps = deps.to_vec();
        deps.sort();
        deps.dedup();
        self.nodes.push(Node { spec, deps });
        Ok(JobId(self.nodes.len() - 1))
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no jobs.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Job description of `id`.
    pub fn spec(&self, id: JobId) -> Option<&JobSpec> {
        self.nodes.get(id.0).map(|n| &n.spec)
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: JobId) -> &[JobId] {
        self.nodes.get(id.0).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Jobs that consume the output of `id`.
    pub fn dependants(&self, id: JobId) -> Vec<JobId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.deps.contains(&id))
            .map(|(i, _)| JobId(i))
            .collect()
    }

    /// An order in which every job follows its dependencies.
    pub fn topological_order(&self) -> Vec<JobId> {
        (0..self.nodes.len()).map(JobId).collect()
    }
}
