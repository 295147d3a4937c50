//! # uf-jobs
//!
//! Workflow steps (rebin, unfold, linearity test) as an explicit job graph.
//! Every job names the jobs it consumes; an [`Executor`] runs or submits the
//! jobs in dependency order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod executor;
pub mod graph;
pub mod local;
pub mod pbs;

pub use executor::{Executor, JobHandle, JobOutcome, JobStatus, run_graph};
pub use graph::{JobGraph, JobId, JobSpec};
pub use local::LocalExecutor;
pub use pbs::PbsExecutor;
