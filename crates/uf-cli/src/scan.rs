//! `scan-binnings`: one rebin -> unfold -> linearity chain per candidate binning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use uf_jobs::{JobGraph, JobId, JobOutcome, JobSpec};
use uf_prep::{
    AnalysisConfig, BinningCandidate, Resolution, ScanMode, candidate_configs, read_config,
    scan_candidates, write_json,
};

use crate::graph::{
    Dispatch, FitPaths, check_outcomes, describe_jobs, fit_command, quote_all, quote_path,
    shell_quote,
};

/// Arguments of the scan, resolved by the argument parser.
pub struct ScanArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: PathBuf,
    pub variable: String,
    pub channels: Vec<String>,
    pub campaign: String,
    pub data: Vec<String>,
    pub nbins: Vec<usize>,
    pub mode: ScanMode,
    pub resolution: Option<PathBuf>,
    pub fit_command: String,
    pub dispatch: Dispatch,
}

const REBIN_FILE: &str = "rebin_config.json";

/// Paths used by the jobs of one candidate.
struct CandidateLayout {
    config: PathBuf,
    input: PathBuf,
    results: PathBuf,
}

impl CandidateLayout {
    fn new(out: &Path, name: &str) -> Self {
        Self {
            config: out.join("config").join(name).join("config.json"),
            input: out.join("unfoldingInput").join(name),
            results: out.join("results").join(name),
        }
    }

    fn fit_command(&self, template: &str, sample: &str, variable: &str) -> String {
        let output = self.results.join(sample);
        let paths = FitPaths { input: &self.input, output: &output, config: &self.config };
        fit_command(template, &paths, sample, variable)
    }
}

/// Add the jobs of one candidate to `graph`.
fn add_candidate_jobs(
    graph: &mut JobGraph,
    args: &ScanArgs,
    exe: &str,
    candidate: &BinningCandidate,
    layout: &CandidateLayout,
    truth_file: &Path,
) -> Result<()> {
    let rebin_cmd = format!(
        "{exe} rebin -i {} -o {} --config {} -v {} -c {} --campaign {}",
        quote_path(&args.input),
        quote_path(&layout.input),
        quote_path(&layout.config),
        shell_quote(&args.variable),
        quote_all(&args.channels),
        shell_quote(&args.campaign),
    );
    let rebin = graph.add(JobSpec::new("rebin", &candidate.name, rebin_cmd), &[])?;

    let mut unfold_jobs: Vec<JobId> = Vec::with_capacity(args.data.len());
    for sample in &args.data {
        let results = layout.results.join(sample);
        let cmd = format!(
            "{}\n{exe} parameter --fit-output {} --config {} -v {}",
            layout.fit_command(&args.fit_command, sample, &args.variable),
            quote_path(&results),
            quote_path(&layout.config),
            shell_quote(&args.variable),
        );
        let id = graph.add(JobSpec::new(format!("unfold_{sample}"), &candidate.name, cmd), &[rebin])?;
        unfold_jobs.push(id);
    }

    let reweighted: Vec<String> = args.data.iter().filter(|s| *s != "mcdata").cloned().collect();
    if reweighted.is_empty() {
        tracing::warn!(candidate = %candidate.name, "no reweighted samples, skipping the linearity test");
        return Ok(());
    }
    let lin_cmd = format!(
        "{exe} linearity --truth {} --unfolded-dir {} --config {} -v {} -r {} -o {}",
        quote_path(truth_file),
        quote_path(&layout.results),
        quote_path(&layout.config),
        shell_quote(&args.variable),
        quote_all(&reweighted),
        quote_path(&layout.results.join("linearity")),
    );
    graph.add(JobSpec::new("linearity", &candidate.name, lin_cmd), &unfold_jobs)?;
    Ok(())
}

/// Enumerate candidates, write their configurations and run or submit the jobs.
pub fn cmd_scan_binnings(args: ScanArgs) -> Result<()> {
    let (analysis, rebin) = AnalysisConfig::load_with_rebin(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    let resolution: Option<Resolution> = match &args.resolution {
        Some(p) => Some(
            read_config(p).with_context(|| format!("reading resolution {}", p.display()))?,
        ),
        None => None,
    };
    let Some(first_channel) = args.channels.first().cloned() else {
        bail!("at least one channel is required");
    };
    let btag = analysis
        .btag_regions_for(&first_channel)?
        .first()
        .cloned()
        .with_context(|| format!("no b-tag region configured for channel '{first_channel}'"))?;

    let candidates = scan_candidates(&args.nbins, args.mode, resolution.as_ref())?;
    if candidates.is_empty() {
        bail!("no candidate binning survives the resolution filter");
    }

    std::fs::create_dir_all(&args.output)?;
    let out = std::path::absolute(&args.output)?;
    let args = ScanArgs { input: std::path::absolute(&args.input)?, ..args };
    let exe = std::env::current_exe().context("locating the unfold executable")?;
    let exe = quote_path(&exe);
    let stem = format!("{}{}", args.variable, rebin.suffix());

    let mut graph = JobGraph::new();
    let mut binnings = BTreeMap::new();
    for candidate in &candidates {
        let layout = CandidateLayout::new(&out, &candidate.name);
        let (cand_analysis, cand_rebin) =
            candidate_configs(&analysis, &rebin, candidate, &args.data, PathBuf::from(REBIN_FILE));
        write_json(&layout.config, &cand_analysis)?;
        if let Some(dir) = layout.config.parent() {
            write_json(&dir.join(REBIN_FILE), &cand_rebin)?;
        }

        let truth_file = layout
            .input
            .join(&args.campaign)
            .join(&first_channel)
            .join(&btag)
            .join(format!("truth_{stem}_binned.json"));
        add_candidate_jobs(&mut graph, &args, &exe, candidate, &layout, &truth_file)?;
        binnings.insert(candidate.name.clone(), candidate.edges.clone());
    }
    write_json(&out.join("config").join("binnings.json"), &binnings)?;
    tracing::info!(candidates = candidates.len(), jobs = graph.len(), "binning scan prepared");

    let jobs = describe_jobs(&graph);
    let outcomes: Vec<JobOutcome> = args.dispatch.run(&graph, &out);

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "output": out.display().to_string(),
            "binnings": binnings,
            "jobs": jobs,
            "outcomes": outcomes,
        }))?
    );
    check_outcomes(&outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_command_substitution() {
        let layout = CandidateLayout::new(Path::new("/scan"), "4bin0");
        let cmd = layout.fit_command(
            "fit --in {input} --out {output} --cfg {config} --data {sample} --var {variable}",
            "mcdata_rw1",
            "CorrKK",
        );
        assert_eq!(
            cmd,
            "fit --in /scan/unfoldingInput/4bin0 --out /scan/results/4bin0/mcdata_rw1 \
             --cfg /scan/config/4bin0/config.json --data mcdata_rw1 --var CorrKK"
        );
    }
}
