//! `pull-test`: toys -> stat-only unfolding of each toy -> ensemble summary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use uf_hist::ToyPdf;
use uf_jobs::{JobGraph, JobId, JobOutcome, JobSpec};
use uf_prep::{
    AnalysisConfig, EnsembleTarget, PSEUDO_DATA, RebinConfig, migration_toy_config, stat_only_config,
    toy_name, write_json,
};

use crate::graph::{
    Dispatch, FitPaths, check_outcomes, describe_jobs, fit_command, quote_path, shell_quote,
};

/// Arguments of the pull test, resolved by the argument parser.
pub struct PullArgs {
    /// Root of the rebinned containers.
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: PathBuf,
    pub variable: String,
    pub channels: Vec<String>,
    pub campaign: String,
    pub target: EnsembleTarget,
    pub ntoys: Option<usize>,
    pub pdf: Option<ToyPdf>,
    pub seed: u64,
    pub fit_command: String,
    pub dispatch: Dispatch,
}

const REBIN_FILE: &str = "rebin_config.json";
const NOMINAL: &str = "stat_only";

fn pdf_arg(pdf: ToyPdf) -> &'static str {
    match pdf {
        ToyPdf::Poisson => "poisson",
        ToyPdf::Gaus => "gaus",
        ToyPdf::McStat => "mcstat",
    }
}

/// Paths used by the jobs of the test.
struct PullLayout {
    config_dir: PathBuf,
    input: PathBuf,
    results: PathBuf,
    ensemble: PathBuf,
}

impl PullLayout {
    fn new(out: &Path) -> Self {
        Self {
            config_dir: out.join("config"),
            input: out.join("unfoldingInput"),
            results: out.join("results"),
            ensemble: out.join("ensemble"),
        }
    }

    /// Configuration used to unfold `name` (`stat_only` or a toy).
    fn config(&self, name: &str) -> PathBuf {
        self.config_dir.join(name).join("config.json")
    }

    fn nominal_results(&self) -> PathBuf {
        self.results.join(NOMINAL).join(PSEUDO_DATA)
    }
}

/// Unfold `sample` with `config` into `results`, then extract the parameter.
fn unfold_command(
    args: &PullArgs,
    exe: &str,
    layout: &PullLayout,
    config: &Path,
    sample: &str,
    results: &Path,
) -> String {
    let stat_config = layout.config(NOMINAL);
    let paths = FitPaths { input: &layout.input, output: results, config };
    format!(
        "{}\n{exe} parameter --fit-output {} --config {} -v {}",
        fit_command(&args.fit_command, &paths, sample, &args.variable),
        quote_path(results),
        quote_path(&stat_config),
        shell_quote(&args.variable),
    )
}

/// Write the stat-only configuration, plus one per toy migration matrix.
fn write_configs(
    args: &PullArgs,
    layout: &PullLayout,
    analysis: &AnalysisConfig,
    rebin: &RebinConfig,
    toys: &[String],
) -> Result<()> {
    let mut stat_only = stat_only_config(analysis);
    stat_only.rebin = PathBuf::from(REBIN_FILE);
    write_json(&layout.config(NOMINAL), &stat_only)?;
    write_json(&layout.config_dir.join(NOMINAL).join(REBIN_FILE), rebin)?;

    if args.target == EnsembleTarget::Migmat {
        stat_only.rebin = layout.config_dir.join(NOMINAL).join(REBIN_FILE);
        for toy in toys {
            write_json(&layout.config(toy), &migration_toy_config(&stat_only, toy))?;
        }
    }
    Ok(())
}

/// Build the toys, unfold and ensemble jobs.
fn build_graph(
    args: &PullArgs,
    exe: &str,
    layout: &PullLayout,
    containers: &[(PathBuf, PathBuf)],
    histogram: &str,
    pdf: ToyPdf,
    ntoys: usize,
) -> Result<JobGraph> {
    let mut graph = JobGraph::new();

    let toys_cmd = containers
        .iter()
        .enumerate()
        .map(|(k, (src, dst))| {
            let seed = args.seed.wrapping_add((k * ntoys) as u64);
            format!(
                "{exe} toys -i {} --hist {} -n {ntoys} --pdf {} --seed {seed} -o {}",
                quote_path(src),
                shell_quote(histogram),
                pdf_arg(pdf),
                quote_path(dst),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let toys = graph.add(JobSpec::new("toys", &args.variable, toys_cmd), &[])?;

    let nominal_results = layout.nominal_results();
    let nominal_cmd =
        unfold_command(args, exe, layout, &layout.config(NOMINAL), PSEUDO_DATA, &nominal_results);
    let mut unfold_jobs: Vec<JobId> = Vec::with_capacity(ntoys + 1);
    unfold_jobs.push(graph.add(JobSpec::new("unfold", NOMINAL, nominal_cmd), &[toys])?);

    for i in 0..ntoys {
        let toy = toy_name(histogram, i);
        let results = layout.results.join(&toy);
        let cmd = match args.target {
            EnsembleTarget::Data => {
                unfold_command(args, exe, layout, &layout.config(NOMINAL), &toy, &results)
            }
            EnsembleTarget::Migmat => {
                unfold_command(args, exe, layout, &layout.config(&toy), PSEUDO_DATA, &results)
            }
        };
        unfold_jobs.push(graph.add(JobSpec::new("unfold", &toy, cmd), &[toys])?);
    }

    let ensemble_cmd = format!(
        "{exe} ensemble --nominal {} --toys-dir {} --prefix {} -n {ntoys} --config {} -o {}",
        quote_path(&nominal_results),
        quote_path(&layout.results),
        shell_quote(&format!("toy{histogram}")),
        quote_path(&layout.config(NOMINAL)),
        quote_path(&layout.ensemble),
    );
    graph.add(JobSpec::new("ensemble", &args.variable, ensemble_cmd), &unfold_jobs)?;
    Ok(graph)
}

/// Write the configurations and run or submit the ensemble test jobs.
pub fn cmd_pull_test(args: PullArgs) -> Result<()> {
    let (analysis, rebin) = AnalysisConfig::load_with_rebin(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if args.channels.is_empty() {
        bail!("at least one channel is required");
    }
    let ntoys = args.ntoys.unwrap_or_else(|| args.target.default_ntoys());
    if ntoys == 0 {
        bail!("the ensemble needs at least one toy");
    }
    let pdf = args.pdf.unwrap_or_else(|| args.target.default_pdf());
    let histogram = args.target.histogram(&analysis);

    std::fs::create_dir_all(&args.output)?;
    let out = std::path::absolute(&args.output)?;
    let input = std::path::absolute(&args.input)?;
    let layout = PullLayout::new(&out);
    let exe = std::env::current_exe().context("locating the unfold executable")?;
    let exe = quote_path(&exe);
    let stem = format!("{}{}.json", args.variable, rebin.suffix());

    let mut containers = Vec::new();
    for chan in &args.channels {
        for btag in analysis.btag_regions_for(chan)? {
            let rel = Path::new(&args.campaign).join(chan).join(btag).join(&stem);
            let src = input.join(&rel);
            if !src.exists() {
                bail!("rebinned container {} not found", src.display());
            }
            containers.push((src, layout.input.join(&rel)));
        }
    }

    let toys: Vec<String> = (0..ntoys).map(|i| toy_name(&histogram, i)).collect();
    write_configs(&args, &layout, &analysis, &rebin, &toys)?;
    let graph = build_graph(&args, &exe, &layout, &containers, &histogram, pdf, ntoys)?;
    tracing::info!(
        ensemble = ?args.target,
        histogram = %histogram,
        ntoys,
        jobs = graph.len(),
        "ensemble test prepared"
    );

    let jobs = describe_jobs(&graph);
    let outcomes: Vec<JobOutcome> = args.dispatch.run(&graph, &out);

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "output": out.display().to_string(),
            "histogram": histogram,
            "pdf": pdf_arg(pdf),
            "ntoys": ntoys,
            "jobs": jobs,
            "outcomes": outcomes,
        }))?
    );
    check_outcomes(&outcomes)
}
