//! Unfolding input preparation CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use uf_hist::{EdgeAlignment, HistFile, MisalignmentPolicy, ToyPdf, TruthRecords, make_toys};
use uf_prep::{
    AnalysisConfig, EnsembleTarget, FitOutput, RebinPaths, RebinSelection, ScanMode, SystMode,
    ensemble_test, extract_unfolded_parameter, linearity_test, load_ensemble, load_unfolded,
    read_unfolded_parameter, run_rebin, write_ensemble, write_linearity, write_unfolded_parameter,
};

mod graph;
mod pull;
mod scan;

#[derive(Parser)]
#[command(name = "unfold")]
#[command(about = "Unfolding input preparation: rebinning, response matrices and post-fit checks")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExecutorKind {
    Local,
    Pbs,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebin fine input containers and build response matrices
    Rebin {
        /// Root of the input containers (<in>/<campaign>/<channel>/<btag>/<var>.json)
        #[arg(short, long)]
        input: PathBuf,

        /// Root of the output containers
        #[arg(short, long, default_value = "unfoldingInput/base")]
        output: PathBuf,

        /// Analysis configuration (JSON or YAML)
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,

        /// Observables
        #[arg(short, long, num_args = 1.., required = true)]
        variable: Vec<String>,

        /// Channels
        #[arg(short, long, num_args = 1.., default_values = ["em", "ee", "mm"])]
        channel: Vec<String>,

        /// Campaigns
        #[arg(long, num_args = 1.., default_values = ["mc16a", "mc16d", "mc16e", "all"])]
        campaign: Vec<String>,

        /// Systematics treatment: full or shape (shape-only response variations)
        #[arg(short, long, default_value = "full")]
        syst: SystMode,
    },

    /// Map physical bin edges onto source bin indices
    BinEdges {
        /// Target bin edges
        #[arg(long, num_args = 2.., required = true, allow_negative_numbers = true)]
        binning: Vec<f64>,

        /// Width of one source bin
        #[arg(long)]
        granularity: f64,

        /// Snapping tolerance in source bins
        #[arg(long, default_value = "1e-6")]
        tolerance: f64,

        /// Truncate misaligned edges instead of failing
        #[arg(long)]
        truncate: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Unfolded parameter from fitter outputs (writes spin_parameter.json)
    Parameter {
        /// Fit output directory (UnfoldingData.yaml, CorrelationMatrix.yaml)
        #[arg(long)]
        fit_output: PathBuf,

        /// Analysis configuration (JSON or YAML)
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,

        /// Observable
        #[arg(short, long)]
        variable: String,

        /// Number of Monte Carlo samples
        #[arg(long, default_value = "100000")]
        samples: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Linearity test of unfolded against truth parameters
    Linearity {
        /// Binned truth parameters (truth_<var>_binned.json)
        #[arg(long)]
        truth: PathBuf,

        /// Directory holding <sample>/spin_parameter.json
        #[arg(long)]
        unfolded_dir: PathBuf,

        /// Analysis configuration (JSON or YAML); its binning sets the segments
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,

        /// Observable
        #[arg(short, long)]
        variable: String,

        /// Reweighted pseudo-data samples; `mcdata` is always added
        #[arg(short, long, num_args = 1.., default_values = ["mcdata_rw0", "mcdata_rw1", "mcdata_rw2", "mcdata_rw3", "mcdata_rw4"])]
        reweight: Vec<String>,

        /// Output directory for linearity_test.json
        #[arg(short, long, default_value = "linearity_test")]
        output: PathBuf,
    },

    /// Fluctuated toys of one histogram, stored as toy<name>_<i>
    Toys {
        /// Container holding the histogram
        #[arg(short, long)]
        input: PathBuf,

        /// Histogram name ("name" or "dir/name")
        #[arg(long)]
        hist: String,

        /// Number of toys
        #[arg(short, long)]
        n: usize,

        /// Per-bin fluctuation: poisson, gaus or mcstat
        #[arg(long, default_value = "poisson")]
        pdf: ToyPdf,

        /// RNG seed; toy i uses seed + i
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output container. Defaults to updating the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Enumerate candidate binnings and run rebin -> unfold -> linearity for each
    ScanBinnings {
        /// Root of the fine input containers
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "binning_optimisation")]
        output: PathBuf,

        /// Analysis configuration (JSON or YAML)
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,

        /// Observable
        #[arg(short, long)]
        variable: String,

        /// Channels
        #[arg(short, long, num_args = 1.., required = true)]
        channel: Vec<String>,

        /// Campaign
        #[arg(long)]
        campaign: String,

        /// Pseudo-data samples to unfold
        #[arg(short, long, num_args = 1.., default_values = ["mcdata", "mcdata_rw0", "mcdata_rw1", "mcdata_rw2", "mcdata_rw3", "mcdata_rw4"])]
        data: Vec<String>,

        /// Tested numbers of bins
        #[arg(short, long, num_args = 1.., default_values = ["4", "6", "8", "10"])]
        nbins: Vec<usize>,

        /// Candidate layout: symmetric or phi
        #[arg(long, default_value = "symmetric")]
        mode: ScanMode,

        /// Resolution step function ([[edges], [values]]) used to discard narrow bins
        #[arg(long)]
        resolution: Option<PathBuf>,

        /// Fitter command; {input}, {output}, {config}, {sample} and {variable} are substituted
        #[arg(long, default_value = "trex-unfold --input {input} --output {output} --config {config} --data {sample}")]
        fit_command: String,

        /// Where to run the jobs
        #[arg(long, value_enum, default_value = "local")]
        executor: ExecutorKind,

        /// PBS queue
        #[arg(long, default_value = "prod2C7")]
        queue: String,

        /// Setup line added to every batch script (repeatable)
        #[arg(long)]
        preamble: Vec<String>,

        /// Write configs and scripts without running or submitting jobs
        #[arg(long)]
        dry_run: bool,
    },

    /// Ensemble test: unfold fluctuated toys stat-only and summarise pull and constraint
    PullTest {
        /// Root of the rebinned containers
        #[arg(short, long, default_value = "unfoldingInput/base")]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "pull_test")]
        output: PathBuf,

        /// Analysis configuration (JSON or YAML)
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,

        /// Observable
        #[arg(short, long)]
        variable: String,

        /// Channels
        #[arg(short, long, num_args = 1.., required = true)]
        channel: Vec<String>,

        /// Campaign
        #[arg(long)]
        campaign: String,

        /// What to fluctuate: data (pseudo-data) or migmat (migration matrix)
        #[arg(long, default_value = "data")]
        target: EnsembleTarget,

        /// Number of toys [default: 1000 for data, 200 for migmat]
        #[arg(long)]
        ntoys: Option<usize>,

        /// Per-bin fluctuation [default: poisson for data, mcstat for migmat]
        #[arg(long)]
        pdf: Option<ToyPdf>,

        /// RNG seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Fitter command; {input}, {output}, {config}, {sample} and {variable} are substituted
        #[arg(long, default_value = "trex-unfold --input {input} --output {output} --config {config} --data {sample}")]
        fit_command: String,

        /// Where to run the jobs
        #[arg(long, value_enum, default_value = "local")]
        executor: ExecutorKind,

        /// PBS queue
        #[arg(long, default_value = "prod2C7")]
        queue: String,

        /// Setup line added to every batch script (repeatable)
        #[arg(long)]
        preamble: Vec<String>,

        /// Write configs and scripts without running or submitting jobs
        #[arg(long)]
        dry_run: bool,
    },

    /// Pull and constraint of an ensemble of unfolded toys (writes ensemble_test.json)
    Ensemble {
        /// Directory holding the nominal spin_parameter.json
        #[arg(long)]
        nominal: PathBuf,

        /// Directory holding <prefix>_<i>/spin_parameter.json
        #[arg(long)]
        toys_dir: PathBuf,

        /// Toy directory prefix
        #[arg(long, default_value = "toymcdata")]
        prefix: String,

        /// Number of toys
        #[arg(short, long)]
        n: usize,

        /// Analysis configuration (JSON or YAML); its binning sets the segments
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,

        /// Output directory for ensemble_test.json
        #[arg(short, long, default_value = "ensemble_test")]
        output: PathBuf,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Rebin { input, output, config, variable, channel, campaign, syst } => {
            cmd_rebin(input, output, &config, variable, channel, campaign, syst)
        }
        Commands::BinEdges { binning, granularity, tolerance, truncate, output } => {
            cmd_bin_edges(&binning, granularity, tolerance, truncate, output.as_ref())
        }
        Commands::Parameter { fit_output, config, variable, samples, seed, output } => {
            cmd_parameter(&fit_output, &config, &variable, samples, seed, output.as_ref())
        }
        Commands::Linearity { truth, unfolded_dir, config, variable, reweight, output } => {
            cmd_linearity(&truth, &unfolded_dir, &config, &variable, reweight, &output)
        }
        Commands::Toys { input, hist, n, pdf, seed, output } => {
            cmd_toys(&input, &hist, n, pdf, seed, output.as_ref())
        }
        Commands::ScanBinnings {
            input,
            output,
            config,
            variable,
            channel,
            campaign,
            data,
            nbins,
            mode,
            resolution,
            fit_command,
            executor,
            queue,
            preamble,
            dry_run,
        } => scan::cmd_scan_binnings(scan::ScanArgs {
            input,
            output,
            config,
            variable,
            channels: channel,
            campaign,
            data,
            nbins,
            mode,
            resolution,
            fit_command,
            dispatch: dispatch(executor, queue, preamble, dry_run),
        }),
        Commands::PullTest {
            input,
            output,
            config,
            variable,
            channel,
            campaign,
            target,
            ntoys,
            pdf,
            seed,
            fit_command,
            executor,
            queue,
            preamble,
            dry_run,
        } => pull::cmd_pull_test(pull::PullArgs {
            input,
            output,
            config,
            variable,
            channels: channel,
            campaign,
            target,
            ntoys,
            pdf,
            seed,
            fit_command,
            dispatch: dispatch(executor, queue, preamble, dry_run),
        }),
        Commands::Ensemble { nominal, toys_dir, prefix, n, config, output } => {
            cmd_ensemble(&nominal, &toys_dir, &prefix, n, &config, &output)
        }
        Commands::Version => {
            println!("unfold {}", uf_core::VERSION);
            Ok(())
        }
    }
}

fn dispatch(
    executor: ExecutorKind,
    queue: String,
    preamble: Vec<String>,
    dry_run: bool,
) -> graph::Dispatch {
    graph::Dispatch {
        pbs: match executor {
            ExecutorKind::Local => None,
            ExecutorKind::Pbs => Some((queue, preamble)),
        },
        dry_run,
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn cmd_rebin(
    input: PathBuf,
    output: PathBuf,
    config: &Path,
    variables: Vec<String>,
    channels: Vec<String>,
    campaigns: Vec<String>,
    syst: SystMode,
) -> Result<()> {
    let (analysis, rebin) = AnalysisConfig::load_with_rebin(config)
        .with_context(|| format!("loading configuration {}", config.display()))?;
    let paths = RebinPaths { input, output };
    let selection = RebinSelection { variables, channels, campaigns };
    let written = run_rebin(&paths, &analysis, &rebin, &selection, syst)?;
    tracing::info!(containers = written.len(), "rebin finished");
    write_json(
        None,
        serde_json::json!({
            "containers": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        }),
    )
}

fn cmd_bin_edges(
    binning: &[f64],
    granularity: f64,
    tolerance: f64,
    truncate: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let policy = if truncate { MisalignmentPolicy::Truncate } else { MisalignmentPolicy::Error };
    let alignment = EdgeAlignment { tolerance, policy };
    let indices = uf_hist::map_bin_edges(binning, granularity, &alignment)?;
    write_json(output, serde_json::json!({ "binning": binning, "indices": indices }))
}

fn cmd_parameter(
    fit_output: &Path,
    config: &Path,
    variable: &str,
    samples: usize,
    seed: u64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (analysis, rebin) = AnalysisConfig::load_with_rebin(config)
        .with_context(|| format!("loading configuration {}", config.display()))?;
    let factor = analysis.factor_for(variable)?;
    let fit = FitOutput::read(fit_output)
        .with_context(|| format!("reading fit output {}", fit_output.display()))?;
    let param = extract_unfolded_parameter(&fit, &rebin.binning, factor, samples, seed)?;
    let path = write_unfolded_parameter(fit_output, &param)?;
    tracing::info!(path = %path.display(), "unfolded parameter written");
    write_json(output, serde_json::to_value(&param)?)
}

fn cmd_linearity(
    truth: &Path,
    unfolded_dir: &Path,
    config: &Path,
    variable: &str,
    mut samples: Vec<String>,
    output: &Path,
) -> Result<()> {
    let (_, rebin) = AnalysisConfig::load_with_rebin(config)
        .with_context(|| format!("loading configuration {}", config.display()))?;
    let truth_values = TruthRecords::read_binned(truth)
        .with_context(|| format!("reading truth parameters {}", truth.display()))?;
    if !samples.iter().any(|s| s == "mcdata") {
        samples.push("mcdata".to_string());
    }
    tracing::info!(variable, samples = ?samples, "linearity test");
    let unfolded = load_unfolded(unfolded_dir, &samples)?;
    let result = linearity_test(&truth_values, &unfolded, &rebin.binning)?;
    let path = write_linearity(output, &result)?;
    tracing::info!(path = %path.display(), "linearity test written");
    write_json(None, serde_json::to_value(&result)?)
}

fn cmd_toys(
    input: &Path,
    hist: &str,
    n: usize,
    pdf: ToyPdf,
    seed: u64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut file =
        HistFile::open(input).with_context(|| format!("reading container {}", input.display()))?;
    let obj = file.get(hist).cloned().ok_or_else(|| uf_core::Error::MissingObject(hist.into()))?;
    let toys = make_toys(&obj, n, pdf, seed);
    let names: Vec<String> = toys.iter().map(|t| t.name().to_string()).collect();
    for toy in toys {
        let name = toy.name().to_string();
        file.insert(&name, toy);
    }
    let target = output.map(PathBuf::as_path).unwrap_or(input);
    file.save(target)?;
    tracing::info!(toys = names.len(), path = %target.display(), "toys written");
    write_json(None, serde_json::json!({ "container": target.display().to_string(), "toys": names }))
}

fn cmd_ensemble(
    nominal: &Path,
    toys_dir: &Path,
    prefix: &str,
    n: usize,
    config: &Path,
    output: &Path,
) -> Result<()> {
    let (_, rebin) = AnalysisConfig::load_with_rebin(config)
        .with_context(|| format!("loading configuration {}", config.display()))?;
    let nominal_path = nominal.join("spin_parameter.json");
    let nominal = read_unfolded_parameter(&nominal_path)
        .with_context(|| format!("reading nominal result {}", nominal_path.display()))?;
    let toys = load_ensemble(toys_dir, prefix, n);
    let result = ensemble_test(&nominal, &toys, &rebin.binning)?;
    let path = write_ensemble(output, &result)?;
    tracing::info!(path = %path.display(), toys = result.n_toys, "ensemble test written");
    write_json(None, serde_json::to_value(&result)?)
}
