//! Percept CLI - reconstruction-quality and listing-label evaluation.
//!
//! Single binary that provides:
//! - `percept evaluate` - score captured renders and rank them
//! - `percept label` - tag listing photos and adapt tags to the region
//! - `percept init` - write a starter configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use percept_core::config::DEFAULT_CONFIG_YAML;
use percept_core::{EvalConfig, MetricsSelection, RenderEvaluation, ResultsStore};
use percept_critics::{Evaluator, LabelingPipeline, LabelingSummary, ListingFailure};

#[derive(Parser)]
#[command(name = "percept")]
#[command(about = "Reconstruction-quality and listing-label evaluation", version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate captured renders
    Evaluate {
        /// Evaluate one configured render (1-indexed)
        #[arg(long, conflicts_with = "url")]
        run: Option<usize>,

        /// Evaluate a render that is not in the configuration
        #[arg(long)]
        url: Option<String>,

        /// Name for --url
        #[arg(long, requires = "url", default_value = "custom")]
        name: String,

        /// Which metric families to compute
        #[arg(long, value_enum, default_value_t = MetricsArg::All)]
        metrics: MetricsArg,

        /// Override the results directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Accepted for compatibility; views are always read from disk
        #[arg(long)]
        skip_capture: bool,
    },

    /// Generate region-adapted tags for listings
    Label {
        /// Listing JSON documents
        #[arg(long, required = true, num_args = 1..)]
        listing: Vec<PathBuf>,

        /// Directory holding the listing photos (default: next to the listing)
        #[arg(long)]
        images: Option<PathBuf>,

        /// Output file (single listing only)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Tag every photo, skipping the interior filter
        #[arg(long)]
        no_filter: bool,
    },

    /// Write a starter configuration
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricsArg {
    All,
    Cv,
    Vlm,
}

impl From<MetricsArg> for MetricsSelection {
    fn from(arg: MetricsArg) -> Self {
        match arg {
            MetricsArg::All => MetricsSelection::All,
            MetricsArg::Cv => MetricsSelection::Cv,
            MetricsArg::Vlm => MetricsSelection::Vlm,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Evaluate {
            run,
            url,
            name,
            metrics,
            output_dir,
            skip_capture: _,
        } => evaluate(&cli.config, run, url, name, metrics.into(), output_dir).await,
        Commands::Label {
            listing,
            images,
            output,
            no_filter,
        } => label(&cli.config, listing, images, output, no_filter).await,
        Commands::Init => init_config(&cli.config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(path: &Path) -> Result<EvalConfig> {
    let mut config = EvalConfig::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    config.resolve_paths(base);
    Ok(config)
}

async fn evaluate(
    config_path: &Path,
    run: Option<usize>,
    url: Option<String>,
    name: String,
    metrics: MetricsSelection,
    output_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;
    config.apply_selection(metrics);
    if let Some(dir) = output_dir {
        config.output.results_dir = dir;
    }

    let target = match (run, url) {
        (_, Some(url)) => Some((name, url)),
        (Some(run), None) => {
            if run < 1 || run > config.renders.len() {
                error!(
                    run,
                    renders = config.renders.len(),
                    "Invalid run number, must be 1-{}",
                    config.renders.len()
                );
                return Ok(ExitCode::FAILURE);
            }
            let render = &config.renders[run - 1];
            info!(run, render = %render.name, "Evaluating run");
            Some((render.name.clone(), render.url.clone()))
        }
        (None, None) => None,
    };

    let evaluator = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Evaluator::from_config(&config))
            .await
            .context("Evaluator setup panicked")?
    };

    match target {
        Some((name, url)) => {
            let evaluation = evaluator.evaluate_render(&name, &url).await;
            print_evaluation(&evaluation);
        }
        None => {
            if config.renders.is_empty() {
                error!("No renders configured");
                return Ok(ExitCode::FAILURE);
            }
            let (evaluations, comparison) = evaluator.evaluate_all().await;
            for evaluation in &evaluations {
                print_evaluation(evaluation);
            }
            println!("Ranking");
            println!("=======");
            for entry in &comparison.ranking {
                println!("  {}. {:<24} {:6.2}", entry.rank, entry.name, entry.score);
            }
        }
    }

    println!();
    println!("Results: {}", evaluator.store().dir().display());
    Ok(ExitCode::SUCCESS)
}

fn print_evaluation(evaluation: &RenderEvaluation) {
    println!();
    println!("{}", evaluation.render_name);
    println!("{}", "=".repeat(evaluation.render_name.len()));
    if let Some(reason) = &evaluation.error {
        println!("  error: {reason}");
        return;
    }
    println!("  views:   {}", evaluation.num_views);
    for result in evaluation.metric_results() {
        println!(
            "  {:<18} {:6.2}  (mean {:.3}, std {:.3})",
            result.metric_name, result.quality_score, result.mean, result.std
        );
    }
    println!("  overall: {:.2}/100", evaluation.overall_score);
}

async fn label(
    config_path: &Path,
    listings: Vec<PathBuf>,
    images: Option<PathBuf>,
    output: Option<PathBuf>,
    no_filter: bool,
) -> Result<ExitCode> {
    if output.is_some() && listings.len() > 1 {
        error!("--output needs exactly one --listing");
        return Ok(ExitCode::FAILURE);
    }

    let config = load_config(config_path)?;
    let filter = config.labeling.filter_interior && !no_filter;
    let pipeline = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || LabelingPipeline::from_config(&config, filter))
            .await
            .context("Labeling setup panicked")??
    };
    let store = ResultsStore::new(&config.labeling.results_dir);

    let (results, mut failed) = pipeline.process_all(&listings, images.as_deref()).await;

    for result in &results {
        let saved = match &output {
            Some(path) => save_json(path, result).map(|()| path.clone()),
            None => store.save_document(&format!("{}_labels.json", result.property_id), result),
        };
        let path = match saved {
            Ok(path) => path,
            Err(e) => {
                let reason = format!("{e:#}");
                error!(property = %result.property_id, error = %reason, "failed to save labels");
                failed.push(ListingFailure {
                    listing: result.property_id.clone(),
                    error: reason,
                });
                continue;
            }
        };

        println!();
        println!("{} ({})", result.property_id, result.region.region);
        println!(
            "  photos: {}/{} interior",
            result.image_stats.interior_images, result.image_stats.total_images
        );
        println!("  labels: {}", result.region.adapted_labels.join(", "));
        if let Some(grounding) = result.evaluation.grounding {
            println!(
                "  coverage {:.3}, redundancy {:.3}, consistency {:.3}",
                grounding.coverage, grounding.redundancy, grounding.clip_consistency
            );
        }
        println!("  saved:  {}", path.display());
    }

    for failure in &failed {
        println!();
        println!("{}: {}", failure.listing, failure.error);
    }

    if listings.len() > 1 {
        let summary = LabelingSummary::of(&results, &failed);
        match store.save_document("summary.json", &summary) {
            Ok(path) => {
                println!();
                println!(
                    "{}/{} listings, diversity {:.3}, specificity {:.2} -> {}",
                    summary.total_properties,
                    listings.len(),
                    summary.diversity,
                    summary.mean_specificity,
                    path.display()
                );
            }
            Err(e) => error!(error = ?e, "failed to save summary"),
        }
    }

    if results.is_empty() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn save_json<T: serde::Serialize>(path: &Path, document: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(document)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn init_config(path: &Path) -> Result<ExitCode> {
    if path.exists() {
        println!("{} already exists, leaving it unchanged", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_YAML)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Put captured views under captured_views/<render>/");
    println!("  2. List the renders under `renders:`");
    println!("  3. export OPENAI_API_KEY=... and run: percept evaluate");
    Ok(ExitCode::SUCCESS)
}
