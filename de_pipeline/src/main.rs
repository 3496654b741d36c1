use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use de_pipeline::analysis::ma_plot::{read_merged, render, MaPlotData, MaThresholds, PlotTarget};
use de_pipeline::config::FailurePolicy;
use de_pipeline::models::GeneCategory;
use de_pipeline::{CommandEngine, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "de_pipeline")]
#[command(version)]
#[command(about = "Prepare RNA-seq counts, run differential expression per comparison, merge and plot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Select genes, run the engine for every comparison and write the merged table
    Run {
        /// JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the failure policy of the configuration
        #[arg(long, value_enum)]
        on_failure: Option<FailurePolicy>,

        /// Keep per-comparison intermediate files
        #[arg(long)]
        keep_intermediates: bool,

        /// Override the merged output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Draw the MA plot of one comparison from a merged table
    MaPlot {
        /// JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Merged table to read (defaults to the configured output)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Comparison to plot (defaults to the configured one, then the first)
        #[arg(long)]
        comparison: Option<String>,

        /// Report category counts without writing an image
        #[arg(long)]
        interactive: bool,
    },

    /// Write a configuration template
    InitConfig {
        #[arg(short, long, default_value = "de_config.json")]
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// `Ok(false)` when some comparisons failed but the run still produced output.
fn execute(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run { config, on_failure, keep_intermediates, output } => {
            let mut settings = PipelineConfig::from_path(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(policy) = on_failure {
                settings.on_failure = policy;
            }
            if keep_intermediates {
                settings.keep_intermediates = true;
            }
            if let Some(output) = output {
                settings.output = output;
            }

            let engine = CommandEngine::from_config(&settings.engine);
            let pipeline = Pipeline::new(settings, engine)?;
            let summary = pipeline.run().context("differential-expression run failed")?;
            if !summary.is_complete() {
                warn!("{} comparisons failed", summary.failed.len());
            }
            Ok(summary.is_complete())
        }

        Commands::MaPlot { config, input, comparison, interactive } => {
            let mut settings = PipelineConfig::from_path(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if input.is_some() {
                settings.plot.input = input;
            }
            if comparison.is_some() {
                settings.plot.comparison = comparison;
            }
            settings.plot.validate()?;

            let name = settings.plot_comparison()?.to_string();
            let merged_path = settings.plot_input().to_path_buf();
            let merged = read_merged(&merged_path)
                .with_context(|| format!("reading merged table {}", merged_path.display()))?;
            let thresholds = MaThresholds {
                fc_cutoff: settings.plot.fc_cutoff,
                p_cutoff: settings.plot.p_cutoff,
            };
            let data = MaPlotData::from_merged(&merged, &name, &settings.column_separator, thresholds)?;

            let counts = data.counts();
            info!(
                "{}: {} genes, {} significant only, {} large fold change only, {} both",
                name,
                data.points.len(),
                counts.get(GeneCategory::SignificantOnly),
                counts.get(GeneCategory::LargeFoldChangeOnly),
                counts.get(GeneCategory::Both)
            );

            let target = if interactive {
                PlotTarget::Interactive
            } else {
                PlotTarget::File(settings.plot.output_path())
            };
            render(&data, &target, (settings.plot.width, settings.plot.height))?;
            Ok(true)
        }

        Commands::InitConfig { path } => {
            PipelineConfig::write_template(&path)?;
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
