//! mdcath-holdout CLI
//!
//! Command-line interface for building and checking holdout splits.

use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod inspect;
mod split;
mod validate;

/// mdcath-holdout - representative, homology-aware holdout selection for mdCATH
#[derive(Parser)]
#[command(name = "mdcath-holdout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Input tables shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub(crate) struct InputArgs {
    /// CATH domain list (id C A T H ...)
    #[arg(long)]
    cath: PathBuf,
    /// Residue-level CSV per temperature (e.g. mdcath_320.csv)
    #[arg(long = "features", required = true, num_args = 1..)]
    features: Vec<PathBuf>,
}

impl InputArgs {
    /// Load and assemble the domain store.
    pub(crate) fn load(&self) -> crate::Result<crate::DomainStore> {
        let (store, stats) = crate::ingest::load_store(&self.cath, &self.features)?;
        tracing::debug!(?stats, "input assembly");
        Ok(store)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Select a representative holdout and write the split
    Split {
        #[command(flatten)]
        input: InputArgs,
        /// Output directory
        #[arg(short, long, default_value = "holdout")]
        out_dir: PathBuf,
        /// Sampler configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Target holdout ratio
        #[arg(long)]
        ratio: Option<f64>,
        /// Minimum topology group size for clustering
        #[arg(long)]
        threshold: Option<usize>,
        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Refinement iteration cap
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Holdout size tolerance, as a fraction of all domains
        #[arg(long)]
        tolerance: Option<f64>,
        /// Representation Index required for acceptance
        #[arg(long)]
        ri_threshold: Option<f64>,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
        /// Exit with failure if no representative holdout was found
        #[arg(long)]
        strict: bool,
    },
    /// Score an existing holdout list
    Validate {
        #[command(flatten)]
        input: InputArgs,
        /// Holdout id list, one id per line
        #[arg(long)]
        holdout: PathBuf,
        /// Significance level
        #[arg(short, long, default_value = "0.05")]
        alpha: f64,
        /// Representation Index required to pass
        #[arg(long, default_value = "0.9")]
        ri_threshold: f64,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Summarize topology groups and homology components
    Inspect {
        #[command(flatten)]
        input: InputArgs,
        /// Minimum topology group size for clustering
        #[arg(long, default_value = "10")]
        threshold: usize,
        /// Number of largest groups and components to list
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when run from tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run the mdcath-holdout CLI.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Split {
            input,
            out_dir,
            config,
            ratio,
            threshold,
            seed,
            max_iterations,
            tolerance,
            ri_threshold,
            format,
            strict,
        } => split::cmd_split(
            &input,
            &out_dir,
            config.as_ref(),
            &split::Overrides {
                ratio,
                threshold,
                seed,
                max_iterations,
                tolerance,
                ri_threshold,
            },
            &format,
            strict,
        ),
        Commands::Validate {
            input,
            holdout,
            alpha,
            ri_threshold,
            format,
        } => validate::cmd_validate(&input, &holdout, alpha, ri_threshold, &format),
        Commands::Inspect {
            input,
            threshold,
            top,
            format,
        } => inspect::cmd_inspect(&input, threshold, top, &format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Pretty-print a JSON value to stdout.
pub(crate) fn print_json(value: &serde_json::Value) -> crate::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).map_err(crate::Error::serialization)?
    );
    Ok(())
}
