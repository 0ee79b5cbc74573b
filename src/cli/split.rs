//! `split` command.

use std::path::{Path, PathBuf};

use crate::{
    config::SamplerConfig,
    output::write_outcome,
    refine::{RefinementController, RefinementState},
};

use super::{print_json, InputArgs};

/// Command-line values that override the configuration file.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub(crate) ratio: Option<f64>,
    pub(crate) threshold: Option<usize>,
    pub(crate) seed: Option<u64>,
    pub(crate) max_iterations: Option<usize>,
    pub(crate) tolerance: Option<f64>,
    pub(crate) ri_threshold: Option<f64>,
}

impl Overrides {
    fn apply(&self, mut config: SamplerConfig) -> SamplerConfig {
        if let Some(ratio) = self.ratio {
            config.sample_ratio = ratio;
        }
        if let Some(threshold) = self.threshold {
            config.cluster_threshold = threshold;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(iterations) = self.max_iterations {
            config.max_iterations = iterations;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(ri) = self.ri_threshold {
            config.ri_threshold = ri;
        }
        config
    }
}

/// Build the holdout and write every output.
pub(crate) fn cmd_split(
    input: &InputArgs,
    out_dir: &Path,
    config_path: Option<&PathBuf>,
    overrides: &Overrides,
    format: &str,
    strict: bool,
) -> crate::Result<()> {
    let base = match config_path {
        Some(path) => SamplerConfig::from_file(path)?,
        None => SamplerConfig::default(),
    };
    let config = overrides.apply(base);
    config.validate()?;

    let store = input.load()?;
    let controller = RefinementController::new(&store, config.clone())?;
    let outcome = controller.run()?;
    let paths = write_outcome(out_dir, &store, &outcome, &config)?;

    if format == "json" {
        print_json(&serde_json::json!({
            "status": outcome.status,
            "iteration": outcome.iteration,
            "iterations": outcome.iterations,
            "holdout_size": outcome.partition.holdout().len(),
            "training_size": outcome.partition.training().len(),
            "representation_index": outcome.report.representation_index,
            "scores": outcome.report.scores,
            "failing_axes": outcome.report.failing_axes,
            "outputs": {
                "holdout": paths.holdout,
                "training": paths.training,
                "report": paths.report,
                "assignments": paths.assignments,
            },
        }))?;
    } else {
        println!("Holdout Split");
        println!("=============");
        println!("Domains:     {}", store.len());
        println!(
            "Holdout:     {} ({:.1}%, {} components)",
            outcome.partition.holdout().len(),
            outcome.partition.holdout_fraction() * 100.0,
            outcome.partition.holdout_components()
        );
        println!("Training:    {}", outcome.partition.training().len());
        println!(
            "Iterations:  {} (best at {})",
            outcome.iterations, outcome.iteration
        );
        println!();

        let scores = &outcome.report.scores;
        println!("{:<26} SCORE", "AXIS");
        println!("{}", "-".repeat(34));
        println!("{:<26} {:.4}", "distribution_similarity", scores.distribution_similarity);
        println!("{:<26} {:.4}", "hierarchy_coverage", scores.hierarchy_coverage);
        println!("{:<26} {:.4}", "stability_coverage", scores.stability_coverage);
        println!(
            "{:<26} {:.4}",
            "representation_index", outcome.report.representation_index
        );
        println!();

        match outcome.status {
            RefinementState::Accepted => println!("\u{2713} Representative holdout accepted"),
            _ => println!(
                "\u{26A0}\u{FE0F}  Threshold {:.2} not reached; best partition written",
                config.ri_threshold
            ),
        }
        println!("Outputs written to {}", out_dir.display());
    }

    if strict {
        outcome.into_accepted()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let config = Overrides {
            ratio: Some(0.15),
            seed: Some(3),
            ..Overrides::default()
        }
        .apply(SamplerConfig::default());

        assert_eq!(config.sample_ratio, 0.15);
        assert_eq!(config.seed, 3);
        assert_eq!(config.cluster_threshold, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ratio_override_lifts_cap() {
        let config = Overrides {
            ratio: Some(0.3),
            ..Overrides::default()
        }
        .apply(SamplerConfig::default());
        assert_eq!(config.effective_max_ratio(), 0.3);
        assert!(config.validate().is_ok());
    }
}
