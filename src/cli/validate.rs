//! `validate` command.

use std::path::Path;

use crate::{
    network::{HomologyNetwork, Partition},
    output::read_id_list,
    validate::Validator,
};

use super::{print_json, InputArgs};

/// Score an existing holdout list against the full collection.
pub(crate) fn cmd_validate(
    input: &InputArgs,
    holdout_path: &Path,
    alpha: f64,
    ri_threshold: f64,
    format: &str,
) -> crate::Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(crate::Error::invalid_config(format!(
            "alpha must be in (0, 1), got {alpha}"
        )));
    }

    let store = input.load()?;
    let ids = read_id_list(holdout_path)?;

    // Component check first: a list that splits a homology component is not
    // a valid holdout whatever its score
    let network = HomologyNetwork::build(&store);
    let partition = Partition::from_ids(&store, &network, ids.iter().map(String::as_str))?;

    let report = Validator::new(&store)
        .with_alpha(alpha)
        .with_threshold(ri_threshold)
        .validate(partition.holdout())?;

    if format == "json" {
        print_json(&serde_json::to_value(&report).map_err(crate::Error::serialization)?)?;
        return Ok(());
    }

    println!("Holdout Validation");
    println!("==================");
    println!("Holdout:  {}", holdout_path.display());
    println!("Domains:  {} of {}", report.holdout_size, report.population_size);
    println!("Alpha:    {}", alpha);
    println!();

    println!("{:<24} {:<12} P-VALUE", "METRIC", "STATISTIC");
    println!("{}", "-".repeat(48));
    for metric in &report.continuous {
        println!(
            "{:<24} {:<12.4} {:.4}",
            metric.metric, metric.outcome.statistic, metric.outcome.p_value
        );
    }
    for metric in &report.categorical {
        println!(
            "{:<24} {:<12.4} {:.4}",
            metric.category, metric.fit.outcome.statistic, metric.fit.outcome.p_value
        );
    }
    println!();

    for level in &report.hierarchy {
        println!(
            "{:<14} {}/{} covered",
            level.level, level.covered, level.total
        );
    }
    println!();

    println!("distribution_similarity  {:.4}", report.scores.distribution_similarity);
    println!("hierarchy_coverage       {:.4}", report.scores.hierarchy_coverage);
    println!("stability_coverage       {:.4}", report.scores.stability_coverage);
    println!("representation_index     {:.4}", report.representation_index);
    println!();

    if report.passes() {
        println!("\u{2713} Holdout is representative (RI >= {:.2})", ri_threshold);
    } else {
        let failing: Vec<&str> = report.failing_axes.iter().map(|a| a.name()).collect();
        println!(
            "\u{26A0}\u{FE0F}  RI below {:.2}; failing: {}",
            ri_threshold,
            failing.join(", ")
        );
    }

    Ok(())
}
