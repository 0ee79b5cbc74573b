//! Representativeness scoring of a holdout against the full collection.
//!
//! Three sub-scores are combined into the Representation Index (RI):
//!
//! - **distribution similarity**: KS tests on every continuous metric and
//!   chi-squared tests on every categorical one, each mapped to
//!   `min(1, p / alpha)` and averaged
//! - **hierarchy coverage**: fraction of population topologies present
//! - **stability coverage**: fraction of stability classes present, scaled
//!   by one minus the total variation distance between class proportions
//!
//! RI is their geometric mean.

#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    domain::{DomainStore, StabilityClass, TopologyKey},
    error::{Error, Result},
    ingest::features::{HELIX_FEATURE, SHEET_FEATURE},
    stats::{chi_squared_goodness_of_fit, ks_two_sample, GoodnessOfFit, TestOutcome},
};

/// Sub-score axes of the Representation Index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Per-metric distribution agreement
    DistributionSimilarity,
    /// Topology coverage
    HierarchyCoverage,
    /// Stability class coverage and balance
    StabilityCoverage,
}

impl Axis {
    /// All axes in report order.
    pub const ALL: [Self; 3] = [
        Self::DistributionSimilarity,
        Self::HierarchyCoverage,
        Self::StabilityCoverage,
    ];

    /// Snake-case name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DistributionSimilarity => "distribution_similarity",
            Self::HierarchyCoverage => "hierarchy_coverage",
            Self::StabilityCoverage => "stability_coverage",
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// KS result for one continuous metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousMetric {
    /// Metric name (`size` or a feature name)
    pub metric: String,
    /// Statistic and p-value
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

/// Chi-squared result for one categorical metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalMetric {
    /// Category name
    pub category: String,
    /// Goodness-of-fit details
    #[serde(flatten)]
    pub fit: GoodnessOfFit,
}

/// Coverage at one CATH level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelCoverage {
    /// `class`, `architecture` or `topology`
    pub level: String,
    /// Distinct labels present in the holdout
    pub covered: usize,
    /// Distinct labels in the population
    pub total: usize,
}

impl LevelCoverage {
    /// Covered fraction.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.covered as f64 / self.total as f64
        }
    }
}

/// Share of a stability class in holdout and population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityShare {
    /// Class
    pub class: StabilityClass,
    /// Fraction of the holdout
    pub holdout: f64,
    /// Fraction of the population
    pub population: f64,
}

/// The three sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// Mean of `min(1, p / alpha)` over all tests
    pub distribution_similarity: f64,
    /// Fraction of topologies present
    pub hierarchy_coverage: f64,
    /// Class presence times one minus total variation distance
    pub stability_coverage: f64,
}

impl SubScores {
    /// Score on one axis.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::DistributionSimilarity => self.distribution_similarity,
            Axis::HierarchyCoverage => self.hierarchy_coverage,
            Axis::StabilityCoverage => self.stability_coverage,
        }
    }

    /// Geometric mean; zero if any sub-score is zero.
    pub fn representation_index(&self) -> f64 {
        let scores = [
            self.distribution_similarity,
            self.hierarchy_coverage,
            self.stability_coverage,
        ];
        if scores.iter().any(|s| *s <= 0.0) {
            return 0.0;
        }
        scores.iter().product::<f64>().cbrt().clamp(0.0, 1.0)
    }
}

/// Full validation result for one holdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Domains in the holdout
    pub holdout_size: usize,
    /// Domains in the population
    pub population_size: usize,
    /// KS tests
    pub continuous: Vec<ContinuousMetric>,
    /// Chi-squared tests
    pub categorical: Vec<CategoricalMetric>,
    /// Coverage per CATH level
    pub hierarchy: Vec<LevelCoverage>,
    /// Population topologies missing from the holdout
    pub uncovered_topologies: Vec<TopologyKey>,
    /// Stability class proportions
    pub stability: Vec<StabilityShare>,
    /// Sub-scores
    pub scores: SubScores,
    /// Representation Index in [0, 1]
    pub representation_index: f64,
    /// Significance level used
    pub alpha: f64,
    /// Acceptance threshold used
    pub threshold: f64,
    /// Axes scoring below the threshold
    pub failing_axes: Vec<Axis>,
    /// Tests with p below alpha
    pub failing_tests: Vec<String>,
}

impl ValidationReport {
    /// Whether RI meets the threshold.
    pub fn passes(&self) -> bool {
        self.representation_index >= self.threshold
    }

    /// Whether an axis scored below the threshold.
    pub fn is_failing(&self, axis: Axis) -> bool {
        self.failing_axes.contains(&axis)
    }
}

/// Secondary-structure bucket of a domain.
///
/// Helix-rich or sheet-rich when that fraction is at least one half, mixed
/// when helix and sheet together reach one half, coil-rich otherwise.
pub fn secondary_structure_bucket(helix: f64, sheet: f64) -> &'static str {
    if helix >= 0.5 {
        "helix_rich"
    } else if sheet >= 0.5 {
        "sheet_rich"
    } else if helix + sheet >= 0.5 {
        "mixed"
    } else {
        "coil_rich"
    }
}

/// Scores holdouts against a fixed store.
#[derive(Debug, Clone)]
pub struct Validator<'a> {
    store: &'a DomainStore,
    alpha: f64,
    threshold: f64,
}

impl<'a> Validator<'a> {
    /// Validator with alpha 0.05 and threshold 0.9.
    pub fn new(store: &'a DomainStore) -> Self {
        Self {
            store,
            alpha: 0.05,
            threshold: 0.9,
        }
    }

    /// Set the significance level.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the acceptance threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Score a holdout given as store indices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the holdout is empty or an index
    /// is out of range.
    pub fn validate(&self, holdout: &[usize]) -> Result<ValidationReport> {
        let mut holdout = holdout.to_vec();
        holdout.sort_unstable();
        holdout.dedup();

        if holdout.is_empty() {
            return Err(Error::invalid_input("cannot validate an empty holdout"));
        }
        if let Some(&bad) = holdout.iter().find(|&&i| i >= self.store.len()) {
            return Err(Error::invalid_input(format!(
                "holdout index {bad} out of range for {} domains",
                self.store.len()
            )));
        }

        let everyone: Vec<usize> = (0..self.store.len()).collect();

        let continuous = self.continuous_tests(&holdout, &everyone)?;
        let categorical = self.categorical_tests(&holdout, &everyone)?;

        let p_values = continuous
            .iter()
            .map(|m| (m.metric.as_str(), m.outcome.p_value))
            .chain(
                categorical
                    .iter()
                    .map(|m| (m.category.as_str(), m.fit.outcome.p_value)),
            );

        let mut failing_tests = Vec::new();
        let mut similarity_sum = 0.0;
        let mut tests = 0usize;
        for (name, p) in p_values {
            similarity_sum += (p / self.alpha).min(1.0);
            tests += 1;
            if p < self.alpha {
                failing_tests.push(name.to_string());
            }
        }
        let distribution_similarity = if tests == 0 {
            1.0
        } else {
            similarity_sum / tests as f64
        };

        let (hierarchy, uncovered_topologies) = self.hierarchy_coverage(&holdout);
        let hierarchy_coverage = hierarchy
            .iter()
            .find(|l| l.level == "topology")
            .map_or(1.0, LevelCoverage::ratio);

        let (stability, stability_coverage) = self.stability_coverage(&holdout);

        let scores = SubScores {
            distribution_similarity,
            hierarchy_coverage,
            stability_coverage,
        };
        let representation_index = scores.representation_index();
        let failing_axes = Axis::ALL
            .into_iter()
            .filter(|&axis| scores.get(axis) < self.threshold)
            .collect();

        debug!(
            holdout = holdout.len(),
            ri = representation_index,
            distribution = distribution_similarity,
            hierarchy = hierarchy_coverage,
            stability = stability_coverage,
            "validated holdout"
        );

        Ok(ValidationReport {
            holdout_size: holdout.len(),
            population_size: self.store.len(),
            continuous,
            categorical,
            hierarchy,
            uncovered_topologies,
            stability,
            scores,
            representation_index,
            alpha: self.alpha,
            threshold: self.threshold,
            failing_axes,
            failing_tests,
        })
    }

    fn continuous_tests(&self, holdout: &[usize], everyone: &[usize]) -> Result<Vec<ContinuousMetric>> {
        let domains = self.store.domains();
        let column = |indices: &[usize], col: Option<usize>| -> Vec<f64> {
            indices
                .iter()
                .map(|&i| match col {
                    None => f64::from(domains[i].size()),
                    Some(c) => domains[i].features()[c],
                })
                .collect()
        };

        std::iter::once(("size".to_string(), None))
            .chain(
                self.store
                    .feature_names()
                    .iter()
                    .enumerate()
                    .map(|(c, name)| (name.clone(), Some(c))),
            )
            .map(|(metric, col)| {
                let outcome = ks_two_sample(&column(holdout, col), &column(everyone, col))?;
                Ok(ContinuousMetric { metric, outcome })
            })
            .collect()
    }

    fn categorical_tests(&self, holdout: &[usize], everyone: &[usize]) -> Result<Vec<CategoricalMetric>> {
        let domains = self.store.domains();
        let names = self.store.feature_names();
        let helix = names.iter().position(|n| n == HELIX_FEATURE);
        let sheet = names.iter().position(|n| n == SHEET_FEATURE);

        let mut categories: Vec<(&str, Box<dyn Fn(usize) -> String + '_>)> = vec![
            ("class", Box::new(|i| domains[i].cath().level_label(1))),
            ("architecture", Box::new(|i| domains[i].cath().level_label(2))),
            ("topology", Box::new(|i| domains[i].cath().level_label(3))),
            ("homology", Box::new(|i| domains[i].cath().level_label(4))),
            ("stability", Box::new(|i| domains[i].stability().to_string())),
        ];
        if let (Some(h), Some(s)) = (helix, sheet) {
            categories.push((
                "secondary_structure",
                Box::new(move |i| {
                    let f = domains[i].features();
                    secondary_structure_bucket(f[h], f[s]).to_string()
                }),
            ));
        }

        let count = |indices: &[usize], label: &dyn Fn(usize) -> String| {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for &i in indices {
                *counts.entry(label(i)).or_default() += 1;
            }
            counts
        };

        categories
            .iter()
            .map(|(category, label)| {
                let fit = chi_squared_goodness_of_fit(
                    &count(holdout, label.as_ref()),
                    &count(everyone, label.as_ref()),
                )?;
                Ok(CategoricalMetric {
                    category: (*category).to_string(),
                    fit,
                })
            })
            .collect()
    }

    fn hierarchy_coverage(&self, holdout: &[usize]) -> (Vec<LevelCoverage>, Vec<TopologyKey>) {
        let domains = self.store.domains();

        let levels = [(1, "class"), (2, "architecture"), (3, "topology")]
            .into_iter()
            .map(|(depth, level)| {
                let all: BTreeSet<String> =
                    domains.iter().map(|d| d.cath().level_label(depth)).collect();
                let held: BTreeSet<String> = holdout
                    .iter()
                    .map(|&i| domains[i].cath().level_label(depth))
                    .collect();
                LevelCoverage {
                    level: level.to_string(),
                    covered: held.intersection(&all).count(),
                    total: all.len(),
                }
            })
            .collect();

        let held: BTreeSet<TopologyKey> = holdout.iter().map(|&i| domains[i].topology()).collect();
        let uncovered = domains
            .iter()
            .map(|d| d.topology())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|k| !held.contains(k))
            .collect();

        (levels, uncovered)
    }

    fn stability_coverage(&self, holdout: &[usize]) -> (Vec<StabilityShare>, f64) {
        let domains = self.store.domains();
        let shares = |indices: &mut dyn Iterator<Item = StabilityClass>, n: usize| {
            let mut counts = [0usize; 3];
            for class in indices {
                counts[class as usize] += 1;
            }
            counts.map(|c| c as f64 / n as f64)
        };

        let held = shares(&mut holdout.iter().map(|&i| domains[i].stability()), holdout.len());
        let all = shares(&mut domains.iter().map(|d| d.stability()), domains.len());

        let present_in_population = all.iter().filter(|&&p| p > 0.0).count();
        let present_in_both = all
            .iter()
            .zip(&held)
            .filter(|&(&p, &h)| p > 0.0 && h > 0.0)
            .count();
        let presence = if present_in_population == 0 {
            1.0
        } else {
            present_in_both as f64 / present_in_population as f64
        };
        let tvd = 0.5 * all.iter().zip(&held).map(|(p, h)| (p - h).abs()).sum::<f64>();

        let breakdown = StabilityClass::ALL
            .into_iter()
            .map(|class| StabilityShare {
                class,
                holdout: held[class as usize],
                population: all[class as usize],
            })
            .collect();

        (breakdown, (presence * (1.0 - tvd)).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{test_support::*, CathPath, Domain};

    fn ss_store() -> DomainStore {
        let names = ["size_norm", HELIX_FEATURE, SHEET_FEATURE];
        let domains = (0..90)
            .map(|i| {
                let helix = (i % 10) as f64 / 10.0;
                let sheet = ((i * 3) % 7) as f64 / 14.0;
                Domain::new(
                    format!("{:04}A00", i),
                    CathPath::new(i as u32 % 3 + 1, 10, i as u32 % 5 + 1, i as u32),
                    format!("{:04}", i),
                    50 + i as u32,
                    vec![i as f64 / 90.0, helix, sheet],
                    StabilityClass::ALL[i % 3],
                )
            })
            .collect();
        DomainStore::new(domains, names).expect("store")
    }

    // ========== bucket tests ==========

    #[test]
    fn test_secondary_structure_buckets() {
        assert_eq!(secondary_structure_bucket(0.6, 0.1), "helix_rich");
        assert_eq!(secondary_structure_bucket(0.1, 0.55), "sheet_rich");
        assert_eq!(secondary_structure_bucket(0.3, 0.3), "mixed");
        assert_eq!(secondary_structure_bucket(0.1, 0.1), "coil_rich");
    }

    // ========== SubScores tests ==========

    #[test]
    fn test_ri_geometric_mean() {
        let scores = SubScores {
            distribution_similarity: 1.0,
            hierarchy_coverage: 0.5,
            stability_coverage: 0.25,
        };
        assert!((scores.representation_index() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ri_zero_when_any_zero() {
        let scores = SubScores {
            distribution_similarity: 1.0,
            hierarchy_coverage: 0.0,
            stability_coverage: 1.0,
        };
        assert_eq!(scores.representation_index(), 0.0);
    }

    // ========== Validator tests ==========

    #[test]
    fn test_full_replica_scores_one() {
        let store = ss_store();
        let everyone: Vec<usize> = (0..store.len()).collect();
        let report = Validator::new(&store).validate(&everyone).expect("validate");

        assert!((report.representation_index - 1.0).abs() < 1e-9);
        assert!(report.failing_axes.is_empty());
        assert!(report.failing_tests.is_empty());
        assert!(report.uncovered_topologies.is_empty());
        for metric in &report.continuous {
            assert!(metric.outcome.p_value > 0.99, "{}", metric.metric);
        }
        for metric in &report.categorical {
            assert!((metric.fit.outcome.p_value - 1.0).abs() < 1e-12);
        }
        assert!(report
            .categorical
            .iter()
            .any(|m| m.category == "secondary_structure"));
    }

    #[test]
    fn test_systematic_sample_representative() {
        let store = population(300);
        let every_other: Vec<usize> = (0..300).step_by(2).collect();
        let report = Validator::new(&store).validate(&every_other).expect("validate");
        assert_eq!(report.holdout_size, 150);
        assert!(report.scores.hierarchy_coverage > 0.99);
        assert!(report.representation_index > 0.5);
    }

    #[test]
    fn test_biased_holdout_fails_hierarchy() {
        let store = ss_store();
        // Only class 1 domains
        let biased: Vec<usize> = (0..store.len()).filter(|i| i % 3 == 0).take(10).collect();
        let report = Validator::new(&store).validate(&biased).expect("validate");

        assert!(report.scores.hierarchy_coverage < 0.9);
        assert!(report.is_failing(Axis::HierarchyCoverage));
        assert!(!report.uncovered_topologies.is_empty());
        assert!(!report.passes());
        let class = report
            .hierarchy
            .iter()
            .find(|l| l.level == "class")
            .expect("class level");
        assert_eq!(class.covered, 1);
        assert_eq!(class.total, 3);
    }

    #[test]
    fn test_missing_stability_class_penalized() {
        let store = ss_store();
        // i % 3 == 0 and i % 3 == 1 only: no unstable domains
        let holdout: Vec<usize> = (0..store.len()).filter(|i| i % 3 != 2).collect();
        let report = Validator::new(&store).validate(&holdout).expect("validate");
        // presence 2/3, tvd 1/3
        let expected = (2.0 / 3.0) * (1.0 - 1.0 / 3.0);
        assert!((report.scores.stability_coverage - expected).abs() < 1e-9);
    }

    #[test]
    fn test_validate_idempotent() {
        let store = population(120);
        let holdout: Vec<usize> = (0..120).step_by(7).collect();
        let validator = Validator::new(&store);
        let a = validator.validate(&holdout).expect("a");
        let b = validator.validate(&holdout).expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_rejects_empty() {
        let store = population(10);
        assert!(matches!(
            Validator::new(&store).validate(&[]),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let store = population(10);
        assert!(Validator::new(&store).validate(&[3, 10]).is_err());
    }

    #[test]
    fn test_report_serializes() {
        let store = population(40);
        let report = Validator::new(&store)
            .validate(&[0, 5, 10, 15, 20, 25, 30, 35])
            .expect("validate");
        let json = serde_json::to_string(&report).expect("json");
        assert!(json.contains("representation_index"));
        assert!(json.contains("hierarchy_coverage"));
    }
}
