//! Sample, validate, refine until the holdout is representative.
//!
//! The controller walks the states
//! `Sampling -> Validating -> (Accepted | Refining -> Sampling | Exhausted)`.
//! Each pass runs from an immutable [`SamplingState`]; only the controller
//! derives the next one, from the failing axes of the last report.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::SamplerConfig,
    domain::{DomainStore, TopologyKey},
    error::{Error, Result},
    network::{HomologyNetwork, NetworkSampler, Partition},
    normalize::FeatureMatrix,
    stratify::{derive_seed, CandidatePool, Stratifier},
    validate::{Axis, SubScores, ValidationReport, Validator},
};

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementState {
    /// Producing a partition from the current snapshot
    Sampling,
    /// Scoring the partition
    Validating,
    /// RI met the threshold (terminal)
    Accepted,
    /// Deriving the next snapshot
    Refining,
    /// Out of iterations (terminal)
    Exhausted,
}

impl RefinementState {
    /// Whether the state ends the loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Exhausted)
    }
}

/// Inputs of one sampling pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingState {
    /// Refinement iteration, 0 for the first pass
    pub iteration: usize,
    /// Target holdout ratio
    pub ratio: f64,
    /// Size band half-width as a fraction of all domains
    pub tolerance: f64,
    /// Extra clusters per topology group
    pub boosts: BTreeMap<TopologyKey, usize>,
    /// Seed of this pass
    pub seed: u64,
}

impl SamplingState {
    /// First snapshot of a run.
    pub fn initial(config: &SamplerConfig) -> Self {
        Self {
            iteration: 0,
            ratio: config.sample_ratio,
            tolerance: config.tolerance,
            boosts: BTreeMap::new(),
            seed: config.seed,
        }
    }

    /// Next snapshot after a failed validation.
    ///
    /// Uncovered topologies gain one cluster when hierarchy coverage fails.
    /// The ratio becomes `base * (1 + step * iteration)`, capped, when
    /// distribution similarity or stability coverage fails.
    pub fn refined(&self, report: &ValidationReport, config: &SamplerConfig) -> Self {
        let iteration = self.iteration + 1;

        let mut boosts = self.boosts.clone();
        if report.is_failing(Axis::HierarchyCoverage) {
            for key in &report.uncovered_topologies {
                *boosts.entry(*key).or_default() += 1;
            }
        }

        let ratio = if report.is_failing(Axis::DistributionSimilarity)
            || report.is_failing(Axis::StabilityCoverage)
        {
            (config.sample_ratio * (1.0 + config.ratio_step * iteration as f64))
                .min(config.effective_max_ratio())
        } else {
            self.ratio
        };

        Self {
            iteration,
            ratio,
            tolerance: self.tolerance,
            boosts,
            seed: derive_seed(config.seed, iteration as u64),
        }
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number
    pub iteration: usize,
    /// Ratio used
    pub ratio: f64,
    /// Seed used
    pub seed: u64,
    /// Candidates selected by the stratifier
    pub candidates: usize,
    /// Holdout size after component expansion
    pub holdout_size: usize,
    /// Representation Index
    pub representation_index: f64,
    /// Sub-scores
    pub scores: SubScores,
    /// Axes below threshold
    pub failing_axes: Vec<Axis>,
}

/// Terminal result of a run.
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    /// `Accepted` or `Exhausted`
    pub status: RefinementState,
    /// Accepted partition, or the best seen when exhausted
    pub partition: Partition,
    /// Report of that partition
    pub report: ValidationReport,
    /// Iteration that produced the partition
    pub iteration: usize,
    /// Refinement iterations performed
    pub iterations: usize,
    /// One record per pass
    pub history: Vec<IterationRecord>,
}

impl RefinementOutcome {
    /// Whether the run met the threshold.
    pub fn is_accepted(&self) -> bool {
        self.status == RefinementState::Accepted
    }

    /// The partition and report if accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConvergenceFailure`] with the best RI and failing
    /// axes if the run was exhausted.
    pub fn into_accepted(self) -> Result<(Partition, ValidationReport)> {
        if self.is_accepted() {
            Ok((self.partition, self.report))
        } else {
            Err(Error::ConvergenceFailure {
                iterations: self.iterations,
                best_ri: self.report.representation_index,
                failing: self
                    .report
                    .failing_axes
                    .iter()
                    .map(|a| a.name().to_string())
                    .collect(),
            })
        }
    }
}

/// Drives the sample-validate-refine loop over one store.
#[derive(Debug)]
pub struct RefinementController<'a> {
    store: &'a DomainStore,
    config: SamplerConfig,
    matrix: FeatureMatrix,
    network: HomologyNetwork,
}

impl<'a> RefinementController<'a> {
    /// Prepare a run: normalizes features and builds the homology network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(store: &'a DomainStore, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        let matrix = FeatureMatrix::from_store(store, config.normalization);
        let network = HomologyNetwork::build(store);
        Ok(Self {
            store,
            config,
            matrix,
            network,
        })
    }

    /// The homology network of the store.
    pub fn network(&self) -> &HomologyNetwork {
        &self.network
    }

    /// The configuration in use.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// One sampling pass for a snapshot.
    ///
    /// # Errors
    ///
    /// Propagates stratifier and sampler errors.
    pub fn sample(&self, state: &SamplingState) -> Result<(CandidatePool, Partition)> {
        let pool = Stratifier::new(self.store, &self.matrix)
            .with_threshold(self.config.cluster_threshold)
            .with_kmeans_iterations(self.config.kmeans_max_iterations)
            .stratify(state.ratio, &state.boosts, state.seed)?;
        let partition =
            NetworkSampler::new(self.store, &self.network).sample(&pool, state.ratio, state.tolerance)?;
        Ok((pool, partition))
    }

    /// Run until accepted or out of iterations.
    ///
    /// An exhausted run is returned as an outcome, not an error; use
    /// [`RefinementOutcome::into_accepted`] for a strict result.
    ///
    /// # Errors
    ///
    /// Returns input or integrity errors raised by any stage.
    pub fn run(&self) -> Result<RefinementOutcome> {
        let validator = Validator::new(self.store)
            .with_alpha(self.config.alpha)
            .with_threshold(self.config.ri_threshold);

        let mut state = SamplingState::initial(&self.config);
        let mut phase = RefinementState::Sampling;
        let mut history = Vec::new();
        let mut best: Option<(Partition, ValidationReport, usize)> = None;
        let mut pending: Option<(Partition, usize)> = None;
        let mut last_report: Option<ValidationReport> = None;

        while !phase.is_terminal() {
            phase = match phase {
                RefinementState::Sampling => {
                    let (pool, partition) = self.sample(&state)?;
                    pending = Some((partition, pool.len()));
                    RefinementState::Validating
                }
                RefinementState::Validating => {
                    let Some((partition, candidates)) = pending.take() else {
                        return Err(Error::invalid_input("validation without a partition"));
                    };
                    let report = validator.validate(partition.holdout())?;

                    info!(
                        iteration = state.iteration,
                        ratio = state.ratio,
                        holdout = partition.holdout().len(),
                        ri = report.representation_index,
                        "validated iteration"
                    );
                    history.push(IterationRecord {
                        iteration: state.iteration,
                        ratio: state.ratio,
                        seed: state.seed,
                        candidates,
                        holdout_size: partition.holdout().len(),
                        representation_index: report.representation_index,
                        scores: report.scores,
                        failing_axes: report.failing_axes.clone(),
                    });

                    let passes = report.passes();
                    let improves = best
                        .as_ref()
                        .map_or(true, |(_, r, _)| report.representation_index > r.representation_index);
                    if improves {
                        best = Some((partition, report.clone(), state.iteration));
                    }

                    if passes {
                        RefinementState::Accepted
                    } else if state.iteration >= self.config.max_iterations {
                        RefinementState::Exhausted
                    } else {
                        last_report = Some(report);
                        RefinementState::Refining
                    }
                }
                RefinementState::Refining => {
                    let Some(report) = last_report.take() else {
                        return Err(Error::invalid_input("refinement without a report"));
                    };
                    state = state.refined(&report, &self.config);
                    debug!(
                        iteration = state.iteration,
                        ratio = state.ratio,
                        boosted = state.boosts.len(),
                        "refined sampling state"
                    );
                    RefinementState::Sampling
                }
                terminal @ (RefinementState::Accepted | RefinementState::Exhausted) => terminal,
            };
        }

        let Some((partition, report, iteration)) = best else {
            return Err(Error::invalid_input("no partition was produced"));
        };

        // A passing RI outranks every failing one, so `best` is the accepted pass
        if phase == RefinementState::Exhausted {
            warn!(
                iterations = state.iteration,
                best_ri = report.representation_index,
                failing = ?report.failing_axes,
                "refinement exhausted without a representative holdout"
            );
        }

        Ok(RefinementOutcome {
            status: phase,
            partition,
            report,
            iteration,
            iterations: state.iteration,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        test_support::{domain, population, FEATURES},
        StabilityClass,
    };

    fn config() -> SamplerConfig {
        SamplerConfig::new().with_seed(42)
    }

    // ========== SamplingState tests ==========

    fn failing_report(store: &DomainStore, axes: Vec<Axis>) -> ValidationReport {
        let mut report = Validator::new(store).validate(&[0]).expect("validate");
        report.failing_axes = axes;
        report
    }

    #[test]
    fn test_initial_state() {
        let state = SamplingState::initial(&config());
        assert_eq!(state.iteration, 0);
        assert_eq!(state.ratio, 0.1);
        assert_eq!(state.seed, 42);
        assert!(state.boosts.is_empty());
    }

    #[test]
    fn test_refined_boosts_uncovered_topologies() {
        let store = population(50);
        let report = failing_report(&store, vec![Axis::HierarchyCoverage]);
        let state = SamplingState::initial(&config()).refined(&report, &config());

        assert_eq!(state.iteration, 1);
        assert_eq!(state.boosts.len(), report.uncovered_topologies.len());
        assert!(state.boosts.values().all(|&b| b == 1));
        // Only hierarchy failed: ratio untouched
        assert_eq!(state.ratio, 0.1);
        assert_ne!(state.seed, 42);

        let again = state.refined(&report, &config());
        assert!(again.boosts.values().all(|&b| b == 2));
    }

    #[test]
    fn test_refined_nudges_ratio_with_cap() {
        let store = population(50);
        let report = failing_report(&store, vec![Axis::DistributionSimilarity]);
        let mut state = SamplingState::initial(&config());

        state = state.refined(&report, &config());
        assert!((state.ratio - 0.11).abs() < 1e-12);
        assert!(state.boosts.is_empty());

        for _ in 0..20 {
            state = state.refined(&report, &config());
        }
        assert!((state.ratio - 0.2).abs() < 1e-12);
    }

    // ========== controller tests ==========

    #[test]
    fn test_accepts_first_pass_at_zero_threshold() {
        let store = population(200);
        let controller =
            RefinementController::new(&store, config().with_ri_threshold(0.0)).expect("controller");
        let outcome = controller.run().expect("run");

        assert!(outcome.is_accepted());
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(
            outcome.partition.holdout().len() + outcome.partition.training().len(),
            200
        );
        assert!(outcome.into_accepted().is_ok());
    }

    #[test]
    fn test_exhausts_at_unreachable_threshold() {
        let store = population(120);
        let controller = RefinementController::new(
            &store,
            config().with_ri_threshold(1.0).with_max_iterations(3),
        )
        .expect("controller");
        let outcome = controller.run().expect("run");

        assert_eq!(outcome.status, RefinementState::Exhausted);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.history.len(), 4);
        let iterations: Vec<usize> = outcome.history.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![0, 1, 2, 3]);

        let best = outcome
            .history
            .iter()
            .map(|r| r.representation_index)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(outcome.report.representation_index, best);

        match outcome.into_accepted() {
            Err(Error::ConvergenceFailure {
                iterations, best_ri, ..
            }) => {
                assert_eq!(iterations, 3);
                assert_eq!(best_ri, best);
            }
            other => panic!("expected convergence failure, got {other:?}"),
        }
    }

    /// One clustered topology of 50 and four topologies of 5 that the
    /// first pass cannot all reach: at ratio 0.1 only two small groups get a
    /// unit of quota.
    fn uneven_topologies() -> DomainStore {
        let mut domains = Vec::new();
        for i in 0..50u32 {
            domains.push(domain(
                &format!("b{i:03}A00"),
                (1, 10, 1, i + 1),
                [0.3, 0.2, f64::from(i) / 50.0, 1.0],
                StabilityClass::Stable,
            ));
        }
        for t in 2..=5u32 {
            for j in 0..5u32 {
                domains.push(domain(
                    &format!("s{t}{j}0A00"),
                    (1, 10, t, j + 1),
                    [0.3, 0.2, 0.5, 1.0],
                    StabilityClass::Stable,
                ));
            }
        }
        DomainStore::new(domains, FEATURES).expect("store")
    }

    #[test]
    fn test_refinement_recovers_uncovered_topologies() {
        let store = uneven_topologies();
        let controller = RefinementController::new(
            &store,
            config().with_seed(7).with_ri_threshold(0.85).with_max_iterations(5),
        )
        .expect("controller");
        let outcome = controller.run().expect("run");

        assert_eq!(outcome.history.len(), 2);
        let first = &outcome.history[0];
        assert!((first.scores.hierarchy_coverage - 0.6).abs() < 1e-12);
        assert!(first.representation_index < 0.85);
        assert!(first.failing_axes.contains(&Axis::HierarchyCoverage));

        assert_eq!(outcome.status, RefinementState::Accepted);
        assert_eq!(outcome.iteration, 1);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.report.scores.hierarchy_coverage, 1.0);
        assert!(outcome.report.representation_index >= 0.85);
        assert!(outcome.report.uncovered_topologies.is_empty());
    }

    #[test]
    fn test_zero_iterations_exhausts_immediately() {
        let store = population(60);
        let controller = RefinementController::new(
            &store,
            config().with_ri_threshold(1.0).with_max_iterations(0),
        )
        .expect("controller");
        let outcome = controller.run().expect("run");
        assert_eq!(outcome.status, RefinementState::Exhausted);
        assert_eq!(outcome.history.len(), 1);
    }

    #[test]
    fn test_run_deterministic() {
        let store = population(150);
        let run = || {
            RefinementController::new(&store, config().with_max_iterations(2))
                .expect("controller")
                .run()
                .expect("run")
        };
        let a = run();
        let b = run();
        assert_eq!(a.partition, b.partition);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = population(10);
        assert!(RefinementController::new(&store, config().with_sample_ratio(2.0)).is_err());
    }
}
