//! mdcath-holdout - Representative Holdout Selection for mdCATH
//!
//! Picks a holdout set from a collection of protein domains so that the
//! holdout mirrors the whole collection, while no domain in the holdout
//! shares a homology component with any training domain.
//!
//! # Pipeline
//!
//! 1. **Ingest** - CATH domain list plus per-temperature residue CSVs are
//!    aggregated into a [`DomainStore`]
//! 2. **Stratify** - domains are grouped by CATH topology; each group gets a
//!    quota and is sampled by k-means or uniqueness weighting
//! 3. **Network** - homology components (shared PDB entry or CATH path)
//!    are taken or left whole
//! 4. **Validate** - KS and chi-square tests, hierarchy and stability
//!    coverage, combined into a Representation Index
//! 5. **Refine** - failing axes steer the next iteration until the index
//!    passes or the iteration budget runs out
//!
//! # Quick Start
//!
//! ```no_run
//! use mdcath_holdout::{ingest, RefinementController, SamplerConfig};
//!
//! let (store, _stats) =
//!     ingest::load_store("cath-domain-list.txt", &["mdcath_320.csv", "mdcath_450.csv"])?;
//! let outcome = RefinementController::new(&store, SamplerConfig::default())?.run()?;
//!
//! println!(
//!     "{} holdout domains, RI {:.3}",
//!     outcome.partition.holdout().len(),
//!     outcome.report.representation_index
//! );
//! # Ok::<(), mdcath_holdout::Error>(())
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
// Allow common test patterns
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::cast_lossless,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::redundant_clone,
        clippy::needless_collect,
        clippy::too_many_lines,
        clippy::float_cmp,
        clippy::similar_names,
        clippy::unreadable_literal
    )
)]
// Allow some pedantic lints for cleaner code
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::map_unwrap_or)]

pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod network;
pub mod normalize;
pub mod output;
pub mod refine;
pub mod stats;
pub mod stratify;
pub mod validate;

/// Command-line interface
#[cfg(feature = "cli")]
pub mod cli;

// Re-exports for convenience
pub use cluster::{ClusterSelector, GroupSelection, SamplingStrategy};
pub use config::SamplerConfig;
pub use domain::{CathPath, Domain, DomainStore, StabilityClass, TopologyKey};
pub use error::{Error, Result};
pub use ingest::{AssemblyStats, CathRecord, CathTable, FeatureTable};
pub use network::{HomologyNetwork, NetworkSampler, Partition, SizeBand, UnionFind};
pub use normalize::{FeatureMatrix, NormMethod};
pub use output::{write_outcome, OutputPaths, RunSummary};
pub use refine::{
    IterationRecord, RefinementController, RefinementOutcome, RefinementState, SamplingState,
};
pub use stats::{GoodnessOfFit, TestOutcome};
pub use stratify::{CandidatePool, GroupSummary, Stratifier};
pub use validate::{Axis, SubScores, ValidationReport, Validator};
