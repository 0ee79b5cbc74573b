//! Input readers and store assembly.
//!
//! [`cath`] parses the classification list, [`features`] reduces the
//! residue-level simulation tables. [`assemble_store`] joins the two into a
//! [`DomainStore`], dropping (and logging) domains that cannot be placed.

pub mod cath;
pub mod features;

use std::path::Path;

use tracing::{info, warn};

use crate::{
    domain::{Domain, DomainStore},
    error::{Error, Result},
};

pub use cath::{parse_cath_list, read_cath_file, CathRecord, CathTable};
pub use features::{DomainFeatures, FeatureTable};

/// Counts of domains left out while assembling a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Domains kept
    pub kept: usize,
    /// Feature rows without a CATH record
    pub missing_classification: usize,
    /// CATH records without feature rows
    pub missing_features: usize,
    /// Domains lacking a temperature table
    pub incomplete: usize,
    /// Domains without a stability class
    pub unclassified: usize,
}

/// Join features and classifications into a store.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if no domain survives the join, or the
/// store rejects the result.
pub fn assemble_store(features: &FeatureTable, cath: &CathTable) -> Result<(DomainStore, AssemblyStats)> {
    let mut stats = AssemblyStats::default();
    let mut domains = Vec::new();

    for id in features.domain_ids() {
        let Some(record) = cath.get(id) else {
            stats.missing_classification += 1;
            continue;
        };
        let aggregated = match features.features(id) {
            Ok(f) => f,
            Err(Error::InvalidInput { context }) => {
                warn!(domain = id, reason = %context, "dropping domain with incomplete features");
                stats.incomplete += 1;
                continue;
            }
            Err(other) => return Err(other),
        };
        let Some(stability) = aggregated.stability else {
            stats.unclassified += 1;
            continue;
        };
        domains.push(Domain::new(
            id,
            record.path,
            record.pdb_origin.clone(),
            aggregated.size,
            aggregated.values,
            stability,
        ));
    }

    stats.missing_features = cath
        .keys()
        .filter(|id| !features.contains(id))
        .count();
    stats.kept = domains.len();

    if stats.missing_classification > 0 {
        warn!(
            count = stats.missing_classification,
            "dropped domains without a CATH classification"
        );
    }
    if stats.unclassified > 0 {
        warn!(
            count = stats.unclassified,
            "dropped domains without RMSF at both 320K and 450K"
        );
    }
    if stats.missing_features > 0 {
        warn!(
            count = stats.missing_features,
            "CATH domains without residue rows were ignored"
        );
    }

    if domains.is_empty() {
        return Err(Error::invalid_input(
            "no domain has both features and a CATH classification",
        ));
    }

    let store = DomainStore::new(domains, features.feature_names())?;
    info!(
        domains = store.len(),
        features = store.num_features(),
        "assembled domain store"
    );
    Ok((store, stats))
}

/// Read a CATH list and residue tables and assemble the store.
///
/// # Errors
///
/// See [`read_cath_file`], [`FeatureTable::from_csv_files`] and
/// [`assemble_store`].
pub fn load_store<P: AsRef<Path>>(
    cath_path: impl AsRef<Path>,
    feature_paths: &[P],
) -> Result<(DomainStore, AssemblyStats)> {
    if feature_paths.is_empty() {
        return Err(Error::invalid_config("at least one residue table is required"));
    }
    let cath = read_cath_file(cath_path)?;
    let features = FeatureTable::from_csv_files(feature_paths)?;
    assemble_store(&features, &cath)
}

#[cfg(test)]
mod tests {
    use super::{features::test_support::residue_csv, *};
    use crate::domain::StabilityClass;

    fn tables() -> (FeatureTable, CathTable) {
        let rows = |scale: f64| {
            vec![
                ("1abcA01", 2, "H", "core", 0.2, 1.0 * scale),
                ("1abcA01", 2, "H", "surface", 0.4, 1.0 * scale),
                ("1abcA02", 1, "E", "core", 0.3, 1.0 * scale),
                ("9nocA00", 1, "E", "core", 0.3, 1.0 * scale),
            ]
        };
        let mut features = FeatureTable::new();
        features
            .add_csv_str("320", &residue_csv("320", &rows(1.0)))
            .expect("320");
        features
            .add_csv_str("450", &residue_csv("450", &rows(1.5)))
            .expect("450");

        let cath = parse_cath_list(
            "1abcA01 1 10 8 10\n1abcA02 3 40 50 300\n7onlA00 2 60 40 10\n".as_bytes(),
        )
        .expect("cath");
        (features, cath)
    }

    #[test]
    fn test_assemble_joins_and_counts_drops() {
        let (features, cath) = tables();
        let (store, stats) = assemble_store(&features, &cath).expect("assemble");

        assert_eq!(store.len(), 2);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.missing_classification, 1);
        assert_eq!(stats.missing_features, 1);

        let d = store.by_id("1abcA01").expect("domain");
        assert_eq!(d.pdb_origin(), "1abc");
        assert_eq!(d.size(), 2);
        assert_eq!(d.stability(), StabilityClass::Stable);
        assert_eq!(store.num_features(), 9);
    }

    #[test]
    fn test_assemble_without_high_temperature_fails() {
        let mut features = FeatureTable::new();
        features
            .add_csv_str(
                "320",
                &residue_csv("320", &[("1abcA01", 1, "H", "core", 0.2, 1.0)]),
            )
            .expect("320");
        let cath = parse_cath_list("1abcA01 1 10 8 10\n".as_bytes()).expect("cath");

        let err = assemble_store(&features, &cath).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn test_load_store_requires_tables() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            load_store("cath.txt", &empty),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
