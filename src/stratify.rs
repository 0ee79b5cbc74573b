//! Topology-stratified candidate selection.
//!
//! Domains are grouped by (Class, Architecture, Topology). Each group gets a
//! quota proportional to its size, apportioned with the largest-remainder
//! method, and the cluster selector picks that many representatives.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cluster::{ClusterSelector, SamplingStrategy},
    domain::{DomainStore, TopologyKey},
    error::{Error, Result},
    normalize::FeatureMatrix,
};

/// Derive a child seed from a base seed and a salt (splitmix64 finalizer).
pub fn derive_seed(base: u64, salt: u64) -> u64 {
    let mut z = base ^ salt.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Group store indices by topology key.
pub fn topology_groups(store: &DomainStore) -> BTreeMap<TopologyKey, Vec<usize>> {
    let mut groups: BTreeMap<TopologyKey, Vec<usize>> = BTreeMap::new();
    for (i, domain) in store.domains().iter().enumerate() {
        groups.entry(domain.topology()).or_default().push(i);
    }
    groups
}

/// Apportion `round(ratio * total)` units across groups by largest remainder.
///
/// Every group receives `floor(ratio * size)`; the leftover units go to the
/// groups with the largest fractional parts, ties in key order.
pub fn allocate_quotas(sizes: &BTreeMap<TopologyKey, usize>, ratio: f64) -> BTreeMap<TopologyKey, usize> {
    let total: usize = sizes.values().sum();
    let target = (ratio * total as f64).round() as usize;

    let mut quotas = BTreeMap::new();
    let mut remainders = Vec::with_capacity(sizes.len());
    let mut assigned = 0usize;

    for (&key, &size) in sizes {
        let ideal = ratio * size as f64;
        let floor = (ideal.floor() as usize).min(size);
        assigned += floor;
        quotas.insert(key, floor);
        remainders.push((key, ideal - floor as f64, size));
    }

    // Stable sort keeps key order among equal remainders
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut leftover = target.saturating_sub(assigned);
    for (key, remainder, size) in remainders {
        if leftover == 0 {
            break;
        }
        if remainder <= 0.0 {
            continue;
        }
        if let Some(q) = quotas.get_mut(&key) {
            if *q < size {
                *q += 1;
                leftover -= 1;
            }
        }
    }

    quotas
}

/// What happened in one topology group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Topology key
    pub key: TopologyKey,
    /// Number of domains in the group
    pub size: usize,
    /// Allocated quota
    pub quota: usize,
    /// Extra clusters requested by refinement
    pub boost: usize,
    /// Strategy applied
    pub strategy: SamplingStrategy,
    /// Domains selected
    pub selected: usize,
    /// Clusters formed (k-means only)
    pub clusters_formed: usize,
}

/// Union of per-group selections.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    selected: Vec<usize>,
    groups: Vec<GroupSummary>,
    uniqueness: Vec<f64>,
    seed: u64,
}

impl CandidatePool {
    /// Selected store indices, ascending.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Per-group summaries in key order.
    pub fn groups(&self) -> &[GroupSummary] {
        &self.groups
    }

    /// Distance to its group centroid, per store index.
    pub fn uniqueness(&self) -> &[f64] {
        &self.uniqueness
    }

    /// Seed of the pass that built the pool.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// Whether no candidate was selected.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Builds candidate pools from a store.
#[derive(Debug, Clone)]
pub struct Stratifier<'a> {
    store: &'a DomainStore,
    matrix: &'a FeatureMatrix,
    groups: BTreeMap<TopologyKey, Vec<usize>>,
    threshold: usize,
    kmeans_max_iterations: usize,
}

impl<'a> Stratifier<'a> {
    /// Create a stratifier; groups are computed once here.
    pub fn new(store: &'a DomainStore, matrix: &'a FeatureMatrix) -> Self {
        Self {
            store,
            matrix,
            groups: topology_groups(store),
            threshold: 10,
            kmeans_max_iterations: 100,
        }
    }

    /// Set the clustering threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the Lloyd iteration cap.
    #[must_use]
    pub fn with_kmeans_iterations(mut self, iterations: usize) -> Self {
        self.kmeans_max_iterations = iterations;
        self
    }

    /// Topology groups.
    pub fn groups(&self) -> &BTreeMap<TopologyKey, Vec<usize>> {
        &self.groups
    }

    /// Run one stratification pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a ratio outside (0, 1) or when the
    /// cluster selector rejects a group.
    pub fn stratify(
        &self,
        ratio: f64,
        boosts: &BTreeMap<TopologyKey, usize>,
        seed: u64,
    ) -> Result<CandidatePool> {
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(Error::invalid_input(format!(
                "sample ratio must be in (0, 1), got {ratio}"
            )));
        }

        let sizes: BTreeMap<TopologyKey, usize> =
            self.groups.iter().map(|(k, v)| (*k, v.len())).collect();
        let quotas = allocate_quotas(&sizes, ratio);

        let selector =
            ClusterSelector::new(self.matrix).max_iterations(self.kmeans_max_iterations);

        let mut selected = Vec::new();
        let mut summaries = Vec::with_capacity(self.groups.len());
        let mut uniqueness = vec![0.0; self.store.len()];

        for (key, members) in &self.groups {
            let quota = quotas.get(key).copied().unwrap_or(0);
            let boost = boosts.get(key).copied().unwrap_or(0);
            let strategy = SamplingStrategy::for_group(members.len(), self.threshold, quota, boost);

            let selection = selector.select(
                *key,
                members,
                strategy,
                derive_seed(seed, key.fingerprint()),
            )?;

            for &(index, score) in &selection.uniqueness {
                uniqueness[index] = score;
            }

            summaries.push(GroupSummary {
                key: *key,
                size: members.len(),
                quota,
                boost,
                strategy,
                selected: selection.selected.len(),
                clusters_formed: selection.clusters_formed,
            });
            selected.extend(selection.selected);
        }

        selected.sort_unstable();

        debug!(
            groups = summaries.len(),
            candidates = selected.len(),
            ratio,
            "stratified candidate pool"
        );

        Ok(CandidatePool {
            selected,
            groups: summaries,
            uniqueness,
            seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{test_support::*, StabilityClass},
        normalize::NormMethod,
    };

    fn key(t: u32) -> TopologyKey {
        TopologyKey {
            class: 1,
            architecture: 10,
            topology: t,
        }
    }

    // ========== quota tests ==========

    #[test]
    fn test_quotas_sum_to_rounded_target() {
        let sizes: BTreeMap<_, _> = [(key(1), 37), (key(2), 4), (key(3), 3), (key(4), 118)]
            .into_iter()
            .collect();
        let quotas = allocate_quotas(&sizes, 0.1);

        let total: usize = quotas.values().sum();
        assert_eq!(total, 16); // round(16.2)
        for (k, q) in &quotas {
            assert!(*q <= sizes[k]);
        }
        assert_eq!(quotas[&key(4)], 12);
        assert_eq!(quotas[&key(1)], 4);
    }

    #[test]
    fn test_quotas_ties_follow_key_order() {
        let sizes: BTreeMap<_, _> = [(key(1), 5), (key(2), 5)].into_iter().collect();
        let quotas = allocate_quotas(&sizes, 0.1);
        assert_eq!(quotas[&key(1)], 1);
        assert_eq!(quotas[&key(2)], 0);
    }

    #[test]
    fn test_quotas_bounded_by_group_count() {
        let sizes: BTreeMap<_, _> = (1..=40).map(|t| (key(t), 1 + t as usize % 4)).collect();
        let total: usize = sizes.values().sum();
        for ratio in [0.05, 0.1, 0.33, 0.9] {
            let quotas = allocate_quotas(&sizes, ratio);
            let sum: usize = quotas.values().sum();
            let ideal = ratio * total as f64;
            assert!((sum as f64 - ideal).abs() <= sizes.len() as f64);
        }
    }

    // ========== seed tests ==========

    #[test]
    fn test_derive_seed_spreads() {
        assert_ne!(derive_seed(42, 1), derive_seed(42, 2));
        assert_ne!(derive_seed(42, 1), derive_seed(43, 1));
        assert_eq!(derive_seed(42, 1), derive_seed(42, 1));
    }

    // ========== stratify tests ==========

    #[test]
    fn test_stratify_covers_groups() {
        let store = population(200);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
        let stratifier = Stratifier::new(&store, &matrix);

        let pool = stratifier
            .stratify(0.1, &BTreeMap::new(), 42)
            .expect("stratify");

        assert_eq!(pool.groups().len(), stratifier.groups().len());
        assert_eq!(pool.uniqueness().len(), 200);
        assert!(!pool.is_empty());
        for summary in pool.groups() {
            if let SamplingStrategy::KMeans { .. } = summary.strategy {
                assert_eq!(summary.selected, summary.clusters_formed);
                assert!(summary.selected <= summary.size);
            }
        }
    }

    #[test]
    fn test_stratify_group_of_three() {
        let mut domains = Vec::new();
        for i in 0..22 {
            domains.push(domain(
                &format!("1x{:02}A00", i),
                (1, 10, 8, i),
                [i as f64 / 25.0, 0.2, 0.3, 0.4],
                StabilityClass::Stable,
            ));
        }
        for i in 0..3 {
            domains.push(domain(
                &format!("2y{:02}A00", i),
                (2, 40, 50, i),
                [0.1 * i as f64, 0.5, 0.1, 0.9],
                StabilityClass::Moderate,
            ));
        }
        let store = DomainStore::new(domains, FEATURES).expect("store");
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);

        let pool = Stratifier::new(&store, &matrix)
            .stratify(0.1, &BTreeMap::new(), 3)
            .expect("stratify");

        let small = pool
            .groups()
            .iter()
            .find(|g| g.key.class == 2)
            .expect("small group");
        assert_eq!(small.size, 3);
        assert!(matches!(
            small.strategy,
            SamplingStrategy::UniquenessWeighted { .. }
        ));
        // 2.2 + 0.3 rounds to 3 units: the large group floors to 2 and the
        // small group takes the leftover on remainder
        assert_eq!(small.quota, 1);
        assert_eq!(small.selected, 1);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_stratify_boost_raises_selection() {
        let store = population(140);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
        let stratifier = Stratifier::new(&store, &matrix);
        let first = *stratifier.groups().keys().next().expect("group");

        let plain = stratifier.stratify(0.1, &BTreeMap::new(), 5).expect("stratify");
        let boosts: BTreeMap<_, _> = [(first, 3)].into_iter().collect();
        let boosted = stratifier.stratify(0.1, &boosts, 5).expect("stratify");

        assert!(boosted.groups()[0].selected > plain.groups()[0].selected);
        assert_eq!(boosted.groups()[0].boost, 3);
    }

    #[test]
    fn test_stratify_deterministic() {
        let store = population(120);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
        let stratifier = Stratifier::new(&store, &matrix);

        let a = stratifier.stratify(0.1, &BTreeMap::new(), 9).expect("a");
        let b = stratifier.stratify(0.1, &BTreeMap::new(), 9).expect("b");
        assert_eq!(a.selected(), b.selected());
        assert_eq!(a.groups(), b.groups());
    }

    #[test]
    fn test_stratify_rejects_bad_ratio() {
        let store = population(20);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
        let stratifier = Stratifier::new(&store, &matrix);
        assert!(stratifier.stratify(0.0, &BTreeMap::new(), 1).is_err());
        assert!(stratifier.stratify(1.0, &BTreeMap::new(), 1).is_err());
    }
}
