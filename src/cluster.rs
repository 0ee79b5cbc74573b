//! Representative selection inside one topology group.
//!
//! Large groups are partitioned with k-means and contribute the member
//! nearest to each centroid. Small groups contribute members drawn with
//! probability proportional to how far they sit from the group centroid.
//! Which of the two applies is decided by [`SamplingStrategy::for_group`].

#![allow(clippy::cast_precision_loss)]

use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    domain::TopologyKey,
    error::{Error, Result},
    normalize::{distance, squared_distance, FeatureMatrix},
};

/// How a topology group is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Partition into `k` clusters, one representative per cluster.
    KMeans {
        /// Requested number of clusters
        k: usize,
    },
    /// Draw `quota` members weighted by uniqueness.
    UniquenessWeighted {
        /// Number of members to draw
        quota: usize,
    },
}

impl SamplingStrategy {
    /// Pick the strategy for a group.
    ///
    /// Groups of at least `threshold` domains are clustered with
    /// `k = clamp(quota + boost, 1, size)`; smaller groups draw exactly
    /// `quota + boost` (capped at size) members.
    pub fn for_group(group_size: usize, threshold: usize, quota: usize, boost: usize) -> Self {
        let wanted = quota.saturating_add(boost).min(group_size);
        if group_size >= threshold {
            Self::KMeans {
                k: wanted.max(1).min(group_size.max(1)),
            }
        } else {
            Self::UniquenessWeighted { quota: wanted }
        }
    }

    /// Short name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::KMeans { .. } => "kmeans",
            Self::UniquenessWeighted { .. } => "uniqueness",
        }
    }
}

/// Outcome of sampling one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSelection {
    /// Strategy applied
    pub strategy: SamplingStrategy,
    /// Selected store indices, ascending
    pub selected: Vec<usize>,
    /// Non-empty clusters formed (0 for the uniqueness strategy)
    pub clusters_formed: usize,
    /// Distance of each member to the group centroid, aligned with the
    /// sorted member list
    pub uniqueness: Vec<(usize, f64)>,
}

/// Selects representatives from one topology group at a time.
#[derive(Debug, Clone)]
pub struct ClusterSelector<'a> {
    matrix: &'a FeatureMatrix,
    max_iterations: usize,
}

impl<'a> ClusterSelector<'a> {
    /// Create a selector over a normalized feature matrix.
    pub fn new(matrix: &'a FeatureMatrix) -> Self {
        Self {
            matrix,
            max_iterations: 100,
        }
    }

    /// Set the Lloyd iteration cap.
    #[must_use]
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    /// Sample a group.
    ///
    /// `members` are store indices. The result is deterministic for a given
    /// seed and member set regardless of member order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the group is empty, a member is
    /// out of range, or a member's normalized features are not finite.
    pub fn select(
        &self,
        key: TopologyKey,
        members: &[usize],
        strategy: SamplingStrategy,
        seed: u64,
    ) -> Result<GroupSelection> {
        if members.is_empty() {
            return Err(Error::invalid_input(format!(
                "topology group {key} has no domains"
            )));
        }

        let mut members = members.to_vec();
        members.sort_unstable();
        members.dedup();

        for &m in &members {
            if m >= self.matrix.rows() {
                return Err(Error::invalid_input(format!(
                    "topology group {key}: domain index {m} out of range"
                )));
            }
            if self.matrix.row(m).iter().any(|v| !v.is_finite()) {
                return Err(Error::invalid_input(format!(
                    "topology group {key}: domain index {m} has non-finite features"
                )));
            }
        }

        let centroid = self.matrix.centroid(&members);
        let uniqueness: Vec<(usize, f64)> = members
            .iter()
            .map(|&m| (m, distance(self.matrix.row(m), &centroid)))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);

        let (selected, clusters_formed) = match strategy {
            SamplingStrategy::KMeans { k } => {
                let representatives = self.kmeans_representatives(&members, k, &mut rng);
                let formed = representatives.len();
                (representatives, formed)
            }
            SamplingStrategy::UniquenessWeighted { quota } => {
                (weighted_draw(&uniqueness, quota, &mut rng), 0)
            }
        };

        let mut selected = selected;
        selected.sort_unstable();

        debug!(
            group = %key,
            size = members.len(),
            strategy = strategy.name(),
            selected = selected.len(),
            clusters = clusters_formed,
            "sampled topology group"
        );

        Ok(GroupSelection {
            strategy,
            selected,
            clusters_formed,
            uniqueness,
        })
    }

    /// Run k-means and return the member nearest each centroid.
    fn kmeans_representatives(&self, members: &[usize], k: usize, rng: &mut StdRng) -> Vec<usize> {
        let k = k.clamp(1, members.len()).min(count_distinct(self.matrix, members));
        let points: Vec<&[f64]> = members.iter().map(|&m| self.matrix.row(m)).collect();

        let mut centroids = kmeans_plus_plus(&points, k, rng);
        let mut assignment = vec![usize::MAX; points.len()];

        for iteration in 0..self.max_iterations {
            let changed = assign(&points, &centroids, &mut assignment);
            if !changed && iteration > 0 {
                break;
            }
            update_centroids(&points, &mut centroids, &mut assignment);
        }

        // Nearest member per cluster; members are in id order, so the first
        // strictly-closer hit wins ties
        let mut best: Vec<Option<(usize, f64)>> = vec![None; centroids.len()];
        for (p, &cluster) in assignment.iter().enumerate() {
            let d = squared_distance(points[p], &centroids[cluster]);
            match best[cluster] {
                Some((_, best_d)) if best_d <= d => {}
                _ => best[cluster] = Some((p, d)),
            }
        }

        best.into_iter()
            .flatten()
            .map(|(p, _)| members[p])
            .collect()
    }
}

/// Number of distinct feature rows among the members.
fn count_distinct(matrix: &FeatureMatrix, members: &[usize]) -> usize {
    let mut rows: Vec<Vec<u64>> = members
        .iter()
        .map(|&m| matrix.row(m).iter().map(|v| v.to_bits()).collect())
        .collect();
    rows.sort_unstable();
    rows.dedup();
    rows.len().max(1)
}

/// k-means++ seeding: first centre uniform, then proportional to D².
fn kmeans_plus_plus(points: &[&[f64]], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());

    let mut d2: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let Ok(dist) = WeightedIndex::new(&d2) else {
            break;
        };
        let next = points[dist.sample(rng)].to_vec();
        for (d, p) in d2.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &next));
        }
        centroids.push(next);
    }

    centroids
}

/// Assign every point to its nearest centroid; lower index wins ties.
fn assign(points: &[&[f64]], centroids: &[Vec<f64>], assignment: &mut [usize]) -> bool {
    let mut changed = false;
    for (p, point) in points.iter().enumerate() {
        let mut best_cluster = 0;
        let mut best_dist = f64::INFINITY;
        for (c, centroid) in centroids.iter().enumerate() {
            let d = squared_distance(point, centroid);
            if d < best_dist {
                best_dist = d;
                best_cluster = c;
            }
        }
        if assignment[p] != best_cluster {
            assignment[p] = best_cluster;
            changed = true;
        }
    }
    changed
}

/// Recompute means; an empty cluster takes over the point farthest from its
/// own centroid among clusters with more than one member.
fn update_centroids(points: &[&[f64]], centroids: &mut [Vec<f64>], assignment: &mut [usize]) {
    let k = centroids.len();
    let dims = centroids.first().map_or(0, Vec::len);

    let recompute = |centroids: &mut [Vec<f64>], assignment: &[usize]| -> Vec<usize> {
        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0usize; k];
        for (p, &c) in assignment.iter().enumerate() {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(points[p].iter()) {
                *s += v;
            }
        }
        for (c, sum) in sums.into_iter().enumerate() {
            if counts[c] > 0 {
                centroids[c] = sum.into_iter().map(|s| s / counts[c] as f64).collect();
            }
        }
        counts
    };

    let mut counts = recompute(centroids, assignment);

    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = (0..points.len())
            .filter(|&p| counts[assignment[p]] > 1)
            .map(|p| (p, squared_distance(points[p], &centroids[assignment[p]])))
            .fold(None, |acc: Option<(usize, f64)>, (p, d)| match acc {
                Some((_, best)) if best >= d => acc,
                _ => Some((p, d)),
            });
        if let Some((p, _)) = donor {
            counts[assignment[p]] -= 1;
            assignment[p] = empty;
            counts[empty] = 1;
            centroids[empty] = points[p].to_vec();
        }
    }

    recompute(centroids, assignment);
}

/// Draw `quota` items without replacement, weighted by their score.
/// Uniform when every remaining weight is zero.
pub(crate) fn weighted_draw(weighted: &[(usize, f64)], quota: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut remaining: Vec<(usize, f64)> = weighted.to_vec();
    let mut drawn = Vec::with_capacity(quota.min(remaining.len()));

    while drawn.len() < quota && !remaining.is_empty() {
        let weights: Vec<f64> = remaining.iter().map(|(_, w)| *w).collect();
        let pick = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            Err(_) => rng.gen_range(0..remaining.len()),
        };
        drawn.push(remaining.remove(pick).0);
    }

    drawn
}
