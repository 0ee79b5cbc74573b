//! Homology network and component-preserving holdout selection.
//!
//! Two domains are linked when they come from the same PDB entry or share
//! the full CATH path. Linked domains must land on the same side of the
//! split, so connected components are the unit of assignment.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::collections::{BTreeSet, HashMap, VecDeque};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::{
    cluster::weighted_draw,
    domain::{CathPath, DomainStore, StabilityClass, TopologyKey},
    error::{Error, Result},
    stratify::{derive_seed, CandidatePool},
};

// ========== Union-Find ==========

/// Disjoint-set forest with path halving and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    /// `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Representative of `x`'s set.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `x` and `y`.
    pub fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] = self.rank[rx].saturating_add(1);
            }
        }
    }
}

// ========== HomologyNetwork ==========

/// Connected components of the homology network over a store.
///
/// Components are numbered by their smallest member, so numbering follows
/// id order and is stable across runs.
#[derive(Debug, Clone)]
pub struct HomologyNetwork {
    component_of: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl HomologyNetwork {
    /// Build the network for every domain of the store.
    pub fn build(store: &DomainStore) -> Self {
        let n = store.len();
        let mut uf = UnionFind::new(n);

        // Chaining consecutive members of a bucket links the whole bucket
        // without materializing pairwise edges
        let mut by_pdb: HashMap<&str, usize> = HashMap::new();
        let mut by_path: HashMap<CathPath, usize> = HashMap::new();
        for (i, domain) in store.domains().iter().enumerate() {
            if let Some(&prev) = by_pdb.get(domain.pdb_origin()) {
                uf.union(prev, i);
            }
            by_pdb.insert(domain.pdb_origin(), i);

            if let Some(&prev) = by_path.get(&domain.cath()) {
                uf.union(prev, i);
            }
            by_path.insert(domain.cath(), i);
        }

        let mut root_to_component: HashMap<usize, usize> = HashMap::new();
        let mut component_of = Vec::with_capacity(n);
        let mut components: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = uf.find(i);
            let c = *root_to_component.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[c].push(i);
            component_of.push(c);
        }

        debug!(
            domains = n,
            components = components.len(),
            largest = components.iter().map(Vec::len).max().unwrap_or(0),
            "built homology network"
        );

        Self {
            component_of,
            components,
        }
    }

    /// Component index of a store index.
    pub fn component_of(&self, index: usize) -> usize {
        self.component_of[index]
    }

    /// Component index per store index.
    pub fn assignments(&self) -> &[usize] {
        &self.component_of
    }

    /// Members of a component, ascending.
    pub fn members(&self, component: usize) -> &[usize] {
        &self.components[component]
    }

    /// All components.
    pub fn components(&self) -> &[Vec<usize>] {
        &self.components
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the network has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Size of the largest component.
    pub fn largest(&self) -> usize {
        self.components.iter().map(Vec::len).max().unwrap_or(0)
    }
}

// ========== Partition ==========

/// A component-preserving holdout/training split.
///
/// Only constructed through [`Partition::new`], which checks that the two
/// sets are disjoint, cover the store and never split a component.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    holdout: Vec<usize>,
    training: Vec<usize>,
    holdout_ids: Vec<String>,
    training_ids: Vec<String>,
    holdout_components: usize,
    component_of: Vec<usize>,
}

impl Partition {
    /// Build a partition from holdout store indices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an out-of-range index and
    /// [`Error::ComponentIntegrity`] if a component is split.
    pub fn new(store: &DomainStore, network: &HomologyNetwork, holdout: &[usize]) -> Result<Self> {
        let n = store.len();
        let mut in_holdout = vec![false; n];
        for &i in holdout {
            if i >= n {
                return Err(Error::invalid_input(format!(
                    "holdout index {i} out of range for {n} domains"
                )));
            }
            in_holdout[i] = true;
        }

        let mut holdout_components = 0;
        for (c, members) in network.components().iter().enumerate() {
            let inside = members.iter().filter(|&&m| in_holdout[m]).count();
            if inside == members.len() {
                holdout_components += 1;
            } else if inside > 0 {
                let stray = members
                    .iter()
                    .find(|&&m| !in_holdout[m])
                    .map_or_else(String::new, |&m| store.domains()[m].id().to_string());
                return Err(Error::ComponentIntegrity {
                    component: c,
                    domain: stray,
                });
            }
        }

        let (holdout, training): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| in_holdout[i]);
        let ids = |indices: &[usize]| -> Vec<String> {
            indices
                .iter()
                .map(|&i| store.domains()[i].id().to_string())
                .collect()
        };

        Ok(Self {
            holdout_ids: ids(&holdout),
            training_ids: ids(&training),
            holdout,
            training,
            holdout_components,
            component_of: network.assignments().to_vec(),
        })
    }

    /// Build a partition from holdout ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown id and
    /// [`Error::ComponentIntegrity`] if a component is split.
    pub fn from_ids<'a>(
        store: &DomainStore,
        network: &HomologyNetwork,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let indices = store.resolve(ids)?;
        Self::new(store, network, &indices)
    }

    /// Holdout store indices, ascending.
    pub fn holdout(&self) -> &[usize] {
        &self.holdout
    }

    /// Training store indices, ascending.
    pub fn training(&self) -> &[usize] {
        &self.training
    }

    /// Holdout ids, sorted.
    pub fn holdout_ids(&self) -> &[String] {
        &self.holdout_ids
    }

    /// Training ids, sorted.
    pub fn training_ids(&self) -> &[String] {
        &self.training_ids
    }

    /// Number of whole components in the holdout.
    pub fn holdout_components(&self) -> usize {
        self.holdout_components
    }

    /// Component index per store index.
    pub fn component_of(&self) -> &[usize] {
        &self.component_of
    }

    /// Fraction of domains in the holdout.
    pub fn holdout_fraction(&self) -> f64 {
        let total = self.holdout.len() + self.training.len();
        if total == 0 {
            0.0
        } else {
            self.holdout.len() as f64 / total as f64
        }
    }
}

// ========== NetworkSampler ==========

/// Salt mixed into the pool seed for the component draw.
const FILL_SALT: u64 = 0x6669_6c6c;

/// Component-level fill toward a target holdout size.
///
/// Components are visited in a seeded draw weighted by mean member
/// uniqueness. Components that bring a new topology come first, and the
/// rest are interleaved by majority stability class so the holdout tracks
/// the population's class proportions at every prefix.
#[derive(Debug, Clone)]
pub struct NetworkSampler<'a> {
    store: &'a DomainStore,
    network: &'a HomologyNetwork,
}

/// Holdout size band derived from ratio and tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBand {
    /// Lowest acceptable holdout size
    pub lower: usize,
    /// Desired holdout size
    pub target: usize,
    /// Highest acceptable holdout size
    pub upper: usize,
}

impl SizeBand {
    /// Band for `n` domains: target `round(ratio * n)` (at least 1),
    /// half-width `floor(tolerance * n)`.
    pub fn new(n: usize, ratio: f64, tolerance: f64) -> Self {
        let target = ((ratio * n as f64).round() as usize).clamp(1, n.max(1));
        let slack = (tolerance * n as f64).floor() as usize;
        Self {
            lower: target.saturating_sub(slack),
            target,
            upper: target + slack,
        }
    }
}

impl<'a> NetworkSampler<'a> {
    /// Create a sampler.
    pub fn new(store: &'a DomainStore, network: &'a HomologyNetwork) -> Self {
        Self { store, network }
    }

    /// Expand candidates into components and fill the holdout.
    ///
    /// Candidate components are tried first. While the count is below the
    /// band, non-candidate components top it up under the same rules; only
    /// then is the smallest skipped component of either pass accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ComponentIntegrity`] if the assembled holdout splits
    /// a component.
    pub fn sample(&self, pool: &CandidatePool, ratio: f64, tolerance: f64) -> Result<Partition> {
        let band = SizeBand::new(self.store.len(), ratio, tolerance);
        let mut rng = StdRng::seed_from_u64(derive_seed(pool.seed(), FILL_SALT));

        let candidate_components: BTreeSet<usize> = pool
            .selected()
            .iter()
            .map(|&i| self.network.component_of(i))
            .collect();

        let mut fill = Fill::default();
        let order = self.fill_order(
            candidate_components.iter().copied().collect(),
            pool.uniqueness(),
            &fill.accepted,
            &mut rng,
        );
        fill.run(self.network, &order, band);

        if fill.count < band.lower {
            let rest: Vec<usize> = (0..self.network.len())
                .filter(|c| !candidate_components.contains(c))
                .collect();
            debug!(
                count = fill.count,
                lower = band.lower,
                skipped = fill.skipped.len(),
                "topping up holdout from non-candidate components"
            );
            let order = self.fill_order(rest, pool.uniqueness(), &fill.accepted, &mut rng);
            fill.run(self.network, &order, band);
        }

        if fill.count < band.lower {
            fill.accept_smallest_skipped(self.network);
        }

        let holdout: Vec<usize> = fill
            .accepted
            .iter()
            .flat_map(|&c| self.network.members(c).iter().copied())
            .collect();

        let partition = Partition::new(self.store, self.network, &holdout)?;

        info!(
            holdout = partition.holdout().len(),
            training = partition.training().len(),
            components = partition.holdout_components(),
            target = band.target,
            "assembled component-preserving holdout"
        );

        Ok(partition)
    }

    /// Mean member uniqueness of a component.
    fn weight(&self, component: usize, uniqueness: &[f64]) -> f64 {
        let members = self.network.members(component);
        members.iter().map(|&m| uniqueness[m]).sum::<f64>() / members.len() as f64
    }

    /// Most frequent stability class of a component; canonical order on ties.
    fn majority_stability(&self, component: usize) -> StabilityClass {
        let mut counts = [0usize; 3];
        for &m in self.network.members(component) {
            counts[self.store.domains()[m].stability() as usize] += 1;
        }
        let mut best = StabilityClass::ALL[0];
        let mut best_count = 0;
        for (class, count) in StabilityClass::ALL.into_iter().zip(counts) {
            if count > best_count {
                best = class;
                best_count = count;
            }
        }
        best
    }

    /// Visiting order for `components`, given the components already accepted.
    fn fill_order(
        &self,
        components: Vec<usize>,
        uniqueness: &[f64],
        accepted: &[usize],
        rng: &mut StdRng,
    ) -> Vec<usize> {
        let domains = self.store.domains();
        let weighted: Vec<(usize, f64)> = components
            .into_iter()
            .map(|c| (c, self.weight(c, uniqueness)))
            .collect();
        let drawn = weighted_draw(&weighted, weighted.len(), rng);

        let mut covered: BTreeSet<TopologyKey> = accepted
            .iter()
            .flat_map(|&c| self.network.members(c).iter().map(move |&m| domains[m].topology()))
            .collect();
        let (mut novel, mut rest) = (Vec::new(), Vec::new());
        for c in drawn {
            let mut adds_topology = false;
            for &m in self.network.members(c) {
                adds_topology |= covered.insert(domains[m].topology());
            }
            if adds_topology {
                novel.push(c);
            } else {
                rest.push(c);
            }
        }

        let mut placed = [0usize; 3];
        for &c in accepted {
            for &m in self.network.members(c) {
                placed[domains[m].stability() as usize] += 1;
            }
        }
        let mut order = self.interleave_by_stability(novel, &mut placed);
        order.extend(self.interleave_by_stability(rest, &mut placed));
        order
    }

    /// Merge components so that placed domains track the population's
    /// stability proportions: the next component comes from the majority
    /// class furthest below its share, lower class first on ties.
    fn interleave_by_stability(&self, components: Vec<usize>, placed: &mut [usize; 3]) -> Vec<usize> {
        let domains = self.store.domains();
        let mut shares = [0.0; 3];
        for domain in domains {
            shares[domain.stability() as usize] += 1.0;
        }
        for share in &mut shares {
            *share /= domains.len().max(1) as f64;
        }

        let mut queues: [VecDeque<usize>; 3] = Default::default();
        for c in components {
            queues[self.majority_stability(c) as usize].push_back(c);
        }

        let mut order = Vec::new();
        loop {
            let total = placed.iter().sum::<usize>() as f64;
            let deficit = |k: usize| shares[k] * total - placed[k] as f64;
            let next = (0..3)
                .filter(|&k| !queues[k].is_empty())
                .max_by(|&a, &b| deficit(a).total_cmp(&deficit(b)).then(b.cmp(&a)));
            let Some(c) = next.and_then(|k| queues[k].pop_front()) else {
                break;
            };
            for &m in self.network.members(c) {
                placed[domains[m].stability() as usize] += 1;
            }
            order.push(c);
        }
        order
    }
}

/// Running state of the greedy fill.
#[derive(Debug, Default)]
struct Fill {
    accepted: Vec<usize>,
    skipped: Vec<usize>,
    count: usize,
}

impl Fill {
    fn run(&mut self, network: &HomologyNetwork, order: &[usize], band: SizeBand) {
        for &c in order {
            if self.count >= band.target {
                break;
            }
            let size = network.members(c).len();
            if self.count + size > band.upper {
                self.skipped.push(c);
                continue;
            }
            self.accepted.push(c);
            self.count += size;
        }
    }

    /// Smallest available overshoot; earliest skipped on ties.
    fn accept_smallest_skipped(&mut self, network: &HomologyNetwork) {
        let smallest = self
            .skipped
            .iter()
            .enumerate()
            .min_by_key(|(pos, &c)| (network.members(c).len(), *pos))
            .map(|(pos, _)| pos);
        if let Some(pos) = smallest {
            let c = self.skipped.remove(pos);
            self.count += network.members(c).len();
            self.accepted.push(c);
        }
    }
}
