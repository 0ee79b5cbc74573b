//! Domain records and the immutable feature store.
//!
//! A [`DomainStore`] is the single read-only input shared by every stage of
//! the sampling pipeline. It is validated once at construction: ids are
//! unique, every feature vector has the same dimensionality as the feature
//! schema, and every value is finite.
//!
//! Domains are kept sorted by identifier, so a domain's index in the store
//! doubles as its stable tie-break rank.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// CATH classification path: Class, Architecture, Topology, Homology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CathPath {
    /// Class (C) code
    pub class: u32,
    /// Architecture (A) code
    pub architecture: u32,
    /// Topology (T) code
    pub topology: u32,
    /// Homologous superfamily (H) code
    pub homology: u32,
}

impl CathPath {
    /// Create a path from its four codes.
    pub fn new(class: u32, architecture: u32, topology: u32, homology: u32) -> Self {
        Self {
            class,
            architecture,
            topology,
            homology,
        }
    }

    /// The (C, A, T) triple identifying the topology group.
    pub fn topology_key(&self) -> TopologyKey {
        TopologyKey {
            class: self.class,
            architecture: self.architecture,
            topology: self.topology,
        }
    }

    /// Dotted prefix of the path at the given depth (1 = "C", 4 = "C.A.T.H").
    pub fn level_label(&self, depth: usize) -> String {
        let codes = [self.class, self.architecture, self.topology, self.homology];
        codes[..depth.clamp(1, 4)]
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for CathPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.class, self.architecture, self.topology, self.homology
        )
    }
}

/// Key of a topology group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopologyKey {
    /// Class (C) code
    pub class: u32,
    /// Architecture (A) code
    pub architecture: u32,
    /// Topology (T) code
    pub topology: u32,
}

impl TopologyKey {
    /// Stable 64-bit fingerprint used to derive per-group seeds.
    ///
    /// Does not depend on `std`'s randomized hasher.
    pub fn fingerprint(&self) -> u64 {
        // FNV-1a over the three codes
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for code in [self.class, self.architecture, self.topology] {
            for byte in code.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        }
        hash
    }
}

impl fmt::Display for TopologyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.architecture, self.topology)
    }
}

/// Dynamic-stability class derived from RMSF at low and high temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityClass {
    /// RMSF(450K) / RMSF(320K) < 2
    Stable,
    /// 2 <= ratio < 4
    Moderate,
    /// ratio >= 4
    Unstable,
}

impl StabilityClass {
    /// All classes in canonical order.
    pub const ALL: [Self; 3] = [Self::Stable, Self::Moderate, Self::Unstable];

    /// Classify a high/low temperature RMSF ratio.
    pub fn from_rmsf_ratio(ratio: f64) -> Self {
        if ratio < 2.0 {
            Self::Stable
        } else if ratio < 4.0 {
            Self::Moderate
        } else {
            Self::Unstable
        }
    }

    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Moderate => "moderate",
            Self::Unstable => "unstable",
        }
    }
}

impl fmt::Display for StabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for StabilityClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "moderate" => Ok(Self::Moderate),
            "unstable" => Ok(Self::Unstable),
            other => Err(Error::parse(format!("unknown stability class '{other}'"))),
        }
    }
}

/// One structural domain. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    id: String,
    cath: CathPath,
    pdb_origin: String,
    size: u32,
    features: Vec<f64>,
    stability: StabilityClass,
}

impl Domain {
    /// Create a domain record. The PDB origin is stored lower-cased.
    pub fn new(
        id: impl Into<String>,
        cath: CathPath,
        pdb_origin: impl Into<String>,
        size: u32,
        features: Vec<f64>,
        stability: StabilityClass,
    ) -> Self {
        Self {
            id: id.into(),
            cath,
            pdb_origin: pdb_origin.into().to_lowercase(),
            size,
            features,
            stability,
        }
    }

    /// Domain identifier (e.g. `1abcA00`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// CATH classification.
    pub fn cath(&self) -> CathPath {
        self.cath
    }

    /// Topology group key.
    pub fn topology(&self) -> TopologyKey {
        self.cath.topology_key()
    }

    /// PDB entry this domain was cut from.
    pub fn pdb_origin(&self) -> &str {
        &self.pdb_origin
    }

    /// Number of residues.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Continuous feature vector, ordered as [`DomainStore::feature_names`].
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    /// Stability class.
    pub fn stability(&self) -> StabilityClass {
        self.stability
    }
}

/// Immutable, validated collection of domains.
#[derive(Debug, Clone)]
pub struct DomainStore {
    domains: Vec<Domain>,
    index: HashMap<String, usize>,
    feature_names: Arc<[String]>,
}

impl DomainStore {
    /// Build a store from domain records and the feature schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the collection is empty, an id is
    /// duplicated, a feature vector has the wrong dimensionality or holds a
    /// non-finite value.
    pub fn new<S: Into<String>>(
        domains: Vec<Domain>,
        feature_names: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let feature_names: Arc<[String]> = feature_names.into_iter().map(Into::into).collect();

        if domains.is_empty() {
            return Err(Error::invalid_input("domain collection is empty"));
        }

        let mut domains = domains;
        domains.sort_by(|a, b| a.id.cmp(&b.id));

        let mut index = HashMap::with_capacity(domains.len());
        for (i, domain) in domains.iter().enumerate() {
            if domain.features.len() != feature_names.len() {
                return Err(Error::invalid_input(format!(
                    "domain '{}' has {} features, expected {}",
                    domain.id,
                    domain.features.len(),
                    feature_names.len()
                )));
            }
            if let Some(pos) = domain.features.iter().position(|v| !v.is_finite()) {
                return Err(Error::invalid_input(format!(
                    "domain '{}' has non-finite value for feature '{}'",
                    domain.id, feature_names[pos]
                )));
            }
            if index.insert(domain.id.clone(), i).is_some() {
                return Err(Error::invalid_input(format!(
                    "duplicate domain id '{}'",
                    domain.id
                )));
            }
        }

        Ok(Self {
            domains,
            index,
            feature_names,
        })
    }

    /// Number of domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Always false for a constructed store; kept for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// All domains, sorted by id.
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Domain at a store index.
    pub fn get(&self, index: usize) -> Option<&Domain> {
        self.domains.get(index)
    }

    /// Store index of a domain id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Domain by id.
    pub fn by_id(&self, id: &str) -> Option<&Domain> {
        self.index_of(id).map(|i| &self.domains[i])
    }

    /// Whether the id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Names of the continuous features.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Feature dimensionality.
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Resolve ids to store indices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first unknown id.
    pub fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Result<Vec<usize>> {
        ids.into_iter()
            .map(|id| {
                self.index_of(id).ok_or_else(|| {
                    Error::invalid_input(format!("domain '{id}' is not in the collection"))
                })
            })
            .collect()
    }
}
