//! Sampler configuration.
//!
//! [`SamplerConfig`] can be built in code with `with_*` methods or loaded
//! from a YAML / JSON file. Unset keys fall back to the defaults:
//!
//! ```yaml
//! sample_ratio: 0.1
//! cluster_threshold: 10
//! ri_threshold: 0.9
//! max_iterations: 10
//! tolerance: 0.02
//! seed: 42
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    normalize::NormMethod,
};

/// Tunables for one sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    /// Target fraction of domains in the holdout.
    pub sample_ratio: f64,
    /// Topology groups at least this large are clustered; smaller ones use
    /// uniqueness-weighted sampling.
    pub cluster_threshold: usize,
    /// Representation Index required for acceptance.
    pub ri_threshold: f64,
    /// Refinement iterations allowed after the first pass.
    pub max_iterations: usize,
    /// Half-width of the holdout size band, as a fraction of all domains.
    pub tolerance: f64,
    /// Seed for every random draw of the run.
    pub seed: u64,
    /// Significance level used by the distribution-similarity score.
    pub alpha: f64,
    /// Relative ratio increase per refinement iteration.
    pub ratio_step: f64,
    /// Upper bound for the nudged ratio; never below `sample_ratio`.
    pub max_ratio: f64,
    /// Lloyd iteration cap for k-means.
    pub kmeans_max_iterations: usize,
    /// Feature scaling method.
    pub normalization: NormMethod,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_ratio: 0.1,
            cluster_threshold: 10,
            ri_threshold: 0.9,
            max_iterations: 10,
            tolerance: 0.02,
            seed: 42,
            alpha: 0.05,
            ratio_step: 0.1,
            max_ratio: 0.2,
            kmeans_max_iterations: 100,
            normalization: NormMethod::ZScore,
        }
    }
}

impl SamplerConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, has an unsupported
    /// extension, fails to deserialize or fails [`Self::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(e, path))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&text).map_err(Error::serialization)?,
            Some("json") => serde_json::from_str(&text).map_err(Error::serialization)?,
            other => {
                return Err(Error::invalid_config(format!(
                    "unsupported config extension: {}",
                    other.unwrap_or("<none>")
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Set the target sample ratio.
    #[must_use]
    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio;
        self
    }

    /// Set the clustering threshold.
    #[must_use]
    pub fn with_cluster_threshold(mut self, threshold: usize) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    /// Set the acceptance threshold.
    #[must_use]
    pub fn with_ri_threshold(mut self, threshold: f64) -> Self {
        self.ri_threshold = threshold;
        self
    }

    /// Set the refinement iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the holdout size tolerance band.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the significance level.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the normalization method.
    #[must_use]
    pub fn with_normalization(mut self, method: NormMethod) -> Self {
        self.normalization = method;
        self
    }

    /// Cap for the refined ratio: `max_ratio`, lifted to `sample_ratio`.
    pub fn effective_max_ratio(&self) -> f64 {
        self.max_ratio.max(self.sample_ratio)
    }

    /// Check every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_ratio > 0.0 && self.sample_ratio < 1.0) {
            return Err(Error::invalid_config(format!(
                "sample_ratio must be in (0, 1), got {}",
                self.sample_ratio
            )));
        }
        if self.cluster_threshold == 0 {
            return Err(Error::invalid_config("cluster_threshold must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.ri_threshold) {
            return Err(Error::invalid_config(format!(
                "ri_threshold must be in [0, 1], got {}",
                self.ri_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(Error::invalid_config(format!(
                "tolerance must be in [0, 1), got {}",
                self.tolerance
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::invalid_config(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.ratio_step < 0.0 {
            return Err(Error::invalid_config("ratio_step must be non-negative"));
        }
        if !(self.max_ratio > 0.0 && self.max_ratio < 1.0) {
            return Err(Error::invalid_config(format!(
                "max_ratio must be in (0, 1), got {}",
                self.max_ratio
            )));
        }
        if self.kmeans_max_iterations == 0 {
            return Err(Error::invalid_config(
                "kmeans_max_iterations must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SamplerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_ratio, 0.1);
        assert_eq!(config.cluster_threshold, 10);
        assert_eq!(config.ri_threshold, 0.9);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.tolerance, 0.02);
    }

    #[test]
    fn test_builder() {
        let config = SamplerConfig::new()
            .with_sample_ratio(0.15)
            .with_cluster_threshold(5)
            .with_seed(7)
            .with_normalization(NormMethod::MinMax);
        assert_eq!(config.sample_ratio, 0.15);
        assert_eq!(config.cluster_threshold, 5);
        assert_eq!(config.seed, 7);
        assert_eq!(config.normalization, NormMethod::MinMax);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        assert!(SamplerConfig::new().with_sample_ratio(0.0).validate().is_err());
        assert!(SamplerConfig::new().with_sample_ratio(1.0).validate().is_err());
        assert!(SamplerConfig::new()
            .with_sample_ratio(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_ratio_above_cap_lifts_cap() {
        let config = SamplerConfig::new().with_sample_ratio(0.3);
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_max_ratio(), 0.3);
        assert_eq!(SamplerConfig::new().effective_max_ratio(), 0.2);

        let mut bad = SamplerConfig::new();
        bad.max_ratio = 1.0;
        assert!(bad.validate().unwrap_err().to_string().contains("max_ratio"));
    }

    #[test]
    fn test_from_file_ratio_above_default_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sampler.yaml");
        std::fs::write(&path, "sample_ratio: 0.3\n").expect("write");

        let config = SamplerConfig::from_file(&path).expect("load");
        assert_eq!(config.sample_ratio, 0.3);
        assert_eq!(config.effective_max_ratio(), 0.3);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        assert!(SamplerConfig::new().with_ri_threshold(1.5).validate().is_err());
        assert!(SamplerConfig::new()
            .with_cluster_threshold(0)
            .validate()
            .is_err());
        assert!(SamplerConfig::new().with_tolerance(1.0).validate().is_err());
    }

    #[test]
    fn test_from_yaml_partial() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sampler.yaml");
        std::fs::write(&path, "sample_ratio: 0.12\nseed: 9\nnormalization: min_max\n")
            .expect("write");

        let config = SamplerConfig::from_file(&path).expect("load");
        assert_eq!(config.sample_ratio, 0.12);
        assert_eq!(config.seed, 9);
        assert_eq!(config.normalization, NormMethod::MinMax);
        assert_eq!(config.cluster_threshold, 10);
    }

    #[test]
    fn test_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sampler.json");
        std::fs::write(&path, r#"{"max_iterations": 3, "tolerance": 0.05}"#).expect("write");

        let config = SamplerConfig::from_file(&path).expect("load");
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.tolerance, 0.05);
    }

    #[test]
    fn test_from_file_rejects_unknown_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sampler.yaml");
        std::fs::write(&path, "sample_rate: 0.1\n").expect("write");
        assert!(matches!(
            SamplerConfig::from_file(&path),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_from_file_rejects_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sampler.toml");
        std::fs::write(&path, "seed = 1\n").expect("write");
        assert!(matches!(
            SamplerConfig::from_file(&path),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
