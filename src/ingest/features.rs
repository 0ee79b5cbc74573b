//! Residue-level simulation tables reduced to per-domain features.
//!
//! Each CSV holds one row per residue for one temperature. The temperature
//! label is the last `_`-separated token of the file stem
//! (`mdcath_320.csv` -> `320`, `..._average.csv` -> `avg`).
//!
//! Per domain the reduction yields secondary-structure fractions (DSSP
//! `H`/`G`/`I` helix, `E`/`B` sheet, the rest coil), the core residue
//! fraction, mean relative accessibility and, per temperature, the mean and
//! standard deviation of RMSF.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::{
    collections::BTreeMap,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, Float64Array, StringArray},
    compute::cast,
    datatypes::DataType,
    record_batch::RecordBatch,
};
use arrow_csv::{reader::Format, ReaderBuilder};
use tracing::{debug, info};

use crate::{
    domain::StabilityClass,
    error::{Error, Result},
};

/// Helix fraction feature name.
pub const HELIX_FEATURE: &str = "helix_pct";
/// Sheet fraction feature name.
pub const SHEET_FEATURE: &str = "sheet_pct";
/// Coil fraction feature name.
pub const COIL_FEATURE: &str = "coil_pct";
/// Core residue fraction feature name.
pub const CORE_FEATURE: &str = "core_ratio";
/// Mean relative accessibility feature name.
pub const ACCESSIBILITY_FEATURE: &str = "avg_accessibility";

/// Low temperature of the stability ratio.
pub const LOW_TEMPERATURE: &str = "320";
/// High temperature of the stability ratio.
pub const HIGH_TEMPERATURE: &str = "450";

const BATCH_SIZE: usize = 8192;

/// Temperature label of a residue table path.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the path has no usable file stem.
pub fn temperature_label(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::invalid_input(format!("no file stem in '{}'", path.display()))
        })?;
    let token = stem.rsplit('_').next().unwrap_or(stem);
    Ok(if token == "average" {
        "avg".to_string()
    } else {
        token.to_string()
    })
}

fn rmsf_column(label: &str) -> String {
    if label == "avg" {
        "rmsf_average".to_string()
    } else {
        format!("rmsf_{label}")
    }
}

/// Running mean / variance (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Moments {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Sample standard deviation; 0 below two observations.
    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Residue statistics of one domain in one temperature table.
#[derive(Debug, Clone, Default, PartialEq)]
struct ResidueStats {
    residues: usize,
    size: Option<u32>,
    helix: usize,
    sheet: usize,
    core: usize,
    accessibility: Moments,
    rmsf: Moments,
}

/// Aggregated per-domain features.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFeatures {
    /// Residue count reported by the table
    pub size: u32,
    /// Values ordered as [`FeatureTable::feature_names`]
    pub values: Vec<f64>,
    /// Stability class, when both ratio temperatures are present
    pub stability: Option<StabilityClass>,
}

/// Per-domain features over a set of temperature tables.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    temperatures: Vec<String>,
    stats: BTreeMap<String, BTreeMap<String, ResidueStats>>,
}

impl FeatureTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load several residue CSV files.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or lacks a required column.
    pub fn from_csv_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut table = Self::new();
        for path in paths {
            table.add_csv_file(path.as_ref())?;
        }
        Ok(table)
    }

    /// Add one residue CSV file; the temperature comes from its name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or lacks a required column.
    pub fn add_csv_file(&mut self, path: &Path) -> Result<()> {
        let label = temperature_label(path)?;
        let file = std::fs::File::open(path).map_err(|e| Error::io(e, path))?;
        let in_file = |e: Error| match e {
            Error::InvalidInput { context } => {
                Error::invalid_input(format!("{}: {context}", path.display()))
            }
            other => other,
        };
        let batches = read_csv_batches(file).map_err(in_file)?;
        self.add_batches(&label, &batches).map_err(in_file)?;
        info!(
            path = %path.display(),
            temperature = %label,
            domains = self.stats.len(),
            "loaded residue table"
        );
        Ok(())
    }

    /// Add an in-memory CSV for a temperature label.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSV cannot be parsed or lacks a column.
    pub fn add_csv_str(&mut self, label: &str, data: &str) -> Result<()> {
        let batches = read_csv_batches(std::io::Cursor::new(data.as_bytes()))?;
        self.add_batches(label, &batches)
    }

    /// Accumulate record batches for a temperature label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming a missing required column.
    pub fn add_batches(&mut self, label: &str, batches: &[RecordBatch]) -> Result<()> {
        let rmsf_name = rmsf_column(label);
        for batch in batches {
            let ids = string_column(batch, "domain_id")?;
            let sizes = float_column(batch, "protein_size")?;
            let dssp = string_column(batch, "dssp")?;
            let core = string_column(batch, "core_exterior")?;
            let access = float_column(batch, "relative_accessibility")?;
            let rmsf = float_column(batch, &rmsf_name)?;

            for row in 0..batch.num_rows() {
                if ids.is_null(row) {
                    continue;
                }
                let stats = self
                    .stats
                    .entry(ids.value(row).to_string())
                    .or_default()
                    .entry(label.to_string())
                    .or_default();

                stats.residues += 1;
                if stats.size.is_none() && sizes.is_valid(row) {
                    stats.size = Some(sizes.value(row).max(0.0) as u32);
                }
                if dssp.is_valid(row) {
                    match dssp.value(row).trim() {
                        "H" | "G" | "I" => stats.helix += 1,
                        "E" | "B" => stats.sheet += 1,
                        _ => {}
                    }
                }
                if core.is_valid(row) && core.value(row).trim() == "core" {
                    stats.core += 1;
                }
                if access.is_valid(row) && access.value(row).is_finite() {
                    stats.accessibility.push(access.value(row));
                }
                if rmsf.is_valid(row) && rmsf.value(row).is_finite() {
                    stats.rmsf.push(rmsf.value(row));
                }
            }
        }

        if !self.temperatures.iter().any(|t| t == label) {
            self.temperatures.push(label.to_string());
            self.temperatures
                .sort_by(|a, b| temperature_order(a).cmp(&temperature_order(b)));
        }

        debug!(temperature = label, batches = batches.len(), "accumulated residue rows");
        Ok(())
    }

    /// Temperature labels loaded, numeric ascending with `avg` last.
    pub fn temperatures(&self) -> &[String] {
        &self.temperatures
    }

    /// Number of domains seen in any table.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether no domain was seen.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Whether the domain appears in any table.
    pub fn contains(&self, domain_id: &str) -> bool {
        self.stats.contains_key(domain_id)
    }

    /// Domain ids seen, sorted.
    pub fn domain_ids(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    /// Feature schema: composition features, then mean and standard
    /// deviation of RMSF per temperature.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            HELIX_FEATURE,
            SHEET_FEATURE,
            COIL_FEATURE,
            CORE_FEATURE,
            ACCESSIBILITY_FEATURE,
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
        for t in &self.temperatures {
            names.push(format!("avg_rmsf_{t}"));
            names.push(format!("std_rmsf_{t}"));
        }
        names
    }

    /// Aggregated features of one domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the domain is unknown or missing
    /// from one of the temperature tables.
    pub fn features(&self, domain_id: &str) -> Result<DomainFeatures> {
        let per_temp = self
            .stats
            .get(domain_id)
            .ok_or_else(|| Error::invalid_input(format!("no residue rows for '{domain_id}'")))?;

        let missing: Vec<&str> = self
            .temperatures
            .iter()
            .filter(|t| per_temp.get(*t).map_or(true, |s| s.rmsf.count == 0))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::invalid_input(format!(
                "domain '{domain_id}' has no RMSF at temperature(s) {}",
                missing.join(", ")
            )));
        }

        // Composition is identical across temperatures; use the first table
        let base = self
            .temperatures
            .first()
            .and_then(|t| per_temp.get(t))
            .ok_or_else(|| Error::invalid_input(format!("no residue rows for '{domain_id}'")))?;

        let residues = base.residues.max(1) as f64;
        let helix = base.helix as f64 / residues;
        let sheet = base.sheet as f64 / residues;
        let mut values = vec![
            helix,
            sheet,
            1.0 - (helix + sheet),
            base.core as f64 / residues,
            base.accessibility.mean,
        ];
        for t in &self.temperatures {
            let rmsf = per_temp[t].rmsf;
            values.push(rmsf.mean);
            values.push(rmsf.std_dev());
        }

        let stability = match (per_temp.get(LOW_TEMPERATURE), per_temp.get(HIGH_TEMPERATURE)) {
            (Some(low), Some(high)) if low.rmsf.count > 0 && high.rmsf.count > 0 && low.rmsf.mean > 0.0 => {
                Some(StabilityClass::from_rmsf_ratio(high.rmsf.mean / low.rmsf.mean))
            }
            _ => None,
        };

        Ok(DomainFeatures {
            size: base.size.unwrap_or(base.residues as u32),
            values,
            stability,
        })
    }
}

/// Numeric temperatures ascending, other labels after them.
fn temperature_order(label: &str) -> (u8, u32, String) {
    match label.parse::<u32>() {
        Ok(t) => (0, t, String::new()),
        Err(_) => (1, 0, label.to_string()),
    }
}

/// Read a CSV with an inferred schema, as arrow record batches.
fn read_csv_batches<R: Read + Seek>(reader: R) -> Result<Vec<RecordBatch>> {
    let mut buf_reader = BufReader::new(reader);

    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut buf_reader, Some(1000))?;
    buf_reader
        .seek(SeekFrom::Start(0))
        .map_err(Error::io_no_path)?;

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .with_batch_size(BATCH_SIZE)
        .build(buf_reader)?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    if batches.is_empty() {
        return Err(Error::invalid_input("residue table has no rows"));
    }
    Ok(batches)
}

fn column(batch: &RecordBatch, name: &str, to: &DataType) -> Result<ArrayRef> {
    let index = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::invalid_input(format!("missing column '{name}'")))?;
    Ok(cast(batch.column(index), to)?)
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let array = column(batch, name, &DataType::Utf8)?;
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| Error::invalid_input(format!("column '{name}' is not text")))
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let array = column(batch, name, &DataType::Float64)?;
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::invalid_input(format!("column '{name}' is not numeric")))
}
