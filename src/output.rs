//! Writing split results to disk.
//!
//! A run directory holds:
//!
//! | File | Content |
//! |------|---------|
//! | `holdout_domains.txt` | holdout ids, sorted, one per line |
//! | `training_domains.txt` | training ids, sorted, one per line |
//! | `validation_report.json` | run status, configuration, final report, history |
//! | `assignments.parquet` | `domain_id`, `split`, `component` per domain |

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, StringArray, UInt64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};
use serde::Serialize;
use tracing::info;

use crate::{
    config::SamplerConfig,
    domain::DomainStore,
    error::{Error, Result},
    network::Partition,
    refine::{IterationRecord, RefinementOutcome, RefinementState},
    validate::ValidationReport,
};

/// Holdout id list file name.
pub const HOLDOUT_FILE: &str = "holdout_domains.txt";
/// Training id list file name.
pub const TRAINING_FILE: &str = "training_domains.txt";
/// Report file name.
pub const REPORT_FILE: &str = "validation_report.json";
/// Assignment manifest file name.
pub const ASSIGNMENTS_FILE: &str = "assignments.parquet";

/// Split label of holdout rows.
pub const HOLDOUT_LABEL: &str = "holdout";
/// Split label of training rows.
pub const TRAINING_LABEL: &str = "training";

/// Write ids one per line, sorted.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_id_list(path: impl AsRef<Path>, ids: &[String]) -> Result<()> {
    let path = path.as_ref();
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut writer = BufWriter::new(file);
    for id in sorted {
        writeln!(writer, "{id}").map_err(|e| Error::io(e, path))?;
    }
    writer.flush().map_err(|e| Error::io(e, path))
}

/// Read an id list; blank lines and `#` comments are skipped.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn read_id_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(e, path))?;
        let id = line.trim();
        if id.is_empty() || id.starts_with('#') {
            continue;
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// JSON document written next to the id lists.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    /// Terminal state
    pub status: RefinementState,
    /// Iteration that produced the partition
    pub iteration: usize,
    /// Refinement iterations performed
    pub iterations: usize,
    /// Holdout domains
    pub holdout_size: usize,
    /// Training domains
    pub training_size: usize,
    /// Whole components in the holdout
    pub holdout_components: usize,
    /// Configuration of the run
    pub config: &'a SamplerConfig,
    /// Report of the written partition
    pub report: &'a ValidationReport,
    /// Per-iteration records
    pub history: &'a [IterationRecord],
}

impl<'a> RunSummary<'a> {
    /// Summary of a finished run.
    pub fn new(outcome: &'a RefinementOutcome, config: &'a SamplerConfig) -> Self {
        Self {
            status: outcome.status,
            iteration: outcome.iteration,
            iterations: outcome.iterations,
            holdout_size: outcome.partition.holdout().len(),
            training_size: outcome.partition.training().len(),
            holdout_components: outcome.partition.holdout_components(),
            config,
            report: &outcome.report,
            history: &outcome.history,
        }
    }
}

/// Write any serializable value as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(Error::serialization)?;
    writer.flush().map_err(|e| Error::io(e, path))
}

/// Assignment manifest as a record batch.
///
/// # Errors
///
/// Returns an Arrow error if the batch cannot be built.
pub fn assignments_batch(store: &DomainStore, partition: &Partition) -> Result<RecordBatch> {
    let n = store.len();
    let mut split = vec![TRAINING_LABEL; n];
    for &i in partition.holdout() {
        split[i] = HOLDOUT_LABEL;
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("domain_id", DataType::Utf8, false),
        Field::new("split", DataType::Utf8, false),
        Field::new("component", DataType::UInt64, false),
    ]));

    let ids: ArrayRef = Arc::new(StringArray::from_iter_values(
        store.domains().iter().map(|d| d.id()),
    ));
    let splits: ArrayRef = Arc::new(StringArray::from_iter_values(split));
    let components: ArrayRef = Arc::new(UInt64Array::from_iter_values(
        partition.component_of().iter().map(|&c| c as u64),
    ));

    Ok(RecordBatch::try_new(schema, vec![ids, splits, components])?)
}

/// Write the assignment manifest as parquet.
///
/// # Errors
///
/// Returns an error if the file cannot be created or writing fails.
pub fn write_assignments(
    path: impl AsRef<Path>,
    store: &DomainStore,
    partition: &Partition,
) -> Result<()> {
    let path = path.as_ref();
    let batch = assignments_batch(store, partition)?;
    let file = File::create(path).map_err(|e| Error::io(e, path))?;

    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Paths written by [`write_outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Holdout id list
    pub holdout: PathBuf,
    /// Training id list
    pub training: PathBuf,
    /// JSON report
    pub report: PathBuf,
    /// Parquet manifest
    pub assignments: PathBuf,
}

impl OutputPaths {
    /// Standard file names under a directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            holdout: dir.join(HOLDOUT_FILE),
            training: dir.join(TRAINING_FILE),
            report: dir.join(REPORT_FILE),
            assignments: dir.join(ASSIGNMENTS_FILE),
        }
    }
}

/// Write every output of a run into `dir`, creating it if needed.
///
/// # Errors
///
/// Returns the first I/O, serialization or parquet error.
pub fn write_outcome(
    dir: impl AsRef<Path>,
    store: &DomainStore,
    outcome: &RefinementOutcome,
    config: &SamplerConfig,
) -> Result<OutputPaths> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;
    let paths = OutputPaths::in_dir(dir);

    write_id_list(&paths.holdout, outcome.partition.holdout_ids())?;
    write_id_list(&paths.training, outcome.partition.training_ids())?;
    write_json(&paths.report, &RunSummary::new(outcome, config))?;
    write_assignments(&paths.assignments, store, &outcome.partition)?;

    info!(
        dir = %dir.display(),
        holdout = outcome.partition.holdout().len(),
        training = outcome.partition.training().len(),
        "wrote split outputs"
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use super::*;
    use crate::{
        domain::test_support::population, network::HomologyNetwork, refine::RefinementController,
    };

    #[test]
    fn test_id_list_sorted_and_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ids.txt");
        write_id_list(&path, &["2b".to_string(), "1a".to_string(), "3c".to_string()])
            .expect("write");

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "1a\n2b\n3c\n");
        assert_eq!(read_id_list(&path).expect("ids"), vec!["1a", "2b", "3c"]);
    }

    #[test]
    fn test_read_id_list_skips_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ids.txt");
        std::fs::write(&path, "# holdout\n\n 1abcA00 \n2xyzB01\n").expect("write");
        assert_eq!(read_id_list(&path).expect("ids"), vec!["1abcA00", "2xyzB01"]);
    }

    #[test]
    fn test_assignments_batch() {
        let store = population(6);
        let network = HomologyNetwork::build(&store);
        let partition = Partition::new(&store, &network, &[1, 4]).expect("partition");

        let batch = assignments_batch(&store, &partition).expect("batch");
        assert_eq!(batch.num_rows(), 6);
        assert_eq!(batch.num_columns(), 3);
        let split = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("split");
        assert_eq!(split.value(1), HOLDOUT_LABEL);
        assert_eq!(split.value(0), TRAINING_LABEL);
    }

    #[test]
    fn test_write_outcome() {
        let store = population(100);
        let config = SamplerConfig::new().with_ri_threshold(0.0);
        let outcome = RefinementController::new(&store, config.clone())
            .expect("controller")
            .run()
            .expect("run");

        let dir = tempfile::tempdir().expect("tempdir");
        let paths = write_outcome(dir.path().join("out"), &store, &outcome, &config).expect("write");

        let holdout = read_id_list(&paths.holdout).expect("holdout");
        let training = read_id_list(&paths.training).expect("training");
        assert_eq!(holdout.len() + training.len(), 100);
        assert_eq!(holdout, outcome.partition.holdout_ids());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.report).expect("report"))
                .expect("json");
        assert_eq!(json["status"], "accepted");
        assert!(json["report"]["representation_index"].is_number());

        let file = File::open(&paths.assignments).expect("parquet");
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .expect("builder")
            .build()
            .expect("reader");
        let rows: usize = reader.map(|b| b.expect("batch").num_rows()).sum();
        assert_eq!(rows, 100);
    }
}
