//! CATH domain list parsing.
//!
//! The list is whitespace separated. The first column is the domain id and
//! columns 2-5 hold the Class, Architecture, Topology and Homology codes;
//! further columns are ignored. Lines starting with `#` and blank lines are
//! skipped, as are lines with fewer than five columns.

use std::{
    collections::BTreeMap,
    io::{BufRead, BufReader},
    path::Path,
};

use tracing::{info, warn};

use crate::{
    domain::CathPath,
    error::{Error, Result},
};

/// One parsed classification line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CathRecord {
    /// Domain id, e.g. `1abcA01`
    pub domain_id: String,
    /// Classification
    pub path: CathPath,
    /// PDB entry the domain was cut from
    pub pdb_origin: String,
}

/// Classification records keyed by domain id.
pub type CathTable = BTreeMap<String, CathRecord>;

/// PDB entry of a domain id: its first four characters, lower-cased.
pub fn pdb_origin(domain_id: &str) -> String {
    domain_id.chars().take(4).collect::<String>().to_lowercase()
}

/// Parse a CATH domain list.
///
/// A repeated id replaces the earlier record.
///
/// # Errors
///
/// Returns [`Error::Parse`] naming the line for a non-integer code, and an
/// I/O error if reading fails.
pub fn parse_cath_list(reader: impl BufRead) -> Result<CathTable> {
    let mut table = CathTable::new();
    let mut short_lines = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(Error::io_no_path)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() < 5 {
            short_lines += 1;
            continue;
        }

        let code = |col: usize| -> Result<u32> {
            parts[col].parse::<u32>().map_err(|_| {
                Error::parse(format!(
                    "line {}: CATH code '{}' in column {} is not an integer",
                    line_no + 1,
                    parts[col],
                    col + 1
                ))
            })
        };
        let path = CathPath::new(code(1)?, code(2)?, code(3)?, code(4)?);
        let domain_id = parts[0].to_string();

        let record = CathRecord {
            pdb_origin: pdb_origin(&domain_id),
            domain_id: domain_id.clone(),
            path,
        };
        if table.insert(domain_id, record).is_some() {
            warn!(line = line_no + 1, "duplicate CATH entry replaces earlier record");
        }
    }

    if short_lines > 0 {
        warn!(lines = short_lines, "skipped CATH lines with fewer than 5 columns");
    }

    Ok(table)
}

/// Read and parse a CATH domain list file.
///
/// # Errors
///
/// See [`parse_cath_list`]; I/O errors carry the path.
pub fn read_cath_file(path: impl AsRef<Path>) -> Result<CathTable> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| Error::io(e, path))?;
    let table = parse_cath_list(BufReader::new(file))?;
    info!(path = %path.display(), domains = table.len(), "parsed CATH classifications");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# CATH domain list v4.2
# id  C  A  T  H  S35 ...
1abcA01  1  10  8  10  1 1 1 1 1 120
1abcA02  3  40  50 300 2 1 1 1 1 95

2xyzB00  2  60  40  10
short 1 2
";

    #[test]
    fn test_parse_sample() {
        let table = parse_cath_list(SAMPLE.as_bytes()).expect("parse");
        assert_eq!(table.len(), 2);

        let record = &table["1abcA02"];
        assert_eq!(record.path, CathPath::new(3, 40, 50, 300));
        assert_eq!(record.pdb_origin, "1abc");
        assert_eq!(table["2xyzB00"].path.to_string(), "2.60.40.10");
    }

    #[test]
    fn test_pdb_origin_lowercases() {
        assert_eq!(pdb_origin("1ABCA00"), "1abc");
        assert_eq!(pdb_origin("1ab"), "1ab");
    }

    #[test]
    fn test_non_integer_code_names_line() {
        let err = parse_cath_list("# header\n1abcA01 1 x 8 10\n".as_bytes()).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(msg.contains("line 2"), "{msg}");
    }

    #[test]
    fn test_duplicate_replaces() {
        let table = parse_cath_list("1abcA01 1 10 8 10\n1abcA01 2 20 30 40\n".as_bytes())
            .expect("parse");
        assert_eq!(table.len(), 1);
        assert_eq!(table["1abcA01"].path, CathPath::new(2, 20, 30, 40));
    }

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cath.txt");
        std::fs::write(&path, SAMPLE).expect("write");
        assert_eq!(read_cath_file(&path).expect("read").len(), 2);
        assert!(read_cath_file(dir.path().join("missing.txt")).is_err());
    }
}
