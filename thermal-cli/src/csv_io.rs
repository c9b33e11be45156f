//! Reading word dumps from comma-separated text files.
//!
//! Capture tooling writes one record per line: unsigned 16-bit words in
//! decimal, separated by commas, optionally with whitespace. A calibration
//! dump holds one record; a frame dump holds one record per captured
//! subpage.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

/// Read every non-empty line of `path` as a record of u16 words.
pub fn read_records(path: &Path) -> Result<Vec<Vec<u16>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line)
            .with_context(|| format!("{}: line {}", path.display(), number + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_record(line: &str) -> Result<Vec<u16>> {
    line.split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            field
                .parse::<u16>()
                .with_context(|| format!("bad word {:?}", field))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_one_record_per_line() {
        let file = write_file("1,2,3\n65535, 0 ,42\n");
        let records = read_records(file.path()).unwrap();
        assert_eq!(records, vec![vec![1, 2, 3], vec![65535, 0, 42]]);
    }

    #[test]
    fn test_skips_blank_lines() {
        let file = write_file("1,2\n\n  \n3,4\n");
        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_trailing_comma_is_tolerated() {
        let file = write_file("7,8,9,\n");
        let records = read_records(file.path()).unwrap();
        assert_eq!(records, vec![vec![7, 8, 9]]);
    }

    #[test]
    fn test_bad_word_reports_line() {
        let file = write_file("1,2\n3,potato\n");
        let err = read_records(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_out_of_range_word_rejected() {
        let file = write_file("65536\n");
        assert!(read_records(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = read_records(Path::new("/nonexistent/dump.csv")).unwrap_err();
        assert!(format!("{:#}", err).contains("dump.csv"));
    }
}
