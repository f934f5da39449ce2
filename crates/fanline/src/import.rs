//! CSV import
//!
//! Columns are positional: `ID`, `Username`, `Email`. The header row, when
//! present, is skipped without being checked.

use fanline_core::{Error, InputConfig, Record, Result};
use std::fs::File;
use std::io::Read;

/// Read every record from the configured input file
pub fn import_records(config: &InputConfig) -> Result<Vec<Record>> {
    let file = File::open(&config.path).map_err(|e| {
        Error::import(format!("failed to open {}: {}", config.path.display(), e))
    })?;
    let delimiter = u8::try_from(config.delimiter).map_err(|_| {
        Error::config(format!(
            "delimiter '{}' is not a single byte",
            config.delimiter
        ))
    })?;
    read_records(file, delimiter, config.has_header)
}

/// Parse records from any reader
pub fn read_records<R: Read>(reader: R, delimiter: u8, has_header: bool) -> Result<Vec<Record>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_header)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row.map_err(|e| Error::import(format!("malformed CSV: {}", e)))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);

        if row.len() < 3 {
            return Err(Error::import(format!(
                "line {}: expected 3 fields (ID, Username, Email), found {}",
                line,
                row.len()
            )));
        }

        let id = row[0].trim().parse::<i32>().map_err(|e| {
            Error::import(format!("line {}: invalid ID '{}': {}", line, &row[0], e))
        })?;
        records.push(Record::new(id, &row[1], &row[2]));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_read_pipe_delimited_with_header() {
        let input = "ID|Username|Email\n1|alice|alice@example.com\n2|bob|bob@example.com\n";
        let records = read_records(input.as_bytes(), b'|', true).unwrap();
        assert_eq!(
            records,
            vec![
                Record::new(1, "alice", "alice@example.com"),
                Record::new(2, "bob", "bob@example.com"),
            ]
        );
    }

    #[test]
    fn test_read_without_header() {
        let records = read_records("7,g,g@x\n".as_bytes(), b',', false).unwrap();
        assert_eq!(records, vec![Record::new(7, "g", "g@x")]);
    }

    #[test]
    fn test_invalid_id_reports_line() {
        let input = "ID|Username|Email\n1|a|a@x\nabc|b|b@x\n";
        let err = read_records(input.as_bytes(), b'|', true).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("line 3"), "{message}");
        assert!(message.contains("invalid ID 'abc'"), "{message}");
    }

    #[test]
    fn test_short_row_rejected() {
        let input = "ID|Username|Email\n1|a\n";
        let err = read_records(input.as_bytes(), b'|', true).unwrap_err();
        assert!(err.to_string().contains("expected 3 fields"));
    }

    #[test]
    fn test_header_only_is_empty() {
        let records = read_records("ID|Username|Email\n".as_bytes(), b'|', true).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_import_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::write(&path, "ID|Username|Email\n3|c|c@x\n").unwrap();

        let config = InputConfig {
            path,
            delimiter: '|',
            has_header: true,
        };
        assert_eq!(
            import_records(&config).unwrap(),
            vec![Record::new(3, "c", "c@x")]
        );
    }

    #[test]
    fn test_missing_file() {
        let config = InputConfig {
            path: PathBuf::from("/nonexistent/users.csv"),
            ..InputConfig::default()
        };
        let err = import_records(&config).unwrap_err();
        assert!(matches!(err, Error::Import(_)));
    }
}
