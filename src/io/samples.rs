//! Sample metadata reader

use std::path::Path;

use super::tables::{read_text, table_reader};
use crate::data::SampleTable;
use crate::error::{AnalysisError, Result};

/// Read a delimited sample table
///
/// `id_column` names the column holding sample (run) identifiers; the first
/// column is used when it is `None`. All other columns become factor columns.
pub fn read_sample_table<P: AsRef<Path>>(path: P, id_column: Option<&str>) -> Result<SampleTable> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = table_reader(&text, true);
    let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();

    let id_idx = match id_column {
        Some(name) => header.iter().position(|h| h == name).ok_or_else(|| {
            AnalysisError::InvalidMetadata {
                reason: format!(
                    "sample ID column '{}' not found in {} (columns: {})",
                    name,
                    path.display(),
                    header.join(", ")
                ),
            }
        })?,
        None => 0,
    };

    let mut ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); header.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        if record.len() != header.len() {
            return Err(AnalysisError::InvalidMetadata {
                reason: format!(
                    "row {} of {} has {} fields, header has {}",
                    line + 2,
                    path.display(),
                    record.len(),
                    header.len()
                ),
            });
        }
        ids.push(record[id_idx].to_string());
        for (j, field) in record.iter().enumerate() {
            columns[j].push(field.to_string());
        }
    }
    if ids.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("{} lists no samples", path.display()),
        });
    }

    let mut table = SampleTable::new(ids)?;
    for (j, name) in header.iter().enumerate() {
        if j != id_idx {
            table.add_column(name, std::mem::take(&mut columns[j]))?;
        }
    }
    log::info!(
        "Read {} samples with {} metadata columns from {}",
        table.n_samples(),
        header.len() - 1,
        path.display()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_sample_table_named_id() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "subject\tRun\tdisease state\ttreatment").unwrap();
        writeln!(file, "p1\tSRR1\thealthy\tvehicle").unwrap();
        writeln!(file, "p1\tSRR2\thealthy\tdrug").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "p2\tSRR3\tsick\tvehicle").unwrap();

        let t = read_sample_table(file.path(), Some("Run")).unwrap();
        assert_eq!(t.sample_ids(), &["SRR1".to_string(), "SRR2".into(), "SRR3".into()]);
        assert_eq!(t.column("disease state").unwrap()[2], "sick");
        assert!(!t.has_column("Run"), "the ID column is not a factor column");
        assert!(t.has_column("subject"));
    }

    #[test]
    fn test_missing_id_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2").unwrap();
        assert!(read_sample_table(file.path(), Some("Run")).is_err());
        let t = read_sample_table(file.path(), None).unwrap();
        assert_eq!(t.sample_ids(), &["1".to_string()]);
    }
}
