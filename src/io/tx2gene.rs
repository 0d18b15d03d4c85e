//! Transcript-to-gene mapping reader

use std::path::Path;

use super::tables::{read_text, table_reader};
use crate::error::{AnalysisError, Result};

const HEADER_WORDS: &[&str] = &[
    "txname", "tx", "tx_id", "transcript", "transcript_id", "target_id", "enstid", "name",
];

/// Read a two-column transcript/gene table
///
/// Extra columns are ignored. A header row is skipped when its first field
/// looks like a column name.
pub fn read_tx2gene<P: AsRef<Path>>(path: P) -> Result<Vec<(String, String)>> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = table_reader(&text, false);
    let mut pairs = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < 2 {
            return Err(AnalysisError::Tx2GeneMismatch {
                reason: format!("line {} of {} has fewer than two columns", line + 1, path.display()),
            });
        }
        if line == 0 && HEADER_WORDS.contains(&record[0].to_ascii_lowercase().as_str()) {
            continue;
        }
        pairs.push((record[0].to_string(), record[1].to_string()));
    }
    if pairs.is_empty() {
        return Err(AnalysisError::Tx2GeneMismatch {
            reason: format!("{} contains no mappings", path.display()),
        });
    }
    log::info!("Read {} transcript-to-gene mappings", pairs.len());
    Ok(pairs)
}
