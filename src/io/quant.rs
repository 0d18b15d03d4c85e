//! Transcript quantification readers (salmon `quant.sf`, kallisto `abundance.tsv`)

use std::path::{Path, PathBuf};

use super::tables::{parse_value, read_text, table_reader};
use crate::error::{AnalysisError, Result};

/// Quantifier that produced a file, detected from its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantFormat {
    Salmon,
    Kallisto,
}

impl QuantFormat {
    /// Column names for (name, length, effective length, abundance, counts)
    fn columns(self) -> [&'static str; 5] {
        match self {
            QuantFormat::Salmon => ["Name", "Length", "EffectiveLength", "TPM", "NumReads"],
            QuantFormat::Kallisto => ["target_id", "length", "eff_length", "tpm", "est_counts"],
        }
    }

    fn detect(header: &[String]) -> Option<Self> {
        [QuantFormat::Salmon, QuantFormat::Kallisto]
            .into_iter()
            .find(|fmt| fmt.columns().iter().all(|c| header.iter().any(|h| h == c)))
    }
}

/// Per-transcript quantification of one sample
#[derive(Debug, Clone)]
pub struct QuantTable {
    pub format: QuantFormat,
    pub names: Vec<String>,
    pub length: Vec<f64>,
    pub effective_length: Vec<f64>,
    pub abundance: Vec<f64>,
    pub counts: Vec<f64>,
}

impl QuantTable {
    pub fn n_transcripts(&self) -> usize {
        self.names.len()
    }
}

/// Read one quantification file, plain or gzip compressed
pub fn read_quant<P: AsRef<Path>>(path: P) -> Result<QuantTable> {
    let path = path.as_ref();
    let invalid = |reason: String| AnalysisError::InvalidQuantification {
        path: path.display().to_string(),
        reason,
    };

    let text = read_text(path)?;
    let mut reader = table_reader(&text, true);
    let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
    let format = QuantFormat::detect(&header).ok_or_else(|| {
        invalid(format!(
            "unrecognised header [{}]; expected salmon or kallisto columns",
            header.join(", ")
        ))
    })?;
    let idx: Vec<usize> = format
        .columns()
        .iter()
        .map(|c| header.iter().position(|h| h == c).unwrap_or_default())
        .collect();

    let mut table = QuantTable {
        format,
        names: Vec::new(),
        length: Vec::new(),
        effective_length: Vec::new(),
        abundance: Vec::new(),
        counts: Vec::new(),
    };
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |k: usize| -> Result<f64> {
            let cell = record.get(idx[k]).unwrap_or("");
            match parse_value(cell) {
                Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
                _ => Err(invalid(format!(
                    "line {}: invalid {} value '{}'",
                    line + 2,
                    format.columns()[k],
                    cell
                ))),
            }
        };
        let name = record.get(idx[0]).unwrap_or("").to_string();
        if name.is_empty() {
            return Err(invalid(format!("line {}: empty transcript name", line + 2)));
        }
        table.length.push(field(1)?);
        table.effective_length.push(field(2)?);
        table.abundance.push(field(3)?);
        table.counts.push(field(4)?);
        table.names.push(name);
    }
    if table.names.is_empty() {
        return Err(invalid("no transcripts".to_string()));
    }
    log::debug!(
        "Read {} transcripts ({:?}) from {}",
        table.n_transcripts(),
        format,
        path.display()
    );
    Ok(table)
}

/// Find the quantification file of a sample inside `dir`
///
/// Looks for `<id>/quant.sf[.gz]`, `<id>/abundance.tsv[.gz]`,
/// `<id>.quant.sf[.gz]` and `<id>.sf[.gz]` in that order.
pub fn locate_quant_file<P: AsRef<Path>>(dir: P, sample_id: &str) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let candidates = [
        dir.join(sample_id).join("quant.sf.gz"),
        dir.join(sample_id).join("quant.sf"),
        dir.join(sample_id).join("abundance.tsv.gz"),
        dir.join(sample_id).join("abundance.tsv"),
        dir.join(format!("{}.quant.sf.gz", sample_id)),
        dir.join(format!("{}.quant.sf", sample_id)),
        dir.join(format!("{}.sf.gz", sample_id)),
        dir.join(format!("{}.sf", sample_id)),
    ];
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| AnalysisError::InvalidQuantification {
            path: dir.join(sample_id).display().to_string(),
            reason: "no quant.sf or abundance.tsv file found for this sample".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const SALMON: &str = "Name\tLength\tEffectiveLength\tTPM\tNumReads\n\
                          ENST01.1\t1500\t1320.5\t120.5\t400.0\n\
                          ENST02.3\t800\t620.0\t0\t0\n";

    #[test]
    fn test_read_salmon_gz_located() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("SRR1")).unwrap();
        let path = dir.path().join("SRR1").join("quant.sf.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(SALMON.as_bytes()).unwrap();
        enc.finish().unwrap();

        let found = locate_quant_file(dir.path(), "SRR1").unwrap();
        assert_eq!(found, path);
        let q = read_quant(&found).unwrap();
        assert_eq!(q.format, QuantFormat::Salmon);
        assert_eq!(q.names, vec!["ENST01.1", "ENST02.3"]);
        assert_eq!(q.effective_length[0], 1320.5);
        assert_eq!(q.counts[0], 400.0);
        assert!(locate_quant_file(dir.path(), "SRR2").is_err());
    }

    #[test]
    fn test_read_kallisto() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abundance.tsv");
        std::fs::write(
            &path,
            "target_id\tlength\teff_length\test_counts\ttpm\nT1\t1000\t850.2\t12\t3.5\n",
        )
        .unwrap();
        let q = read_quant(&path).unwrap();
        assert_eq!(q.format, QuantFormat::Kallisto);
        assert_eq!(q.abundance, vec![3.5]);
        assert_eq!(q.counts, vec![12.0]);
    }

    #[test]
    fn test_bad_quant_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quant.sf");
        std::fs::write(&path, "a\tb\n1\t2\n").unwrap();
        assert!(read_quant(&path).is_err(), "unknown header");
        std::fs::write(&path, "Name\tLength\tEffectiveLength\tTPM\tNumReads\nT1\t10\t5\t-1\t2\n").unwrap();
        assert!(read_quant(&path).is_err(), "negative TPM");
    }
}
