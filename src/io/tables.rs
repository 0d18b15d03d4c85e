//! Delimited table helpers shared by the readers and writers
//!
//! Inputs may be plain text or gzip compressed (detected from the magic
//! bytes, not the extension) and tab or comma delimited (sniffed from the
//! header line).

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use ndarray::Array2;

use crate::data::CountMatrix;
use crate::error::{AnalysisError, Result};

/// Read a whole file as text, decompressing gzip transparently
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut raw = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut raw)?;
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut text = String::new();
        MultiGzDecoder::new(raw.as_slice()).read_to_string(&mut text)?;
        Ok(text)
    } else {
        String::from_utf8(raw).map_err(|e| {
            AnalysisError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

/// Tab if the first line contains one, otherwise comma
pub fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first.contains('\t') {
        b'\t'
    } else if first.contains(',') {
        b','
    } else {
        b'\t'
    }
}

/// CSV reader over in-memory text with the sniffed delimiter
pub fn table_reader(text: &str, has_headers: bool) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes())
}

/// Parse a numeric cell; `NA`, `NaN` and empty cells become NaN
pub fn parse_value(cell: &str) -> Option<f64> {
    match cell.trim() {
        "" | "NA" | "NaN" | "nan" | "NULL" => Some(f64::NAN),
        "Inf" | "inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// Format a value for output; NaN is written as `NA`
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else if v == 0.0 || (v.abs() >= 1e-4 && v.abs() < 1e9) {
        format!("{}", (v * 1e8).round() / 1e8)
    } else {
        format!("{:.6e}", v)
    }
}

/// Read a gene x sample count table (first column gene IDs, header of sample IDs)
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = table_reader(&text, true);
    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(AnalysisError::InvalidCountMatrix {
            reason: format!("{} needs a gene ID column and at least one sample", path.display()),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != header.len() {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: format!(
                    "row {} of {} has {} fields, expected {}",
                    line + 2,
                    path.display(),
                    record.len(),
                    header.len()
                ),
            });
        }
        gene_ids.push(record[0].to_string());
        for cell in record.iter().skip(1) {
            let v = parse_value(cell).ok_or_else(|| AnalysisError::InvalidCountMatrix {
                reason: format!("non-numeric count '{}' for gene '{}'", cell, &record[0]),
            })?;
            values.push(v);
        }
    }
    if gene_ids.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("{} has no genes", path.display()),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), values).map_err(|e| {
        AnalysisError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Write a matrix as TSV with row and column names
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    corner: &str,
    row_ids: &[String],
    col_ids: &[String],
    matrix: &Array2<f64>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(File::create(path)?));
    let mut header = vec![corner.to_string()];
    header.extend(col_ids.iter().cloned());
    writer.write_record(&header)?;
    for (i, id) in row_ids.iter().enumerate() {
        let mut record = vec![id.clone()];
        record.extend(matrix.row(i).iter().map(|&v| format_value(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write plain text (summaries, session info)
pub fn write_text<P: AsRef<Path>>(path: P, text: &str) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    f.write_all(text.as_bytes())?;
    f.flush()?;
    Ok(())
}
