//! Import of transcript-level quantifications and summarization to genes
//!
//! Produces the three gene x sample matrices the rest of the workflow
//! needs: estimated counts, abundance (TPM) and average transcript length.
//! The length matrix later becomes a per-gene normalization offset, which
//! corrects for differential isoform usage between samples.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::strip_version;
use crate::error::{AnalysisError, Result};
use crate::io::{read_quant, QuantTable};

/// How gene-level counts are derived from the quantifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountsFromAbundance {
    /// Estimated counts as reported; lengths are kept as offsets
    #[default]
    No,
    /// TPM scaled up to the library size
    #[serde(rename = "scaledTPM")]
    ScaledTpm,
    /// TPM scaled by average transcript length, then to the library size
    #[serde(rename = "lengthScaledTPM")]
    LengthScaledTpm,
}

impl FromStr for CountsFromAbundance {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "no" => Ok(Self::No),
            "scaledtpm" => Ok(Self::ScaledTpm),
            "lengthscaledtpm" => Ok(Self::LengthScaledTpm),
            _ => Err(AnalysisError::InvalidParameter {
                reason: format!(
                    "unknown counts-from-abundance mode '{}' (no, scaledTPM, lengthScaledTPM)",
                    s
                ),
            }),
        }
    }
}

/// Options controlling transcript ID matching and count derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TximportOptions {
    /// Drop `.N` version suffixes from transcript IDs on both sides
    pub ignore_tx_version: bool,
    /// Cut transcript IDs at the first '|' (GENCODE FASTA headers)
    pub ignore_after_bar: bool,
    pub counts_from_abundance: CountsFromAbundance,
}

impl Default for TximportOptions {
    fn default() -> Self {
        Self {
            ignore_tx_version: false,
            ignore_after_bar: false,
            counts_from_abundance: CountsFromAbundance::No,
        }
    }
}

impl TximportOptions {
    fn clean_tx_id<'a>(&self, id: &'a str) -> &'a str {
        let id = if self.ignore_after_bar {
            id.split('|').next().unwrap_or(id)
        } else {
            id
        };
        if self.ignore_tx_version {
            strip_version(id)
        } else {
            id
        }
    }
}

/// Feature x sample matrices produced by an import
#[derive(Debug, Clone)]
pub struct TxImport {
    /// Gene IDs (or transcript IDs for a transcript-level import)
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub abundance: Array2<f64>,
    pub counts: Array2<f64>,
    pub length: Array2<f64>,
    pub counts_from_abundance: CountsFromAbundance,
}

impl TxImport {
    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }
}

fn read_all(files: &[PathBuf], sample_ids: &[String]) -> Result<Vec<QuantTable>> {
    if files.len() != sample_ids.len() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} quantification files", sample_ids.len()),
            actual: format!("{} files", files.len()),
        });
    }
    if files.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: "no quantification files given".to_string(),
        });
    }
    let tables: Vec<QuantTable> = files.par_iter().map(read_quant).collect::<Result<_>>()?;

    let first = &tables[0];
    for (table, path) in tables.iter().zip(files).skip(1) {
        if table.names != first.names {
            return Err(AnalysisError::InvalidQuantification {
                path: path.display().to_string(),
                reason: format!(
                    "transcripts differ from {}; all samples must be quantified against the same index",
                    files[0].display()
                ),
            });
        }
    }
    log::info!(
        "Read {} samples with {} transcripts each",
        tables.len(),
        first.n_transcripts()
    );
    Ok(tables)
}

/// Transcript-level matrices without gene summarization
pub fn transcript_level(files: &[PathBuf], sample_ids: &[String], options: &TximportOptions) -> Result<TxImport> {
    let tables = read_all(files, sample_ids)?;
    let n_tx = tables[0].n_transcripts();
    let n_samples = tables.len();

    let mut abundance = Array2::zeros((n_tx, n_samples));
    let mut counts = Array2::zeros((n_tx, n_samples));
    let mut length = Array2::zeros((n_tx, n_samples));
    for (j, t) in tables.iter().enumerate() {
        for i in 0..n_tx {
            abundance[[i, j]] = t.abundance[i];
            counts[[i, j]] = t.counts[i];
            length[[i, j]] = t.effective_length[i];
        }
    }
    if options.counts_from_abundance != CountsFromAbundance::No {
        counts = counts_from_abundance(&counts, &abundance, &length, options.counts_from_abundance);
    }

    Ok(TxImport {
        feature_ids: tables[0]
            .names
            .iter()
            .map(|n| options.clean_tx_id(n).to_string())
            .collect(),
        sample_ids: sample_ids.to_vec(),
        abundance,
        counts,
        length,
        counts_from_abundance: options.counts_from_abundance,
    })
}

/// Read quantifications and summarize them to gene level
pub fn import_quantifications(
    files: &[PathBuf],
    sample_ids: &[String],
    tx2gene: &[(String, String)],
    options: &TximportOptions,
) -> Result<TxImport> {
    let tx_options = TximportOptions {
        counts_from_abundance: CountsFromAbundance::No,
        ..options.clone()
    };
    let tx = transcript_level(files, sample_ids, &tx_options)?;
    summarize_to_gene(&tx, tx2gene, options)
}

/// Aggregate transcript matrices to genes
///
/// Abundance and counts are summed; length is the abundance-weighted mean
/// of effective lengths. Genes are returned in sorted order.
pub fn summarize_to_gene(
    tx: &TxImport,
    tx2gene: &[(String, String)],
    options: &TximportOptions,
) -> Result<TxImport> {
    let lookup: HashMap<&str, &str> = tx2gene
        .iter()
        .map(|(t, g)| (options.clean_tx_id(t), g.as_str()))
        .collect();

    let gene_of: Vec<Option<&str>> = tx
        .feature_ids
        .iter()
        .map(|t| lookup.get(options.clean_tx_id(t)).copied())
        .collect();
    let missing = gene_of.iter().filter(|g| g.is_none()).count();
    if missing == tx.n_features() {
        return Err(AnalysisError::Tx2GeneMismatch {
            reason: format!(
                "none of the transcripts in the quantification files (e.g. '{}') are in tx2gene; \
                 check ignore_tx_version",
                tx.feature_ids.first().map(String::as_str).unwrap_or("")
            ),
        });
    }
    if missing > 0 {
        log::warn!("transcripts missing from tx2gene: {} (dropped)", missing);
    }

    let mut genes: Vec<&str> = gene_of.iter().flatten().copied().collect();
    genes.sort_unstable();
    genes.dedup();
    let gene_index: HashMap<&str, usize> = genes.iter().enumerate().map(|(i, g)| (*g, i)).collect();

    let n_samples = tx.sample_ids.len();
    let n_genes = genes.len();
    let mut abundance = Array2::<f64>::zeros((n_genes, n_samples));
    let mut counts = Array2::<f64>::zeros((n_genes, n_samples));
    let mut weighted_length = Array2::<f64>::zeros((n_genes, n_samples));
    // per-gene sum of transcript mean lengths and transcript count, for all-zero genes
    let mut mean_length_sum = vec![0.0; n_genes];
    let mut n_tx = vec![0usize; n_genes];

    for (i, gene) in gene_of.iter().enumerate() {
        let Some(gene) = gene else { continue };
        let g = gene_index[gene];
        for j in 0..n_samples {
            abundance[[g, j]] += tx.abundance[[i, j]];
            counts[[g, j]] += tx.counts[[i, j]];
            weighted_length[[g, j]] += tx.abundance[[i, j]] * tx.length[[i, j]];
        }
        mean_length_sum[g] += tx.length.row(i).sum() / n_samples as f64;
        n_tx[g] += 1;
    }

    let mut length = Array2::<f64>::from_elem((n_genes, n_samples), f64::NAN);
    for g in 0..n_genes {
        for j in 0..n_samples {
            if abundance[[g, j]] > 0.0 {
                length[[g, j]] = weighted_length[[g, j]] / abundance[[g, j]];
            }
        }
    }
    replace_missing_length(&mut length, &mean_length_sum, &n_tx);

    if options.counts_from_abundance != CountsFromAbundance::No {
        counts = counts_from_abundance(&counts, &abundance, &length, options.counts_from_abundance);
    }
    log::info!("Summarized {} transcripts to {} genes", tx.n_features() - missing, n_genes);

    Ok(TxImport {
        feature_ids: genes.iter().map(|g| g.to_string()).collect(),
        sample_ids: tx.sample_ids.clone(),
        abundance,
        counts,
        length,
        counts_from_abundance: options.counts_from_abundance,
    })
}

/// Fill lengths of genes with zero abundance in a sample
///
/// Uses the geometric mean of the gene's lengths in other samples, or the
/// mean of its transcripts' average lengths when it is absent everywhere.
fn replace_missing_length(length: &mut Array2<f64>, mean_length_sum: &[f64], n_tx: &[usize]) {
    for (g, mut row) in length.rows_mut().into_iter().enumerate() {
        let logs: Vec<f64> = row.iter().filter(|v| v.is_finite()).map(|v| v.ln()).collect();
        let fill = if logs.is_empty() {
            mean_length_sum[g] / n_tx[g].max(1) as f64
        } else {
            (logs.iter().sum::<f64>() / logs.len() as f64).exp()
        };
        row.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = fill);
    }
}

/// Counts regenerated from abundance, scaled to the original library sizes
fn counts_from_abundance(
    counts: &Array2<f64>,
    abundance: &Array2<f64>,
    length: &Array2<f64>,
    mode: CountsFromAbundance,
) -> Array2<f64> {
    let mut new_counts = abundance.clone();
    if mode == CountsFromAbundance::LengthScaledTpm {
        for (mut row, len_row) in new_counts.rows_mut().into_iter().zip(length.rows()) {
            let mean_len = len_row.mean().unwrap_or(0.0);
            row.mapv_inplace(|v| v * mean_len);
        }
    }
    for j in 0..counts.ncols() {
        let target = counts.column(j).sum();
        let current = new_counts.column(j).sum();
        let scale = if current > 0.0 { target / current } else { 0.0 };
        new_counts.column_mut(j).mapv_inplace(|v| v * scale);
    }
    new_counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_quant(dir: &std::path::Path, name: &str, rows: &[(&str, f64, f64, f64)]) -> PathBuf {
        let mut text = String::from("Name\tLength\tEffectiveLength\tTPM\tNumReads\n");
        for (tx, eff, tpm, reads) in rows {
            text.push_str(&format!("{}\t{}\t{}\t{}\t{}\n", tx, eff + 100.0, eff, tpm, reads));
        }
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn tx2gene() -> Vec<(String, String)> {
        vec![
            ("T1.1".into(), "GB".into()),
            ("T2.1".into(), "GB".into()),
            ("T3.2".into(), "GA".into()),
        ]
    }

    #[test]
    fn test_summarize_weighted_length_and_sums() {
        let dir = tempdir().unwrap();
        let f1 = write_quant(dir.path(), "a.sf", &[("T1.1", 1000.0, 30.0, 300.0), ("T2.1", 500.0, 10.0, 50.0), ("T3.2", 200.0, 0.0, 0.0), ("T9.1", 10.0, 1.0, 1.0)]);
        let f2 = write_quant(dir.path(), "b.sf", &[("T1.1", 1000.0, 10.0, 100.0), ("T2.1", 500.0, 30.0, 150.0), ("T3.2", 400.0, 5.0, 20.0), ("T9.1", 10.0, 1.0, 1.0)]);
        let txi = import_quantifications(
            &[f1, f2],
            &["a".into(), "b".into()],
            &tx2gene(),
            &TximportOptions::default(),
        )
        .unwrap();

        assert_eq!(txi.feature_ids, vec!["GA", "GB"], "genes are sorted");
        assert_eq!(txi.counts[[1, 0]], 350.0);
        assert_eq!(txi.abundance[[1, 1]], 40.0);
        // (30 * 1000 + 10 * 500) / 40 = 875
        assert!((txi.length[[1, 0]] - 875.0).abs() < 1e-9);
        // GA has no abundance in sample a: filled from sample b
        assert!((txi.length[[0, 0]] - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_version_matching_and_missing() {
        let dir = tempdir().unwrap();
        let f1 = write_quant(dir.path(), "a.sf", &[("T1.7", 100.0, 1.0, 1.0)]);
        let strict = import_quantifications(&[f1.clone()], &["a".into()], &tx2gene(), &TximportOptions::default());
        assert!(strict.is_err(), "versions differ and are not ignored");

        let opts = TximportOptions {
            ignore_tx_version: true,
            ..Default::default()
        };
        let txi = import_quantifications(&[f1], &["a".into()], &tx2gene(), &opts).unwrap();
        assert_eq!(txi.feature_ids, vec!["GB"]);
    }

    #[test]
    fn test_mismatched_transcripts_rejected() {
        let dir = tempdir().unwrap();
        let f1 = write_quant(dir.path(), "a.sf", &[("T1.1", 100.0, 1.0, 1.0)]);
        let f2 = write_quant(dir.path(), "b.sf", &[("T2.1", 100.0, 1.0, 1.0)]);
        let result = import_quantifications(&[f1, f2], &["a".into(), "b".into()], &tx2gene(), &TximportOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_length_scaled_tpm_preserves_library_size() {
        let dir = tempdir().unwrap();
        let f1 = write_quant(dir.path(), "a.sf", &[("T1.1", 1000.0, 30.0, 300.0), ("T3.2", 200.0, 10.0, 20.0)]);
        let f2 = write_quant(dir.path(), "b.sf", &[("T1.1", 1000.0, 10.0, 100.0), ("T3.2", 400.0, 5.0, 20.0)]);
        let opts = TximportOptions {
            counts_from_abundance: CountsFromAbundance::LengthScaledTpm,
            ..Default::default()
        };
        let txi = import_quantifications(&[f1, f2], &["a".into(), "b".into()], &tx2gene(), &opts).unwrap();
        assert!((txi.counts.column(0).sum() - 320.0).abs() < 1e-9);
        assert!((txi.counts.column(1).sum() - 120.0).abs() < 1e-9);
        assert_eq!("lengthScaledTPM".parse::<CountsFromAbundance>().unwrap(), opts.counts_from_abundance);
    }
}
