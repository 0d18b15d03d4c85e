//! Agreement between a results table and a precomputed reference table

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::strip_version;
use crate::error::{AnalysisError, Result};
use crate::io::tables::{parse_value, read_text, table_reader};
use crate::io::DeResults;
use crate::stats::{pearson, spearman};

const LFC_NAMES: [&str; 4] = ["log2FoldChange", "logFC", "log2FC", "lfc"];
const PADJ_NAMES: [&str; 4] = ["padj", "FDR", "adj.P.Val", "qvalue"];

/// Where to find the columns of the reference table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceColumns {
    /// Gene ID column; the first column when unset
    pub id_column: Option<String>,
    /// Log2 fold change column; common names are tried when unset
    pub lfc_column: Option<String>,
    /// Adjusted p-value column; common names are tried when unset
    pub padj_column: Option<String>,
}

/// Gene IDs with log2 fold changes and adjusted p-values
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    pub ids: Vec<String>,
    pub log2_fold_changes: Vec<f64>,
    pub padj: Vec<f64>,
}

fn find_column(header: &[String], requested: Option<&str>, candidates: &[&str]) -> Result<usize> {
    let names: Vec<&str> = match requested {
        Some(name) => vec![name],
        None => candidates.to_vec(),
    };
    names
        .iter()
        .find_map(|name| header.iter().position(|h| h.eq_ignore_ascii_case(name)))
        .ok_or_else(|| AnalysisError::InvalidParameter {
            reason: format!("none of the columns {:?} is in the reference table ({})", names, header.join(", ")),
        })
}

pub fn read_reference_table<P: AsRef<Path>>(path: P, columns: &ReferenceColumns) -> Result<ReferenceTable> {
    let text = read_text(path.as_ref())?;
    let mut reader = table_reader(&text, true);
    let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let id_col = match &columns.id_column {
        Some(name) => find_column(&header, Some(name), &[])?,
        None => 0,
    };
    let lfc_col = find_column(&header, columns.lfc_column.as_deref(), &LFC_NAMES)?;
    let padj_col = find_column(&header, columns.padj_column.as_deref(), &PADJ_NAMES)?;

    let mut table = ReferenceTable {
        ids: Vec::new(),
        log2_fold_changes: Vec::new(),
        padj: Vec::new(),
    };
    for record in reader.records() {
        let record = record?;
        let cell = |k: usize| record.get(k).unwrap_or("");
        let parse = |k: usize| {
            parse_value(cell(k)).ok_or_else(|| AnalysisError::InvalidParameter {
                reason: format!("non-numeric value '{}' in column '{}' of the reference table", cell(k), header[k]),
            })
        };
        table.ids.push(cell(id_col).to_string());
        table.log2_fold_changes.push(parse(lfc_col)?);
        table.padj.push(parse(padj_col)?);
    }
    log::info!("read {} genes from {}", table.ids.len(), path.as_ref().display());
    Ok(table)
}

/// One gene present in both tables
#[derive(Debug, Clone)]
pub struct SharedGene {
    pub id: String,
    pub ours: f64,
    pub reference: f64,
    pub significant_ours: bool,
    pub significant_reference: bool,
}

#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub alpha: f64,
    pub shared: Vec<SharedGene>,
    pub significant_ours: usize,
    pub significant_reference: usize,
    pub overlap: usize,
    pub jaccard: f64,
    /// Genes significant in both tables with the same LFC sign
    pub concordant: usize,
    pub pearson: f64,
    pub spearman: f64,
}

impl From<&DeResults> for ReferenceTable {
    fn from(results: &DeResults) -> Self {
        Self {
            ids: results.gene_ids.clone(),
            log2_fold_changes: results.log2_fold_changes.clone(),
            padj: results.padj.clone(),
        }
    }
}

/// Compare a results table against a reference
pub fn compare_results(ours: &DeResults, reference: &ReferenceTable, alpha: f64) -> Result<ComparisonReport> {
    compare_tables(&ReferenceTable::from(ours), reference, alpha)
}

/// Join on version-stripped IDs and summarize agreement
pub fn compare_tables(ours: &ReferenceTable, reference: &ReferenceTable, alpha: f64) -> Result<ComparisonReport> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(reference.ids.len());
    let mut duplicates = Vec::new();
    for (k, id) in reference.ids.iter().enumerate() {
        let key = strip_version(id);
        if index.contains_key(key) {
            duplicates.push(id.as_str());
        } else {
            index.insert(key, k);
        }
    }
    if !duplicates.is_empty() {
        log::warn!(
            "{} reference IDs repeat after removing versions; keeping the first row of each (e.g. {})",
            duplicates.len(),
            duplicates[0]
        );
    }
    let is_sig = |p: f64| p.is_finite() && p < alpha;

    let shared: Vec<SharedGene> = ours
        .ids
        .iter()
        .enumerate()
        .filter_map(|(i, id)| {
            index.get(strip_version(id)).map(|&k| SharedGene {
                id: id.clone(),
                ours: ours.log2_fold_changes[i],
                reference: reference.log2_fold_changes[k],
                significant_ours: is_sig(ours.padj[i]),
                significant_reference: is_sig(reference.padj[k]),
            })
        })
        .collect();
    if shared.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: "no gene IDs are shared with the reference table".to_string(),
        });
    }

    let significant_ours = shared.iter().filter(|g| g.significant_ours).count();
    let significant_reference = shared.iter().filter(|g| g.significant_reference).count();
    let both: Vec<&SharedGene> = shared
        .iter()
        .filter(|g| g.significant_ours && g.significant_reference)
        .collect();
    let union = significant_ours + significant_reference - both.len();
    let concordant = both.iter().filter(|g| g.ours.signum() == g.reference.signum()).count();

    let (x, y): (Vec<f64>, Vec<f64>) = shared
        .iter()
        .filter(|g| g.ours.is_finite() && g.reference.is_finite())
        .map(|g| (g.ours, g.reference))
        .unzip();

    Ok(ComparisonReport {
        alpha,
        significant_ours,
        significant_reference,
        overlap: both.len(),
        jaccard: if union > 0 { both.len() as f64 / union as f64 } else { f64::NAN },
        concordant,
        pearson: pearson(&x, &y),
        spearman: spearman(&x, &y),
        shared,
    })
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "shared genes            : {}", self.shared.len())?;
        writeln!(f, "significant (padj < {}) : ours {}, reference {}", self.alpha, self.significant_ours, self.significant_reference)?;
        writeln!(f, "overlap                 : {} (Jaccard {:.3})", self.overlap, self.jaccard)?;
        writeln!(f, "same direction          : {} of {}", self.concordant, self.overlap)?;
        writeln!(f, "LFC Pearson             : {:.4}", self.pearson)?;
        writeln!(f, "LFC Spearman            : {:.4}", self.spearman)
    }
}
