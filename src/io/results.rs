//! Differential expression results table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::tables::format_value;
use crate::error::{AnalysisError, Result};

/// Which comparison to report
///
/// In a workflow config a contrast is written as a string in the command
/// line form (`"treatment_drug_vs_vehicle"` or `"treatment,drug,vehicle"`),
/// a factor comparison (`{"variable": .., "numerator": .., "denominator": ..}`),
/// coefficient lists (`{"numerator": [..], "denominator": [..]}`) or a
/// numeric vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, try_from = "ContrastRepr")]
pub enum Contrast {
    Coefficient(String),
    Factor {
        variable: String,
        numerator: String,
        denominator: String,
    },
    List {
        numerator: Vec<String>,
        #[serde(default)]
        denominator: Vec<String>,
    },
    Numeric(Vec<f64>),
}

/// Serialized forms of a contrast; strings go through `FromStr`
#[derive(Deserialize)]
#[serde(untagged)]
enum ContrastRepr {
    Text(String),
    Factor {
        variable: String,
        numerator: String,
        denominator: String,
    },
    List {
        numerator: Vec<String>,
        #[serde(default)]
        denominator: Vec<String>,
    },
    Numeric(Vec<f64>),
}

impl TryFrom<ContrastRepr> for Contrast {
    type Error = AnalysisError;

    fn try_from(repr: ContrastRepr) -> Result<Self> {
        Ok(match repr {
            ContrastRepr::Text(s) => s.parse()?,
            ContrastRepr::Factor {
                variable,
                numerator,
                denominator,
            } => Contrast::Factor {
                variable,
                numerator,
                denominator,
            },
            ContrastRepr::List { numerator, denominator } => Contrast::List { numerator, denominator },
            ContrastRepr::Numeric(v) => Contrast::Numeric(v),
        })
    }
}

impl Contrast {
    pub fn factor(variable: &str, numerator: &str, denominator: &str) -> Self {
        Contrast::Factor {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    /// Short name usable in file names
    pub fn slug(&self) -> String {
        let raw = match self {
            Contrast::Coefficient(name) => name.clone(),
            Contrast::Factor {
                variable,
                numerator,
                denominator,
            } => format!("{}_{}_vs_{}", variable, numerator, denominator),
            Contrast::List { numerator, denominator } => {
                format!("{}_vs_{}", numerator.join("+"), denominator.join("+"))
            }
            Contrast::Numeric(v) => format!(
                "numeric_{}",
                v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join("_")
            ),
        };
        raw.chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }
}

impl FromStr for Contrast {
    type Err = AnalysisError;

    /// `variable,numerator,denominator` or a coefficient name
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Contrast::Coefficient(name.to_string())),
            [variable, numerator, denominator] => Ok(Contrast::factor(variable, numerator, denominator)),
            _ => Err(AnalysisError::InvalidContrast {
                reason: format!(
                    "'{}' should be VARIABLE,NUMERATOR,DENOMINATOR or a coefficient name",
                    s
                ),
            }),
        }
    }
}

impl fmt::Display for Contrast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contrast::Coefficient(name) => write!(f, "{}", name),
            Contrast::Factor {
                variable,
                numerator,
                denominator,
            } => write!(f, "{} {} vs {}", variable, numerator, denominator),
            Contrast::List { numerator, denominator } => {
                write!(f, "{} vs {}", numerator.join(" + "), denominator.join(" + "))
            }
            Contrast::Numeric(v) => write!(f, "{:?}", v),
        }
    }
}

/// Per-gene results for one contrast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts over all samples
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
    /// Final dispersion used for the fit
    pub dispersions: Vec<f64>,
    /// Present after apeglm shrinkage
    pub svalues: Option<Vec<f64>>,
    pub contrast: Contrast,
    /// Human-readable description, e.g. "log2 fold change (MLE): treatment drug vs vehicle"
    pub description: String,
    /// Mean-count threshold chosen by independent filtering
    pub filter_threshold: Option<f64>,
    /// Significance level used for filtering
    pub alpha: f64,
}

impl DeResults {
    pub fn new(gene_ids: Vec<String>, contrast: Contrast, alpha: f64) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            svalues: None,
            description: contrast.to_string(),
            contrast,
            filter_threshold: None,
            alpha,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Gene indices with padj below alpha
    pub fn significant(&self, alpha: f64) -> Vec<usize> {
        (0..self.n_genes())
            .filter(|&i| self.padj[i].is_finite() && self.padj[i] < alpha)
            .collect()
    }

    /// Gene indices ordered by adjusted p-value, NA last, ties by p-value
    pub fn ordered_by_padj(&self) -> Vec<usize> {
        let key = |v: f64| if v.is_nan() { f64::INFINITY } else { v };
        let mut order: Vec<usize> = (0..self.n_genes()).collect();
        order.sort_by(|&a, &b| {
            key(self.padj[a])
                .partial_cmp(&key(self.padj[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    key(self.pvalues[a])
                        .partial_cmp(&key(self.pvalues[b]))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        order
    }

    /// Top `n` significant genes by adjusted p-value
    pub fn top(&self, n: usize) -> Vec<usize> {
        self.ordered_by_padj()
            .into_iter()
            .filter(|&i| self.padj[i].is_finite() && self.padj[i] < self.alpha)
            .take(n)
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        let nonzero = self.base_means.iter().filter(|&&m| m > 0.0).count();
        let sig = self.significant(alpha);
        let up = sig.iter().filter(|&&i| self.log2_fold_changes[i] > 0.0).count();
        let down = sig.iter().filter(|&&i| self.log2_fold_changes[i] < 0.0).count();
        let outliers = (0..self.n_genes())
            .filter(|&i| self.base_means[i] > 0.0 && self.pvalues[i].is_nan())
            .count();
        let low_counts = (0..self.n_genes())
            .filter(|&i| !self.pvalues[i].is_nan() && self.padj[i].is_nan())
            .count();
        ResultsSummary {
            description: self.description.clone(),
            nonzero,
            alpha,
            up,
            down,
            outliers,
            low_counts,
            mean_count_threshold: self.filter_threshold.map(|t| t.round()).unwrap_or(0.0),
        }
    }
}

/// Counts reported by `summary()` on a results table
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub description: String,
    pub nonzero: usize,
    pub alpha: f64,
    pub up: usize,
    pub down: usize,
    pub outliers: usize,
    pub low_counts: usize,
    pub mean_count_threshold: f64,
}

/// Percentage to two significant digits
fn pct(part: usize, total: usize) -> String {
    if total == 0 || part == 0 {
        return "0%".to_string();
    }
    let p = 100.0 * part as f64 / total as f64;
    let digits = (1 - p.log10().floor() as i32).max(0) as usize;
    let scale = 10f64.powi(digits as i32);
    format!("{}%", (p * scale).round() / scale)
}

impl fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.description)?;
        writeln!(f, "out of {} with nonzero total read count", self.nonzero)?;
        writeln!(f, "adjusted p-value < {}", self.alpha)?;
        writeln!(f, "LFC > 0 (up)       : {}, {}", self.up, pct(self.up, self.nonzero))?;
        writeln!(f, "LFC < 0 (down)     : {}, {}", self.down, pct(self.down, self.nonzero))?;
        writeln!(f, "outliers [1]       : {}, {}", self.outliers, pct(self.outliers, self.nonzero))?;
        writeln!(f, "low counts [2]     : {}, {}", self.low_counts, pct(self.low_counts, self.nonzero))?;
        writeln!(f, "(mean count < {})", self.mean_count_threshold)?;
        writeln!(f, "[1] Cook's distance outliers and genes without a test")?;
        writeln!(f, "[2] removed by independent filtering")
    }
}

/// Write a results table as TSV, rows in the given order
pub fn write_results<P: AsRef<Path>>(path: P, results: &DeResults, order: &[usize]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    let mut header = vec!["gene_id", "baseMean", "log2FoldChange", "lfcSE", "stat", "pvalue", "padj"];
    if results.svalues.is_some() {
        header.push("svalue");
    }
    writer.write_record(&header)?;

    for &i in order {
        let mut record = vec![
            results.gene_ids[i].clone(),
            format_value(results.base_means[i]),
            format_value(results.log2_fold_changes[i]),
            format_value(results.lfc_se[i]),
            format_value(results.stat[i]),
            format_value(results.pvalues[i]),
            format_value(results.padj[i]),
        ];
        if let Some(s) = &results.svalues {
            record.push(format_value(s[i]));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn results() -> DeResults {
        let mut r = DeResults::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            Contrast::factor("treatment", "drug", "vehicle"),
            0.1,
        );
        r.base_means = vec![10.0, 50.0, 0.0, 2.0];
        r.log2_fold_changes = vec![1.0, -2.0, f64::NAN, 0.5];
        r.pvalues = vec![0.01, 0.001, f64::NAN, 0.5];
        r.padj = vec![0.02, 0.004, f64::NAN, f64::NAN];
        r.filter_threshold = Some(2.4);
        r
    }

    #[test]
    fn test_summary_counts() {
        let s = results().summary(0.1);
        assert_eq!(s.nonzero, 3);
        assert_eq!((s.up, s.down), (1, 1));
        assert_eq!(s.outliers, 0, "the all-zero gene is not an outlier");
        assert_eq!(s.low_counts, 1);
        let text = s.to_string();
        assert!(text.contains("LFC > 0 (up)       : 1, 33%"), "got:\n{}", text);
        assert!(text.contains("(mean count < 2)"));
    }

    #[test]
    fn test_ordering_puts_na_last() {
        let r = results();
        assert_eq!(r.ordered_by_padj(), vec![1, 0, 3, 2]);
        assert_eq!(r.top(5), vec![1, 0]);
    }

    #[test]
    fn test_contrast_parsing() {
        assert_eq!(
            "treatment,drug,vehicle".parse::<Contrast>().unwrap(),
            Contrast::factor("treatment", "drug", "vehicle")
        );
        assert_eq!(
            "Intercept".parse::<Contrast>().unwrap(),
            Contrast::Coefficient("Intercept".into())
        );
        assert!("a,b".parse::<Contrast>().is_err());

        let from_json: Contrast =
            serde_json::from_str(r#"{"variable":"t","numerator":"a","denominator":"b"}"#).unwrap();
        assert_eq!(from_json, Contrast::factor("t", "a", "b"));
        let list: Contrast = serde_json::from_str(r#"{"numerator":["x"]}"#).unwrap();
        assert!(matches!(list, Contrast::List { .. }));
        let text: Contrast = serde_json::from_str(r#""t,a,b""#).unwrap();
        assert_eq!(text, Contrast::factor("t", "a", "b"));
        assert!(serde_json::from_str::<Contrast>(r#""a,b""#).is_err());
    }

    #[test]
    fn test_write_results_with_na() {
        let file = NamedTempFile::new().unwrap();
        let r = results();
        write_results(file.path(), &r, &r.ordered_by_padj()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "gene_id\tbaseMean\tlog2FoldChange\tlfcSE\tstat\tpvalue\tpadj");
        assert!(lines[1].starts_with("b\t50\t-2\t"));
        assert!(lines[4].ends_with("NA\tNA"));
    }

    #[test]
    fn test_pct_two_significant_digits() {
        assert_eq!(pct(1, 3), "33%");
        assert_eq!(pct(84, 1000), "8.4%");
        assert_eq!(pct(0, 10), "0%");
    }
}
