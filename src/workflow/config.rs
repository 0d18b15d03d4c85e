//! JSON workflow configuration

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compare::ReferenceColumns;
use crate::dispersion::TrendFitMethod;
use crate::error::{AnalysisError, Result};
use crate::io::tables::read_text;
use crate::io::Contrast;
use crate::normalization::SizeFactorMethod;
use crate::pca::PcaParams;
use crate::shrinkage::ShrinkageType;
use crate::testing::ResultsParams;
use crate::transform::VstParams;
use crate::tximport::TximportOptions;

/// A complete analysis: inputs, designs, contrasts and reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    pub output_dir: PathBuf,
    pub samples: SamplesConfig,
    pub input: InputConfig,
    /// Strip gene ID versions and disambiguate collisions
    #[serde(default = "default_true")]
    pub truncate_gene_ids: bool,
    /// Genes with a smaller total count are dropped before any analysis
    #[serde(default = "default_min_total_count")]
    pub min_total_count: f64,
    pub analyses: Vec<AnalysisConfig>,
    #[serde(default)]
    pub pca: Option<PcaConfig>,
    #[serde(default)]
    pub comparison: Option<ComparisonConfig>,
}

fn default_true() -> bool {
    true
}

fn default_min_total_count() -> f64 {
    10.0
}

fn default_top_genes() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplesConfig {
    pub path: PathBuf,
    /// Sample ID column; the first column when unset
    #[serde(default)]
    pub id_column: Option<String>,
    /// Keep only samples whose column value is listed
    #[serde(default)]
    pub filters: Vec<SampleFilter>,
    #[serde(default)]
    pub levels: Vec<LevelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFilter {
    pub column: String,
    pub keep: Vec<String>,
}

/// Reference level or full level order for a factor column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    pub column: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub order: Option<Vec<String>>,
}

/// Where the counts come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputConfig {
    /// Per-sample salmon or kallisto files summarized with a tx2gene table
    Quantifications {
        dir: PathBuf,
        tx2gene: PathBuf,
        #[serde(default)]
        options: TximportOptions,
    },
    /// A gene x sample count table
    Counts { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Name of the output subdirectory
    pub name: String,
    pub design: String,
    /// Sample columns used as numeric covariates
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    pub contrasts: Vec<Contrast>,
    #[serde(default)]
    pub shrinkage: Option<ShrinkageType>,
    #[serde(default)]
    pub size_factor_method: SizeFactorMethod,
    #[serde(default)]
    pub fit_type: TrendFitMethod,
    #[serde(default)]
    pub results: ResultsParams,
    /// Number of top genes to draw counts plots for
    #[serde(default = "default_top_genes")]
    pub top_genes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    #[serde(flatten)]
    pub params: PcaParams,
    pub vst: VstParams,
    pub label_samples: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    pub path: PathBuf,
    /// Analysis whose results are compared; the first when unset
    #[serde(default)]
    pub analysis: Option<String>,
    /// Index of the contrast within that analysis
    #[serde(default)]
    pub contrast: usize,
    #[serde(default)]
    pub columns: ReferenceColumns,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_alpha() -> f64 {
    0.1
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = read_text(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(AnalysisError::ConfigError { reason });
        if self.analyses.is_empty() {
            return fail("at least one analysis is required".to_string());
        }
        let mut names = HashSet::new();
        for analysis in &self.analyses {
            if !names.insert(analysis.name.as_str()) {
                return fail(format!("analysis name '{}' is used twice", analysis.name));
            }
            if analysis.contrasts.is_empty() {
                return fail(format!("analysis '{}' has no contrasts", analysis.name));
            }
        }
        for level in &self.samples.levels {
            if level.reference.is_some() == level.order.is_some() {
                return fail(format!(
                    "levels for '{}' need exactly one of 'reference' or 'order'",
                    level.column
                ));
            }
        }
        if let Some(cmp) = &self.comparison {
            let analysis = match &cmp.analysis {
                Some(name) => self.analyses.iter().find(|a| &a.name == name),
                None => self.analyses.first(),
            };
            match analysis {
                None => return fail("the comparison names an unknown analysis".to_string()),
                Some(a) if cmp.contrast >= a.contrasts.len() => {
                    return fail(format!(
                        "analysis '{}' has {} contrasts; comparison asks for index {}",
                        a.name,
                        a.contrasts.len(),
                        cmp.contrast
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "output_dir": "out",
        "samples": {
            "path": "samples.tsv",
            "id_column": "Run",
            "filters": [{ "column": "disease", "keep": ["healthy", "sick"] }],
            "levels": [{ "column": "treatment", "reference": "vehicle" }]
        },
        "input": { "type": "quantifications", "dir": "quants", "tx2gene": "tx2gene.tsv",
                   "options": { "ignore_tx_version": true } },
        "analyses": [
            {
                "name": "treatment",
                "design": "~ subject + treatment",
                "contrasts": ["treatment,drug,vehicle", { "variable": "treatment", "numerator": "drug", "denominator": "vehicle" }],
                "shrinkage": "apeglm",
                "results": { "alpha": 0.05 }
            }
        ],
        "pca": { "ntop": 300, "intgroup": ["treatment"], "vst": { "blind": true } },
        "comparison": { "path": "published.csv" }
    }"#;

    #[test]
    fn test_parse_config() {
        let config: WorkflowConfig = serde_json::from_str(CONFIG).unwrap();
        config.validate().unwrap();
        assert!(config.truncate_gene_ids);
        assert_eq!(config.min_total_count, 10.0);
        let analysis = &config.analyses[0];
        assert_eq!(analysis.shrinkage, Some(ShrinkageType::Apeglm));
        assert_eq!(analysis.results.alpha, 0.05);
        assert!(analysis.results.independent_filtering);
        assert_eq!(analysis.top_genes, 6);
        assert_eq!(analysis.contrasts[1], Contrast::factor("treatment", "drug", "vehicle"));
        match &config.input {
            InputConfig::Quantifications { options, .. } => assert!(options.ignore_tx_version),
            other => panic!("unexpected input {:?}", other),
        }
        assert_eq!(config.pca.as_ref().unwrap().params.ntop, 300);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut config: WorkflowConfig = serde_json::from_str(CONFIG).unwrap();
        config.analyses[0].contrasts.clear();
        assert!(config.validate().is_err());

        let mut config: WorkflowConfig = serde_json::from_str(CONFIG).unwrap();
        config.comparison.as_mut().unwrap().contrast = 5;
        assert!(config.validate().is_err());

        let mut config: WorkflowConfig = serde_json::from_str(CONFIG).unwrap();
        config.samples.levels[0].order = Some(vec!["vehicle".into(), "drug".into()]);
        assert!(config.validate().is_err());
    }
}
