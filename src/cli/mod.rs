//! Command-line interface for rnaseq_de

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::compare::ReferenceColumns;
use crate::dispersion::TrendFitMethod;
use crate::error::{AnalysisError, Result};
use crate::glm::DesignFormula;
use crate::io::Contrast;
use crate::normalization::SizeFactorMethod;
use crate::pca::PcaParams;
use crate::shrinkage::ShrinkageType;
use crate::testing::ResultsParams;
use crate::transform::VstParams;
use crate::tximport::{CountsFromAbundance, TximportOptions};
use crate::workflow::{
    AnalysisConfig, ComparisonConfig, InputConfig, LevelConfig, PcaConfig, SampleFilter, SamplesConfig,
    WorkflowConfig,
};

#[derive(Parser)]
#[command(name = "rnaseq_de")]
#[command(version)]
#[command(about = "RNA-seq differential expression from transcript quantifications")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Number of threads (0 = all available CPUs)
    #[arg(short = 't', long, default_value = "0", global = true)]
    pub threads: usize,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize per-sample quantifications to gene-level matrices
    #[command(
        long_about = "Summarize per-sample quantifications to gene-level matrices.\n\n\
            Reads one quant.sf (Salmon) or abundance.tsv (kallisto) file per sample,\n\
            optionally gzip-compressed, and sums transcripts to genes with a\n\
            transcript-to-gene table. Writes counts.tsv, abundance.tsv and length.tsv.",
        after_long_help = "\
Examples:
  rnaseq_de import -s samples.tsv --id-column run -q quants/ -g tx2gene.tsv -o gene_level/

  # Counts rescaled from TPM, GENCODE transcript IDs
  rnaseq_de import -s samples.tsv -q quants/ -g tx2gene.tsv -o gene_level/ \\
    --counts-from-abundance lengthScaledTPM --ignore-tx-version --ignore-after-bar"
    )]
    Import(ImportArgs),

    /// Fit one design and write results, shrunken results and plots
    #[command(
        long_about = "Fit one design and write results, shrunken results and plots.\n\n\
            Runs size factors, dispersion estimation, the negative binomial GLM and\n\
            Wald tests with Cook's and independent filtering for every contrast.",
        after_long_help = "\
Examples:
  rnaseq_de run -s samples.tsv --counts counts.tsv -d \"~ condition\" \\
    -c condition,treated,control -o results/

  # From quantifications, with a paired design and apeglm shrinkage
  rnaseq_de run -s samples.tsv --id-column run -q quants/ -g tx2gene.tsv \\
    -d \"~ subject + treatment\" --reference treatment=vehicle \\
    -c treatment_drug_vs_vehicle --shrinkage apeglm --pca -o results/"
    )]
    Run(RunArgs),

    /// Run a JSON workflow with several designs
    #[command(after_long_help = "\
Examples:
  rnaseq_de workflow analysis.json -v")]
    Workflow {
        /// Path to the workflow JSON file
        config: PathBuf,
    },

    /// Compare a results table with a reference table
    Compare(CompareArgs),

    /// Print crate, platform and dependency versions
    SessionInfo,

    /// Write a simulated two-condition count matrix and sample table
    Simulate(SimulateArgs),
}

#[derive(Args)]
pub struct ImportArgs {
    /// Sample table; its IDs name the quantification files
    #[arg(short, long)]
    pub samples: PathBuf,

    /// Sample ID column [default: first column]
    #[arg(long)]
    pub id_column: Option<String>,

    /// Directory with one quantification per sample
    #[arg(short, long)]
    pub quant_dir: PathBuf,

    /// Transcript-to-gene table
    #[arg(short = 'g', long)]
    pub tx2gene: PathBuf,

    /// no, scaledTPM or lengthScaledTPM
    #[arg(long, default_value = "no")]
    pub counts_from_abundance: CountsFromAbundance,

    /// Strip version suffixes from transcript IDs
    #[arg(long)]
    pub ignore_tx_version: bool,

    /// Cut transcript IDs at the first '|'
    #[arg(long)]
    pub ignore_after_bar: bool,

    /// Output directory
    #[arg(short, long, default_value = "gene_level")]
    pub output_dir: PathBuf,
}

impl ImportArgs {
    pub fn tximport_options(&self) -> TximportOptions {
        TximportOptions {
            ignore_tx_version: self.ignore_tx_version,
            ignore_after_bar: self.ignore_after_bar,
            counts_from_abundance: self.counts_from_abundance,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Sample table (TSV or CSV)
    #[arg(short, long)]
    pub samples: PathBuf,

    /// Sample ID column [default: first column]
    #[arg(long)]
    pub id_column: Option<String>,

    /// Keep samples whose column has one of the values (COLUMN=V1,V2)
    #[arg(long, value_name = "COLUMN=VALUES")]
    pub keep: Vec<String>,

    /// Gene x sample count table
    #[arg(long, conflicts_with_all = ["quant_dir", "tx2gene"], required_unless_present = "quant_dir")]
    pub counts: Option<PathBuf>,

    /// Directory with one quantification per sample
    #[arg(short, long, requires = "tx2gene")]
    pub quant_dir: Option<PathBuf>,

    /// Transcript-to-gene table
    #[arg(short = 'g', long)]
    pub tx2gene: Option<PathBuf>,

    #[arg(long)]
    pub ignore_tx_version: bool,

    /// Design formula, e.g. "~ batch + condition"
    #[arg(short, long)]
    pub design: String,

    /// Sample columns to treat as numeric covariates
    #[arg(long, value_name = "COLUMN")]
    pub numeric: Vec<String>,

    /// Reference level of a factor
    #[arg(long, value_name = "FACTOR=LEVEL")]
    pub reference: Vec<String>,

    /// VARIABLE,NUMERATOR,DENOMINATOR or a coefficient name; repeatable
    #[arg(short, long, required = true)]
    pub contrast: Vec<Contrast>,

    /// Shrink log2 fold changes with normal or apeglm
    #[arg(long)]
    pub shrinkage: Option<ShrinkageType>,

    /// ratio or poscounts
    #[arg(long, default_value = "ratio")]
    pub sf_type: SizeFactorMethod,

    /// parametric, local or mean
    #[arg(long, default_value = "parametric")]
    pub fit_type: TrendFitMethod,

    /// Target FDR
    #[arg(short, long, default_value = "0.1")]
    pub alpha: f64,

    /// Test |LFC| > threshold (log2 scale)
    #[arg(long, default_value = "0")]
    pub lfc_threshold: f64,

    #[arg(long)]
    pub no_independent_filtering: bool,

    /// Cook's distance cutoff; use a very large value to disable
    #[arg(long)]
    pub cooks_cutoff: Option<f64>,

    /// Drop genes with a smaller total count
    #[arg(long, default_value = "10")]
    pub min_count: f64,

    /// Keep gene ID version suffixes
    #[arg(long)]
    pub keep_gene_versions: bool,

    /// Number of top genes to draw counts plots for
    #[arg(long, default_value = "6")]
    pub top_genes: usize,

    /// Write a blind VST and a PCA plot
    #[arg(long)]
    pub pca: bool,

    /// Sample columns that color the PCA plot [default: last design variable]
    #[arg(long, value_name = "COLUMN")]
    pub intgroup: Vec<String>,

    /// Reference results table to compare the first contrast against
    #[arg(long)]
    pub compare: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "results")]
    pub output_dir: PathBuf,
}

/// Split `KEY=VALUE`
fn key_value<'a>(arg: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    arg.split_once('=')
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| AnalysisError::InvalidParameter {
            reason: format!("--{} expects KEY=VALUE, got '{}'", flag, arg),
        })
}

impl RunArgs {
    /// Single-analysis workflow equivalent to these flags
    pub fn to_config(&self) -> Result<WorkflowConfig> {
        let filters = self
            .keep
            .iter()
            .map(|arg| {
                let (column, values) = key_value(arg, "keep")?;
                Ok(SampleFilter {
                    column: column.to_string(),
                    keep: values.split(',').map(|v| v.trim().to_string()).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let levels = self
            .reference
            .iter()
            .map(|arg| {
                let (column, level) = key_value(arg, "reference")?;
                Ok(LevelConfig {
                    column: column.to_string(),
                    reference: Some(level.to_string()),
                    order: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let input = match (&self.counts, &self.quant_dir, &self.tx2gene) {
            (Some(path), _, _) => InputConfig::Counts { path: path.clone() },
            (None, Some(dir), Some(tx2gene)) => InputConfig::Quantifications {
                dir: dir.clone(),
                tx2gene: tx2gene.clone(),
                options: TximportOptions {
                    ignore_tx_version: self.ignore_tx_version,
                    ..Default::default()
                },
            },
            _ => {
                return Err(AnalysisError::ConfigError {
                    reason: "give either --counts or --quant-dir with --tx2gene".to_string(),
                })
            }
        };

        let formula = DesignFormula::parse(&self.design)?;
        let intgroup = if self.intgroup.is_empty() {
            formula.last_variable().map(|v| vec![v.to_string()]).unwrap_or_default()
        } else {
            self.intgroup.clone()
        };

        let config = WorkflowConfig {
            output_dir: self.output_dir.clone(),
            samples: SamplesConfig {
                path: self.samples.clone(),
                id_column: self.id_column.clone(),
                filters,
                levels,
            },
            input,
            truncate_gene_ids: !self.keep_gene_versions,
            min_total_count: self.min_count,
            analyses: vec![AnalysisConfig {
                name: "analysis".to_string(),
                design: self.design.clone(),
                numeric_columns: self.numeric.clone(),
                contrasts: self.contrast.clone(),
                shrinkage: self.shrinkage,
                size_factor_method: self.sf_type,
                fit_type: self.fit_type,
                results: ResultsParams {
                    alpha: self.alpha,
                    independent_filtering: !self.no_independent_filtering,
                    cooks_cutoff: self.cooks_cutoff,
                    lfc_threshold: self.lfc_threshold,
                    ..Default::default()
                },
                top_genes: self.top_genes,
            }],
            pca: self.pca.then(|| PcaConfig {
                params: PcaParams {
                    intgroup,
                    ..Default::default()
                },
                vst: VstParams::default(),
                label_samples: false,
            }),
            comparison: self.compare.as_ref().map(|path| ComparisonConfig {
                path: path.clone(),
                analysis: None,
                contrast: 0,
                columns: ReferenceColumns::default(),
                alpha: self.alpha,
            }),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
pub struct CompareArgs {
    /// Results table written by `run` or `workflow`
    #[arg(long)]
    pub ours: PathBuf,

    /// Reference results table
    #[arg(long)]
    pub reference: PathBuf,

    /// Gene ID column of the reference [default: first column]
    #[arg(long)]
    pub id_column: Option<String>,

    /// Log2 fold change column of the reference
    #[arg(long)]
    pub lfc_column: Option<String>,

    /// Adjusted p-value column of the reference
    #[arg(long)]
    pub padj_column: Option<String>,

    #[arg(short, long, default_value = "0.1")]
    pub alpha: f64,

    /// Write a scatter plot of both LFCs
    #[arg(long)]
    pub plot: Option<PathBuf>,
}

impl CompareArgs {
    pub fn reference_columns(&self) -> ReferenceColumns {
        ReferenceColumns {
            id_column: self.id_column.clone(),
            lfc_column: self.lfc_column.clone(),
            padj_column: self.padj_column.clone(),
        }
    }
}

#[derive(Args)]
pub struct SimulateArgs {
    #[arg(long, default_value = "1000")]
    pub genes: usize,

    #[arg(long, default_value = "12")]
    pub samples: usize,

    /// Standard deviation of the true log2 fold changes
    #[arg(long, default_value = "1.0")]
    pub beta_sd: f64,

    #[arg(long, default_value = "1")]
    pub seed: u32,

    /// Output directory
    #[arg(short, long, default_value = "simulated")]
    pub output_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_to_config() {
        let cli = Cli::try_parse_from([
            "rnaseq_de",
            "-vv",
            "run",
            "-s",
            "samples.tsv",
            "--counts",
            "counts.tsv",
            "-d",
            "~ subject + treatment",
            "--reference",
            "treatment=vehicle",
            "--keep",
            "disease=healthy,sick",
            "-c",
            "treatment,drug,vehicle",
            "-c",
            "treatment_drug_vs_vehicle",
            "--shrinkage",
            "apeglm",
            "--pca",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };
        let config = args.to_config().unwrap();
        let analysis = &config.analyses[0];
        assert_eq!(analysis.contrasts[0], Contrast::factor("treatment", "drug", "vehicle"));
        assert_eq!(analysis.contrasts[1], Contrast::Coefficient("treatment_drug_vs_vehicle".into()));
        assert_eq!(analysis.shrinkage, Some(ShrinkageType::Apeglm));
        assert_eq!(config.samples.filters[0].keep, vec!["healthy".to_string(), "sick".to_string()]);
        assert_eq!(config.samples.levels[0].reference.as_deref(), Some("vehicle"));
        assert_eq!(config.pca.unwrap().params.intgroup, vec!["treatment".to_string()]);
        assert!(matches!(config.input, InputConfig::Counts { .. }));
    }

    #[test]
    fn test_run_requires_an_input() {
        let parsed = Cli::try_parse_from(["rnaseq_de", "run", "-s", "s.tsv", "-d", "~ a", "-c", "a,x,y"]);
        assert!(parsed.is_err());
        let bad_reference = Cli::try_parse_from([
            "rnaseq_de", "run", "-s", "s.tsv", "--counts", "c.tsv", "-d", "~ a", "-c", "a,x,y", "--reference", "a",
        ])
        .unwrap();
        let Commands::Run(args) = bad_reference.command else {
            panic!("expected the run subcommand");
        };
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_import_options() {
        let cli = Cli::try_parse_from([
            "rnaseq_de",
            "import",
            "-s",
            "samples.tsv",
            "-q",
            "quants",
            "-g",
            "tx2gene.tsv",
            "--counts-from-abundance",
            "lengthScaledTPM",
            "--ignore-tx-version",
        ])
        .unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected the import subcommand");
        };
        let options = args.tximport_options();
        assert!(options.ignore_tx_version);
        assert_eq!(options.counts_from_abundance, CountsFromAbundance::LengthScaledTpm);
    }
}
