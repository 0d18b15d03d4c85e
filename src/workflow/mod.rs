//! Config-driven end-to-end analysis
//!
//! One sample table and one count source feed any number of analyses. Each
//! analysis gets its own output directory with results tables, MA plots, a
//! dispersion plot and counts plots for its top genes. PCA, the comparison
//! against a reference table and the session info are written at the top of
//! the output directory.

pub mod config;

pub use config::{
    AnalysisConfig, ComparisonConfig, InputConfig, LevelConfig, PcaConfig, SampleFilter, SamplesConfig,
    WorkflowConfig,
};

use std::fs;
use std::path::{Path, PathBuf};

use crate::compare::{compare_results, read_reference_table, ComparisonReport};
use crate::data::{DeDataSet, SampleTable};
use crate::error::{AnalysisError, Result};
use crate::glm::DesignFormula;
use crate::io::tables::write_text;
use crate::io::{locate_quant_file, read_count_matrix, read_sample_table, read_tx2gene, write_results, Contrast, DeResults, ResultsSummary};
use crate::normalization::{estimate_size_factors, SizeFactorMethod};
use crate::pca::pca;
use crate::plots::{self, comparison_plot, counts_plot, dispersion_plot, ma_plot, pca_plot, MaPlotParams};
use crate::session::SessionInfo;
use crate::shrinkage::{lfc_shrink, ShrinkageType};
use crate::testing::results;
use crate::transform::vst;
use crate::tximport::import_quantifications;
use crate::{run_pipeline, PipelineParams};

/// Outcome of one contrast
#[derive(Debug, Clone)]
pub struct ContrastOutput {
    pub contrast: Contrast,
    pub summary: ResultsSummary,
    pub results_path: PathBuf,
    pub shrunk_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub name: String,
    pub output_dir: PathBuf,
    pub contrasts: Vec<ContrastOutput>,
}

/// What `run_workflow` produced
#[derive(Debug, Clone)]
pub struct WorkflowSummary {
    pub n_genes: usize,
    pub n_samples: usize,
    pub analyses: Vec<AnalysisOutput>,
    pub comparison: Option<ComparisonReport>,
}

/// Sample table after subsetting and releveling
pub fn load_samples(config: &SamplesConfig) -> Result<SampleTable> {
    let mut samples = read_sample_table(&config.path, config.id_column.as_deref())?;
    for filter in &config.filters {
        samples = samples.filter(&filter.column, &filter.keep)?;
        log::info!(
            "kept {} samples with {} in [{}]",
            samples.n_samples(),
            filter.column,
            filter.keep.join(", ")
        );
    }
    samples.drop_levels();
    for level in &config.levels {
        match (&level.reference, &level.order) {
            (Some(reference), _) => samples.relevel(&level.column, reference)?,
            (None, Some(order)) => samples.set_levels(&level.column, order)?,
            (None, None) => {}
        }
    }
    Ok(samples)
}

/// Gene-level dataset for the given samples, with IDs truncated and lowly
/// counted genes removed
pub fn load_dataset(config: &WorkflowConfig, samples: SampleTable) -> Result<DeDataSet> {
    let mut dds = match &config.input {
        InputConfig::Quantifications { dir, tx2gene, options } => {
            let files = samples
                .sample_ids()
                .iter()
                .map(|id| locate_quant_file(dir, id))
                .collect::<Result<Vec<_>>>()?;
            let tx2gene = read_tx2gene(tx2gene)?;
            let txi = import_quantifications(&files, samples.sample_ids(), &tx2gene, options)?;
            DeDataSet::from_tximport(&txi, samples)?
        }
        InputConfig::Counts { path } => {
            let counts = read_count_matrix(path)?.select_samples(samples.sample_ids())?;
            DeDataSet::new(counts, samples)?
        }
    };
    log::info!("{} genes, {} samples", dds.n_genes(), dds.n_samples());

    if config.truncate_gene_ids {
        dds.truncate_gene_versions()?;
    }
    if config.min_total_count > 0.0 {
        dds.filter_min_total(config.min_total_count)?;
    }
    if dds.n_genes() == 0 {
        return Err(AnalysisError::EmptyData {
            reason: format!("no gene has a total count of at least {}", config.min_total_count),
        });
    }
    Ok(dds)
}

/// Sample columns the counts plots group by
fn plot_groups(contrast: &Contrast, formula: &DesignFormula) -> Vec<String> {
    match contrast {
        Contrast::Factor { variable, .. } => vec![variable.clone()],
        _ => formula.last_variable().map(|v| vec![v.to_string()]).unwrap_or_default(),
    }
}

/// apeglm needs a single coefficient; other contrasts fall back to the normal prior
fn shrink(dds: &DeDataSet, res: &DeResults, kind: ShrinkageType) -> Result<(DeResults, ShrinkageType)> {
    match lfc_shrink(dds, res, kind) {
        Err(AnalysisError::InvalidContrast { reason }) if kind == ShrinkageType::Apeglm => {
            log::warn!("{}; using normal shrinkage for {}", reason, res.contrast);
            Ok((lfc_shrink(dds, res, ShrinkageType::Normal)?, ShrinkageType::Normal))
        }
        other => other.map(|shrunk| (shrunk, kind)),
    }
}

/// File-name-safe form of a gene ID
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

fn run_contrast(
    dds: &DeDataSet,
    analysis: &AnalysisConfig,
    contrast: &Contrast,
    dir: &Path,
) -> Result<(ContrastOutput, DeResults)> {
    let res = results(dds, contrast, &analysis.results)?;
    let slug = contrast.slug();
    let alpha = analysis.results.alpha;

    let results_path = dir.join(format!("results_{}.tsv", slug));
    write_results(&results_path, &res, &res.ordered_by_padj())?;
    let summary = res.summary(alpha);
    log::info!("{}: {}\n{}", analysis.name, contrast, summary);

    let ma = MaPlotParams { alpha, ..Default::default() };
    plots::save(dir.join(format!("ma_{}.svg", slug)), &ma_plot(&res, &ma)?)?;

    let mut shrunk_path = None;
    if let Some(kind) = analysis.shrinkage {
        let (shrunk, used) = shrink(dds, &res, kind)?;
        let path = dir.join(format!("results_{}_{}.tsv", slug, used));
        write_results(&path, &shrunk, &shrunk.ordered_by_padj())?;
        plots::save(dir.join(format!("ma_{}_{}.svg", slug, used)), &ma_plot(&shrunk, &ma)?)?;
        shrunk_path = Some(path);
    }

    let formula = dds.formula().cloned().unwrap_or_else(DesignFormula::intercept_only);
    let groups = plot_groups(contrast, &formula);
    if !groups.is_empty() {
        for i in res.top(analysis.top_genes) {
            let gene = &res.gene_ids[i];
            let doc = counts_plot(dds, gene, &groups)?;
            plots::save(dir.join(format!("counts_{}_{}.svg", slug, file_stem(gene))), &doc)?;
        }
    }

    let output = ContrastOutput {
        contrast: contrast.clone(),
        summary,
        results_path,
        shrunk_path,
    };
    Ok((output, res))
}

/// Fit one design and write its reports
///
/// Returns the fitted dataset and the results of every contrast.
pub fn run_analysis(
    base: &DeDataSet,
    analysis: &AnalysisConfig,
    output_dir: &Path,
) -> Result<(AnalysisOutput, DeDataSet, Vec<DeResults>)> {
    let dir = output_dir.join(&analysis.name);
    fs::create_dir_all(&dir)?;
    log::info!("analysis '{}' with design {}", analysis.name, analysis.design);

    let mut dds = base.clone();
    dds.set_design(DesignFormula::parse(&analysis.design)?, &analysis.numeric_columns)?;
    let params = PipelineParams {
        size_factor_method: analysis.size_factor_method,
        fit_type: analysis.fit_type,
        ..Default::default()
    };
    run_pipeline(&mut dds, &params)?;

    let title = format!("{} ({})", analysis.name, analysis.design);
    plots::save(dir.join("dispersion.svg"), &dispersion_plot(&dds, &title)?)?;

    let mut contrasts = Vec::with_capacity(analysis.contrasts.len());
    let mut tables = Vec::with_capacity(analysis.contrasts.len());
    for contrast in &analysis.contrasts {
        let (output, res) = run_contrast(&dds, analysis, contrast, &dir)?;
        contrasts.push(output);
        tables.push(res);
    }

    let output = AnalysisOutput {
        name: analysis.name.clone(),
        output_dir: dir,
        contrasts,
    };
    Ok((output, dds, tables))
}

/// VST and PCA; a blind transform starts from the unfitted dataset
fn run_pca(
    config: &PcaConfig,
    base: &DeDataSet,
    fitted: &DeDataSet,
    method: SizeFactorMethod,
    output_dir: &Path,
) -> Result<()> {
    let transformed = if config.vst.blind {
        let mut dds = base.clone();
        if !dds.has_normalization() {
            estimate_size_factors(&mut dds, method)?;
        }
        vst(&dds, &config.vst)?
    } else {
        vst(fitted, &config.vst)?
    };
    transformed.write(output_dir.join("vst.tsv"))?;

    let result = pca(&transformed, base.samples(), &config.params)?;
    log::info!(
        "PC1 {:.1}%, PC2 {:.1}% of variance",
        100.0 * result.percent_var[0],
        100.0 * result.percent_var.get(1).copied().unwrap_or(0.0)
    );
    let title = format!("PCA of {} ({} genes)", transformed.description, result.n_genes_used);
    plots::save(output_dir.join("pca.svg"), &pca_plot(&result, &title, config.label_samples)?)
}

/// Run every step of a workflow config
pub fn run_workflow(config: &WorkflowConfig) -> Result<WorkflowSummary> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;

    let samples = load_samples(&config.samples)?;
    let base = load_dataset(config, samples)?;

    let mut analyses = Vec::with_capacity(config.analyses.len());
    let mut fitted = Vec::with_capacity(config.analyses.len());
    let mut tables = Vec::with_capacity(config.analyses.len());
    for analysis in &config.analyses {
        let (output, dds, res) = run_analysis(&base, analysis, &config.output_dir)?;
        analyses.push(output);
        fitted.push(dds);
        tables.push(res);
    }

    if let Some(pca_config) = &config.pca {
        run_pca(
            pca_config,
            &base,
            &fitted[0],
            config.analyses[0].size_factor_method,
            &config.output_dir,
        )?;
    }

    let mut comparison = None;
    if let Some(cmp) = &config.comparison {
        let k = match &cmp.analysis {
            Some(name) => config.analyses.iter().position(|a| &a.name == name).unwrap_or(0),
            None => 0,
        };
        let ours = &tables[k][cmp.contrast];
        let reference = read_reference_table(&cmp.path, &cmp.columns)?;
        let report = compare_results(ours, &reference, cmp.alpha)?;
        log::info!("comparison with {}\n{}", cmp.path.display(), report);
        write_text(config.output_dir.join("comparison.txt"), &report.to_string())?;
        let title = format!("{} vs {}", ours.contrast, cmp.path.display());
        plots::save(config.output_dir.join("comparison.svg"), &comparison_plot(&report, &title)?)?;
        comparison = Some(report);
    }

    SessionInfo::collect(config)?.write(config.output_dir.join("session_info.txt"))?;

    Ok(WorkflowSummary {
        n_genes: base.n_genes(),
        n_samples: base.n_samples(),
        analyses,
        comparison,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_matrix;
    use crate::simulate::{make_example_dataset, ExampleParams};
    use crate::tximport::CountsFromAbundance;
    use std::io::Write;

    /// Simulated counts, a sample table with a batch column and a reference
    /// table for three well-expressed genes in `dir`
    fn write_inputs(dir: &Path) {
        let ex = make_example_dataset(&ExampleParams {
            n_genes: 300,
            n_samples: 8,
            beta_sd: 1.0,
            ..Default::default()
        })
        .unwrap();
        let counts = ex.dds.counts();
        write_matrix(
            dir.join("counts.tsv"),
            "gene_id",
            counts.gene_ids(),
            counts.sample_ids(),
            &counts.counts().to_owned(),
        )
        .unwrap();

        let mut f = fs::File::create(dir.join("samples.tsv")).unwrap();
        writeln!(f, "run\tcondition\tbatch\tkeep").unwrap();
        let condition = ex.dds.samples().column("condition").unwrap();
        for (i, id) in counts.sample_ids().iter().enumerate() {
            let batch = if i % 2 == 0 { "b1" } else { "b2" };
            let keep = if i == 7 { "no" } else { "yes" };
            writeln!(f, "{}\t{}\t{}\t{}", id, condition[i], batch, keep).unwrap();
        }

        let mut f = fs::File::create(dir.join("reference.tsv")).unwrap();
        writeln!(f, "gene\tlog2FoldChange\tpadj").unwrap();
        let totals = counts.row_sums();
        let expressed = (0..counts.n_genes()).filter(|&i| totals[i] >= 200.0).take(3);
        for (k, i) in expressed.enumerate() {
            writeln!(f, "{}\t{}\t{}", counts.gene_ids()[i], ex.true_log2_fold_changes[i], 0.01 * (k + 1) as f64).unwrap();
        }
    }

    fn config_json(dir: &Path) -> String {
        format!(
            r#"{{
                "output_dir": "{out}",
                "samples": {{
                    "path": "{dir}/samples.tsv",
                    "id_column": "run",
                    "filters": [{{ "column": "keep", "keep": ["yes"] }}],
                    "levels": [{{ "column": "condition", "reference": "A" }}]
                }},
                "input": {{ "type": "counts", "path": "{dir}/counts.tsv" }},
                "analyses": [
                    {{
                        "name": "condition",
                        "design": "~ condition",
                        "contrasts": ["condition_B_vs_A"],
                        "shrinkage": "apeglm",
                        "top_genes": 2
                    }},
                    {{
                        "name": "batch",
                        "design": "~ batch + condition",
                        "contrasts": ["condition,B,A"],
                        "shrinkage": "apeglm"
                    }}
                ],
                "pca": {{ "ntop": 100, "vst": {{ "nsub": 100 }} }},
                "comparison": {{ "path": "{dir}/reference.tsv", "analysis": "condition" }}
            }}"#,
            out = dir.join("out").display(),
            dir = dir.display()
        )
    }

    #[test]
    fn test_load_samples_filters_and_relevels() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let config: WorkflowConfig = serde_json::from_str(&config_json(dir.path())).unwrap();
        let mut samples_config = config.samples.clone();
        samples_config.levels[0].reference = Some("B".into());
        let samples = load_samples(&samples_config).unwrap();
        assert_eq!(samples.n_samples(), 7);
        assert_eq!(samples.levels("condition").unwrap()[0], "B");
    }

    #[test]
    fn test_run_workflow_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let config_path = dir.path().join("workflow.json");
        fs::write(&config_path, config_json(dir.path())).unwrap();

        let config = WorkflowConfig::load(&config_path).unwrap();
        let summary = run_workflow(&config).unwrap();
        assert_eq!(summary.n_samples, 7);
        assert_eq!(summary.analyses.len(), 2);

        let out = dir.path().join("out");
        for file in [
            "condition/dispersion.svg",
            "condition/results_condition_B_vs_A.tsv",
            "condition/results_condition_B_vs_A_apeglm.tsv",
            "condition/ma_condition_B_vs_A.svg",
            "batch/results_condition_B_vs_A.tsv",
            "vst.tsv",
            "pca.svg",
            "comparison.txt",
            "comparison.svg",
            "session_info.txt",
        ] {
            assert!(out.join(file).is_file(), "{} was not written", file);
        }
        let shrunk = fs::read_to_string(out.join("condition/results_condition_B_vs_A_apeglm.tsv")).unwrap();
        assert!(shrunk.lines().next().unwrap().ends_with("svalue"));

        let report = summary.comparison.unwrap();
        assert_eq!(report.shared.len(), 3);
    }

    #[test]
    fn test_apeglm_falls_back_for_factor_contrasts() {
        let mut dds = make_example_dataset(&ExampleParams {
            n_genes: 100,
            n_samples: 6,
            ..Default::default()
        })
        .unwrap()
        .dds;
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();
        let res = results(&dds, &Contrast::factor("condition", "A", "B"), &Default::default()).unwrap();
        let (shrunk, used) = shrink(&dds, &res, ShrinkageType::Apeglm).unwrap();
        assert_eq!(used, ShrinkageType::Normal);
        assert!(shrunk.svalues.is_none());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("ENSG0001.2"), "ENSG0001.2");
        assert_eq!(file_stem("a/b c"), "a_b_c");
    }

    const TX_EFFECT_GENES: usize = 10;

    /// Salmon quant.sf files for 60 two-transcript genes and six samples;
    /// the first genes are three-fold up in condition B and transcript
    /// lengths drift across samples for two thirds of the genes
    fn write_salmon_inputs(dir: &Path) {
        let libs = [1.0, 1.3, 0.8, 1.1, 0.9, 1.2];
        let n_genes = 60;

        let mut f = fs::File::create(dir.join("tx2gene.tsv")).unwrap();
        writeln!(f, "transcript_id\tgene_id").unwrap();
        for g in 0..n_genes {
            for k in 0..2 {
                writeln!(f, "ENST{:05}.{}\tENSG{:05}.1", 2 * g + k, k + 1, g).unwrap();
            }
        }

        let mut f = fs::File::create(dir.join("samples.tsv")).unwrap();
        writeln!(f, "run\tcondition").unwrap();
        for j in 0..libs.len() {
            writeln!(f, "s{}\t{}", j + 1, if j < 3 { "A" } else { "B" }).unwrap();
        }

        for (j, lib) in libs.iter().enumerate() {
            let mut rows = Vec::new();
            for g in 0..n_genes {
                let base = 80.0 + 20.0 * (g % 15) as f64;
                let fold = if g < TX_EFFECT_GENES && j >= 3 { 3.0 } else { 1.0 };
                let noise = 1.0 + 0.05 * (((g * 7 + j * 3) % 5) as f64 - 2.0);
                for (k, frac) in [0.7, 0.3].iter().enumerate() {
                    let ref_len = if k == 0 { 1000.0 + 10.0 * g as f64 } else { 600.0 };
                    let eff = ref_len + 40.0 * (j * (g % 3)) as f64;
                    let reads = base * frac * lib * noise * fold * eff / ref_len;
                    rows.push((format!("ENST{:05}.{}", 2 * g + k, k + 1), eff, reads));
                }
            }
            let rate_sum: f64 = rows.iter().map(|(_, eff, reads)| reads / eff).sum();
            let sample_dir = dir.join("quants").join(format!("s{}", j + 1));
            fs::create_dir_all(&sample_dir).unwrap();
            let mut f = fs::File::create(sample_dir.join("quant.sf")).unwrap();
            writeln!(f, "Name\tLength\tEffectiveLength\tTPM\tNumReads").unwrap();
            for (name, eff, reads) in &rows {
                let tpm = reads / eff / rate_sum * 1e6;
                writeln!(f, "{}\t{}\t{}\t{}\t{}", name, eff + 100.0, eff, tpm, reads).unwrap();
            }
        }
    }

    fn salmon_config(dir: &Path) -> WorkflowConfig {
        let json = format!(
            r#"{{
                "output_dir": "{dir}/out",
                "samples": {{ "path": "{dir}/samples.tsv" }},
                "input": {{ "type": "quantifications", "dir": "{dir}/quants", "tx2gene": "{dir}/tx2gene.tsv" }},
                "analyses": [{{ "name": "condition", "design": "~ condition", "contrasts": ["condition,B,A"] }}]
            }}"#,
            dir = dir.display()
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_salmon_input_uses_length_offsets() {
        let dir = tempfile::tempdir().unwrap();
        write_salmon_inputs(dir.path());
        let config = salmon_config(dir.path());
        let samples = load_samples(&config.samples).unwrap();
        let mut dds = load_dataset(&config, samples).unwrap();
        assert_eq!(dds.n_genes(), 60);
        assert_eq!(dds.counts().gene_ids()[0], "ENSG00000");
        assert!(dds.avg_tx_length().is_some(), "estimated counts keep transcript lengths");

        dds.set_design(DesignFormula::parse("~ condition").unwrap(), &[]).unwrap();
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();

        let nf = dds.normalization_factors().expect("normalization factors from avgTxLength");
        assert_eq!(nf.dim(), (60, 6));
        // gene 0 has fixed lengths, gene 1 has lengths growing with the sample index
        let drift0 = nf[[0, 5]] / nf[[0, 0]];
        let drift1 = nf[[1, 5]] / nf[[1, 0]];
        assert!(
            drift1 / drift0 > 1.02,
            "length drift should reach the offsets: {} vs {}",
            drift1,
            drift0
        );

        let res = results(&dds, &Contrast::factor("condition", "B", "A"), &Default::default()).unwrap();
        let expected = 3f64.log2();
        for (i, lfc) in res.log2_fold_changes.iter().enumerate() {
            if i < TX_EFFECT_GENES {
                assert!((lfc - expected).abs() < 0.3, "gene {} lfc {} not near {}", i, lfc, expected);
            } else {
                assert!(lfc.abs() < 0.3, "gene {} lfc {} should be near zero", i, lfc);
            }
        }
    }

    #[test]
    fn test_scaled_tpm_input_uses_size_factors() {
        let dir = tempfile::tempdir().unwrap();
        write_salmon_inputs(dir.path());
        let mut config = salmon_config(dir.path());
        if let InputConfig::Quantifications { options, .. } = &mut config.input {
            options.counts_from_abundance = CountsFromAbundance::ScaledTpm;
        }
        let samples = load_samples(&config.samples).unwrap();
        let mut dds = load_dataset(&config, samples).unwrap();
        assert!(dds.avg_tx_length().is_none(), "scaled counts carry no length offsets");

        dds.set_design(DesignFormula::parse("~ condition").unwrap(), &[]).unwrap();
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();
        assert!(dds.normalization_factors().is_none());
        assert_eq!(dds.size_factors().map(|sf| sf.len()), Some(6));
    }
}
