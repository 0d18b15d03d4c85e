//! rnaseq_de command-line interface

use std::fs;
use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use rnaseq_de::cli::{Cli, Commands, CompareArgs, ImportArgs, SimulateArgs};
use rnaseq_de::compare::{compare_tables, read_reference_table, ReferenceColumns};
use rnaseq_de::io::{locate_quant_file, read_tx2gene, write_matrix};
use rnaseq_de::plots::{self, comparison_plot};
use rnaseq_de::prelude::*;
use rnaseq_de::session::SessionInfo;
use rnaseq_de::simulate::{make_example_dataset, ExampleParams};
use rnaseq_de::workflow::{run_workflow, WorkflowConfig, WorkflowSummary};

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    if cli.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
        {
            log::warn!("could not set the thread count to {}: {}", cli.threads, e);
        }
    }

    let result = match cli.command {
        Commands::Import(args) => run_import(&args),
        Commands::Run(args) => args.to_config().and_then(|config| run_config(&config)),
        Commands::Workflow { config } => WorkflowConfig::load(&config).and_then(|config| run_config(&config)),
        Commands::Compare(args) => run_compare(&args),
        Commands::SessionInfo => SessionInfo::collect(&serde_json::Value::Null).map(|info| print!("{}", info)),
        Commands::Simulate(args) => run_simulate(&args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_import(args: &ImportArgs) -> Result<()> {
    info!("Loading samples from: {}", args.samples.display());
    let samples = read_sample_table(&args.samples, args.id_column.as_deref())?;
    let files = samples
        .sample_ids()
        .iter()
        .map(|id| locate_quant_file(&args.quant_dir, id))
        .collect::<Result<Vec<_>>>()?;
    let tx2gene = read_tx2gene(&args.tx2gene)?;
    let txi = import_quantifications(&files, samples.sample_ids(), &tx2gene, &args.tximport_options())?;

    fs::create_dir_all(&args.output_dir)?;
    let out = &args.output_dir;
    write_matrix(out.join("counts.tsv"), "gene_id", &txi.feature_ids, &txi.sample_ids, &txi.counts)?;
    write_matrix(out.join("abundance.tsv"), "gene_id", &txi.feature_ids, &txi.sample_ids, &txi.abundance)?;
    write_matrix(out.join("length.tsv"), "gene_id", &txi.feature_ids, &txi.sample_ids, &txi.length)?;
    println!(
        "{} genes x {} samples written to {}",
        txi.n_features(),
        txi.sample_ids.len(),
        out.display()
    );
    Ok(())
}

fn run_config(config: &WorkflowConfig) -> Result<()> {
    let summary = run_workflow(config)?;
    print_summary(&summary, &config.output_dir);
    Ok(())
}

fn print_summary(summary: &WorkflowSummary, output_dir: &Path) {
    println!("{} genes x {} samples", summary.n_genes, summary.n_samples);
    for analysis in &summary.analyses {
        for contrast in &analysis.contrasts {
            println!();
            println!("[{}] {}", analysis.name, contrast.contrast);
            print!("{}", contrast.summary);
        }
    }
    if let Some(report) = &summary.comparison {
        println!();
        print!("{}", report);
    }
    println!();
    println!("Output written to {}", output_dir.display());
}

fn run_compare(args: &CompareArgs) -> Result<()> {
    let ours = read_reference_table(&args.ours, &ReferenceColumns::default())?;
    let reference = read_reference_table(&args.reference, &args.reference_columns())?;
    let report = compare_tables(&ours, &reference, args.alpha)?;
    print!("{}", report);
    if let Some(path) = &args.plot {
        let title = format!("{} vs {}", args.ours.display(), args.reference.display());
        plots::save(path, &comparison_plot(&report, &title)?)?;
        info!("Comparison plot written to: {}", path.display());
    }
    Ok(())
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let ex = make_example_dataset(&ExampleParams {
        n_genes: args.genes,
        n_samples: args.samples,
        beta_sd: args.beta_sd,
        seed: args.seed,
        ..Default::default()
    })?;
    fs::create_dir_all(&args.output_dir)?;
    let counts = ex.dds.counts();
    write_matrix(
        args.output_dir.join("counts.tsv"),
        "gene_id",
        counts.gene_ids(),
        counts.sample_ids(),
        &counts.counts().to_owned(),
    )?;

    let condition = ex.dds.samples().column("condition").unwrap_or_default();
    let mut table = String::from("sample\tcondition\n");
    for (id, level) in counts.sample_ids().iter().zip(condition) {
        table.push_str(&format!("{}\t{}\n", id, level));
    }
    rnaseq_de::io::tables::write_text(args.output_dir.join("samples.tsv"), &table)?;
    println!(
        "{} genes x {} samples written to {}",
        counts.n_genes(),
        counts.n_samples(),
        args.output_dir.display()
    );
    Ok(())
}
