#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::Parser;
use netsvm::classifier::NetworkClassifier;
use netsvm::config::{ConfigLayer, LabelSourceConfig, RunConfig};
use netsvm::labels::{DirectoryLabels, LabelSource, OntologyLabels, eligible_terms};
use netsvm::matrix::AssociationMatrix;
use netsvm::orchestrate::{Orchestrator, worker_count};
use netsvm::output::{ResultWriter, write_summary};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;

/// Predicts which genes belong to each ontology term by training one linear SVM per
/// term on a gene-gene association network.
#[derive(Parser, Debug)]
#[command(name = "netsvm", version)]
struct Args {
    /// Association matrix (.dab, or .dat/.tsv/.txt edge list, optionally gzipped)
    #[arg(short = 'i', long = "input", value_name = "MATRIX")]
    input: Option<PathBuf>,

    /// Directory receiving one prediction file per term
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output: Option<PathBuf>,

    /// Gene sets in GMT format, attached to ontology terms by id (needs --obo)
    #[arg(short = 'g', long)]
    gmt: Option<PathBuf>,

    /// Ontology in OBO format
    #[arg(long)]
    obo: Option<PathBuf>,

    /// Slim term list; negatives become genes of unrelated slim terms
    #[arg(long)]
    slim: Option<PathBuf>,

    /// Directory with one label file per term (alternative to --gmt/--obo)
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,

    /// Score every gene of the matrix, not only the training genes
    #[arg(short = 'a', long)]
    all: bool,

    /// Worker threads; 0 uses every core [default: 12]
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Select the SVM cost by cross-validation
    #[arg(short = 'b', long)]
    best_params: bool,

    /// Minimum number of positives for a term to be trained [default: 5]
    #[arg(long)]
    min_pos: Option<usize>,

    /// Maximum number of positives for a term to be trained [default: 500]
    #[arg(long)]
    max_pos: Option<usize>,

    /// Cap on sampled negatives per term; 0 disables the cap [default: 1000]
    #[arg(long)]
    max_negatives: Option<usize>,

    /// Cross-validation folds [default: 5]
    #[arg(long)]
    folds: Option<usize>,

    /// Base random seed [default: 0]
    #[arg(long)]
    seed: Option<u64>,

    /// Value used for gene pairs absent from the matrix [default: 0]
    #[arg(long)]
    missing_value: Option<f64>,

    /// Write a per-term status table to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// TOML file with default settings; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            input: self.input.clone(),
            output: self.output.clone(),
            gmt: self.gmt.clone(),
            obo: self.obo.clone(),
            slim: self.slim.clone(),
            dir: self.dir.clone(),
            all: self.all.then_some(true),
            best_params: self.best_params.then_some(true),
            threads: self.threads,
            min_pos: self.min_pos,
            max_pos: self.max_pos,
            max_negatives: self.max_negatives,
            folds: self.folds,
            seed: self.seed,
            missing_value: self.missing_value,
            summary: self.summary.clone(),
            ..ConfigLayer::default()
        }
    }

    fn into_run_config(self) -> Result<RunConfig, Box<dyn Error>> {
        let cli = self.layer();
        let layer = match &self.config {
            Some(path) => cli.over(ConfigLayer::from_toml_file(path)?),
            None => cli,
        };
        Ok(layer.into_run_config()?)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        eprintln!("\nError: {err}");
        process::exit(1);
    }
}

fn load_labels(config: &RunConfig) -> Result<Box<dyn LabelSource>, Box<dyn Error>> {
    match &config.label_source {
        LabelSourceConfig::Ontology { gmt, obo, slim } => {
            eprintln!(
                "> Propagating {} over {}",
                gmt.display(),
                obo.display()
            );
            let labels: Box<dyn LabelSource> =
                Box::new(OntologyLabels::load(obo, gmt, slim.as_deref())?);
            Ok(labels)
        }
        LabelSourceConfig::Directory { dir } => {
            eprintln!("> Reading label files from {}", dir.display());
            let labels: Box<dyn LabelSource> = Box::new(DirectoryLabels::load(dir)?);
            Ok(labels)
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let overall_start_time = Instant::now();
    let config = args.into_run_config()?;

    // ========================================================================================
    //                              Phase 1: The association network
    // ========================================================================================
    eprintln!(
        "> Loading association matrix from {}",
        config.matrix_path.display()
    );
    let matrix = AssociationMatrix::open(&config.matrix_path, config.missing_value)?;
    eprintln!("> Matrix covers {} genes.", matrix.len());

    // ========================================================================================
    //                              Phase 2: Labels and eligible terms
    // ========================================================================================
    let source = load_labels(&config)?;
    let work = eligible_terms(source.as_ref(), &config.bounds)?;
    eprintln!(
        "> {} terms have between {} and {} positives.",
        work.len(),
        config.bounds.min_positives,
        config.bounds.max_positives
    );

    // ========================================================================================
    //                              Phase 3: Training and scoring
    // ========================================================================================
    let writer = ResultWriter::create(&config.output_dir)?;
    eprintln!("> Writing predictions to {}", writer.dir().display());
    let classifier = NetworkClassifier::new(Arc::new(matrix), config.classifier.clone());
    eprintln!(
        "> Training on {} threads (predict all: {}, cost selection: {})",
        worker_count(config.threads),
        config.predict.predict_all,
        config.predict.best_params
    );
    let orchestrator = Orchestrator::new(classifier, writer, config.predict, config.threads);
    let summary = orchestrator.run(&work)?;

    if let Some(path) = &config.summary_path {
        write_summary(path, &summary.reports)?;
        eprintln!("> Wrote run summary to {}", path.display());
    }

    eprintln!(
        "\n> Success! {} written, {} skipped, {} failed in {:.2?}.",
        summary.written(),
        summary.skipped(),
        summary.failed(),
        overall_start_time.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn short_flags_map_onto_the_run_config() {
        let args = Args::try_parse_from([
            "netsvm", "-i", "net.dab", "-o", "out", "-d", "labels", "-a", "-b", "-t", "0",
            "--min-pos", "3", "--max-negatives", "200",
        ])
        .unwrap();
        let config = args.into_run_config().unwrap();
        assert_eq!(config.matrix_path, PathBuf::from("net.dab"));
        assert!(config.predict.predict_all);
        assert!(config.predict.best_params);
        assert_eq!(config.threads, 0);
        assert_eq!(config.bounds.min_positives, 3);
        assert_eq!(config.classifier.max_negatives, 200);
    }

    #[test]
    fn ontology_flags_select_the_ontology_source() {
        let args = Args::try_parse_from([
            "netsvm", "--input", "net.dat", "--output", "out", "--gmt", "sets.gmt", "--obo",
            "onto.obo", "--slim", "slim.txt",
        ])
        .unwrap();
        let config = args.into_run_config().unwrap();
        assert_eq!(
            config.label_source,
            LabelSourceConfig::Ontology {
                gmt: "sets.gmt".into(),
                obo: "onto.obo".into(),
                slim: Some("slim.txt".into()),
            }
        );
        assert!(!config.predict.predict_all);
    }

    #[test]
    fn missing_label_source_is_rejected() {
        let args = Args::try_parse_from(["netsvm", "-i", "net.dab", "-o", "out"]).unwrap();
        assert!(args.into_run_config().is_err());
    }
}
