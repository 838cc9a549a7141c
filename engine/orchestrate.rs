// ========================================================================================
//
//                      THE ORCHESTRATOR: ONE TERM PER TASK, MANY WORKERS
//
// ========================================================================================
//
// Every eligible term is an independent task: train, score, write. Tasks share the
// classifier (and through it the read-only matrix) and the output directory, and
// nothing else. A task that fails, or even panics, is recorded in its report and
// does not disturb the others.

use crate::classifier::NetworkClassifier;
use crate::labels::EligibleTerm;
use crate::output::ResultWriter;
use crate::types::{HyperparameterChoice, PredictOptions};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{error, info, warn};
use natord::compare;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::any::Any;
use std::io::IsTerminal;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("Failed to build a worker pool with {threads} threads: {source}")]
    Pool {
        threads: usize,
        source: rayon::ThreadPoolBuildError,
    },
}

/// What happened to one term.
#[derive(Debug, Clone, PartialEq)]
pub enum TermOutcome {
    Written {
        path: PathBuf,
        n_scored: usize,
        choice: HyperparameterChoice,
    },
    /// The term's training data could not support a model.
    Skipped { reason: String },
    /// Writing failed or the task panicked.
    Failed { reason: String },
}

impl TermOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Written {
                n_scored, choice, ..
            } => format!("{n_scored} genes, {choice}"),
            Self::Skipped { reason } | Self::Failed { reason } => reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermReport {
    pub term: String,
    pub n_positives: usize,
    pub outcome: TermOutcome,
}

/// Reports of a whole run, in natural term order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<TermReport>,
}

impl RunSummary {
    pub fn written(&self) -> usize {
        self.count("written")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    fn count(&self, status: &str) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.status() == status)
            .count()
    }
}

/// Number of workers for a requested thread count; `0` means one per logical core.
pub fn worker_count(threads: usize) -> usize {
    if threads == 0 { num_cpus::get() } else { threads }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs term tasks on a dedicated thread pool.
pub struct Orchestrator {
    classifier: NetworkClassifier,
    writer: ResultWriter,
    options: PredictOptions,
    threads: usize,
}

impl Orchestrator {
    pub fn new(
        classifier: NetworkClassifier,
        writer: ResultWriter,
        options: PredictOptions,
        threads: usize,
    ) -> Self {
        Self {
            classifier,
            writer,
            options,
            threads,
        }
    }

    /// Processes every term and returns one report per term. Only a failure to
    /// start the worker pool is an error.
    pub fn run(&self, work: &[EligibleTerm]) -> Result<RunSummary, OrchestrateError> {
        let threads = worker_count(self.threads);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("netsvm-worker-{idx}"))
            .build()
            .map_err(|source| OrchestrateError::Pool { threads, source })?;
        info!("Training {} terms on {threads} worker threads", work.len());

        let start = Instant::now();
        let progress = create_progress_bar(work.len() as u64, "Training term classifiers");
        let mut reports: Vec<TermReport> = pool.install(|| {
            work.par_iter()
                .map(|item| {
                    let report = self.process(item);
                    progress.inc(1);
                    report
                })
                .collect()
        });
        progress.finish_with_message("Done");

        reports.sort_by(|a, b| compare(&a.term, &b.term));
        let summary = RunSummary { reports };
        info!(
            "Finished {} terms in {:.2?}: {} written, {} skipped, {} failed",
            summary.reports.len(),
            start.elapsed(),
            summary.written(),
            summary.skipped(),
            summary.failed()
        );
        Ok(summary)
    }

    fn process(&self, item: &EligibleTerm) -> TermReport {
        let n_positives = item.labels.n_positives();
        info!("{}: training with {n_positives} positives", item.term);

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_term(item))).unwrap_or_else(
            |payload| TermOutcome::Failed {
                reason: format!("panicked: {}", panic_message(payload.as_ref())),
            },
        );
        match &outcome {
            TermOutcome::Written { path, choice, .. } => {
                info!("{}: {choice}, wrote {}", item.term, path.display());
            }
            TermOutcome::Skipped { reason } => warn!("{}: skipped: {reason}", item.term),
            TermOutcome::Failed { reason } => error!("{}: failed: {reason}", item.term),
        }

        TermReport {
            term: item.term.clone(),
            n_positives,
            outcome,
        }
    }

    fn run_term(&self, item: &EligibleTerm) -> TermOutcome {
        let prediction = match self
            .classifier
            .predict(&item.term, &item.labels, &self.options)
        {
            Ok(prediction) => prediction,
            Err(err) => {
                if !err.is_degenerate() {
                    error!("{}: classifier error: {err}", item.term);
                }
                return TermOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };
        match self.writer.write(&prediction) {
            Ok(path) => TermOutcome::Written {
                path,
                n_scored: prediction.scores.len(),
                choice: prediction.choice,
            },
            Err(err) => TermOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }
}
