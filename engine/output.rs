// ========================================================================================
//
//                        RESULT WRITING: ONE TSV FILE PER TERM
//
// ========================================================================================

use crate::orchestrate::TermReport;
use crate::types::Prediction;
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PREDICTION_HEADER: [&str; 4] = ["gene", "label", "score", "source"];
pub const SUMMARY_HEADER: [&str; 4] = ["term", "positives", "status", "detail"];

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Creating output directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Writing {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Writing {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// The file name used for a term: path separators are replaced by `_`.
pub fn output_file_name(term: &str) -> String {
    term.replace(['/', '\\'], "_")
}

/// Writes prediction files into one output directory.
///
/// Each file is written under a temporary name and renamed into place, so a
/// reader never sees a partially written prediction.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    dir: PathBuf,
}

impl ResultWriter {
    /// Creates the output directory if needed.
    pub fn create(dir: &Path) -> Result<Self, OutputError> {
        fs::create_dir_all(dir).map_err(|source| OutputError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, term: &str) -> PathBuf {
        self.dir.join(output_file_name(term))
    }

    /// Writes `gene label score source` rows in the prediction's order and returns
    /// the final path.
    pub fn write(&self, prediction: &Prediction) -> Result<PathBuf, OutputError> {
        let path = self.path_for(&prediction.term);
        let temp_path = self
            .dir
            .join(format!(".{}.tmp", output_file_name(&prediction.term)));

        let result = write_prediction(&temp_path, prediction);
        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }
        fs::rename(&temp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            OutputError::Io {
                path: path.clone(),
                source,
            }
        })?;
        debug!(
            "{}: wrote {} scores to {}",
            prediction.term,
            prediction.scores.len(),
            path.display()
        );
        Ok(path)
    }
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>, OutputError> {
    let file = File::create(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BufWriter::new(file)))
}

fn finish(writer: csv::Writer<BufWriter<File>>, path: &Path) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };
    let buffered = writer.into_inner().map_err(|err| io_err(err.into_error()))?;
    buffered
        .into_inner()
        .map_err(|err| io_err(err.into_error()))?;
    Ok(())
}

fn write_prediction(path: &Path, prediction: &Prediction) -> Result<(), OutputError> {
    let csv_err = |source| OutputError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = tsv_writer(path)?;
    writer.write_record(PREDICTION_HEADER).map_err(csv_err)?;

    let mut score_buffer = ryu::Buffer::new();
    for scored in &prediction.scores {
        let label = scored.label.code().to_string();
        let source = scored.source.to_string();
        writer
            .write_record([
                scored.gene.as_str(),
                label.as_str(),
                score_buffer.format(scored.score),
                source.as_str(),
            ])
            .map_err(csv_err)?;
    }
    finish(writer, path)
}

/// Writes one `term positives status detail` row per report.
pub fn write_summary(path: &Path, reports: &[TermReport]) -> Result<(), OutputError> {
    let csv_err = |source| OutputError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = tsv_writer(path)?;
    writer.write_record(SUMMARY_HEADER).map_err(csv_err)?;
    for report in reports {
        let positives = report.n_positives.to_string();
        let detail = report.outcome.detail();
        writer
            .write_record([
                report.term.as_str(),
                positives.as_str(),
                report.outcome.status(),
                detail.as_str(),
            ])
            .map_err(csv_err)?;
    }
    finish(writer, path)
}
