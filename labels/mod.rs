pub mod directory;
pub mod filter;
pub mod gmt;
pub mod ontology;
pub mod propagated;

pub use directory::DirectoryLabels;
pub use filter::{EligibilityBounds, EligibleTerm, eligible_terms, filter_terms};
pub use gmt::{GeneSets, GmtError};
pub use ontology::{Ontology, OntologyError};
pub use propagated::OntologyLabels;

use crate::shared::files::FileError;
use crate::types::{LabelSet, TermId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Term '{0}' is not known to the label source.")]
    TermNotFound(TermId),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Ontology(#[from] OntologyError),
    #[error(transparent)]
    GeneSets(#[from] GmtError),
    #[error("Line {line} of label file {path} is not 'gene<TAB>label' with label 1, -1 or 0.")]
    MalformedLabel { path: PathBuf, line: usize },
    #[error("The label file name {0} is not valid UTF-8.")]
    InvalidTermFile(PathBuf),
}

/// Where per-term training labels come from.
///
/// Implementations are immutable once constructed and are queried concurrently
/// by every worker.
pub trait LabelSource: Send + Sync {
    /// Every term this source can produce labels for, in natural sort order.
    fn get_terms(&self) -> Vec<TermId>;

    /// The labels of one term. Unknown terms are an error, never an empty set.
    fn get_labels(&self, term: &str) -> Result<LabelSet, LabelError>;

    /// Number of positives of one term, without materializing its negatives.
    fn n_positives(&self, term: &str) -> Result<usize, LabelError> {
        Ok(self.get_labels(term)?.n_positives())
    }
}
