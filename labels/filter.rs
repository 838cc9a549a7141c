use super::{LabelError, LabelSource};
use crate::types::{LabelSet, TermId};
use log::{debug, info};
use natord::compare;
use serde::{Deserialize, Serialize};

/// Terms qualify for training when their positive count lies in
/// `min_positives..=max_positives`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityBounds {
    pub min_positives: usize,
    pub max_positives: usize,
}

impl Default for EligibilityBounds {
    fn default() -> Self {
        Self {
            min_positives: 5,
            max_positives: 500,
        }
    }
}

impl EligibilityBounds {
    pub fn admits(&self, positives: usize) -> bool {
        (self.min_positives..=self.max_positives).contains(&positives)
    }
}

/// A term that passed the filter, with the labels it will be trained on.
#[derive(Debug, Clone)]
pub struct EligibleTerm {
    pub term: TermId,
    pub labels: LabelSet,
}

/// Keeps the terms whose positive count is within `bounds`, in natural order.
pub fn filter_terms(counts: &[(TermId, usize)], bounds: &EligibilityBounds) -> Vec<TermId> {
    let mut kept: Vec<TermId> = counts
        .iter()
        .filter(|(_, positives)| bounds.admits(*positives))
        .map(|(term, _)| term.clone())
        .collect();
    kept.sort_by(|a, b| compare(a, b));
    kept
}

/// Counts the positives of every term of `source` and materializes labels only for
/// the eligible ones.
///
/// A label failure for a term the source itself listed is returned, not skipped.
pub fn eligible_terms(
    source: &dyn LabelSource,
    bounds: &EligibilityBounds,
) -> Result<Vec<EligibleTerm>, LabelError> {
    let terms = source.get_terms();
    let counts = terms
        .into_iter()
        .map(|term| {
            let positives = source.n_positives(&term)?;
            Ok((term, positives))
        })
        .collect::<Result<Vec<_>, LabelError>>()?;

    let kept = filter_terms(&counts, bounds);
    info!(
        "{} of {} terms have between {} and {} positives",
        kept.len(),
        counts.len(),
        bounds.min_positives,
        bounds.max_positives
    );
    debug!("{} terms were filtered out", counts.len() - kept.len());

    kept.into_iter()
        .map(|term| {
            let labels = source.get_labels(&term)?;
            Ok(EligibleTerm { term, labels })
        })
        .collect()
}
