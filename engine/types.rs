// ========================================================================================
//
//                      SHARED VOCABULARY: GENES, TERMS AND LABELS
//
// ========================================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An opaque gene identifier, unique within the matrix and the label sources.
pub type Gene = String;

/// An opaque identifier of an ontology or gene-set term.
pub type TermId = String;

/// The negative half of a term's labels.
///
/// Negatives are usually far more numerous than positives, so the implicit form
/// is never materialized until it is resolved against a concrete gene universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegativeSet {
    /// Negatives listed by the label source.
    Explicit(BTreeSet<Gene>),
    /// Every gene of the universe that is neither positive nor excluded.
    Complement { excluded: BTreeSet<Gene> },
}

/// Positive and negative genes of one term. Positives and negatives are
/// disjoint by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    positives: BTreeSet<Gene>,
    negatives: NegativeSet,
}

impl LabelSet {
    /// Builds a label set, removing any positive gene from the negative side.
    pub fn new(positives: BTreeSet<Gene>, negatives: NegativeSet) -> Self {
        let negatives = match negatives {
            NegativeSet::Explicit(mut genes) => {
                genes.retain(|gene| !positives.contains(gene));
                NegativeSet::Explicit(genes)
            }
            NegativeSet::Complement { mut excluded } => {
                excluded.retain(|gene| !positives.contains(gene));
                NegativeSet::Complement { excluded }
            }
        };
        Self {
            positives,
            negatives,
        }
    }

    /// Positives with the implicit "everything else" negative set.
    pub fn with_implicit_negatives(positives: BTreeSet<Gene>) -> Self {
        Self::new(
            positives,
            NegativeSet::Complement {
                excluded: BTreeSet::new(),
            },
        )
    }

    pub fn positives(&self) -> &BTreeSet<Gene> {
        &self.positives
    }

    pub fn negatives(&self) -> &NegativeSet {
        &self.negatives
    }

    pub fn n_positives(&self) -> usize {
        self.positives.len()
    }

    pub fn is_positive(&self, gene: &str) -> bool {
        self.positives.contains(gene)
    }

    /// Whether `gene` counts as a negative once the set is resolved against a
    /// universe that contains it.
    pub fn is_negative(&self, gene: &str) -> bool {
        match &self.negatives {
            NegativeSet::Explicit(genes) => genes.contains(gene),
            NegativeSet::Complement { excluded } => {
                !self.positives.contains(gene) && !excluded.contains(gene)
            }
        }
    }

    /// Materializes the negative genes drawn from `universe`.
    pub fn resolve_negatives<'a, I>(&self, universe: I) -> BTreeSet<Gene>
    where
        I: IntoIterator<Item = &'a str>,
    {
        universe
            .into_iter()
            .filter(|gene| self.is_negative(gene))
            .map(str::to_string)
            .collect()
    }
}

/// Per-call switches of [`crate::classifier::NetworkClassifier::predict`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictOptions {
    /// Score every gene of the matrix, not only the held-out training genes.
    pub predict_all: bool,
    /// Select the SVM cost by stratified cross-validation instead of using the default.
    pub best_params: bool,
}

/// Provenance of a gene's label in a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneLabel {
    Positive,
    Negative,
    Unlabeled,
}

impl GeneLabel {
    /// The integer code used in prediction files.
    pub fn code(self) -> i8 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
            Self::Unlabeled => 0,
        }
    }
}

/// Which model produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    /// Out-of-fold score from a model that never saw the gene.
    HeldOut,
    /// Score from the model fitted on the whole training set.
    Model,
}

impl fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeldOut => f.write_str("heldout"),
            Self::Model => f.write_str("model"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredGene {
    pub gene: Gene,
    pub score: f64,
    pub label: GeneLabel,
    pub source: ScoreSource,
}

/// How the SVM cost of a term was chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceSource {
    Default,
    CrossValidated { mean_auroc: f64 },
    Fallback { reason: String },
}

/// The hyperparameter configuration used for one term.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperparameterChoice {
    pub cost: f64,
    pub source: ChoiceSource,
}

impl HyperparameterChoice {
    pub fn default_cost(cost: f64) -> Self {
        Self {
            cost,
            source: ChoiceSource::Default,
        }
    }
}

impl fmt::Display for HyperparameterChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ChoiceSource::Default => write!(f, "C={} (default)", self.cost),
            ChoiceSource::CrossValidated { mean_auroc } => {
                write!(f, "C={} (cross-validated, AUROC {mean_auroc:.4})", self.cost)
            }
            ChoiceSource::Fallback { reason } => {
                write!(f, "C={} (default after fallback: {reason})", self.cost)
            }
        }
    }
}

/// The ranked output of one term.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub term: TermId,
    /// Sorted by descending score; ties broken by ascending gene id.
    pub scores: Vec<ScoredGene>,
    pub choice: HyperparameterChoice,
    pub n_train_positives: usize,
    pub n_train_negatives: usize,
}

/// Sorts scores descending with a total order: equal scores fall back to the
/// gene identifier.
pub fn rank_scores(scores: &mut [ScoredGene]) {
    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.gene.cmp(&b.gene))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(genes: &[&str]) -> BTreeSet<Gene> {
        genes.iter().map(|g| g.to_string()).collect()
    }

    #[test]
    fn explicit_negatives_never_overlap_positives() {
        let labels = LabelSet::new(
            set(&["A", "B"]),
            NegativeSet::Explicit(set(&["B", "C", "D"])),
        );
        assert_eq!(labels.negatives(), &NegativeSet::Explicit(set(&["C", "D"])));
        assert!(!labels.is_negative("B"));
    }

    #[test]
    fn implicit_negatives_resolve_to_the_rest_of_the_universe() {
        let labels = LabelSet::new(
            set(&["A"]),
            NegativeSet::Complement {
                excluded: set(&["C"]),
            },
        );
        let universe = ["A", "B", "C", "D"];
        let negatives = labels.resolve_negatives(universe.iter().copied());
        assert_eq!(negatives, set(&["B", "D"]));
        assert!(negatives.is_disjoint(labels.positives()));
    }

    #[test]
    fn ranking_breaks_ties_by_gene_id() {
        let scored = |gene: &str, score: f64| ScoredGene {
            gene: gene.to_string(),
            score,
            label: GeneLabel::Unlabeled,
            source: ScoreSource::Model,
        };
        let mut scores = vec![scored("B", 0.5), scored("C", 1.0), scored("A", 0.5)];
        rank_scores(&mut scores);
        let order: Vec<&str> = scores.iter().map(|s| s.gene.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }
}
