// ========================================================================================
//
//                    THE NETWORK CLASSIFIER: ONE TERM, ONE MODEL
//
// ========================================================================================
//
// For a single term this module:
//
// 1.  Builds the training set: the term's positives that the matrix knows, plus its
//     negatives resolved against the matrix and down-sampled to a fixed cap with a
//     seed derived from the term id (so the sample never depends on which worker runs
//     the term or in which order).
// 2.  Optionally picks the SVM cost by stratified k-fold cross-validation over a small
//     grid, scored by mean per-fold AUROC.
// 3.  Scores every training gene out-of-fold, and with `predict_all` scores every
//     other matrix gene with a model fitted on the whole training set. A term too
//     small to hold out a fold is still scored under `predict_all`, training genes
//     included, by that full model.
//
// The association matrix is only ever borrowed immutably; a classifier can be shared
// by any number of threads.

use crate::features::NetworkFeatures;
use crate::matrix::AssociationMatrix;
use crate::svm::{LinearSvm, SvmError, SvmOptions, train_l2_svm};
use crate::types::{
    ChoiceSource, GeneLabel, HyperparameterChoice, LabelSet, NegativeSet, PredictOptions,
    Prediction, ScoreSource, ScoredGene, rank_scores,
};
use crate::validation::{best_index, mean_fold_auroc, split_fold, stratified_folds};
use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Independent random streams derived from one term seed.
const SAMPLING_STREAM: u64 = 1;
const SELECTION_STREAM: u64 = 2;
const HELD_OUT_STREAM: u64 = 3;

/// Tunables of the classifier that stay fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Base seed; each term mixes in a hash of its id.
    pub seed: u64,
    /// Cap on training negatives per term. `0` disables the cap.
    pub max_negatives: usize,
    /// Number of cross-validation folds.
    pub folds: usize,
    /// Cost used without `best_params`, and as the fallback when the grid search
    /// cannot run.
    pub default_cost: f64,
    /// Costs tried by the grid search.
    pub cost_grid: Vec<f64>,
    /// Solver stopping tolerance.
    pub tolerance: f64,
    /// Solver epoch cap.
    pub max_iterations: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            max_negatives: 1000,
            folds: 5,
            default_cost: 1.0,
            cost_grid: vec![1e-4, 1e-3, 1e-2, 1e-1, 1.0, 10.0],
            tolerance: 0.1,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error(
        "The training set has a single class: {positives} positives and {negatives} negatives are present in the matrix."
    )]
    SingleClass { positives: usize, negatives: usize },
    #[error("None of the {positives} positive genes has any association in the matrix.")]
    NoNetworkData { positives: usize },
    #[error(
        "Too few examples to hold out a fold: {positives} positives and {negatives} negatives (at least 2 of each are needed)."
    )]
    TooFewExamples { positives: usize, negatives: usize },
    #[error("SVM training failed: {0}")]
    Solver(#[from] SvmError),
}

impl ClassifierError {
    /// Degenerate label data, as opposed to a numerical failure.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Self::SingleClass { .. } | Self::NoNetworkData { .. } | Self::TooFewExamples { .. } => {
                true
            }
            Self::Solver(err) => matches!(err, SvmError::SingleClass { .. }),
        }
    }
}

/// Training examples of one term, positives first, each block in matrix order.
struct TrainingSet {
    rows: Vec<usize>,
    labels: Vec<bool>,
    targets: Vec<f64>,
    n_positives: usize,
}

impl TrainingSet {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn n_negatives(&self) -> usize {
        self.rows.len() - self.n_positives
    }
}

/// Trains per-term SVMs over a shared association matrix.
pub struct NetworkClassifier {
    matrix: Arc<AssociationMatrix>,
    settings: ClassifierSettings,
}

impl NetworkClassifier {
    pub fn new(matrix: Arc<AssociationMatrix>, settings: ClassifierSettings) -> Self {
        Self { matrix, settings }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Trains a model for `term` and returns its ranked gene scores.
    ///
    /// Training genes receive held-out scores. With `predict_all`, every other gene of
    /// the matrix is scored by a model fitted on the full training set, so the output
    /// covers the whole matrix; that model also scores the training genes when a class
    /// has fewer than two examples.
    pub fn predict(
        &self,
        term: &str,
        labels: &LabelSet,
        options: &PredictOptions,
    ) -> Result<Prediction, ClassifierError> {
        let seed = term_seed(self.settings.seed, term);
        let training = self.training_set(term, labels, seed)?;
        debug!(
            "{term}: training on {} positives and {} negatives",
            training.n_positives,
            training.n_negatives()
        );

        let choice = if options.best_params {
            self.select_cost(term, &training, seed)
        } else {
            HyperparameterChoice::default_cost(self.settings.default_cost)
        };

        let folds = self
            .settings
            .folds
            .min(training.n_positives)
            .min(training.n_negatives());
        if folds < 2 && !options.predict_all {
            return Err(ClassifierError::TooFewExamples {
                positives: training.n_positives,
                negatives: training.n_negatives(),
            });
        }

        let full_model = if options.predict_all {
            let features = NetworkFeatures::new(&self.matrix, training.rows.clone());
            let model = self.fit(&features, &training.rows, &training.targets, choice.cost, seed)?;
            Some((features, model))
        } else {
            None
        };

        let (training_scores, training_source) = match &full_model {
            Some((features, model)) if folds < 2 => {
                warn!(
                    "{term}: {} positives and {} negatives cannot be held out; scoring training genes with the full model",
                    training.n_positives,
                    training.n_negatives()
                );
                let scores: Vec<f64> = training
                    .rows
                    .iter()
                    .map(|&row| features.score(model, row))
                    .collect();
                (scores, ScoreSource::Model)
            }
            _ => {
                if folds < self.settings.folds {
                    debug!(
                        "{term}: holding out with {folds} folds instead of {}",
                        self.settings.folds
                    );
                }
                let mut rng = StdRng::seed_from_u64(stream_seed(seed, HELD_OUT_STREAM));
                let assignment = stratified_folds(&training.labels, folds, &mut rng).map_err(
                    |_| ClassifierError::TooFewExamples {
                        positives: training.n_positives,
                        negatives: training.n_negatives(),
                    },
                )?;
                let held_out =
                    self.out_of_fold_scores(&training, &assignment, folds, choice.cost, seed)?;
                (held_out, ScoreSource::HeldOut)
            }
        };

        let mut scores: Vec<ScoredGene> = training
            .rows
            .iter()
            .zip(training.labels.iter())
            .zip(training_scores)
            .map(|((&row, &positive), score)| ScoredGene {
                gene: self.matrix.gene(row).to_string(),
                score,
                label: if positive {
                    GeneLabel::Positive
                } else {
                    GeneLabel::Negative
                },
                source: training_source,
            })
            .collect();

        if let Some((features, model)) = &full_model {
            let mut in_training = vec![false; self.matrix.len()];
            for &row in &training.rows {
                in_training[row] = true;
            }
            scores.reserve(self.matrix.len() - training.len());
            for row in (0..self.matrix.len()).filter(|&row| !in_training[row]) {
                let gene = self.matrix.gene(row);
                let label = if labels.is_positive(gene) {
                    GeneLabel::Positive
                } else if labels.is_negative(gene) {
                    GeneLabel::Negative
                } else {
                    GeneLabel::Unlabeled
                };
                scores.push(ScoredGene {
                    gene: gene.to_string(),
                    score: features.score(model, row),
                    label,
                    source: ScoreSource::Model,
                });
            }
        }

        rank_scores(&mut scores);
        Ok(Prediction {
            term: term.to_string(),
            scores,
            choice,
            n_train_positives: training.n_positives,
            n_train_negatives: training.n_negatives(),
        })
    }

    fn training_set(
        &self,
        term: &str,
        labels: &LabelSet,
        seed: u64,
    ) -> Result<TrainingSet, ClassifierError> {
        let matrix = &self.matrix;
        let mut positives: Vec<usize> = labels
            .positives()
            .iter()
            .filter_map(|gene| matrix.index_of(gene))
            .collect();
        positives.sort_unstable();
        let absent = labels.n_positives() - positives.len();
        if absent > 0 {
            debug!("{term}: {absent} positive genes are not in the association matrix");
        }

        let mut negatives: Vec<usize> = match labels.negatives() {
            NegativeSet::Explicit(genes) => {
                genes.iter().filter_map(|gene| matrix.index_of(gene)).collect()
            }
            NegativeSet::Complement { .. } => (0..matrix.len())
                .filter(|&row| labels.is_negative(matrix.gene(row)))
                .collect(),
        };
        negatives.sort_unstable();

        let cap = self.settings.max_negatives;
        if cap > 0 && negatives.len() > cap {
            let mut rng = StdRng::seed_from_u64(stream_seed(seed, SAMPLING_STREAM));
            negatives.shuffle(&mut rng);
            negatives.truncate(cap);
            negatives.sort_unstable();
        }

        if positives.is_empty() || negatives.is_empty() {
            return Err(ClassifierError::SingleClass {
                positives: positives.len(),
                negatives: negatives.len(),
            });
        }
        if !positives.iter().any(|&row| matrix.row_has_data(row)) {
            return Err(ClassifierError::NoNetworkData {
                positives: positives.len(),
            });
        }

        let n_positives = positives.len();
        let mut labels_out = vec![true; n_positives];
        labels_out.resize(n_positives + negatives.len(), false);
        let targets = labels_out
            .iter()
            .map(|&positive| if positive { 1.0 } else { -1.0 })
            .collect();
        let mut rows = positives;
        rows.extend(negatives);

        Ok(TrainingSet {
            rows,
            labels: labels_out,
            targets,
            n_positives,
        })
    }

    /// Grid search over `cost_grid` by mean per-fold AUROC. Falls back to the default
    /// cost when stratified folds cannot be formed or no grid entry can be evaluated.
    fn select_cost(&self, term: &str, training: &TrainingSet, seed: u64) -> HyperparameterChoice {
        let folds = self.settings.folds;
        let fallback = |reason: String| {
            warn!(
                "{term}: cannot select the SVM cost by cross-validation ({reason}); using C={}",
                self.settings.default_cost
            );
            HyperparameterChoice {
                cost: self.settings.default_cost,
                source: ChoiceSource::Fallback { reason },
            }
        };

        let mut rng = StdRng::seed_from_u64(stream_seed(seed, SELECTION_STREAM));
        let assignment = match stratified_folds(&training.labels, folds, &mut rng) {
            Ok(assignment) => assignment,
            Err(err) => return fallback(err.to_string()),
        };

        let means: Vec<f64> = self
            .settings
            .cost_grid
            .par_iter()
            .map(|&cost| {
                match self.out_of_fold_scores(training, &assignment, folds, cost, seed) {
                    Ok(scores) => mean_fold_auroc(&scores, &training.labels, &assignment, folds)
                        .unwrap_or(f64::NAN),
                    Err(err) => {
                        debug!("{term}: C={cost} could not be evaluated: {err}");
                        f64::NAN
                    }
                }
            })
            .collect();

        match best_index(&means) {
            Some(idx) => {
                debug!("{term}: grid AUROC {:?}", means);
                HyperparameterChoice {
                    cost: self.settings.cost_grid[idx],
                    source: ChoiceSource::CrossValidated {
                        mean_auroc: means[idx],
                    },
                }
            }
            None => fallback("no grid entry could be evaluated".to_string()),
        }
    }

    /// Scores each training example with a model fitted on the other folds. The
    /// feature columns of each fold's model are that fold's training genes.
    fn out_of_fold_scores(
        &self,
        training: &TrainingSet,
        assignment: &[usize],
        folds: usize,
        cost: f64,
        seed: u64,
    ) -> Result<Vec<f64>, ClassifierError> {
        let mut scores = vec![0.0f64; training.len()];
        for fold in 0..folds {
            let (train, test) = split_fold(assignment, fold);
            let rows: Vec<usize> = train.iter().map(|&i| training.rows[i]).collect();
            let targets: Vec<f64> = train.iter().map(|&i| training.targets[i]).collect();
            let features = NetworkFeatures::new(&self.matrix, rows.clone());
            let model = self.fit(
                &features,
                &rows,
                &targets,
                cost,
                seed.wrapping_add(fold as u64 + 1),
            )?;
            for &i in &test {
                scores[i] = features.score(&model, training.rows[i]);
            }
        }
        Ok(scores)
    }

    fn fit(
        &self,
        features: &NetworkFeatures,
        rows: &[usize],
        targets: &[f64],
        cost: f64,
        seed: u64,
    ) -> Result<LinearSvm, ClassifierError> {
        let x = features.design(rows);
        let options = SvmOptions {
            cost,
            epsilon: self.settings.tolerance,
            max_iterations: self.settings.max_iterations,
        };
        let model = train_l2_svm(x.view(), targets, &options, seed)?;
        debug!(
            "C={cost}: solver ran {} epochs (converged: {})",
            model.iterations(),
            model.converged()
        );
        Ok(model)
    }
}

/// FNV-1a hash of the term id mixed into the base seed.
fn term_seed(base: u64, term: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in term.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    base ^ hash
}

fn stream_seed(seed: u64, stream: u64) -> u64 {
    seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixBuilder;
    use std::collections::BTreeSet;

    /// Positives `P*` and negatives `N*` form two cliques of strength 0.9; `U*` genes
    /// have no associations at all.
    fn clique_matrix(n_pos: usize, n_neg: usize, n_unconnected: usize) -> AssociationMatrix {
        let mut builder = MatrixBuilder::new();
        for (prefix, n) in [("P", n_pos), ("N", n_neg)] {
            for i in 0..n {
                for j in (i + 1)..n {
                    builder.add_pair(&format!("{prefix}{i}"), &format!("{prefix}{j}"), 0.9);
                }
            }
        }
        for i in 0..n_unconnected {
            builder.add_gene(&format!("U{i}"));
        }
        builder.build(0.0)
    }

    fn positives(n: usize) -> BTreeSet<String> {
        (0..n).map(|i| format!("P{i}")).collect()
    }

    fn classifier(matrix: AssociationMatrix, settings: ClassifierSettings) -> NetworkClassifier {
        NetworkClassifier::new(Arc::new(matrix), settings)
    }

    fn mean_score(prediction: &Prediction, label: GeneLabel) -> f64 {
        let picked: Vec<f64> = prediction
            .scores
            .iter()
            .filter(|s| s.label == label)
            .map(|s| s.score)
            .collect();
        picked.iter().sum::<f64>() / picked.len() as f64
    }

    #[test]
    fn held_out_scores_rank_network_neighbours_first() {
        let clf = classifier(clique_matrix(10, 30, 0), ClassifierSettings::default());
        let labels = LabelSet::with_implicit_negatives(positives(10));

        let prediction = clf
            .predict("T1", &labels, &PredictOptions::default())
            .unwrap();
        assert_eq!(prediction.scores.len(), 40);
        assert!(
            prediction
                .scores
                .iter()
                .all(|s| s.source == ScoreSource::HeldOut)
        );
        assert!(
            mean_score(&prediction, GeneLabel::Positive)
                > mean_score(&prediction, GeneLabel::Negative)
        );
        assert!(prediction.scores[0].gene.starts_with('P'));
        assert_eq!(prediction.choice.source, ChoiceSource::Default);
    }

    #[test]
    fn predict_all_scores_every_matrix_gene_once() {
        let matrix = clique_matrix(8, 20, 5);
        let all_genes: BTreeSet<String> = matrix.genes().iter().cloned().collect();
        let settings = ClassifierSettings {
            max_negatives: 10,
            ..ClassifierSettings::default()
        };
        let clf = classifier(matrix, settings);
        let labels = LabelSet::with_implicit_negatives(positives(8));

        let prediction = clf
            .predict(
                "T2",
                &labels,
                &PredictOptions {
                    predict_all: true,
                    best_params: false,
                },
            )
            .unwrap();
        let scored: BTreeSet<String> = prediction.scores.iter().map(|s| s.gene.clone()).collect();
        assert_eq!(scored, all_genes);
        assert_eq!(prediction.scores.len(), all_genes.len());
        let held_out = prediction
            .scores
            .iter()
            .filter(|s| s.source == ScoreSource::HeldOut)
            .count();
        assert_eq!(held_out, 8 + 10);
        // Unsampled negatives keep their negative provenance.
        assert!(
            prediction
                .scores
                .iter()
                .filter(|s| s.source == ScoreSource::Model)
                .all(|s| s.label == GeneLabel::Negative)
        );
    }

    #[test]
    fn predictions_are_reproducible() {
        let clf = classifier(clique_matrix(6, 25, 3), ClassifierSettings::default());
        let labels = LabelSet::with_implicit_negatives(positives(6));
        let options = PredictOptions {
            predict_all: true,
            best_params: false,
        };

        let first = clf.predict("DOID:4", &labels, &options).unwrap();
        let second = clf.predict("DOID:4", &labels, &options).unwrap();
        assert_eq!(first.scores.len(), second.scores.len());
        for (a, b) in first.scores.iter().zip(second.scores.iter()) {
            assert_eq!(a.gene, b.gene);
            assert_eq!(a.score.to_bits(), b.score.to_bits());
        }
    }

    #[test]
    fn negatives_are_capped_without_predict_all() {
        let clf = classifier(
            clique_matrix(6, 0, 3000),
            ClassifierSettings {
                max_negatives: 300,
                ..ClassifierSettings::default()
            },
        );
        let labels = LabelSet::with_implicit_negatives(positives(6));

        let prediction = clf
            .predict("T3", &labels, &PredictOptions::default())
            .unwrap();
        assert_eq!(prediction.n_train_negatives, 300);
        assert_eq!(prediction.scores.len(), 306);
    }

    #[test]
    fn grid_search_picks_a_grid_cost() {
        let clf = classifier(clique_matrix(10, 30, 0), ClassifierSettings::default());
        let labels = LabelSet::with_implicit_negatives(positives(10));

        let prediction = clf
            .predict(
                "T4",
                &labels,
                &PredictOptions {
                    predict_all: false,
                    best_params: true,
                },
            )
            .unwrap();
        assert!(clf.settings().cost_grid.contains(&prediction.choice.cost));
        match prediction.choice.source {
            ChoiceSource::CrossValidated { mean_auroc } => assert!(mean_auroc > 0.5),
            other => panic!("expected a cross-validated choice, got {other:?}"),
        }
    }

    #[test]
    fn grid_search_falls_back_when_positives_are_fewer_than_folds() {
        let clf = classifier(clique_matrix(3, 30, 0), ClassifierSettings::default());
        let labels = LabelSet::with_implicit_negatives(positives(3));

        let prediction = clf
            .predict(
                "T5",
                &labels,
                &PredictOptions {
                    predict_all: false,
                    best_params: true,
                },
            )
            .unwrap();
        assert_eq!(prediction.choice.cost, clf.settings().default_cost);
        assert!(matches!(
            prediction.choice.source,
            ChoiceSource::Fallback { .. }
        ));
        assert_eq!(prediction.scores.len(), 33);
    }

    #[test]
    fn degenerate_label_sets_are_reported() {
        let clf = classifier(clique_matrix(4, 10, 3), ClassifierSettings::default());
        let options = PredictOptions::default();

        let absent = LabelSet::with_implicit_negatives(["X1".to_string()].into());
        let err = clf.predict("absent", &absent, &options).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::SingleClass { positives: 0, .. }
        ));
        assert!(err.is_degenerate());

        let unconnected =
            LabelSet::with_implicit_negatives(["U0".to_string(), "U1".to_string()].into());
        let err = clf.predict("unconnected", &unconnected, &options).unwrap_err();
        assert!(matches!(err, ClassifierError::NoNetworkData { positives: 2 }));

        let single = LabelSet::with_implicit_negatives(["P0".to_string()].into());
        let err = clf.predict("single", &single, &options).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::TooFewExamples { positives: 1, .. }
        ));
    }

    #[test]
    fn predict_all_scores_a_single_present_positive_with_the_full_model() {
        let mut builder = MatrixBuilder::new();
        for i in 0..20 {
            for j in (i + 1)..20 {
                builder.add_pair(&format!("N{i}"), &format!("N{j}"), 0.9);
            }
        }
        builder.add_pair("P0", "N0", 0.1);
        let clf = classifier(builder.build(0.0), ClassifierSettings::default());

        // Only P0 of the five positives is in the matrix.
        let mut genes: BTreeSet<String> = (1..5).map(|i| format!("X{i}")).collect();
        genes.insert("P0".to_string());
        let labels = LabelSet::with_implicit_negatives(genes);

        let held_out_only = clf.predict("T7", &labels, &PredictOptions::default());
        assert!(matches!(
            held_out_only,
            Err(ClassifierError::TooFewExamples { positives: 1, .. })
        ));

        let prediction = clf
            .predict(
                "T7",
                &labels,
                &PredictOptions {
                    predict_all: true,
                    best_params: false,
                },
            )
            .unwrap();
        assert_eq!(prediction.scores.len(), 21);
        assert_eq!(prediction.n_train_positives, 1);
        assert!(
            prediction
                .scores
                .iter()
                .all(|s| s.source == ScoreSource::Model)
        );
        let p0 = prediction.scores.iter().find(|s| s.gene == "P0").unwrap();
        assert_eq!(p0.label, GeneLabel::Positive);
    }

    #[test]
    fn explicit_negatives_limit_the_training_set() {
        let clf = classifier(clique_matrix(5, 10, 0), ClassifierSettings::default());
        let negatives: BTreeSet<String> = (0..4).map(|i| format!("N{i}")).collect();
        let labels = LabelSet::new(positives(5), NegativeSet::Explicit(negatives));

        let prediction = clf
            .predict("T6", &labels, &PredictOptions::default())
            .unwrap();
        assert_eq!(prediction.n_train_negatives, 4);
        assert_eq!(prediction.scores.len(), 9);
    }

    #[test]
    fn term_seeds_differ_per_term() {
        assert_ne!(term_seed(0, "DOID:1"), term_seed(0, "DOID:2"));
        assert_eq!(term_seed(7, "DOID:1"), term_seed(7, "DOID:1"));
    }
}
