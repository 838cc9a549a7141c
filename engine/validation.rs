use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FoldError {
    #[error("Cross-validation needs at least two folds, got {0}.")]
    TooFewFolds(usize),
    #[error(
        "{folds}-fold stratification needs at least {folds} examples of each class, found {positives} positives and {negatives} negatives."
    )]
    TooFewExamples {
        folds: usize,
        positives: usize,
        negatives: usize,
    },
}

/// Assigns every example to one of `folds` folds so that each fold receives at
/// least one example of each class.
///
/// Positives and negatives are shuffled separately with `rng` and dealt
/// round-robin; negatives continue where the positives stopped so fold sizes stay
/// within one of each other.
pub fn stratified_folds(
    labels: &[bool],
    folds: usize,
    rng: &mut StdRng,
) -> Result<Vec<usize>, FoldError> {
    if folds < 2 {
        return Err(FoldError::TooFewFolds(folds));
    }
    let mut positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i]).collect();
    let mut negatives: Vec<usize> = (0..labels.len()).filter(|&i| !labels[i]).collect();
    if positives.len() < folds || negatives.len() < folds {
        return Err(FoldError::TooFewExamples {
            folds,
            positives: positives.len(),
            negatives: negatives.len(),
        });
    }

    positives.shuffle(rng);
    negatives.shuffle(rng);

    let mut assignment = vec![0usize; labels.len()];
    for (k, &idx) in positives.iter().chain(negatives.iter()).enumerate() {
        assignment[idx] = k % folds;
    }
    Ok(assignment)
}

/// Splits example indices into (training, held-out) for one fold.
pub fn split_fold(assignment: &[usize], fold: usize) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::with_capacity(assignment.len());
    let mut test = Vec::new();
    for (idx, &f) in assignment.iter().enumerate() {
        if f == fold {
            test.push(idx);
        } else {
            train.push(idx);
        }
    }
    (train, test)
}

/// Area under the ROC curve, computed as the normalized Mann-Whitney U statistic
/// with tied scores sharing their average rank. `None` when a class is absent.
pub fn auroc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    debug_assert_eq!(scores.len(), labels.len());
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0f64;
    let mut start = 0usize;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; the tied block [start, end) shares their mean.
        let shared_rank = (start + end + 1) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| labels[i]).count();
        rank_sum += shared_rank * tied_positives as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

/// Mean AUROC over the held-out part of each fold. `None` if any fold lacks one
/// of the classes, which stratified assignments rule out.
pub fn mean_fold_auroc(
    scores: &[f64],
    labels: &[bool],
    assignment: &[usize],
    folds: usize,
) -> Option<f64> {
    let mut total = 0.0;
    for fold in 0..folds {
        let (fold_scores, fold_labels): (Vec<f64>, Vec<bool>) = assignment
            .iter()
            .enumerate()
            .filter(|&(_, &f)| f == fold)
            .map(|(idx, _)| (scores[idx], labels[idx]))
            .unzip();
        total += auroc(&fold_scores, &fold_labels)?;
    }
    Some(total / folds as f64)
}

/// Index of the highest finite value; the earliest entry wins ties.
pub fn best_index(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        match best {
            Some(current) if values[current] >= value => {}
            _ => best = Some(idx),
        }
    }
    best
}
