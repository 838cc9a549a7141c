//! Linear L2-loss support vector machine.
//!
//! Solves the class-weighted, L2-regularized squared-hinge problem
//!
//! ```text
//! min_{w,b} 0.5 * (w'w + b^2) + sum_i C_i * max(0, 1 - y_i * (w'x_i + b))^2
//! ```
//!
//! through its dual by coordinate descent: each step optimizes one dual variable in
//! closed form and keeps `w` in sync, so an epoch costs one pass over the design
//! matrix. The bias is handled as an extra constant feature of value 1 and is
//! regularized along with `w`.
//!
//! Per-class costs balance the two classes: with `n` examples of which `n_pos` are
//! positive, positives get `C * n / (2 n_pos)` and negatives `C * n / (2 n_neg)`.
//! Terms typically have a handful of positives against hundreds of negatives, and
//! without the reweighting the minority class is ignored.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Projected gradients smaller than this are treated as zero.
const GRADIENT_FLOOR: f64 = 1.0e-12;

/// SVM training options.
#[derive(Debug, Clone)]
pub struct SvmOptions {
    /// The base cost `C`; larger values fit the training data more tightly.
    pub cost: f64,
    /// Stop once the spread of projected gradients over an epoch is below this.
    pub epsilon: f64,
    /// Maximum number of coordinate-descent epochs.
    pub max_iterations: usize,
}

impl Default for SvmOptions {
    fn default() -> Self {
        Self {
            cost: 1.0,
            epsilon: 0.1,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum SvmError {
    #[error("The training set is empty.")]
    EmptyTrainingSet,
    #[error("The design matrix has {rows} rows but {labels} labels were given.")]
    LabelMismatch { rows: usize, labels: usize },
    #[error("Label {0} is neither +1 nor -1.")]
    InvalidLabel(f64),
    #[error(
        "The training set contains a single class ({positives} positives, {negatives} negatives)."
    )]
    SingleClass { positives: usize, negatives: usize },
    #[error("The SVM cost must be positive and finite, got {0}.")]
    InvalidCost(f64),
    #[error("The design matrix contains non-finite values.")]
    NonFiniteFeatures,
}

/// A trained linear decision function `w'x + b`.
#[derive(Debug, Clone)]
pub struct LinearSvm {
    weights: Array1<f64>,
    bias: f64,
    iterations: usize,
    converged: bool,
}

impl LinearSvm {
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Number of epochs the solver ran.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Signed margin of one feature vector; higher means more confidently positive.
    pub fn decision(&self, row: ArrayView1<f64>) -> f64 {
        row.dot(&self.weights) + self.bias
    }
}

/// Per-class costs `(cpos, cneg)` that balance the two classes.
pub fn class_costs(cost: f64, positives: usize, negatives: usize) -> (f64, f64) {
    let n = (positives + negatives) as f64;
    (
        cost * n / (2.0 * positives as f64),
        cost * n / (2.0 * negatives as f64),
    )
}

/// Trains a class-balanced linear L2-SVM.
///
/// # Arguments
/// * `x` - Design matrix, one row per example.
/// * `labels` - `+1.0` for positive and `-1.0` for negative examples.
/// * `options` - Cost and stopping criteria.
/// * `seed` - Seeds the order in which dual variables are visited, so identical
///   inputs always yield identical models.
pub fn train_l2_svm(
    x: ArrayView2<f64>,
    labels: &[f64],
    options: &SvmOptions,
    seed: u64,
) -> Result<LinearSvm, SvmError> {
    let m = x.nrows();
    if m == 0 {
        return Err(SvmError::EmptyTrainingSet);
    }
    if labels.len() != m {
        return Err(SvmError::LabelMismatch {
            rows: m,
            labels: labels.len(),
        });
    }
    if !(options.cost.is_finite() && options.cost > 0.0) {
        return Err(SvmError::InvalidCost(options.cost));
    }
    if let Some(&bad) = labels.iter().find(|&&y| y != 1.0 && y != -1.0) {
        return Err(SvmError::InvalidLabel(bad));
    }
    let positives = labels.iter().filter(|&&y| y > 0.0).count();
    let negatives = m - positives;
    if positives == 0 || negatives == 0 {
        return Err(SvmError::SingleClass {
            positives,
            negatives,
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(SvmError::NonFiniteFeatures);
    }

    let (cpos, cneg) = class_costs(options.cost, positives, negatives);
    // The squared hinge turns into a diagonal shift of the dual Hessian.
    let diag: Vec<f64> = labels
        .iter()
        .map(|&y| if y > 0.0 { 0.5 / cpos } else { 0.5 / cneg })
        .collect();
    let qd: Vec<f64> = (0..m)
        .map(|i| {
            let row = x.row(i);
            row.dot(&row) + 1.0 + diag[i]
        })
        .collect();

    let mut alpha = vec![0.0f64; m];
    let mut weights = Array1::<f64>::zeros(x.ncols());
    let mut bias = 0.0f64;
    let mut order: Vec<usize> = (0..m).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < options.max_iterations {
        iterations += 1;
        order.shuffle(&mut rng);

        let mut pg_max = f64::NEG_INFINITY;
        let mut pg_min = f64::INFINITY;
        for &i in &order {
            let y = labels[i];
            let row = x.row(i);
            let gradient = y * (row.dot(&weights) + bias) - 1.0 + diag[i] * alpha[i];
            let projected = if alpha[i] == 0.0 {
                gradient.min(0.0)
            } else {
                gradient
            };
            pg_max = pg_max.max(projected);
            pg_min = pg_min.min(projected);

            if projected.abs() > GRADIENT_FLOOR {
                let previous = alpha[i];
                alpha[i] = (previous - gradient / qd[i]).max(0.0);
                let step = (alpha[i] - previous) * y;
                weights.scaled_add(step, &row);
                bias += step;
            }
        }

        if pg_max - pg_min <= options.epsilon {
            converged = true;
            break;
        }
    }

    if !converged {
        log::debug!(
            "L2-SVM stopped after {} epochs without reaching epsilon = {}",
            iterations,
            options.epsilon
        );
    }

    Ok(LinearSvm {
        weights,
        bias,
        iterations,
        converged,
    })
}
