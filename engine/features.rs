use crate::matrix::AssociationMatrix;
use crate::svm::LinearSvm;
use ndarray::Array2;

/// A feature space defined by a set of column genes: the feature vector of any
/// gene `g` is its association with each column gene, `[M(g, c) for c in columns]`.
///
/// The classifier never looks at gene-intrinsic attributes; proximity in the network
/// to the training genes is the only signal.
pub struct NetworkFeatures<'a> {
    matrix: &'a AssociationMatrix,
    columns: Vec<usize>,
}

impl<'a> NetworkFeatures<'a> {
    pub fn new(matrix: &'a AssociationMatrix, columns: Vec<usize>) -> Self {
        Self { matrix, columns }
    }

    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    /// Dense design matrix with one row per entry of `rows`.
    pub fn design(&self, rows: &[usize]) -> Array2<f64> {
        Array2::from_shape_fn((rows.len(), self.columns.len()), |(i, j)| {
            self.matrix.value(rows[i], self.columns[j])
        })
    }

    /// Decision value of `model` for the gene at `row`, computed straight from the
    /// matrix so that scoring the whole genome never materializes a design matrix.
    pub fn score(&self, model: &LinearSvm, row: usize) -> f64 {
        let weights = model.weights();
        debug_assert_eq!(weights.len(), self.columns.len());
        let dot: f64 = self
            .columns
            .iter()
            .zip(weights.iter())
            .map(|(&column, &w)| w * self.matrix.value(row, column))
            .sum();
        dot + model.bias()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixBuilder;
    use crate::svm::{SvmOptions, train_l2_svm};
    use approx::assert_relative_eq;

    #[test]
    fn design_rows_follow_column_order_and_default_missing_values() {
        let mut builder = MatrixBuilder::new();
        builder.add_pair("A", "B", 0.9);
        builder.add_pair("A", "C", 0.1);
        builder.add_gene("D");
        let matrix = builder.build(0.0);

        let features = NetworkFeatures::new(&matrix, vec![1, 2]);
        let x = features.design(&[0, 3]);
        assert_eq!(x.dim(), (2, 2));
        assert_relative_eq!(x[[0, 0]], 0.9, epsilon = 1e-6);
        assert_relative_eq!(x[[0, 1]], 0.1, epsilon = 1e-6);
        assert_eq!(x[[1, 0]], 0.0);
        assert_eq!(x[[1, 1]], 0.0);
    }

    #[test]
    fn streamed_scores_match_design_matrix_scores() {
        let mut builder = MatrixBuilder::new();
        builder.add_pair("P1", "P2", 1.0);
        builder.add_pair("N1", "N2", 1.0);
        builder.add_pair("P1", "X", 0.4);
        builder.add_pair("N2", "X", 0.2);
        let matrix = builder.build(0.0);
        let rows: Vec<usize> = ["P1", "P2", "N1", "N2"]
            .iter()
            .map(|g| matrix.index_of(g).unwrap())
            .collect();

        let features = NetworkFeatures::new(&matrix, rows.clone());
        let x = features.design(&rows);
        let model = train_l2_svm(x.view(), &[1.0, 1.0, -1.0, -1.0], &SvmOptions::default(), 7)
            .unwrap();

        let x_row = matrix.index_of("X").unwrap();
        let query = features.design(&[x_row]);
        assert_relative_eq!(
            features.score(&model, x_row),
            model.decision(query.row(0)),
            epsilon = 1e-12
        );
    }
}
