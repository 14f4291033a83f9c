use nalgebra_sparse::CscMatrix;
use ndarray::Array2;

use super::{SparseTensor, TensorInput};

impl From<&CscMatrix<f64>> for SparseTensor {
    fn from(matrix: &CscMatrix<f64>) -> Self {
        let nnz = matrix.nnz();
        let mut coords = Array2::zeros((nnz, 2));
        let mut k = 0;

        for (col, window) in matrix.col_offsets().windows(2).enumerate() {
            for &row in &matrix.row_indices()[window[0]..window[1]] {
                coords[[k, 0]] = row;
                coords[[k, 1]] = col;
                k += 1;
            }
        }

        SparseTensor {
            dims: vec![matrix.nrows(), matrix.ncols()],
            coords,
            values: matrix.values().to_vec(),
        }
    }
}

impl From<&CscMatrix<f64>> for TensorInput {
    fn from(matrix: &CscMatrix<f64>) -> Self {
        TensorInput::Sparse(SparseTensor::from(matrix))
    }
}
