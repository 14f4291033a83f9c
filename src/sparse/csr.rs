use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;

use super::{SparseTensor, TensorInput};

impl From<&CsrMatrix<f64>> for SparseTensor {
    fn from(matrix: &CsrMatrix<f64>) -> Self {
        let nnz = matrix.nnz();
        let mut coords = Array2::zeros((nnz, 2));
        let mut k = 0;

        // Row offsets delimit each row's slice of column indices
        for (row, window) in matrix.row_offsets().windows(2).enumerate() {
            for &col in &matrix.col_indices()[window[0]..window[1]] {
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

impl From<&CsrMatrix<f64>> for TensorInput {
    fn from(matrix: &CsrMatrix<f64>) -> Self {
        TensorInput::Sparse(SparseTensor::from(matrix))
    }
}
