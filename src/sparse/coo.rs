use nalgebra_sparse::CooMatrix;
use ndarray::Array2;

use super::{SparseTensor, TensorInput};

/// Duplicate entries of the COO matrix are kept as separate observations.
impl From<&CooMatrix<f64>> for SparseTensor {
    fn from(matrix: &CooMatrix<f64>) -> Self {
        let nnz = matrix.nnz();
        let mut coords = Array2::zeros((nnz, 2));
        let mut values = Vec::with_capacity(nnz);
        for (k, (row, col, &value)) in matrix.triplet_iter().enumerate() {
            coords[[k, 0]] = row;
            coords[[k, 1]] = col;
            values.push(value);
        }

        SparseTensor {
            dims: vec![matrix.nrows(), matrix.ncols()],
            coords,
            values,
        }
    }
}

impl From<&CooMatrix<f64>> for TensorInput {
    fn from(matrix: &CooMatrix<f64>) -> Self {
        TensorInput::Sparse(SparseTensor::from(matrix))
    }
}
