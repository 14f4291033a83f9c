use std::borrow::Cow;

use ndarray::{Array2, ArrayD, ArrayView2, Dimension};

use crate::index::MultiIndex;
use crate::utils::shape_mismatch;

pub mod coo;
pub mod csc;
pub mod csr;
pub mod rotated;

pub use rotated::RotatedSparseView;

/// Explicit list of observed cells of an N-mode array.
///
/// Coordinates are kept as an `nnz x n_modes` table, one row per observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    dims: Vec<usize>,
    coords: Array2<usize>,
    values: Vec<f64>,
}

impl SparseTensor {
    /// Builds a sparse tensor from `(coordinate, value)` pairs.
    ///
    /// Fails with `FactorError::ShapeMismatch` when the number of coordinates
    /// and values differ, when a coordinate has the wrong number of modes, or
    /// when a component is not below the dimension size of its mode.
    pub fn new(
        dims: Vec<usize>,
        coords: Vec<MultiIndex>,
        values: Vec<f64>,
    ) -> anyhow::Result<Self> {
        let n_modes = dims.len();
        if coords.len() != values.len() {
            return Err(shape_mismatch(format!(
                "{} coordinates but {} values",
                coords.len(),
                values.len()
            )));
        }

        let mut flat = Vec::with_capacity(coords.len() * n_modes);
        for coord in &coords {
            if coord.n_modes() != n_modes {
                return Err(shape_mismatch(format!(
                    "coordinate {} has {} modes, expected {}",
                    coord,
                    coord.n_modes(),
                    n_modes
                )));
            }
            flat.extend_from_slice(coord.as_slice());
        }

        let coords = Array2::from_shape_vec((values.len(), n_modes), flat)
            .map_err(|e| shape_mismatch(e.to_string()))?;
        Self::from_table(dims, coords, values)
    }

    /// Builds a sparse tensor from one coordinate column per mode.
    pub fn from_columns(
        dims: Vec<usize>,
        columns: &[Vec<usize>],
        values: Vec<f64>,
    ) -> anyhow::Result<Self> {
        if columns.len() != dims.len() {
            return Err(shape_mismatch(format!(
                "{} coordinate columns for {} modes",
                columns.len(),
                dims.len()
            )));
        }
        let nnz = values.len();
        if let Some(col) = columns.iter().find(|c| c.len() != nnz) {
            return Err(shape_mismatch(format!(
                "coordinate column of length {} for {} values",
                col.len(),
                nnz
            )));
        }

        let coords = Array2::from_shape_fn((nnz, dims.len()), |(row, mode)| columns[mode][row]);
        Self::from_table(dims, coords, values)
    }

    pub(crate) fn from_table(
        dims: Vec<usize>,
        coords: Array2<usize>,
        values: Vec<f64>,
    ) -> anyhow::Result<Self> {
        if dims.is_empty() {
            return Err(shape_mismatch("a tensor needs at least one mode"));
        }
        if coords.nrows() != values.len() || coords.ncols() != dims.len() {
            return Err(shape_mismatch(format!(
                "coordinate table is {} x {}, expected {} x {}",
                coords.nrows(),
                coords.ncols(),
                values.len(),
                dims.len()
            )));
        }
        for (row, coord) in coords.rows().into_iter().enumerate() {
            for (mode, (&c, &d)) in coord.iter().zip(dims.iter()).enumerate() {
                if c >= d {
                    return Err(shape_mismatch(format!(
                        "observation {} has index {} in mode {} of size {}",
                        row, c, mode, d
                    )));
                }
            }
        }

        Ok(SparseTensor { dims, coords, values })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn n_modes(&self) -> usize {
        self.dims.len()
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn coords(&self) -> ArrayView2<'_, usize> {
        self.coords.view()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn coordinate(&self, i: usize) -> MultiIndex {
        MultiIndex::from(self.coords.row(i).to_vec())
    }
}

/// Raw training input: either every cell of a dense array is observed, or an
/// explicit list of observed cells is given.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorInput {
    Dense(ArrayD<f64>),
    Sparse(SparseTensor),
}

impl TensorInput {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            TensorInput::Dense(array) => array.shape().to_vec(),
            TensorInput::Sparse(tensor) => tensor.dims().to_vec(),
        }
    }

    pub fn n_modes(&self) -> usize {
        match self {
            TensorInput::Dense(array) => array.ndim(),
            TensorInput::Sparse(tensor) => tensor.n_modes(),
        }
    }

    pub fn nnz(&self) -> usize {
        match self {
            TensorInput::Dense(array) => array.len(),
            TensorInput::Sparse(tensor) => tensor.nnz(),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, TensorInput::Dense(_))
    }

    /// The `nnz x n_modes` coordinate table and the matching values.
    ///
    /// Dense arrays synthesize their coordinates by enumerating the full index
    /// space in row-major order.
    pub fn coordinate_table(&self) -> (Cow<'_, Array2<usize>>, Cow<'_, [f64]>) {
        match self {
            TensorInput::Sparse(tensor) => (
                Cow::Borrowed(&tensor.coords),
                Cow::Borrowed(tensor.values.as_slice()),
            ),
            TensorInput::Dense(array) => {
                let mut table = Array2::zeros((array.len(), array.ndim()));
                for (row, (idx, _)) in array.indexed_iter().enumerate() {
                    for (mode, &c) in idx.slice().iter().enumerate() {
                        table[[row, mode]] = c;
                    }
                }
                let values: Vec<f64> = array.iter().copied().collect();
                (Cow::Owned(table), Cow::Owned(values))
            }
        }
    }
}

impl From<SparseTensor> for TensorInput {
    fn from(tensor: SparseTensor) -> Self {
        TensorInput::Sparse(tensor)
    }
}

impl From<ArrayD<f64>> for TensorInput {
    fn from(array: ArrayD<f64>) -> Self {
        TensorInput::Dense(array)
    }
}

impl From<Array2<f64>> for TensorInput {
    fn from(array: Array2<f64>) -> Self {
        TensorInput::Dense(array.into_dyn())
    }
}
