//! # Training data
//!
//! [`SparseArrayData`] holds the observed cells of an N-mode array once per
//! mode, each copy rotated so that any mode can be walked hyperplane by
//! hyperplane during Gibbs sampling. Whole-array statistics are computed from
//! the mode-0 view as parallel reductions over its hyperplanes.

use std::fmt;

use log::{debug, warn};
use rayon::prelude::*;

use crate::index::MultiIndex;
use crate::model::Predict;
use crate::sparse::{RotatedSparseView, TensorInput};
use crate::utils::{check_mode, shape_mismatch};

/// Observed training cells of an N-mode array, rotated around every mode.
#[derive(Debug, Clone)]
pub struct SparseArrayData {
    dims: Vec<usize>,
    nnz: usize,
    dense: bool,
    views: Vec<RotatedSparseView>,
}

impl SparseArrayData {
    /// Builds one rotated view per mode from dense or sparse input.
    pub fn new(input: impl Into<TensorInput>) -> anyhow::Result<Self> {
        let input = input.into();
        let dims = input.dims();
        if dims.is_empty() {
            return Err(shape_mismatch("training data needs at least one mode"));
        }

        let (table, values) = input.coordinate_table();
        let views = (0..dims.len())
            .map(|mode| RotatedSparseView::from_table(&dims, table.view(), &values, mode))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let data = SparseArrayData {
            nnz: values.len(),
            dense: input.is_dense(),
            dims,
            views,
        };
        debug!("Built {} training data: {}", data.name(), data.summary());
        Ok(data)
    }

    pub fn name(&self) -> &'static str {
        if self.dense {
            "DenseTensorData"
        } else {
            "SparseTensorData"
        }
    }

    pub fn is_dense(&self) -> bool {
        self.dense
    }

    pub fn n_modes(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of observed cells.
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Number of cells in the full array.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of unobserved cells.
    pub fn nna(&self) -> usize {
        self.size() - self.nnz
    }

    /// Rotated view around `mode`.
    pub fn view(&self, mode: usize) -> anyhow::Result<&RotatedSparseView> {
        check_mode(mode, self.n_modes())?;
        Ok(&self.views[mode])
    }

    fn reference_view(&self) -> &RotatedSparseView {
        &self.views[0]
    }

    /// Sum of all observed values.
    pub fn sum(&self) -> f64 {
        let view = self.reference_view();
        (0..view.n_planes())
            .into_par_iter()
            .map(|p| view.plane_values(p).iter().sum::<f64>())
            .sum()
    }

    pub fn mean(&self) -> f64 {
        self.sum() / self.nnz as f64
    }

    /// Population variance of the observed values.
    ///
    /// Returns 1.0 when the variance is not positive or not a number, which
    /// happens for constant data or a single observation.
    pub fn variance_total(&self) -> f64 {
        let mean = self.mean();
        let view = self.reference_view();
        let se: f64 = (0..view.n_planes())
            .into_par_iter()
            .map(|p| {
                view.plane_values(p)
                    .iter()
                    .map(|&v| (v - mean) * (v - mean))
                    .sum::<f64>()
            })
            .sum();

        let var = se / self.nnz as f64;
        if var <= 0.0 || var.is_nan() {
            warn!("Variance of training data is {}, using 1.0", var);
            1.0
        } else {
            var
        }
    }

    /// Sum over all observations of the squared prediction error.
    ///
    /// Fails with `FactorError::ShapeMismatch` when the model dims differ
    /// from the data dims.
    pub fn sum_squared_residual<P>(&self, model: &P) -> anyhow::Result<f64>
    where
        P: Predict + Sync + ?Sized,
    {
        if model.dims() != self.dims() {
            return Err(shape_mismatch(format!(
                "model dims {:?} do not match data dims {:?}",
                model.dims(),
                self.dims()
            )));
        }

        let view = self.reference_view();
        Ok((0..view.n_planes())
            .into_par_iter()
            .map(|p| {
                (0..view.n_items_on_plane(p))
                    .map(|k| {
                        let (pos, value) = view.item(p, k);
                        let diff = model.predict(&pos) - value;
                        diff * diff
                    })
                    .sum::<f64>()
            })
            .sum())
    }

    /// Root mean squared error of `model` on the training observations.
    pub fn train_rmse<P>(&self, model: &P) -> anyhow::Result<f64>
    where
        P: Predict + Sync + ?Sized,
    {
        Ok((self.sum_squared_residual(model)? / self.nnz as f64).sqrt())
    }

    /// Coordinate and value of the `item`-th observation of `plane` in `mode`.
    pub fn item(
        &self,
        mode: usize,
        plane: usize,
        item: usize,
    ) -> anyhow::Result<(MultiIndex, f64)> {
        let view = self.checked_view(mode, plane, item)?;
        Ok(view.item(plane, item))
    }

    /// Coordinate of the `item`-th observation of `plane` in `mode`.
    pub fn pos(&self, mode: usize, plane: usize, item: usize) -> anyhow::Result<MultiIndex> {
        let view = self.checked_view(mode, plane, item)?;
        Ok(view.full_coordinate(plane, item))
    }

    fn checked_view(
        &self,
        mode: usize,
        plane: usize,
        item: usize,
    ) -> anyhow::Result<&RotatedSparseView> {
        let view = self.view(mode)?;
        if plane >= view.n_planes() {
            return Err(shape_mismatch(format!(
                "plane {} out of range for mode {} with {} planes",
                plane,
                mode,
                view.n_planes()
            )));
        }
        if item >= view.n_items_on_plane(plane) {
            return Err(shape_mismatch(format!(
                "item {} out of range for plane {} of mode {} with {} items",
                item,
                plane,
                mode,
                view.n_items_on_plane(plane)
            )));
        }
        Ok(view)
    }

    fn summary(&self) -> String {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        let fill_rate = 100.0 * self.nnz as f64 / self.size() as f64;
        format!("{} [{}] ({:.2}%)", self.nnz, dims.join(" x "), fill_rate)
    }
}

impl fmt::Display for SparseArrayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Type: {}", self.name())?;
        writeln!(f, "Size: {}", self.summary())
    }
}
