use ndarray::{s, ArrayView1, ArrayView2};

use crate::index::MultiIndex;
use crate::model::{FactorModel, Predict};
use crate::utils::{check_mode, shape_mismatch};

/// Window onto a block of columns of every factor matrix of a [`FactorModel`].
///
/// Coordinates passed to a view are local: index `i` of mode `m` refers to
/// column `offset[m] + i` of the underlying factor matrix.
#[derive(Debug, Clone)]
pub struct ModelView<'a> {
    model: &'a FactorModel,
    offset: MultiIndex,
    dims: Vec<usize>,
}

impl<'a> ModelView<'a> {
    pub fn new(model: &'a FactorModel) -> Self {
        ModelView {
            model,
            offset: MultiIndex::zeros(model.n_modes()),
            dims: model.dims().to_vec(),
        }
    }

    /// View of `dims` columns per mode starting at `offset`, relative to this view.
    pub fn sub_view(&self, offset: MultiIndex, dims: Vec<usize>) -> anyhow::Result<ModelView<'a>> {
        if offset.n_modes() != self.n_modes() || dims.len() != self.n_modes() {
            return Err(shape_mismatch(format!(
                "sub-view with {} offsets and {} dims for {} modes",
                offset.n_modes(),
                dims.len(),
                self.n_modes()
            )));
        }
        let bounds = offset.iter().zip(dims.iter()).zip(self.dims.iter());
        for (mode, ((&o, &d), &available)) in bounds.enumerate() {
            if o + d > available {
                return Err(shape_mismatch(format!(
                    "sub-view columns {}..{} exceed size {} of mode {}",
                    o,
                    o + d,
                    available,
                    mode
                )));
            }
        }

        Ok(ModelView {
            model: self.model,
            offset: &self.offset + &offset,
            dims,
        })
    }

    pub fn model(&self) -> &'a FactorModel {
        self.model
    }

    /// Offset of this view in the coordinates of the underlying model.
    pub fn offset(&self) -> &MultiIndex {
        &self.offset
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn n_modes(&self) -> usize {
        self.model.n_modes()
    }

    pub fn n_latent(&self) -> usize {
        self.model.n_latent()
    }

    /// Columns of the factor matrix of `mode` covered by this view.
    pub fn u(&self, mode: usize) -> anyhow::Result<ArrayView2<'a, f64>> {
        let u = self.model.u(mode)?;
        let start = self.offset[mode];
        Ok(u.slice(s![.., start..start + self.dims[mode]]))
    }

    pub fn col(&self, mode: usize, i: usize) -> anyhow::Result<ArrayView1<'a, f64>> {
        check_mode(mode, self.n_modes())?;
        if i >= self.dims[mode] {
            return Err(shape_mismatch(format!(
                "column {} out of range for mode {} of a view with {} columns",
                i, mode, self.dims[mode]
            )));
        }
        self.model.col(mode, self.offset[mode] + i)
    }

    /// Factor blocks of every mode except `mode`, in ascending mode order.
    pub fn other_factors(&self, mode: usize) -> anyhow::Result<Vec<ArrayView2<'a, f64>>> {
        check_mode(mode, self.n_modes())?;
        (0..self.n_modes())
            .filter(|&m| m != mode)
            .map(|m| self.u(m))
            .collect()
    }
}

impl Predict for ModelView<'_> {
    fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn predict(&self, pos: &MultiIndex) -> f64 {
        self.model.predict(&(&self.offset + pos))
    }
}
