use std::ops::Range;

use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::index::MultiIndex;
use crate::sparse::TensorInput;
use crate::utils::{check_mode, shape_mismatch};

/// All observations of an array grouped by their index in one mode.
///
/// Each distinct index `p` of the rotated mode owns a contiguous block of rows,
/// the hyperplane `p`. Row `j` of `indices` holds the coordinate of one
/// observation with the rotated mode's component in column 0 and the
/// remaining modes, in ascending mode order, in columns `1..n_modes`.
///
/// Plane boundaries are stored as offsets in the same way a CSR matrix stores
/// its row offsets: plane `p` spans `plane_offsets[p]..plane_offsets[p + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedSparseView {
    mode: usize,
    other_modes: Vec<usize>,
    indices: Array2<usize>,
    values: Vec<f64>,
    plane_offsets: Vec<usize>,
}

impl RotatedSparseView {
    /// Rotates `input` around `mode`.
    ///
    /// Fails with `FactorError::InvalidMode` if `mode` is not a mode of the input.
    pub fn new(input: &TensorInput, mode: usize) -> anyhow::Result<Self> {
        let dims = input.dims();
        let (table, values) = input.coordinate_table();
        Self::from_table(&dims, table.view(), &values, mode)
    }

    /// Rotates a `nnz x n_modes` coordinate table around `mode`.
    pub(crate) fn from_table(
        dims: &[usize],
        table: ArrayView2<'_, usize>,
        values: &[f64],
        mode: usize,
    ) -> anyhow::Result<Self> {
        let n_modes = dims.len();
        check_mode(mode, n_modes)?;
        if table.ncols() != n_modes || table.nrows() != values.len() {
            return Err(shape_mismatch(format!(
                "coordinate table is {} x {} for {} values in {} modes",
                table.nrows(),
                table.ncols(),
                values.len(),
                n_modes
            )));
        }

        let nnz = values.len();
        let n_planes = dims[mode];
        let other_modes: Vec<usize> = (0..n_modes).filter(|&m| m != mode).collect();

        // Bucket sizes, then prefix sums give the plane offsets
        let mut plane_offsets = vec![0usize; n_planes + 1];
        for &p in table.column(mode) {
            if p >= n_planes {
                return Err(shape_mismatch(format!(
                    "index {} in mode {} of size {}",
                    p, mode, n_planes
                )));
            }
            plane_offsets[p + 1] += 1;
        }
        for p in 0..n_planes {
            plane_offsets[p + 1] += plane_offsets[p];
        }

        // Stable placement: rows keep their input order within a plane
        let mut next = plane_offsets[..n_planes].to_vec();
        let mut indices = Array2::zeros((nnz, n_modes));
        let mut rotated_values = vec![0.0; nnz];
        for (src, coord) in table.rows().into_iter().enumerate() {
            let p = coord[mode];
            let dst = next[p];
            next[p] += 1;

            indices[[dst, 0]] = p;
            for (c, &m) in other_modes.iter().enumerate() {
                indices[[dst, c + 1]] = coord[m];
            }
            rotated_values[dst] = values[src];
        }

        debug!(
            "Rotated {} observations around mode {} into {} hyperplanes",
            nnz, mode, n_planes
        );

        Ok(RotatedSparseView {
            mode,
            other_modes,
            indices,
            values: rotated_values,
            plane_offsets,
        })
    }

    /// The mode this view is rotated around.
    pub fn mode(&self) -> usize {
        self.mode
    }

    /// Number of hyperplanes, equal to the dimension size of the rotated mode.
    pub fn n_planes(&self) -> usize {
        self.plane_offsets.len() - 1
    }

    /// Number of coordinate columns per row, equal to the number of modes.
    pub fn n_coords(&self) -> usize {
        self.indices.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Mode stored in coordinate column `c`.
    pub fn mode_of_column(&self, c: usize) -> usize {
        if c == 0 {
            self.mode
        } else {
            self.other_modes[c - 1]
        }
    }

    /// Modes of columns `1..n_coords`, in ascending order.
    pub fn other_modes(&self) -> &[usize] {
        &self.other_modes
    }

    pub fn plane_start(&self, plane: usize) -> usize {
        self.plane_offsets[plane]
    }

    pub fn plane_end(&self, plane: usize) -> usize {
        self.plane_offsets[plane + 1]
    }

    /// Half-open row range of hyperplane `plane`.
    pub fn plane_range(&self, plane: usize) -> Range<usize> {
        self.plane_start(plane)..self.plane_end(plane)
    }

    pub fn n_items_on_plane(&self, plane: usize) -> usize {
        self.plane_end(plane) - self.plane_start(plane)
    }

    pub fn row_coordinate(&self, row: usize, c: usize) -> usize {
        self.indices[[row, c]]
    }

    pub fn row(&self, row: usize) -> ArrayView1<'_, usize> {
        self.indices.row(row)
    }

    pub fn row_value(&self, row: usize) -> f64 {
        self.values[row]
    }

    pub fn indices(&self) -> ArrayView2<'_, usize> {
        self.indices.view()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn plane_values(&self, plane: usize) -> &[f64] {
        &self.values[self.plane_range(plane)]
    }

    /// Un-rotated coordinate of the `item`-th observation of hyperplane `plane`.
    pub fn full_coordinate(&self, plane: usize, item: usize) -> MultiIndex {
        let row = self.indices.row(self.plane_start(plane) + item);
        let mut pos = vec![0usize; self.n_coords()];
        pos[self.mode] = row[0];
        for (c, &m) in self.other_modes.iter().enumerate() {
            pos[m] = row[c + 1];
        }
        MultiIndex::from(pos)
    }

    /// Coordinate and observed value of the `item`-th observation of `plane`.
    pub fn item(&self, plane: usize, item: usize) -> (MultiIndex, f64) {
        let row = self.plane_start(plane) + item;
        (self.full_coordinate(plane, item), self.values[row])
    }
}
