//! # Gibbs sufficient statistics
//!
//! Resampling column `d` of the factor matrix of mode `m` needs, over every
//! observation `j` in hyperplane `d` of the mode-`m` rotation,
//!
//! ```text
//! v_j = U_a[:, i_a] .* U_b[:, i_b] .* ...     (all modes except m)
//! MM  = sum_j precision * v_j v_j^T
//! rr  = sum_j v_j * sample(y_j)
//! ```
//!
//! `rr` is not scaled by the noise precision here; the sampler applies it when
//! combining `(rr, MM)` with the prior.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::data::SparseArrayData;
use crate::model::ModelView;
use crate::noise::NoiseModel;
use crate::utils::{check_mode, shape_mismatch};

/// Caller-owned output buffer for one hyperplane.
#[derive(Debug, Clone, PartialEq)]
pub struct SufficientStats {
    /// Mean contribution, length `num_latent`.
    pub rr: Array1<f64>,
    /// Symmetric precision contribution, `num_latent x num_latent`.
    pub mm: Array2<f64>,
}

impl SufficientStats {
    pub fn zeros(num_latent: usize) -> Self {
        SufficientStats {
            rr: Array1::zeros(num_latent),
            mm: Array2::zeros((num_latent, num_latent)),
        }
    }

    pub fn num_latent(&self) -> usize {
        self.rr.len()
    }

    pub fn reset(&mut self) {
        self.rr.fill(0.0);
        self.mm.fill(0.0);
    }

    pub fn is_zero(&self) -> bool {
        self.rr.iter().chain(self.mm.iter()).all(|&x| x == 0.0)
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.num_latent();
        (0..n).all(|i| (0..i).all(|j| (self.mm[[i, j]] - self.mm[[j, i]]).abs() <= tolerance))
    }

    /// `(rr, MM)` as nalgebra types, e.g. for a Cholesky factorization of
    /// `prior_precision + MM`.
    pub fn to_nalgebra(&self) -> (DVector<f64>, DMatrix<f64>) {
        let n = self.num_latent();
        (
            DVector::from_iterator(n, self.rr.iter().copied()),
            DMatrix::from_fn(n, n, |i, j| self.mm[[i, j]]),
        )
    }
}

fn check_compatible(
    data: &SparseArrayData,
    model: &ModelView<'_>,
    mode: usize,
) -> anyhow::Result<()> {
    check_mode(mode, data.n_modes())?;
    if model.dims() != data.dims() {
        return Err(shape_mismatch(format!(
            "model dims {:?} do not match data dims {:?}",
            model.dims(),
            data.dims()
        )));
    }
    Ok(())
}

/// Accumulates the statistics of hyperplane `d` of `mode` into `out`.
///
/// `out` is cleared first. Fails with `FactorError::InvalidMode` when `mode`
/// is not a mode of `data`, and with `FactorError::ShapeMismatch` when `d` is
/// not below the dimension size of `mode`.
pub fn accumulate_into<N>(
    data: &SparseArrayData,
    model: &ModelView<'_>,
    noise: &N,
    mode: usize,
    d: usize,
    out: &mut SufficientStats,
) -> anyhow::Result<()>
where
    N: NoiseModel + ?Sized,
{
    check_compatible(data, model, mode)?;
    let num_latent = model.n_latent();
    if out.num_latent() != num_latent || out.mm.dim() != (num_latent, num_latent) {
        return Err(shape_mismatch(format!(
            "statistics buffer has latent dimension {}, model has {}",
            out.num_latent(),
            num_latent
        )));
    }

    if d >= data.dims()[mode] {
        return Err(shape_mismatch(format!(
            "hyperplane {} out of range for mode {} of size {}",
            d,
            mode,
            data.dims()[mode]
        )));
    }

    let view = data.view(mode)?;
    // Factor of the mode in coordinate column c is others[c - 1]
    let others = model.other_factors(mode)?;
    let alpha = noise.precision();

    out.reset();
    let mut row = Array1::<f64>::zeros(num_latent);
    let start = view.plane_start(d);

    for j in view.plane_range(d) {
        if others.is_empty() {
            row.fill(1.0);
        } else {
            row.assign(&others[0].column(view.row_coordinate(j, 1)));
            for c in 2..view.n_coords() {
                row *= &others[c - 1].column(view.row_coordinate(j, c));
            }
        }

        // Lower triangle only, mirrored once the plane is done
        for a in 0..num_latent {
            let scaled = alpha * row[a];
            for b in 0..=a {
                out.mm[[a, b]] += scaled * row[b];
            }
        }

        let pos = view.full_coordinate(d, j - start);
        let noisy = noise.sample(model, &pos, view.row_value(j));
        out.rr.scaled_add(noisy, &row);
    }

    for a in 0..num_latent {
        for b in (a + 1)..num_latent {
            out.mm[[a, b]] = out.mm[[b, a]];
        }
    }
    Ok(())
}

/// Statistics of hyperplane `d` of `mode` in a freshly allocated buffer.
pub fn accumulate<N>(
    data: &SparseArrayData,
    model: &ModelView<'_>,
    noise: &N,
    mode: usize,
    d: usize,
) -> anyhow::Result<SufficientStats>
where
    N: NoiseModel + ?Sized,
{
    let mut out = SufficientStats::zeros(model.n_latent());
    accumulate_into(data, model, noise, mode, d, &mut out)?;
    Ok(out)
}

/// Statistics of every hyperplane of `mode`, computed in parallel.
pub fn mode_statistics<N>(
    data: &SparseArrayData,
    model: &ModelView<'_>,
    noise: &N,
    mode: usize,
) -> anyhow::Result<Vec<SufficientStats>>
where
    N: NoiseModel + ?Sized,
{
    check_compatible(data, model, mode)?;
    let n_planes = data.dims()[mode];

    (0..n_planes)
        .into_par_iter()
        .map(|d| accumulate(data, model, noise, mode, d))
        .collect()
}

/// Sum of the statistics of all hyperplanes; for a full mode this equals the
/// Gram matrix of the Khatri-Rao rows of every observation.
///
/// Returns `None` for an empty slice and fails with
/// `FactorError::ShapeMismatch` when the buffers differ in latent dimension.
pub fn sum_statistics(stats: &[SufficientStats]) -> anyhow::Result<Option<SufficientStats>> {
    let Some(first) = stats.first() else {
        return Ok(None);
    };
    let num_latent = first.num_latent();
    let mut total = SufficientStats::zeros(num_latent);
    for (k, s) in stats.iter().enumerate() {
        if s.num_latent() != num_latent || s.mm.dim() != (num_latent, num_latent) {
            return Err(shape_mismatch(format!(
                "statistics buffer {} has latent dimension {}, expected {}",
                k,
                s.num_latent(),
                num_latent
            )));
        }
        total.rr += &s.rr;
        total.mm += &s.mm;
    }
    Ok(Some(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MultiIndex;
    use crate::model::{FactorModel, FactorModelBuilder, ModelInitType};
    use crate::noise::FixedGaussianNoise;
    use crate::sparse::SparseTensor;
    use crate::FactorError;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn small_data() -> SparseArrayData {
        SparseArrayData::new(
            SparseTensor::new(
                vec![2, 2],
                vec![
                    MultiIndex::from([0, 0]),
                    MultiIndex::from([0, 1]),
                    MultiIndex::from([1, 0]),
                ],
                vec![1.0, 2.0, 3.0],
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn random_data(dims: &[usize], nnz: usize, seed: u64) -> SparseArrayData {
        let mut rng = StdRng::seed_from_u64(seed);
        let coords = (0..nnz)
            .map(|_| {
                let coord: Vec<usize> = dims.iter().map(|&d| rng.random_range(0..d)).collect();
                MultiIndex::from(coord)
            })
            .collect();
        let values = (0..nnz).map(|_| rng.random_range(-2.0..2.0)).collect();
        SparseArrayData::new(SparseTensor::new(dims.to_vec(), coords, values).unwrap()).unwrap()
    }

    /// Adds a constant to every observed value, to check that `rr` uses the
    /// sampled value rather than the raw one.
    struct ShiftedNoise(f64);

    impl NoiseModel for ShiftedNoise {
        fn precision(&self) -> f64 {
            1.0
        }

        fn sample(&self, _model: &ModelView<'_>, _pos: &MultiIndex, value: f64) -> f64 {
            value + self.0
        }
    }

    /// Remembers every coordinate it is asked to sample.
    #[derive(Default)]
    struct RecordingNoise {
        seen: Mutex<Vec<MultiIndex>>,
    }

    impl NoiseModel for RecordingNoise {
        fn precision(&self) -> f64 {
            1.0
        }

        fn sample(&self, _model: &ModelView<'_>, pos: &MultiIndex, value: f64) -> f64 {
            self.seen.lock().push(pos.clone());
            value
        }
    }

    #[test]
    fn test_two_mode_statistics() {
        let data = small_data();
        let model = FactorModel::from_factors(vec![
            array![[1.0, 2.0], [0.0, 1.0]],
            array![[3.0, 1.0], [1.0, -1.0]],
        ])
        .unwrap();
        let noise = FixedGaussianNoise::new(2.0).unwrap();

        // Plane 0 of mode 0 holds (0,0)=1 and (0,1)=2, so the rows are
        // columns 0 and 1 of U1: [3, 1] and [1, -1]
        let stats = accumulate(&data, &model.full(), &noise, 0, 0).unwrap();
        let expected_mm = array![
            [2.0 * (9.0 + 1.0), 2.0 * (3.0 - 1.0)],
            [2.0 * (3.0 - 1.0), 2.0 * (1.0 + 1.0)]
        ];
        let expected_rr = array![3.0 * 1.0 + 1.0 * 2.0, 1.0 * 1.0 - 1.0 * 2.0];

        assert_abs_diff_eq!(stats.mm, expected_mm, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.rr, expected_rr, epsilon = 1e-12);

        // Plane 0 of mode 1 holds (0,0)=1 and (1,0)=3, rows from U0
        let stats = accumulate(&data, &model.full(), &noise, 1, 0).unwrap();
        assert_abs_diff_eq!(
            stats.mm,
            array![[2.0 * 5.0, 2.0 * 2.0], [2.0 * 2.0, 2.0 * 1.0]],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(stats.rr, array![1.0 + 6.0, 3.0], epsilon = 1e-12);
    }

    #[test]
    fn test_khatri_rao_rows_for_three_modes() {
        let data = random_data(&[4, 3, 5], 40, 11);
        let model = FactorModelBuilder::new(3)
            .init_type(ModelInitType::Random)
            .seed(5)
            .build(&[4, 3, 5])
            .unwrap();
        let noise = FixedGaussianNoise::new(1.5).unwrap();

        for mode in 0..3 {
            let view = data.view(mode).unwrap();
            for d in 0..data.dims()[mode] {
                let stats = accumulate(&data, &model.full(), &noise, mode, d).unwrap();

                let mut expected = SufficientStats::zeros(3);
                for k in 0..view.n_items_on_plane(d) {
                    let (pos, value) = view.item(d, k);
                    let mut v = Array1::<f64>::ones(3);
                    for m in (0..3).filter(|&m| m != mode) {
                        v *= &model.col(m, pos[m]).unwrap();
                    }
                    for a in 0..3 {
                        for b in 0..3 {
                            expected.mm[[a, b]] += 1.5 * v[a] * v[b];
                        }
                    }
                    expected.rr.scaled_add(value, &v);
                }

                assert_abs_diff_eq!(stats.mm, expected.mm, epsilon = 1e-10);
                assert_abs_diff_eq!(stats.rr, expected.rr, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_symmetric_and_positive_definite() {
        let data = random_data(&[6, 7, 3], 80, 3);
        let model = FactorModelBuilder::new(4)
            .init_type(ModelInitType::Random)
            .seed(9)
            .build(&[6, 7, 3])
            .unwrap();
        let noise = FixedGaussianNoise::default();

        for stats in mode_statistics(&data, &model.full(), &noise, 1).unwrap() {
            assert!(stats.is_symmetric(0.0));

            // Adding an identity prior precision keeps the matrix positive definite
            let (_, mm) = stats.to_nalgebra();
            let precision = mm + DMatrix::<f64>::identity(4, 4);
            assert!(precision.cholesky().is_some());
        }
    }

    #[test]
    fn test_empty_plane_is_zero() {
        let data = SparseArrayData::new(
            SparseTensor::new(vec![3, 2], vec![MultiIndex::from([2, 1])], vec![1.0]).unwrap(),
        )
        .unwrap();
        let model = FactorModelBuilder::new(2)
            .init_type(ModelInitType::Random)
            .seed(1)
            .build(&[3, 2])
            .unwrap();

        let mut stats = SufficientStats::zeros(2);
        stats.rr.fill(9.0);
        let noise = FixedGaussianNoise::default();
        accumulate_into(&data, &model.full(), &noise, 0, 1, &mut stats).unwrap();
        assert!(stats.is_zero());

        let stats = accumulate(&data, &model.full(), &noise, 0, 2).unwrap();
        assert!(!stats.is_zero());
    }

    #[test]
    fn test_noise_sample_feeds_rr() {
        let data = small_data();
        let model =
            FactorModel::from_factors(vec![array![[1.0, 1.0]], array![[2.0, 3.0]]]).unwrap();

        let raw = accumulate(&data, &model.full(), &ShiftedNoise(0.0), 0, 0).unwrap();
        let shifted = accumulate(&data, &model.full(), &ShiftedNoise(10.0), 0, 0).unwrap();

        assert_abs_diff_eq!(raw.rr[0], 2.0 * 1.0 + 3.0 * 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(shifted.rr[0], raw.rr[0] + 10.0 * (2.0 + 3.0), epsilon = 1e-12);
        assert_eq!(raw.mm, shifted.mm);
    }

    #[test]
    fn test_single_mode_data() {
        let data = SparseArrayData::new(
            SparseTensor::new(
                vec![3],
                vec![MultiIndex::from([1]), MultiIndex::from([1])],
                vec![2.0, 4.0],
            )
            .unwrap(),
        )
        .unwrap();
        let model = FactorModel::init(2, &[3], ModelInitType::Zero).unwrap();

        let noise = FixedGaussianNoise::new(1.0).unwrap();
        let stats = accumulate(&data, &model.full(), &noise, 0, 1).unwrap();
        assert_eq!(stats.mm, array![[2.0, 2.0], [2.0, 2.0]]);
        assert_eq!(stats.rr, array![6.0, 6.0]);
    }

    #[test]
    fn test_mode_statistics_matches_sequential() {
        let data = random_data(&[5, 4], 15, 21);
        let model = FactorModelBuilder::new(3)
            .init_type(ModelInitType::Random)
            .seed(2)
            .build(&[5, 4])
            .unwrap();
        let noise = FixedGaussianNoise::default();

        let parallel = mode_statistics(&data, &model.full(), &noise, 0).unwrap();
        assert_eq!(parallel.len(), 5);
        for (d, stats) in parallel.iter().enumerate() {
            assert_eq!(stats, &accumulate(&data, &model.full(), &noise, 0, d).unwrap());
        }

        // Every observation lands on exactly one plane of each mode
        for mode in 0..2 {
            let view = data.view(mode).unwrap();
            let items: usize = (0..view.n_planes()).map(|p| view.n_items_on_plane(p)).sum();
            assert_eq!(items, data.nnz());
        }

        let total = sum_statistics(&parallel).unwrap().unwrap();
        assert!(total.is_symmetric(1e-12));
        let mut expected = SufficientStats::zeros(3);
        for stats in &parallel {
            expected.rr += &stats.rr;
            expected.mm += &stats.mm;
        }
        assert_eq!(total, expected);
    }

    #[test]
    fn test_sum_statistics_shapes() {
        assert!(sum_statistics(&[]).unwrap().is_none());

        let mut a = SufficientStats::zeros(2);
        a.rr.fill(1.0);
        let mut b = SufficientStats::zeros(2);
        b.mm.fill(2.0);
        let total = sum_statistics(&[a.clone(), b]).unwrap().unwrap();
        assert_eq!(total.rr, array![1.0, 1.0]);
        assert_eq!(total.mm, array![[2.0, 2.0], [2.0, 2.0]]);

        let err = sum_statistics(&[a, SufficientStats::zeros(3)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FactorError>(),
            Some(FactorError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_noise_receives_full_coordinates() {
        let data = random_data(&[4, 5, 3], 30, 17);
        let model = FactorModelBuilder::new(2)
            .init_type(ModelInitType::Random)
            .seed(8)
            .build(&[4, 5, 3])
            .unwrap();
        let noise = RecordingNoise::default();
        let view = data.view(1).unwrap();

        for d in 0..data.dims()[1] {
            noise.seen.lock().clear();
            accumulate(&data, &model.full(), &noise, 1, d).unwrap();

            let expected: Vec<MultiIndex> =
                (0..view.n_items_on_plane(d)).map(|k| view.item(d, k).0).collect();
            assert_eq!(*noise.seen.lock(), expected);
            assert!(expected.iter().all(|pos| pos[1] == d));
        }
    }

    #[test]
    fn test_sub_view_model() {
        let data = small_data();
        let model = FactorModel::from_factors(vec![
            array![[9.0, 1.0, 2.0]],
            array![[9.0, 9.0, 3.0, 4.0]],
        ])
        .unwrap();
        let sub = model
            .full()
            .sub_view(MultiIndex::from([1, 2]), vec![2, 2])
            .unwrap();

        // Plane 1 of mode 0 holds (1,0)=3, its row is U1 column 2 + 0 = [3]
        let stats = accumulate(&data, &sub, &FixedGaussianNoise::new(1.0).unwrap(), 0, 1).unwrap();
        assert_eq!(stats.mm, array![[9.0]]);
        assert_eq!(stats.rr, array![9.0]);
    }

    #[test]
    fn test_errors() {
        let data = small_data();
        let model = FactorModel::init(2, &[2, 2], ModelInitType::Zero).unwrap();
        let noise = FixedGaussianNoise::default();

        let err = accumulate(&data, &model.full(), &noise, 2, 0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FactorError>(),
            Some(&FactorError::InvalidMode { mode: 2, n_modes: 2 })
        );
        assert!(mode_statistics(&data, &model.full(), &noise, 3).is_err());
        assert!(accumulate(&data, &model.full(), &noise, 1, 2).is_err());

        let mismatched = FactorModel::init(2, &[2, 3], ModelInitType::Zero).unwrap();
        let err = accumulate(&data, &mismatched.full(), &noise, 0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FactorError>(),
            Some(FactorError::ShapeMismatch(_))
        ));

        let mut wrong_buffer = SufficientStats::zeros(3);
        assert!(accumulate_into(&data, &model.full(), &noise, 0, 0, &mut wrong_buffer).is_err());
    }
}
