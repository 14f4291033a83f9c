use anyhow::bail;

use crate::index::MultiIndex;
use crate::model::ModelView;

/// Noise model consulted while accumulating sufficient statistics.
///
/// `precision` scales the contribution of every observation to the precision
/// matrix. `sample` returns the value accumulated into the mean vector for one
/// observation; adaptive or latent-variable noise models (censored or binary
/// data) draw it from the current model instead of returning `value` as is.
pub trait NoiseModel: Send + Sync {
    fn precision(&self) -> f64;

    fn sample(&self, model: &ModelView<'_>, pos: &MultiIndex, value: f64) -> f64;
}

/// Gaussian noise with a fixed precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedGaussianNoise {
    precision: f64,
}

impl FixedGaussianNoise {
    pub const DEFAULT_PRECISION: f64 = 5.0;

    pub fn new(precision: f64) -> anyhow::Result<Self> {
        if !precision.is_finite() || precision <= 0.0 {
            bail!("Noise precision must be positive and finite, got {}", precision);
        }
        Ok(FixedGaussianNoise { precision })
    }
}

impl Default for FixedGaussianNoise {
    fn default() -> Self {
        FixedGaussianNoise {
            precision: Self::DEFAULT_PRECISION,
        }
    }
}

impl NoiseModel for FixedGaussianNoise {
    fn precision(&self) -> f64 {
        self.precision
    }

    fn sample(&self, _model: &ModelView<'_>, _pos: &MultiIndex, value: f64) -> f64 {
        value
    }
}
