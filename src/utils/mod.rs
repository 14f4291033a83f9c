use anyhow::bail;
use thiserror::Error;

/// Error kinds raised by the factorization core.
///
/// Public operations return `anyhow::Result`; callers that need to tell the
/// kinds apart can `downcast_ref::<FactorError>()` on the returned error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactorError {
    #[error("Invalid mode {mode}: expected a mode in 0..{n_modes}")]
    InvalidMode { mode: usize, n_modes: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("No link matrix available in mode {mode}")]
    MissingLinkMatrix { mode: usize },

    #[error("Prediction from features is only implemented for 2 modes, model has {n_modes}")]
    UnsupportedModeCount { n_modes: usize },
}

pub(crate) fn check_mode(mode: usize, n_modes: usize) -> anyhow::Result<()> {
    if mode >= n_modes {
        bail!(FactorError::InvalidMode { mode, n_modes });
    }
    Ok(())
}

pub(crate) fn shape_mismatch(message: impl Into<String>) -> anyhow::Error {
    FactorError::ShapeMismatch(message.into()).into()
}
