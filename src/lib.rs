pub mod data;
pub mod index;
pub mod model;
pub mod noise;
pub mod sparse;
pub mod stats;
mod utils;

pub use data::SparseArrayData;
pub use index::MultiIndex;
pub use model::{FactorModel, FactorModelBuilder, ModelInitType, ModelView, Predict};
pub use noise::{FixedGaussianNoise, NoiseModel};
pub use sparse::{RotatedSparseView, SparseTensor, TensorInput};
pub use stats::SufficientStats;
pub use utils::FactorError;
