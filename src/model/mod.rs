use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::index::MultiIndex;
use crate::utils::{check_mode, shape_mismatch, FactorError};

pub mod view;
pub use view::ModelView;

/// Anything that can predict the value of a single cell.
pub trait Predict {
    /// Number of indices per mode that `predict` accepts.
    fn dims(&self) -> &[usize];

    fn predict(&self, pos: &MultiIndex) -> f64;
}

/// How factor matrices are filled when a model is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelInitType {
    /// i.i.d. standard normal draws
    Random,
    #[default]
    Zero,
}

impl FromStr for ModelInitType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(ModelInitType::Random),
            "zero" => Ok(ModelInitType::Zero),
            other => Err(anyhow!("Unknown model init type: {}", other)),
        }
    }
}

impl fmt::Display for ModelInitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelInitType::Random => write!(f, "random"),
            ModelInitType::Zero => write!(f, "zero"),
        }
    }
}

/// Side information for one mode: maps a feature vector into latent space as
/// `beta * features + mu`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMatrix {
    /// `num_latent x num_features`
    pub beta: Array2<f64>,
    /// `num_latent`
    pub mu: Array1<f64>,
}

/// Plain dense tables describing a [`FactorModel`], for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub num_latent: usize,
    pub dims: Vec<usize>,
    pub factors: Vec<Array2<f64>>,
    #[serde(default)]
    pub links: Vec<Option<LinkMatrix>>,
}

pub struct FactorModelBuilder {
    num_latent: usize,
    init_type: ModelInitType,
    seed: Option<u64>,
}

impl FactorModelBuilder {
    pub fn new(num_latent: usize) -> Self {
        FactorModelBuilder {
            num_latent,
            init_type: ModelInitType::default(),
            seed: None,
        }
    }

    pub fn init_type(mut self, init_type: ModelInitType) -> Self {
        self.init_type = init_type;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self, dims: &[usize]) -> anyhow::Result<FactorModel> {
        if self.num_latent == 0 {
            return Err(shape_mismatch("latent dimension must be at least 1"));
        }
        if dims.is_empty() {
            return Err(shape_mismatch("a model needs at least one mode"));
        }

        let factors: Vec<Array2<f64>> = match self.init_type {
            ModelInitType::Zero => dims
                .iter()
                .map(|&d| Array2::zeros((self.num_latent, d)))
                .collect(),
            ModelInitType::Random => {
                let mut rng = match self.seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                    None => ChaCha8Rng::from_os_rng(),
                };
                dims.iter()
                    .map(|&d| {
                        Array2::from_shape_simple_fn((self.num_latent, d), || {
                            rng.sample::<f64, _>(StandardNormal)
                        })
                    })
                    .collect()
            }
        };

        info!(
            "Initialized {} model with {} latent dimensions for dims {:?}",
            self.init_type, self.num_latent, dims
        );

        Ok(FactorModel {
            links: vec![None; dims.len()],
            dims: dims.to_vec(),
            num_latent: self.num_latent,
            factors,
        })
    }
}

/// One `num_latent x dim` factor matrix per mode, plus optional link matrices.
///
/// Column `i` of factor matrix `m` is the latent vector of index `i` in mode `m`.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    factors: Vec<Array2<f64>>,
    links: Vec<Option<LinkMatrix>>,
    num_latent: usize,
    dims: Vec<usize>,
}

impl FactorModel {
    pub fn init(
        num_latent: usize,
        dims: &[usize],
        init_type: ModelInitType,
    ) -> anyhow::Result<Self> {
        FactorModelBuilder::new(num_latent).init_type(init_type).build(dims)
    }

    /// Wraps existing factor matrices, which must share their number of rows.
    pub fn from_factors(factors: Vec<Array2<f64>>) -> anyhow::Result<Self> {
        let num_latent = match factors.first() {
            Some(u) => u.nrows(),
            None => return Err(shape_mismatch("a model needs at least one mode")),
        };
        if let Some((mode, u)) = factors.iter().enumerate().find(|(_, u)| u.nrows() != num_latent) {
            return Err(shape_mismatch(format!(
                "factor matrix of mode {} has {} latent rows, expected {}",
                mode,
                u.nrows(),
                num_latent
            )));
        }

        Ok(FactorModel {
            dims: factors.iter().map(|u| u.ncols()).collect(),
            links: vec![None; factors.len()],
            num_latent,
            factors,
        })
    }

    pub fn n_modes(&self) -> usize {
        self.factors.len()
    }

    pub fn n_latent(&self) -> usize {
        self.num_latent
    }

    /// Total number of latent vectors, summed over all modes.
    pub fn n_samples(&self) -> usize {
        self.dims.iter().sum()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Factor matrix of `mode`.
    pub fn u(&self, mode: usize) -> anyhow::Result<&Array2<f64>> {
        check_mode(mode, self.n_modes())?;
        Ok(&self.factors[mode])
    }

    /// Mutable access to the factor matrix of `mode`; its shape is fixed.
    pub fn u_mut(&mut self, mode: usize) -> anyhow::Result<ArrayViewMut2<'_, f64>> {
        check_mode(mode, self.n_modes())?;
        Ok(self.factors[mode].view_mut())
    }

    /// Latent vector of index `i` in `mode`.
    pub fn col(&self, mode: usize, i: usize) -> anyhow::Result<ArrayView1<'_, f64>> {
        let u = self.u(mode)?;
        if i >= u.ncols() {
            return Err(shape_mismatch(format!(
                "column {} out of range for mode {} with {} columns",
                i,
                mode,
                u.ncols()
            )));
        }
        Ok(u.column(i))
    }

    /// Factor matrices of every mode except `mode`, in ascending mode order.
    pub fn other_factors(&self, mode: usize) -> anyhow::Result<Vec<ArrayView2<'_, f64>>> {
        check_mode(mode, self.n_modes())?;
        Ok(self
            .factors
            .iter()
            .enumerate()
            .filter(|&(m, _)| m != mode)
            .map(|(_, u)| u.view())
            .collect())
    }

    /// View covering the whole model.
    pub fn full(&self) -> ModelView<'_> {
        ModelView::new(self)
    }

    /// Sets the side information of `mode`.
    ///
    /// `beta` must have `num_latent` rows. Without an explicit `mu` the offset
    /// defaults to the mean latent vector of the mode.
    pub fn set_link_matrix(
        &mut self,
        mode: usize,
        beta: Array2<f64>,
        mu: Option<Array1<f64>>,
    ) -> anyhow::Result<()> {
        check_mode(mode, self.n_modes())?;
        if beta.nrows() != self.num_latent {
            return Err(shape_mismatch(format!(
                "link matrix has {} rows, expected latent dimension {}",
                beta.nrows(),
                self.num_latent
            )));
        }

        let mu = match mu {
            Some(mu) if mu.len() != self.num_latent => {
                return Err(shape_mismatch(format!(
                    "link offset has length {}, expected latent dimension {}",
                    mu.len(),
                    self.num_latent
                )))
            }
            Some(mu) => mu,
            None => self.factors[mode]
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(self.num_latent)),
        };

        self.links[mode] = Some(LinkMatrix { beta, mu });
        Ok(())
    }

    pub fn link_matrix(&self, mode: usize) -> anyhow::Result<Option<&LinkMatrix>> {
        check_mode(mode, self.n_modes())?;
        Ok(self.links[mode].as_ref())
    }

    /// Latent vector for a feature vector of `mode`.
    pub fn predict_latent(
        &self,
        mode: usize,
        features: ArrayView1<'_, f64>,
    ) -> anyhow::Result<Array1<f64>> {
        let link = self
            .link_matrix(mode)?
            .ok_or(FactorError::MissingLinkMatrix { mode })?;
        if features.len() != link.beta.ncols() {
            return Err(shape_mismatch(format!(
                "feature vector has length {}, link matrix of mode {} expects {}",
                features.len(),
                mode,
                link.beta.ncols()
            )));
        }
        Ok(link.beta.dot(&features) + &link.mu)
    }

    /// Predicts the full column of the opposite mode for an entity of `mode`
    /// described only by its features. Defined for two-mode models only.
    pub fn predict_from_features(
        &self,
        mode: usize,
        features: ArrayView1<'_, f64>,
    ) -> anyhow::Result<Array1<f64>> {
        check_mode(mode, self.n_modes())?;
        if self.n_modes() != 2 {
            bail!(FactorError::UnsupportedModeCount { n_modes: self.n_modes() });
        }

        let latent = self.predict_latent(mode, features)?;
        let other = (mode + 1) % 2;
        Ok(self.factors[other].t().dot(&latent))
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            num_latent: self.num_latent,
            dims: self.dims.clone(),
            factors: self.factors.clone(),
            links: self.links.clone(),
        }
    }

    pub fn from_snapshot(snapshot: &ModelSnapshot) -> anyhow::Result<Self> {
        validate_snapshot(snapshot)?;
        let mut links = snapshot.links.clone();
        links.resize(snapshot.dims.len(), None);

        info!(
            "Restored model with {} latent dimensions for dims {:?}",
            snapshot.num_latent, snapshot.dims
        );
        Ok(FactorModel {
            factors: snapshot.factors.clone(),
            links,
            num_latent: snapshot.num_latent,
            dims: snapshot.dims.clone(),
        })
    }

    /// Overwrites this model from `snapshot`, except for `skip_mode` which keeps
    /// its current factor matrix and link matrix.
    pub fn restore(
        &mut self,
        snapshot: &ModelSnapshot,
        skip_mode: Option<usize>,
    ) -> anyhow::Result<()> {
        validate_snapshot(snapshot)?;
        if snapshot.num_latent != self.num_latent || snapshot.dims.len() != self.n_modes() {
            return Err(shape_mismatch(format!(
                "snapshot has {} modes with {} latent dimensions, model has {} modes with {}",
                snapshot.dims.len(),
                snapshot.num_latent,
                self.n_modes(),
                self.num_latent
            )));
        }
        if let Some(mode) = skip_mode {
            check_mode(mode, self.n_modes())?;
        }

        for mode in (0..self.n_modes()).filter(|&m| Some(m) != skip_mode) {
            self.factors[mode] = snapshot.factors[mode].clone();
            self.links[mode] = snapshot.links.get(mode).cloned().flatten();
            self.dims[mode] = snapshot.dims[mode];
        }

        info!(
            "Restored {} of {} modes from snapshot",
            self.n_modes() - usize::from(skip_mode.is_some()),
            self.n_modes()
        );
        Ok(())
    }
}

fn validate_snapshot(snapshot: &ModelSnapshot) -> anyhow::Result<()> {
    if snapshot.dims.is_empty() || snapshot.factors.len() != snapshot.dims.len() {
        return Err(shape_mismatch(format!(
            "snapshot has {} factor matrices for {} modes",
            snapshot.factors.len(),
            snapshot.dims.len()
        )));
    }
    if snapshot.links.len() > snapshot.dims.len() {
        return Err(shape_mismatch(format!(
            "snapshot has {} link matrices for {} modes",
            snapshot.links.len(),
            snapshot.dims.len()
        )));
    }

    for (mode, (u, &d)) in snapshot.factors.iter().zip(snapshot.dims.iter()).enumerate() {
        if u.dim() != (snapshot.num_latent, d) {
            return Err(shape_mismatch(format!(
                "factor matrix of mode {} is {:?}, expected ({}, {})",
                mode,
                u.dim(),
                snapshot.num_latent,
                d
            )));
        }
    }
    for (mode, link) in snapshot.links.iter().enumerate() {
        if let Some(link) = link {
            if link.beta.nrows() != snapshot.num_latent || link.mu.len() != snapshot.num_latent {
                return Err(shape_mismatch(format!(
                    "link matrix of mode {} does not match latent dimension {}",
                    mode, snapshot.num_latent
                )));
            }
        }
    }
    Ok(())
}

impl Predict for FactorModel {
    fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// `sum_l prod_m U_m[l, pos[m]]`
    fn predict(&self, pos: &MultiIndex) -> f64 {
        debug_assert_eq!(pos.n_modes(), self.n_modes());
        (0..self.num_latent)
            .map(|l| {
                self.factors
                    .iter()
                    .zip(pos.iter())
                    .map(|(u, &i)| u[[l, i]])
                    .product::<f64>()
            })
            .sum()
    }
}

impl fmt::Display for FactorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Model: {} modes, {} latent dimensions, {} samples",
            self.n_modes(),
            self.num_latent,
            self.n_samples()
        )?;
        for (mode, u) in self.factors.iter().enumerate() {
            let norm = u.iter().map(|x| x * x).sum::<f64>().sqrt();
            write!(f, "  U{}: {} x {}, |U{}| = {:.4}", mode, u.nrows(), u.ncols(), mode, norm)?;
            if self.links[mode].is_some() {
                write!(f, " (with link matrix)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
