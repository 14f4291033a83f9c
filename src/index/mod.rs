use std::fmt;
use std::ops::{Add, Index};

use serde::{Deserialize, Serialize};

/// Coordinate of one cell in an N-mode array, one component per mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiIndex(Vec<usize>);

impl MultiIndex {
    pub fn new(components: Vec<usize>) -> Self {
        MultiIndex(components)
    }

    pub fn zeros(n_modes: usize) -> Self {
        MultiIndex(vec![0; n_modes])
    }

    pub fn n_modes(&self) -> usize {
        self.0.len()
    }

    pub fn at(&self, mode: usize) -> usize {
        self.0[mode]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.0.iter()
    }

    /// Product of all components; for a dimension vector this is the cell count.
    pub fn product(&self) -> usize {
        self.0.iter().product()
    }
}

impl Index<usize> for MultiIndex {
    type Output = usize;

    fn index(&self, mode: usize) -> &usize {
        &self.0[mode]
    }
}

/// Elementwise sum. Both operands must have the same number of modes.
impl Add<&MultiIndex> for &MultiIndex {
    type Output = MultiIndex;

    fn add(self, other: &MultiIndex) -> MultiIndex {
        assert_eq!(
            self.n_modes(),
            other.n_modes(),
            "cannot add multi-indices with different mode counts"
        );
        MultiIndex(self.0.iter().zip(other.0.iter()).map(|(a, b)| a + b).collect())
    }
}

impl Add for MultiIndex {
    type Output = MultiIndex;

    fn add(self, other: MultiIndex) -> MultiIndex {
        &self + &other
    }
}

impl From<Vec<usize>> for MultiIndex {
    fn from(components: Vec<usize>) -> Self {
        MultiIndex(components)
    }
}

impl From<&[usize]> for MultiIndex {
    fn from(components: &[usize]) -> Self {
        MultiIndex(components.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for MultiIndex {
    fn from(components: [usize; N]) -> Self {
        MultiIndex(components.to_vec())
    }
}

impl From<MultiIndex> for Vec<usize> {
    fn from(index: MultiIndex) -> Self {
        index.0
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}
