//! Symmetric maps built on [`frame`], including the rank-constrained [`SymF`].

use std::fmt;

use candle_core::{Device, Result, Tensor};

use crate::{
    checks::{self, ShapeSpec},
    errors::ConfigurationError,
    parametrized::Parametrization,
    sym::{frame, TriangularSide},
    transform::{Transform, TransformSpec},
};

/// Alternative name for [`crate::Sym`].
pub type Symmetric = crate::sym::Sym;

/// Symmetric matrices `frame(f(B) f(B)^T)` generated by an `n x rank` factor `B`.
///
/// The product has rank at most `rank`; `f` is applied elementwise to the
/// factor first so callers can shape the family (for example `softplus`
/// keeps every entry of the factor positive).
#[derive(Debug, Clone)]
pub struct SymF {
    shape: ShapeSpec,
    rank: usize,
    transform: Transform,
    side: TriangularSide,
}

impl SymF {
    /// Validates `size`, then `f`, then `rank`, in that order.
    pub fn new(
        size: &[usize],
        rank: usize,
        f: impl Into<TransformSpec>,
        lower: bool,
    ) -> std::result::Result<Self, ConfigurationError> {
        let shape = checks::square_matrix_shape(size)?;
        let transform = checks::transform(f.into())?;
        let rank = checks::rank(rank, shape.n())?;
        Ok(Self {
            shape,
            rank,
            transform,
            side: TriangularSide::from_lower(lower),
        })
    }

    pub fn shape(&self) -> &ShapeSpec {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn side(&self) -> TriangularSide {
        self.side
    }

    /// Draws a factor with entries from `N(0, 1/sqrt(rank))`.
    pub fn sample_factor(&self, device: &Device) -> Result<Tensor> {
        let std = 1.0 / (self.rank as f32).sqrt();
        Tensor::randn(0f32, std, self.original_shape(), device)
    }
}

impl Parametrization for SymF {
    fn forward(&self, original: &Tensor) -> Result<Tensor> {
        let factor = self.transform.apply(original)?;
        if factor.dims() != original.dims() {
            return Err(candle_core::Error::Msg(format!(
                "transform '{}' changed the factor shape from {:?} to {:?}",
                self.transform.name(),
                original.dims(),
                factor.dims()
            )));
        }
        let product = factor.matmul(&factor.t()?)?;
        frame(&product, self.side)
    }

    fn output_shape(&self) -> Vec<usize> {
        self.shape.dims()
    }

    fn original_shape(&self) -> Vec<usize> {
        self.shape.with_trailing(self.rank)
    }

    fn initial_original(&self, value: &Tensor) -> crate::Result<Tensor> {
        Ok(self.sample_factor(value.device())?.to_dtype(value.dtype())?)
    }
}

impl fmt::Display for SymF {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SymF({}, rank={}, f={}, lower={})",
            self.shape,
            self.rank,
            self.transform.name(),
            self.side.is_lower()
        )
    }
}
