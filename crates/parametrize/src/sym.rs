//! The symmetric-matrix map `X -> frame(X)`.
//!
//! One triangular half of the input (diagonal included) is kept and mirrored
//! onto the other half, so the output is symmetric bit for bit regardless of
//! what the discarded half contains. Leading dimensions are treated as a
//! batch and left untouched.
//!
//! Gradients follow from the selection: for an upstream gradient `G`
//! the input receives `G * keep + G^T * mirror`. The source entry of every
//! off-diagonal pair collects `G_ij + G_ji`, diagonal entries collect `G_ii`
//! and the discarded half receives nothing.

use std::fmt;

use candle_core::{DType, Device, Result, Tensor, D};

use crate::{
    checks::{self, ShapeSpec},
    errors::ConfigurationError,
    parametrized::Parametrization,
};

/// Which half of a square matrix is the independent source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriangularSide {
    Lower,
    Upper,
}

impl TriangularSide {
    pub fn from_lower(lower: bool) -> Self {
        if lower {
            TriangularSide::Lower
        } else {
            TriangularSide::Upper
        }
    }

    pub fn is_lower(self) -> bool {
        self == TriangularSide::Lower
    }

    /// Returns `(keep, mirror)` selection masks: `keep` covers the half
    /// including the diagonal, `mirror` the same half without it.
    fn masks(self, n: usize, device: &Device) -> Result<(Tensor, Tensor)> {
        let keep = match self {
            TriangularSide::Lower => Tensor::tril2(n, DType::U8, device)?,
            TriangularSide::Upper => Tensor::triu2(n, DType::U8, device)?,
        };
        let mirror = keep.sub(&Tensor::eye(n, DType::U8, device)?)?;
        Ok((keep, mirror))
    }
}

/// Symmetrizes the trailing `n x n` block of `x` from the given side.
pub fn frame(x: &Tensor, side: TriangularSide) -> Result<Tensor> {
    let (rows, cols) = (x.dim(D::Minus2)?, x.dim(D::Minus1)?);
    if rows != cols {
        return Err(candle_core::Error::Msg(format!(
            "frame expects square trailing dimensions, got {:?}",
            x.dims()
        )));
    }
    let (keep, mirror) = side.masks(cols, x.device())?;
    let zeros = x.zeros_like()?;
    // The discarded half is never read, not even as `0 * x`.
    let kept = keep.broadcast_as(x.dims())?.where_cond(x, &zeros)?;
    let reflected = mirror.broadcast_as(x.dims())?.where_cond(x, &zeros)?.t()?;
    kept.add(&reflected)
}

/// Largest absolute entry of `x - x^T` over every matrix in the batch.
/// An empty batch is trivially symmetric.
pub fn asymmetry(x: &Tensor) -> Result<f64> {
    if x.elem_count() == 0 {
        return Ok(0.0);
    }
    x.sub(&x.t()?)?
        .abs()?
        .flatten_all()?
        .max(0)?
        .to_dtype(DType::F64)?
        .to_scalar::<f64>()
}

/// Symmetric matrices parametrized by one triangular half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sym {
    shape: ShapeSpec,
    side: TriangularSide,
}

impl Sym {
    /// Builds the map for tensors of shape `size` (`batch.. x n x n`).
    pub fn new(size: &[usize], lower: bool) -> std::result::Result<Self, ConfigurationError> {
        let shape = checks::square_matrix_shape(size)?;
        Ok(Self {
            shape,
            side: TriangularSide::from_lower(lower),
        })
    }

    pub fn shape(&self) -> &ShapeSpec {
        &self.shape
    }

    pub fn side(&self) -> TriangularSide {
        self.side
    }

    pub fn n(&self) -> usize {
        self.shape.n()
    }

    /// Checks that `x` has this map's shape and is symmetric up to `eps`.
    pub fn in_manifold(&self, x: &Tensor, eps: f64) -> Result<bool> {
        if x.dims() != self.shape.dims().as_slice() {
            return Ok(false);
        }
        Ok(asymmetry(x)? <= eps)
    }

    /// Draws a symmetric matrix with standard normal entries on the kept half.
    pub fn sample(&self, device: &Device, dtype: DType) -> Result<Tensor> {
        let raw = Tensor::randn(0f32, 1f32, self.shape.dims(), device)?.to_dtype(dtype)?;
        frame(&raw, self.side)
    }
}

impl Parametrization for Sym {
    fn forward(&self, original: &Tensor) -> Result<Tensor> {
        frame(original, self.side)
    }

    fn output_shape(&self) -> Vec<usize> {
        self.shape.dims()
    }

    /// `frame` is a projection, so it is its own right inverse on symmetric input.
    fn right_inverse(&self, value: &Tensor) -> crate::Result<Tensor> {
        Ok(frame(value, self.side)?)
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({}, lower={})", self.shape, self.side.is_lower())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> Result<Tensor> {
        let n = rows.len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (n, n), &Device::Cpu)
    }

    #[test]
    fn lower_frame_mirrors_lower_half() -> Result<()> {
        let x = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]])?;
        let y = frame(&x, TriangularSide::Lower)?.to_vec2::<f32>()?;
        assert_eq!(
            y,
            vec![
                vec![1.0, 4.0, 7.0],
                vec![4.0, 5.0, 8.0],
                vec![7.0, 8.0, 9.0]
            ]
        );
        Ok(())
    }

    #[test]
    fn upper_frame_mirrors_upper_half() -> Result<()> {
        let x = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]])?;
        let y = frame(&x, TriangularSide::Upper)?.to_vec2::<f32>()?;
        assert_eq!(
            y,
            vec![
                vec![1.0, 2.0, 3.0],
                vec![2.0, 5.0, 6.0],
                vec![3.0, 6.0, 9.0]
            ]
        );
        Ok(())
    }

    #[test]
    fn frame_is_exact_and_idempotent_on_batches() -> Result<()> {
        let device = Device::Cpu;
        for side in [TriangularSide::Lower, TriangularSide::Upper] {
            let x = Tensor::randn(0f32, 3f32, (2, 3, 5, 5), &device)?;
            let once = frame(&x, side)?;
            assert_eq!(asymmetry(&once)?, 0.0);
            let twice = frame(&once, side)?;
            let diff = once.sub(&twice)?.abs()?.flatten_all()?.max(0)?;
            assert_eq!(diff.to_scalar::<f32>()?, 0.0);
        }
        Ok(())
    }

    #[test]
    fn gradient_sums_mirrored_entries_into_source_half() -> Result<()> {
        let device = Device::Cpu;
        let x = candle_core::Var::from_tensor(&Tensor::zeros((3, 3), DType::F32, &device)?)?;
        let upstream = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]])?;
        let loss = frame(x.as_tensor(), TriangularSide::Lower)?
            .mul(&upstream)?
            .sum_all()?;
        let grads = loss.backward()?;
        let grad = grads.get(x.as_tensor()).expect("gradient").to_vec2::<f32>()?;
        assert_eq!(
            grad,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![6.0, 5.0, 0.0],
                vec![10.0, 14.0, 9.0]
            ]
        );
        Ok(())
    }

    #[test]
    fn discarded_half_never_leaks_into_output() -> Result<()> {
        let x = matrix(&[&[1.0, f32::INFINITY], &[2.0, 3.0]])?;
        let y = frame(&x, TriangularSide::Lower)?.to_vec2::<f32>()?;
        assert_eq!(y, vec![vec![1.0, 2.0], vec![2.0, 3.0]]);

        let x = matrix(&[&[1.0, 2.0], &[f32::NAN, 3.0]])?;
        let y = frame(&x, TriangularSide::Upper)?.to_vec2::<f32>()?;
        assert_eq!(y, vec![vec![1.0, 2.0], vec![2.0, 3.0]]);
        Ok(())
    }

    #[test]
    fn empty_batches_are_symmetric() -> Result<()> {
        let sym = Sym::new(&[0, 3, 3], true).unwrap();
        let sample = sym.sample(&Device::Cpu, DType::F32)?;
        assert_eq!(sample.dims(), &[0, 3, 3]);
        assert_eq!(asymmetry(&sample)?, 0.0);
        assert!(sym.in_manifold(&sample, 1e-6)?);
        Ok(())
    }

    #[test]
    fn in_manifold_checks_shape_and_symmetry() -> Result<()> {
        let device = Device::Cpu;
        let sym = Sym::new(&[4, 4], true).unwrap();
        let sample = sym.sample(&device, DType::F32)?;
        assert!(sym.in_manifold(&sample, 1e-6)?);

        let skewed = Tensor::randn(0f32, 1f32, (4, 4), &device)?;
        let skewed = skewed.sub(&skewed.t()?)?;
        assert!(!sym.in_manifold(&skewed, 1e-6)?);

        let wrong = Tensor::zeros((3, 3), DType::F32, &device)?;
        assert!(!sym.in_manifold(&wrong, 1e-6)?);
        Ok(())
    }

    #[test]
    fn right_inverse_is_identity_on_symmetric_input() -> Result<()> {
        let device = Device::Cpu;
        let sym = Sym::new(&[5, 5], false).unwrap();
        let y = sym.sample(&device, DType::F32)?;
        let x = sym.right_inverse(&y).unwrap();
        let back = sym.forward(&x)?;
        let diff = back.sub(&y)?.abs()?.flatten_all()?.max(0)?;
        assert!(diff.to_scalar::<f32>()? <= 1e-6);
        Ok(())
    }

    #[test]
    fn display_mentions_size_and_side() {
        assert_eq!(
            Sym::new(&[4, 4], true).unwrap().to_string(),
            "Sym(n=4, lower=true)"
        );
        assert_eq!(
            Sym::new(&[2, 3, 3], false).unwrap().to_string(),
            "Sym(n=3, batch=[2], lower=false)"
        );
    }
}
