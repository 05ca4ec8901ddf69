//! Construction-time validation shared by every symmetric map.
//!
//! These routines run once, before any tensor storage is allocated, and fail
//! fast with a [`ConfigurationError`] naming the precondition that did not
//! hold. They never panic.

use std::fmt;

use crate::{
    errors::ConfigurationError,
    transform::{Transform, TransformSpec},
};

/// Leading batch dimensions followed by an `n x n` matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeSpec {
    batch: Vec<usize>,
    n: usize,
}

impl ShapeSpec {
    /// Side length of the trailing square matrix.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Leading batch dimensions, possibly empty.
    pub fn batch(&self) -> &[usize] {
        &self.batch
    }

    /// Full shape `batch.. x n x n`.
    pub fn dims(&self) -> Vec<usize> {
        self.with_trailing(self.n)
    }

    /// Shape `batch.. x n x cols`, used for rank-constrained factors.
    pub fn with_trailing(&self, cols: usize) -> Vec<usize> {
        let mut dims = self.batch.clone();
        dims.push(self.n);
        dims.push(cols);
        dims
    }
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n={}", self.n)?;
        if !self.batch.is_empty() {
            write!(f, ", batch={:?}", self.batch)?;
        }
        Ok(())
    }
}

/// Ensures `size` describes a (batch of) non-empty square matrices.
pub fn square_matrix_shape(size: &[usize]) -> Result<ShapeSpec, ConfigurationError> {
    let [batch @ .., rows, cols] = size else {
        return Err(ConfigurationError::NotAMatrix {
            size: size.to_vec(),
        });
    };
    if rows != cols {
        return Err(ConfigurationError::NonSquare {
            size: size.to_vec(),
        });
    }
    if *rows == 0 {
        return Err(ConfigurationError::EmptyMatrix {
            size: size.to_vec(),
        });
    }
    Ok(ShapeSpec {
        batch: batch.to_vec(),
        n: *rows,
    })
}

/// Resolves a transform specification into something that can be applied.
pub fn transform(spec: TransformSpec) -> Result<Transform, ConfigurationError> {
    match spec {
        TransformSpec::Callable(transform) => Ok(transform),
        TransformSpec::Named(name) => {
            Transform::by_name(&name).ok_or(ConfigurationError::UnknownTransform { name })
        }
        TransformSpec::Number(value) => Err(ConfigurationError::NotCallable {
            found: format!("number {value}"),
        }),
        TransformSpec::Flag(value) => Err(ConfigurationError::NotCallable {
            found: format!("boolean {value}"),
        }),
    }
}

/// Checks `0 < rank <= n`.
pub fn rank(rank: usize, n: usize) -> Result<usize, ConfigurationError> {
    if rank == 0 || rank > n {
        Err(ConfigurationError::RankOutOfRange { rank, n })
    } else {
        Ok(rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_square_and_batched_shapes() {
        let spec = square_matrix_shape(&[3, 3]).unwrap();
        assert_eq!(spec.n(), 3);
        assert!(spec.batch().is_empty());

        let spec = square_matrix_shape(&[2, 5, 4, 4]).unwrap();
        assert_eq!(spec.batch(), &[2, 5]);
        assert_eq!(spec.dims(), vec![2, 5, 4, 4]);
        assert_eq!(spec.with_trailing(2), vec![2, 5, 4, 2]);
    }

    #[test]
    fn rejects_vectors_and_scalars() {
        assert!(matches!(
            square_matrix_shape(&[4]),
            Err(ConfigurationError::NotAMatrix { .. })
        ));
        assert!(matches!(
            square_matrix_shape(&[]),
            Err(ConfigurationError::NotAMatrix { .. })
        ));
    }

    #[test]
    fn rejects_non_square_and_empty() {
        assert_eq!(
            square_matrix_shape(&[3, 2]),
            Err(ConfigurationError::NonSquare { size: vec![3, 2] })
        );
        assert_eq!(
            square_matrix_shape(&[1, 3]),
            Err(ConfigurationError::NonSquare { size: vec![1, 3] })
        );
        assert_eq!(
            square_matrix_shape(&[0, 0]),
            Err(ConfigurationError::EmptyMatrix { size: vec![0, 0] })
        );
    }

    #[test]
    fn rank_bounds_are_inclusive_of_n() {
        assert_eq!(rank(4, 4), Ok(4));
        assert_eq!(rank(1, 4), Ok(1));
        assert_eq!(
            rank(0, 4),
            Err(ConfigurationError::RankOutOfRange { rank: 0, n: 4 })
        );
        assert_eq!(
            rank(5, 4),
            Err(ConfigurationError::RankOutOfRange { rank: 5, n: 4 })
        );
    }

    #[test]
    fn literal_transforms_are_not_callable() {
        assert!(matches!(
            transform(TransformSpec::Number(3.0)),
            Err(ConfigurationError::NotCallable { .. })
        ));
        assert!(matches!(
            transform(TransformSpec::Flag(true)),
            Err(ConfigurationError::NotCallable { .. })
        ));
        assert!(matches!(
            transform(TransformSpec::Named("sigmoidish".into())),
            Err(ConfigurationError::UnknownTransform { .. })
        ));
        assert_eq!(
            transform(TransformSpec::Named("softplus".into()))
                .unwrap()
                .name(),
            "softplus"
        );
    }
}
