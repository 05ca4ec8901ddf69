//! Error types emitted while building and registering parametrizations.

use thiserror::Error;

/// A construction precondition was violated.
///
/// Every variant names the precondition that failed so callers can tell a
/// bad shape from a bad rank without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Fewer than two dimensions were supplied; vectors cannot be symmetrized.
    #[error("expected a matrix or a batch of matrices, got size {size:?}")]
    NotAMatrix { size: Vec<usize> },

    /// The trailing two dimensions differ.
    #[error("expected a square matrix, got size {size:?}")]
    NonSquare { size: Vec<usize> },

    /// The trailing dimensions are square but zero sized.
    #[error("expected a non-empty square matrix, got size {size:?}")]
    EmptyMatrix { size: Vec<usize> },

    /// The transform is a literal value rather than a function.
    #[error("transform must be callable, got {found}")]
    NotCallable { found: String },

    /// The transform name does not match any registered transform.
    #[error("unknown transform '{name}'")]
    UnknownTransform { name: String },

    /// `rank` fell outside `(0, n]`.
    #[error("rank must be in (0, {n}], got {rank}")]
    RankOutOfRange { rank: usize, n: usize },
}

pub type Result<T> = std::result::Result<T, ParametrizeError>;

/// Errors raised while attaching a parametrization to a host tensor.
#[derive(Debug, Error)]
pub enum ParametrizeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("parametrization for '{name}' produces shape {expected:?} but the tensor has shape {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("layer has no parameter named '{0}'")]
    UnknownParameter(String),

    #[error("parameter '{0}' is already parametrized")]
    AlreadyParametrized(String),

    #[error("{0} does not support assigning values through a right inverse")]
    NoRightInverse(String),
}
