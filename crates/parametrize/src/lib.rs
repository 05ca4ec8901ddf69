//! Differentiable parametrizations that keep trainable matrices symmetric.
//!
//! [`Sym`] (also exported as [`Symmetric`]) mirrors one triangular half of a
//! raw matrix onto the other; [`SymF`] builds rank-constrained symmetric
//! matrices from a transformed `n x rank` factor. Maps are attached to a host
//! layer through [`Parametrizable`], and [`cached`] opens a scope in which
//! repeated reads of a parametrized tensor are evaluated once.

pub mod cache;
pub mod checks;
pub mod errors;
pub mod parametrized;
pub mod sym;
pub mod symmetric;
pub mod transform;

pub use cache::{cached, is_caching, with_cache, CacheScope};
pub use checks::ShapeSpec;
pub use errors::{ConfigurationError, ParametrizeError, Result};
pub use parametrized::{Parameter, Parametrizable, Parametrization, ParametrizedTensor};
pub use sym::{asymmetry, frame, Sym, TriangularSide};
pub use symmetric::{SymF, Symmetric};
pub use transform::{Transform, TransformSpec};
