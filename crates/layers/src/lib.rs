//! Host layers whose trainable tensors can carry a parametrization.
//!
//! Layers store their tensors as [`parametrize::Parameter`] slots, implement
//! [`candle_nn::Module`] for the forward pass and [`parametrize::Parametrizable`]
//! so maps can be registered on named attributes.

pub mod checks;
pub mod linear;

pub use linear::{Linear, LinearConfig, LinearInit};
