//! Attaching maps to trainable tensors.
//!
//! A host layer stores each trainable tensor as a [`Parameter`]. Registering
//! a [`Parametrization`] swaps the plain variable for a
//! [`ParametrizedTensor`]: the optimizer keeps updating the raw, unconstrained
//! variable while every read of the attribute goes through the map (and the
//! cache, when a scope is open).

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use candle_core::{Tensor, Var};

use crate::{
    cache::{self, CacheSlot},
    errors::{ParametrizeError, Result},
};

/// A differentiable map from an unconstrained tensor onto a constraint set.
///
/// Implementations must be referentially transparent: equal inputs give
/// equal outputs. That is what makes memoizing reads inside a cache scope
/// sound.
pub trait Parametrization: fmt::Debug + fmt::Display + Send + Sync {
    /// Maps the raw tensor onto the constraint set.
    fn forward(&self, original: &Tensor) -> candle_core::Result<Tensor>;

    /// Shape of the tensor produced by [`Parametrization::forward`].
    fn output_shape(&self) -> Vec<usize>;

    /// Shape of the raw tensor the optimizer updates.
    fn original_shape(&self) -> Vec<usize> {
        self.output_shape()
    }

    /// Returns a raw tensor `x` with `forward(x) == value` for constrained `value`.
    fn right_inverse(&self, _value: &Tensor) -> Result<Tensor> {
        Err(ParametrizeError::NoRightInverse(self.to_string()))
    }

    /// Seeds the raw tensor when the map is registered on an existing `value`.
    fn initial_original(&self, value: &Tensor) -> Result<Tensor> {
        self.right_inverse(value)
    }
}

/// A raw trainable variable read through a [`Parametrization`].
#[derive(Clone)]
pub struct ParametrizedTensor {
    original: Var,
    parametrization: Arc<dyn Parametrization>,
    cache: CacheSlot,
}

impl ParametrizedTensor {
    /// Wraps `value`, whose shape must match the map's output shape.
    pub fn new(
        name: &str,
        value: &Tensor,
        parametrization: impl Parametrization + 'static,
    ) -> Result<Self> {
        Self::from_arc(name, value, Arc::new(parametrization))
    }

    pub fn from_arc(
        name: &str,
        value: &Tensor,
        parametrization: Arc<dyn Parametrization>,
    ) -> Result<Self> {
        let expected = parametrization.output_shape();
        if value.dims() != expected.as_slice() {
            return Err(ParametrizeError::ShapeMismatch {
                name: name.to_string(),
                expected,
                actual: value.dims().to_vec(),
            });
        }
        let original = parametrization.initial_original(value)?;
        let expected = parametrization.original_shape();
        if original.dims() != expected.as_slice() {
            return Err(ParametrizeError::ShapeMismatch {
                name: format!("{name}.original"),
                expected,
                actual: original.dims().to_vec(),
            });
        }
        Ok(Self {
            original: Var::from_tensor(&original)?,
            parametrization,
            cache: Arc::new(Mutex::new(None)),
        })
    }

    /// The constrained value, memoized inside a cache scope.
    pub fn value(&self) -> candle_core::Result<Tensor> {
        cache::read_through(&self.cache, || {
            self.parametrization.forward(self.original.as_tensor())
        })
    }

    /// The raw variable handed to the optimizer.
    pub fn original(&self) -> &Var {
        &self.original
    }

    pub fn parametrization(&self) -> &dyn Parametrization {
        self.parametrization.as_ref()
    }

    /// Assigns a constrained value by writing its right inverse to the raw variable.
    /// Any memoized read is dropped, so later reads in an open scope see the write.
    pub fn set_value(&self, value: &Tensor) -> Result<()> {
        let original = self.parametrization.right_inverse(value)?;
        self.original.set(&original)?;
        *self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

impl fmt::Debug for ParametrizedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParametrizedTensor")
            .field("parametrization", &self.parametrization)
            .field("original_shape", &self.original.as_tensor().dims())
            .finish()
    }
}

/// Storage for one trainable tensor of a host layer.
#[derive(Debug, Clone)]
pub enum Parameter {
    Plain(Var),
    Parametrized(ParametrizedTensor),
}

impl Parameter {
    pub fn new(value: &Tensor) -> candle_core::Result<Self> {
        Ok(Parameter::Plain(Var::from_tensor(value)?))
    }

    /// The effective value seen by the layer's computation.
    pub fn value(&self) -> candle_core::Result<Tensor> {
        match self {
            Parameter::Plain(var) => Ok(var.as_tensor().clone()),
            Parameter::Parametrized(tensor) => tensor.value(),
        }
    }

    /// The variable the optimizer should update.
    pub fn trainable(&self) -> &Var {
        match self {
            Parameter::Plain(var) => var,
            Parameter::Parametrized(tensor) => tensor.original(),
        }
    }

    pub fn is_parametrized(&self) -> bool {
        matches!(self, Parameter::Parametrized(_))
    }

    /// Replaces a plain variable with a parametrized one seeded from its value.
    pub fn register(
        &mut self,
        name: &str,
        parametrization: Arc<dyn Parametrization>,
    ) -> Result<()> {
        match self {
            Parameter::Plain(var) => {
                let tensor = ParametrizedTensor::from_arc(name, var.as_tensor(), parametrization)?;
                *self = Parameter::Parametrized(tensor);
                Ok(())
            }
            Parameter::Parametrized(_) => {
                Err(ParametrizeError::AlreadyParametrized(name.to_string()))
            }
        }
    }
}

/// Host layers whose named tensors can be routed through a parametrization.
pub trait Parametrizable {
    /// Looks up a parameter slot by attribute name.
    fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter>;

    /// Every trainable variable with its attribute name.
    fn named_parameters(&self) -> Vec<(String, Var)>;

    fn register_parametrization<P>(&mut self, name: &str, parametrization: P) -> Result<()>
    where
        P: Parametrization + 'static,
        Self: Sized,
    {
        let slot = self
            .parameter_mut(name)
            .ok_or_else(|| ParametrizeError::UnknownParameter(name.to_string()))?;
        slot.register(name, Arc::new(parametrization))
    }
}
