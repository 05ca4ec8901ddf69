//! Elementwise transforms applied to a rank-constrained factor.
//!
//! A [`Transform`] is a named function object over tensors. Constructors take
//! a [`TransformSpec`] instead so that values read from configuration files,
//! which may hold a literal where a function was expected, are rejected at
//! construction time rather than at the first forward pass.

use std::{borrow::Cow, fmt, sync::Arc};

use candle_core::{Result, Tensor};
use serde::Deserialize;

type TransformFn = dyn Fn(&Tensor) -> Result<Tensor> + Send + Sync;

/// A differentiable tensor-to-tensor function with a display name.
#[derive(Clone)]
pub struct Transform {
    name: Cow<'static, str>,
    func: Arc<TransformFn>,
}

impl Transform {
    /// Names accepted by [`Transform::by_name`].
    pub const BUILTIN: [&'static str; 6] = ["identity", "square", "exp", "softplus", "tanh", "abs"];

    /// Wraps an arbitrary function. `func` must preserve the input shape.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        Self {
            name: Cow::Owned(name.into()),
            func: Arc::new(func),
        }
    }

    fn builtin<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed(name),
            func: Arc::new(func),
        }
    }

    pub fn identity() -> Self {
        Self::builtin("identity", |x| Ok(x.clone()))
    }

    pub fn square() -> Self {
        Self::builtin("square", |x| x.sqr())
    }

    pub fn exp() -> Self {
        Self::builtin("exp", |x| x.exp())
    }

    /// `log(1 + e^x)`, evaluated as `relu(x) + log(1 + e^-|x|)` to avoid overflow.
    pub fn softplus() -> Self {
        Self::builtin("softplus", |x| {
            let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
            x.relu()?.add(&tail)
        })
    }

    pub fn tanh() -> Self {
        Self::builtin("tanh", |x| x.tanh())
    }

    pub fn abs() -> Self {
        Self::builtin("abs", |x| x.abs())
    }

    /// Looks up one of the [`Transform::BUILTIN`] transforms.
    pub fn by_name(name: &str) -> Option<Self> {
        let transform = match name {
            "identity" => Self::identity(),
            "square" => Self::square(),
            "exp" => Self::exp(),
            "softplus" => Self::softplus(),
            "tanh" => Self::tanh(),
            "abs" => Self::abs(),
            _ => return None,
        };
        Some(transform)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        (self.func)(input)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.name).finish()
    }
}

/// Anything that may be offered where a transform is expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawTransform")]
pub enum TransformSpec {
    Callable(Transform),
    Named(String),
    Number(f64),
    Flag(bool),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTransform {
    Name(String),
    Number(f64),
    Flag(bool),
}

impl From<RawTransform> for TransformSpec {
    fn from(raw: RawTransform) -> Self {
        match raw {
            RawTransform::Name(name) => TransformSpec::Named(name),
            RawTransform::Number(value) => TransformSpec::Number(value),
            RawTransform::Flag(value) => TransformSpec::Flag(value),
        }
    }
}

impl From<Transform> for TransformSpec {
    fn from(transform: Transform) -> Self {
        TransformSpec::Callable(transform)
    }
}

impl From<&str> for TransformSpec {
    fn from(name: &str) -> Self {
        TransformSpec::Named(name.to_string())
    }
}

impl From<String> for TransformSpec {
    fn from(name: String) -> Self {
        TransformSpec::Named(name)
    }
}

impl From<f64> for TransformSpec {
    fn from(value: f64) -> Self {
        TransformSpec::Number(value)
    }
}

impl From<bool> for TransformSpec {
    fn from(value: bool) -> Self {
        TransformSpec::Flag(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn values(t: &Tensor) -> Result<Vec<f32>> {
        t.to_vec1::<f32>()
    }

    #[test]
    fn builtins_resolve_by_name() {
        for name in Transform::BUILTIN {
            let transform = Transform::by_name(name).expect("builtin");
            assert_eq!(transform.name(), name);
        }
        assert!(Transform::by_name("relu6").is_none());
    }

    #[test]
    fn softplus_matches_naive_formula_and_stays_finite() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::new(&[-3.0f32, 0.0, 2.5], &device)?;
        let out = values(&Transform::softplus().apply(&x)?)?;
        for (got, input) in out.iter().zip([-3.0f32, 0.0, 2.5]) {
            let expected = (1.0 + input.exp()).ln();
            assert!((got - expected).abs() < 1e-5, "{got} vs {expected}");
        }

        let large = Tensor::new(&[200.0f32], &device)?;
        let out = values(&Transform::softplus().apply(&large)?)?;
        assert!((out[0] - 200.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn custom_transform_is_invoked() -> Result<()> {
        let device = Device::Cpu;
        let double = Transform::custom("double", |x| x.affine(2.0, 0.0));
        let x = Tensor::new(&[1.0f32, -2.0], &device)?;
        assert_eq!(values(&double.apply(&x)?)?, vec![2.0, -4.0]);
        assert_eq!(format!("{double:?}"), "Transform(\"double\")");
        Ok(())
    }

    #[test]
    fn config_values_deserialize_into_specs() {
        #[derive(Deserialize)]
        struct Holder {
            f: TransformSpec,
        }
        let named: Holder = toml::from_str("f = \"tanh\"").unwrap();
        assert!(matches!(named.f, TransformSpec::Named(ref n) if n == "tanh"));
        let number: Holder = toml::from_str("f = 3.0").unwrap();
        assert!(matches!(number.f, TransformSpec::Number(v) if v == 3.0));
        let flag: Holder = serde_json::from_str("{\"f\": false}").unwrap();
        assert!(matches!(flag.f, TransformSpec::Flag(false)));
    }
}
