//! Affine projection whose weight and bias can be parametrized.
//!
//! Inputs are shaped `(.., in_dim)`; leading dimensions are flattened for the
//! matmul and restored afterwards. The weight is stored `(out_dim, in_dim)`
//! and every read of it goes through [`Parameter::value`], so a registered
//! parametrization (and an open cache scope) is honoured transparently by
//! [`Linear::forward`]. Initialisation policies mirror common recipes; the
//! default reproduces the usual `U(-1/sqrt(in), 1/sqrt(in))` layer init.

use candle_core::{DType, Device, Error, Result, Tensor, Var};
use candle_nn::Module;
use parametrize::{Parameter, Parametrizable};

use crate::checks;

const FLOAT_DTYPES: [DType; 4] = [DType::F16, DType::BF16, DType::F32, DType::F64];

/// Configuration of a dense projection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration with a bias term.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Shape of the weight matrix, `(output_dim, input_dim)`.
    pub fn weight_shape(&self) -> [usize; 2] {
        [self.output_dim, self.input_dim]
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation with the given leaky slope.
    KaimingUniform { negative_slope: f64 },
}

impl Default for LinearInit {
    /// Kaiming uniform with slope `sqrt(5)`, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    fn default() -> Self {
        LinearInit::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = (3.0f64).sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
        };
        weight_f32.to_dtype(dtype)
    }

    fn bias_bound(fan_in: usize) -> f64 {
        1.0 / (fan_in as f64).sqrt()
    }
}

/// Dense affine projection `y = x W^T + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight: Parameter::new(&weight)?,
            bias: bias.as_ref().map(Parameter::new).transpose()?,
        })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            let bound = LinearInit::bias_bound(config.input_dim) as f32;
            Some(Tensor::rand(-bound, bound, config.output_dim, device)?.to_dtype(dtype)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// The effective weight, routed through any registered parametrization.
    pub fn weight(&self) -> Result<Tensor> {
        self.weight.value()
    }

    /// The effective bias if present.
    pub fn bias(&self) -> Result<Option<Tensor>> {
        self.bias.as_ref().map(Parameter::value).transpose()
    }

    pub fn weight_parameter(&self) -> &Parameter {
        &self.weight
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape("linear.weight", weight, &config.weight_shape())?;
        checks::expect_dtype_in("linear.weight", weight, &FLOAT_DTYPES)?;
        Ok(())
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_rank("linear.bias", tensor, 1)?;
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, &FLOAT_DTYPES)?;
                Ok(())
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, input: &Tensor) -> Result<()> {
        if input.rank() == 0 {
            return Err(Error::Msg(
                "linear expects input shaped [.., in_dim], got a scalar".into(),
            ));
        }
        checks::expect_last_dim("linear.input", input, self.config.input_dim)
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.validate_input(input)?;

        let weight = self.weight.value()?;
        let dims = input.dims().to_vec();
        let rows: usize = dims[..dims.len() - 1].iter().product();
        let flat = input.reshape((rows, self.config.input_dim))?;
        let projected = flat.matmul(&weight.t()?)?;

        let mut out_dims = dims;
        if let Some(last) = out_dims.last_mut() {
            *last = self.config.output_dim;
        }
        let mut output = projected.reshape(out_dims)?;

        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&bias.value()?)?;
        }
        Ok(output)
    }
}

impl Parametrizable for Linear {
    fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        match name {
            "weight" => Some(&mut self.weight),
            "bias" => self.bias.as_mut(),
            _ => None,
        }
    }

    fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = vec![("weight".to_string(), self.weight.trainable().clone())];
        if let Some(bias) = &self.bias {
            params.push(("bias".to_string(), bias.trainable().clone()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parametrize::{asymmetry, cached, Sym};

    fn reference_linear(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let out = input.broadcast_matmul(&weight.t()?)?;
        match bias {
            Some(bias) => out.broadcast_add(bias),
            None => Ok(out),
        }
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        a.sub(b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()
    }

    #[test]
    fn forward_matches_reference_for_2d_and_3d_inputs() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(LinearConfig::new(6, 4), &LinearInit::default(), &device, DType::F32)?;
        let weight = linear.weight()?;
        let bias = linear.bias()?;

        for shape in [vec![5, 6], vec![2, 3, 6]] {
            let input = Tensor::randn(0f32, 1.0, shape.as_slice(), &device)?;
            let output = linear.forward(&input)?;
            let reference = reference_linear(&input, &weight, bias.as_ref())?;
            assert_eq!(output.dims()[output.rank() - 1], 4);
            assert!(max_diff(&output, &reference)? <= 1e-5);
        }
        Ok(())
    }

    #[test]
    fn rejects_mismatched_inputs_and_parameters() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(LinearConfig::new(3, 3), &LinearInit::XavierUniform, &device, DType::F32)?;
        let bad = Tensor::zeros((2, 4), DType::F32, &device)?;
        assert!(linear.forward(&bad).is_err());

        let weight = Tensor::zeros((3, 2), DType::F32, &device)?;
        assert!(Linear::new(LinearConfig::new(3, 3), weight, None).is_err());

        let mut config = LinearConfig::new(2, 2);
        config.bias = false;
        let weight = Tensor::zeros((2, 2), DType::F32, &device)?;
        let bias = Tensor::zeros(2, DType::F32, &device)?;
        assert!(Linear::new(config, weight, Some(bias)).is_err());
        Ok(())
    }

    #[test]
    fn default_init_respects_fan_in_bound() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(LinearConfig::new(64, 32), &LinearInit::default(), &device, DType::F32)?;
        let bound = 1.0 / 8.0;
        let max = linear.weight()?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert!(max <= bound + 1e-6);
        Ok(())
    }

    #[test]
    fn registered_weight_is_read_through_the_map() -> Result<()> {
        let device = Device::Cpu;
        let mut linear = Linear::with_init(LinearConfig::new(4, 4), &LinearInit::XavierNormal, &device, DType::F32)?;
        linear
            .register_parametrization("weight", Sym::new(&[4, 4], false).unwrap())
            .map_err(|e| Error::Msg(e.to_string()))?;
        assert!(linear.weight_parameter().is_parametrized());
        assert_eq!(asymmetry(&linear.weight()?)?, 0.0);

        let names: Vec<String> = linear.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["weight".to_string(), "bias".to_string()]);

        let _scope = cached();
        let input = Tensor::randn(0f32, 1.0, (3, 4), &device)?;
        let output = linear.forward(&input)?;
        let reference = reference_linear(&input, &linear.weight()?, linear.bias()?.as_ref())?;
        assert!(max_diff(&output, &reference)? <= 1e-5);
        Ok(())
    }

    #[test]
    fn unknown_attribute_cannot_be_parametrized() -> Result<()> {
        let device = Device::Cpu;
        let mut config = LinearConfig::new(2, 2);
        config.bias = false;
        let mut linear = Linear::with_init(config, &LinearInit::XavierUniform, &device, DType::F32)?;
        assert!(linear
            .register_parametrization("bias", Sym::new(&[2, 2], true).unwrap())
            .is_err());
        assert!(linear
            .register_parametrization("scale", Sym::new(&[2, 2], true).unwrap())
            .is_err());
        Ok(())
    }
}
