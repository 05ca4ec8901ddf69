use candle_core::{backprop::GradStore, DType, Tensor, Var};

use crate::{config, TrainingError};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub clip_global_norm: Option<f64>,
}

impl From<&config::OptimizerConfig> for SgdConfig {
    fn from(value: &config::OptimizerConfig) -> Self {
        Self {
            learning_rate: value.learning_rate,
            momentum: value.momentum,
            weight_decay: value.weight_decay,
            clip_global_norm: value.clip_global_norm,
        }
    }
}

/// Stochastic gradient descent over the raw (unconstrained) variables.
#[derive(Debug)]
pub struct Sgd {
    config: SgdConfig,
    params: Vec<ParameterSlot>,
    step: usize,
    weight_decay_exclude: Vec<String>,
}

#[derive(Debug)]
struct ParameterSlot {
    name: String,
    param: Var,
    velocity: Option<Tensor>,
    apply_weight_decay: bool,
}

/// Gradient statistics of one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Global L2 norm before clipping.
    pub grad_norm: f64,
    /// Number of parameters that received a gradient.
    pub updated: usize,
}

impl Sgd {
    pub fn new(named_parameters: Vec<(String, Var)>, config: SgdConfig) -> Result<Self, TrainingError> {
        Self::with_weight_decay_exclusions(named_parameters, config, vec!["bias".to_string()])
    }

    pub fn with_weight_decay_exclusions(
        named_parameters: Vec<(String, Var)>,
        config: SgdConfig,
        weight_decay_exclude: Vec<String>,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }

        let mut params = Vec::with_capacity(named_parameters.len());
        for (name, var) in named_parameters {
            if !var.as_tensor().dtype().is_float() {
                return Err(TrainingError::initialization(format!(
                    "optimizer received non-floating parameter '{}'",
                    name
                )));
            }
            let apply_weight_decay = should_apply_weight_decay(&name, &weight_decay_exclude);
            params.push(ParameterSlot {
                name,
                param: var,
                velocity: None,
                apply_weight_decay,
            });
        }

        Ok(Self {
            config,
            params,
            step: 0,
            weight_decay_exclude,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn weight_decay_exclusions(&self) -> &[String] {
        &self.weight_decay_exclude
    }

    /// Applies one update from `grads`, consuming the gradients it uses.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<StepReport, TrainingError> {
        let mut processed = Vec::new();
        for (index, slot) in self.params.iter().enumerate() {
            let Some(grad) = grads.remove(slot.param.as_tensor()) else {
                log::debug!("sgd: no gradient for '{}', skipping", slot.name);
                continue;
            };
            let norm = tensor_l2_norm(&grad)?;
            processed.push(ProcessedGradient { index, grad, norm });
        }

        let grad_norm = processed.iter().map(|g| g.norm * g.norm).sum::<f64>().sqrt();
        if processed.is_empty() {
            return Ok(StepReport {
                grad_norm,
                updated: 0,
            });
        }

        if let Some(max_norm) = self.config.clip_global_norm {
            if grad_norm > max_norm {
                let scale = max_norm / (grad_norm + EPS);
                for item in &mut processed {
                    item.grad = item.grad.affine(scale, 0.0)?;
                }
            }
        }

        self.step += 1;
        let updated = processed.len();
        let cfg = self.config;
        for item in processed {
            let slot = &mut self.params[item.index];
            let base = slot.param.as_tensor();

            let mut direction = if slot.apply_weight_decay && cfg.weight_decay != 0.0 {
                item.grad.add(&base.affine(cfg.weight_decay, 0.0)?)?
            } else {
                item.grad
            };

            if cfg.momentum != 0.0 {
                direction = match slot.velocity.take() {
                    Some(previous) => previous.affine(cfg.momentum, 0.0)?.add(&direction)?,
                    None => direction,
                };
                slot.velocity = Some(direction.clone());
            }

            let next = base.sub(&direction.affine(cfg.learning_rate, 0.0)?)?;
            slot.param.set(&next.to_dtype(base.dtype())?)?;
        }

        Ok(StepReport { grad_norm, updated })
    }
}

struct ProcessedGradient {
    index: usize,
    grad: Tensor,
    norm: f64,
}

fn should_apply_weight_decay(name: &str, exclusions: &[String]) -> bool {
    !exclusions
        .iter()
        .any(|pattern| matches_pattern(name, pattern))
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    name.ends_with(pattern) || name.contains(pattern)
}

fn tensor_l2_norm(tensor: &Tensor) -> Result<f64, TrainingError> {
    let squared = tensor.sqr()?.sum_all()?.to_dtype(DType::F64)?;
    Ok(squared.to_scalar::<f64>()?.sqrt())
}
