use std::time::Instant;

use candle_core::{utils::cuda_is_available, DType, Device, Tensor};
use candle_nn::Module;
use layers::{Linear, LinearConfig, LinearInit};
use parametrize::{asymmetry, cached, Parametrizable};

use crate::{
    config::{BuiltParametrization, DeviceChoice},
    logging::{Logger, LoggingSettings},
    metrics::{RunSummary, StepRecord},
    optimizer::{Sgd, SgdConfig},
    ExperimentConfig, TrainingError,
};

/// Fits a square `Linear` layer whose weight is held symmetric by a
/// registered parametrization, checking the constraint around every step.
pub struct Trainer {
    config: ExperimentConfig,
    device: Device,
    layer: Linear,
    optimizer: Sgd,
    logger: Logger,
    description: String,
}

impl Trainer {
    pub fn new(config: ExperimentConfig) -> Result<Self, TrainingError> {
        config.validate()?;
        let device = select_device(config.runtime.device);
        let n = config.layer.size;

        let mut layer_config = LinearConfig::new(n, n);
        layer_config.bias = config.layer.bias;
        let mut layer = Linear::with_init(layer_config, &LinearInit::default(), &device, DType::F32)?;

        let description = match config.parametrization.build(n)? {
            BuiltParametrization::Sym(map) => {
                let description = map.to_string();
                layer.register_parametrization("weight", map)?;
                description
            }
            BuiltParametrization::SymF(map) => {
                let description = map.to_string();
                layer.register_parametrization("weight", map)?;
                description
            }
        };

        let optimizer = Sgd::new(layer.named_parameters(), SgdConfig::from(&config.optimizer))?;
        let logger = Logger::new(LoggingSettings::from_config(
            config.logging.enable_stdout,
            config.logging.metrics_path.clone(),
            config.logging.flush_every_n,
        ))?;

        Ok(Self {
            config,
            device,
            layer,
            optimizer,
            logger,
            description,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Runs `runtime.steps` optimizer steps on a fixed random batch.
    pub fn train(&mut self) -> Result<Vec<StepRecord>, TrainingError> {
        let runtime = self.config.runtime.clone();
        let input = Tensor::rand(0f32, 1f32, (runtime.batch_size, self.config.layer.size), &self.device)?;

        self.logger.log_start(&format!(
            "{} on Linear({n}, {n}) steps={} lr={}",
            self.description,
            runtime.steps,
            self.optimizer.learning_rate(),
            n = self.config.layer.size
        ));

        let started = Instant::now();
        let mut records = Vec::with_capacity(runtime.steps);
        for step in 1..=runtime.steps {
            let record = self.train_step(step, &input)?;
            if step % runtime.log_every_n_steps == 0 || step == runtime.steps {
                self.logger.log_training_step(&record);
            }
            records.push(record);
        }

        if let Some(summary) = RunSummary::from_records(&records, started.elapsed()) {
            self.logger.log_summary(&summary);
        }
        self.logger.flush();
        Ok(records)
    }

    /// One forward/backward/update cycle. The forward pass runs inside a cache
    /// scope when `runtime.cached` is set, so the weight is evaluated once.
    pub fn train_step(&mut self, step: usize, input: &Tensor) -> Result<StepRecord, TrainingError> {
        let started = Instant::now();

        let (loss, asymmetry_before) = {
            let _scope = self.config.runtime.cached.then(cached);
            let weight = self.layer.weight()?;
            let asymmetry_before = asymmetry(&weight)?;
            self.ensure_symmetric(step, "before", asymmetry_before)?;
            let loss = self.layer.forward(input)?.sum_all()?;
            (loss, asymmetry_before)
        };

        let loss_value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        let mut grads = loss.backward()?;
        let report = self.optimizer.step(&mut grads)?;

        let asymmetry_after = asymmetry(&self.layer.weight()?)?;
        self.ensure_symmetric(step, "after", asymmetry_after)?;

        Ok(StepRecord {
            step,
            loss: loss_value,
            asymmetry_before,
            asymmetry_after,
            grad_norm: report.grad_norm,
            learning_rate: self.optimizer.learning_rate(),
            step_duration: started.elapsed(),
        })
    }

    fn ensure_symmetric(&self, step: usize, when: &str, value: f64) -> Result<(), TrainingError> {
        if value <= self.config.runtime.symmetry_tolerance {
            Ok(())
        } else {
            Err(TrainingError::runtime(format!(
                "weight left the symmetric manifold {when} step {step}: max |W - W^T| = {value:.3e}"
            )))
        }
    }
}

fn select_device(choice: DeviceChoice) -> Device {
    if choice == DeviceChoice::Cpu {
        return Device::Cpu;
    }

    let cuda_available = cuda_is_available();
    println!("device detection: cuda_available={}", cuda_available);
    if cuda_available {
        match Device::cuda_if_available(0) {
            Ok(device) => {
                println!("device: using CUDA GPU #0");
                return device;
            }
            Err(err) => {
                eprintln!("failed to initialize cuda device, falling back to CPU: {}", err);
            }
        }
    }
    println!("device: using CPU");
    Device::Cpu
}
