pub mod config;
pub mod logging;
pub mod metrics;
pub mod optimizer;
pub mod trainer;

pub use config::{ExperimentConfig, ParametrizationConfig, TrainingError};
pub use logging::{Logger, LoggingSettings};
pub use metrics::{RunSummary, StepRecord};
pub use optimizer::{Sgd, SgdConfig, StepReport};
pub use trainer::Trainer;
