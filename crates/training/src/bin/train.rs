use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use serde_json::Value;
use training::{config::parse_override_value, ExperimentConfig, Trainer, TrainingError};

fn main() {
    if let Err(err) = run() {
        eprintln!("training failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fit a linear layer under a symmetric parametrization", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to experiment config file (toml or json)"
    )]
    config: PathBuf,

    #[arg(
        long = "override",
        value_name = "KEY=VALUE",
        help = "Override configuration value using dot-separated paths"
    )]
    overrides: Vec<OverrideArg>,

    #[arg(long, help = "Number of optimizer steps")]
    steps: Option<usize>,

    #[arg(long = "learning-rate", help = "SGD learning rate")]
    learning_rate: Option<f64>,

    #[arg(long, help = "Suppress per-step output")]
    quiet: bool,
}

#[derive(Debug, Clone)]
struct OverrideArg {
    path: String,
    value: String,
}

impl FromStr for OverrideArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

fn run() -> Result<(), TrainingError> {
    let args = Args::parse();

    let mut overrides: Vec<(String, Value)> = args
        .overrides
        .iter()
        .map(|arg| (arg.path.clone(), parse_override_value(&arg.value)))
        .collect();
    if let Some(steps) = args.steps {
        overrides.push(("runtime.steps".into(), Value::from(steps)));
    }
    if let Some(lr) = args.learning_rate {
        overrides.push(("optimizer.learning_rate".into(), Value::from(lr)));
    }
    if args.quiet {
        overrides.push(("logging.enable_stdout".into(), Value::Bool(false)));
    }

    let config = ExperimentConfig::load_with_overrides(&args.config, &overrides)?;
    let mut trainer = Trainer::new(config)?;
    let records = trainer.train()?;

    if args.quiet {
        if let Some(last) = records.last() {
            println!(
                "{} steps={} final_loss={:.4} asymmetry={:.3e}",
                trainer.description(),
                records.len(),
                last.loss,
                last.asymmetry_after
            );
        }
    }
    Ok(())
}
