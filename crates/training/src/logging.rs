use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    metrics::{RunSummary, StepRecord},
    TrainingError,
};

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub enable_stdout: bool,
    pub metrics_path: Option<PathBuf>,
    pub flush_every_n: usize,
}

impl LoggingSettings {
    pub fn from_config(enable_stdout: bool, metrics_path: Option<PathBuf>, flush_every: usize) -> Self {
        Self {
            enable_stdout,
            metrics_path,
            flush_every_n: flush_every.max(1),
        }
    }
}

/// Prints step lines to stdout and, optionally, appends JSON lines to a file.
pub struct Logger {
    settings: LoggingSettings,
    metrics: Option<MetricsWriter>,
}

impl Logger {
    pub fn new(settings: LoggingSettings) -> Result<Self, TrainingError> {
        let metrics = match settings.metrics_path.as_ref() {
            Some(path) => Some(MetricsWriter::create(path, settings.flush_every_n)?),
            None => None,
        };
        Ok(Self { settings, metrics })
    }

    pub fn log_start(&self, description: &str) {
        if self.settings.enable_stdout {
            println!("train start {}", description);
        }
    }

    pub fn log_training_step(&mut self, record: &StepRecord) {
        if self.settings.enable_stdout {
            println!(
                "train step={} loss={:.4} asymmetry={:.3e} grad_norm={:.3} lr={:.5e}",
                record.step,
                record.loss,
                record.asymmetry_after,
                record.grad_norm,
                record.learning_rate
            );
        }

        if let Some(writer) = self.metrics.as_mut() {
            if let Err(err) = writer.write_line("step", record) {
                eprintln!("metrics sink disabled: {err}");
                self.metrics = None;
            }
        }
    }

    pub fn log_summary(&mut self, summary: &RunSummary) {
        if self.settings.enable_stdout {
            println!(
                "train done steps={} first_loss={:.4} final_loss={:.4} max_asymmetry={:.3e} time={:.2}s",
                summary.steps,
                summary.first_loss,
                summary.final_loss,
                summary.max_asymmetry,
                summary.wall_time.as_secs_f64()
            );
        }

        if let Some(writer) = self.metrics.as_mut() {
            let _ = writer.write_line("summary", summary);
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.metrics.as_mut() {
            let _ = writer.flush();
        }
    }
}

struct MetricsWriter {
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    kind: &'a str,
    #[serde(flatten)]
    payload: &'a T,
}

impl MetricsWriter {
    fn create(path: &Path, flush_every: usize) -> Result<Self, TrainingError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                TrainingError::runtime(format!(
                    "failed to create metrics directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let file = File::create(path).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create metrics file {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    fn write_line<T: Serialize>(&mut self, kind: &str, payload: &T) -> Result<(), TrainingError> {
        let line = serde_json::to_string(&Line { kind, payload })?;
        writeln!(self.writer, "{line}")
            .map_err(|err| TrainingError::runtime(format!("failed to write metrics: {err}")))?;
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrainingError> {
        self.writer
            .flush()
            .map_err(|err| TrainingError::runtime(format!("failed to flush metrics file: {err}")))?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for MetricsWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
