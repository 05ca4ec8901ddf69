use std::time::Duration;

use serde::Serialize;

/// Measurements taken around one optimizer step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub loss: f64,
    /// Largest `|W - W^T|` entry of the effective weight read before the update.
    pub asymmetry_before: f64,
    /// Same measure after the update.
    pub asymmetry_after: f64,
    pub grad_norm: f64,
    pub learning_rate: f64,
    #[serde(rename = "step_duration_ms", serialize_with = "as_millis")]
    pub step_duration: Duration,
}

/// Aggregate view of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub steps: usize,
    pub first_loss: f64,
    pub final_loss: f64,
    pub max_asymmetry: f64,
    #[serde(rename = "wall_time_ms", serialize_with = "as_millis")]
    pub wall_time: Duration,
}

impl RunSummary {
    pub fn from_records(records: &[StepRecord], wall_time: Duration) -> Option<Self> {
        let first = records.first()?;
        let last = records.last()?;
        let max_asymmetry = records
            .iter()
            .map(|r| r.asymmetry_before.max(r.asymmetry_after))
            .fold(0.0, f64::max);
        Some(Self {
            steps: records.len(),
            first_loss: first.loss,
            final_loss: last.loss,
            max_asymmetry,
            wall_time,
        })
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1e3)
}
