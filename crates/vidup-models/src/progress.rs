//! Normalized progress values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Last reported progress for the current stage.
///
/// Percent is stage-local: it restarts at 0 whenever the job enters a new stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Progress {
    pub percent: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

impl Progress {
    /// Fresh progress for a stage that just started.
    pub fn starting(message: impl Into<String>) -> Self {
        Self {
            percent: 0.0,
            message: message.into(),
            speed: None,
            eta: None,
        }
    }
}

/// One normalized update derived from tool output or a transfer callback.
///
/// Every field is optional. A missing field leaves the previous value in place,
/// so an indeterminate step never resets the percent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub percent: Option<f64>,
    pub message: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    /// Timestamp marker in seconds reported by the tool (scene cuts).
    pub marker: Option<f64>,
}

impl ProgressUpdate {
    pub fn percent(percent: f64) -> Self {
        Self {
            percent: Some(clamp_percent(percent)),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn with_eta(mut self, eta: impl Into<String>) -> Self {
        self.eta = Some(eta.into());
        self
    }

    /// Map this update's percent into the `[start, end]` band of a stage.
    pub fn scaled(mut self, start: f64, end: f64) -> Self {
        if let Some(p) = self.percent {
            self.percent = Some(clamp_percent(start + (end - start) * p / 100.0));
        }
        self
    }

    /// True when the update carries nothing that would change a snapshot.
    pub fn is_empty(&self) -> bool {
        self.percent.is_none() && self.message.is_none() && self.speed.is_none() && self.eta.is_none()
    }
}

/// Clamp to `[0, 100]`, mapping NaN to 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
