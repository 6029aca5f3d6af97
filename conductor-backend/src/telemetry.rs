//! Telemetry records and the fire-and-forget metrics sink
//!
//! Telemetry is purely observational: nothing in here may change the outcome
//! of a delegation or orchestration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::time::Instant;

/// Token counts reported by the LLM provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    pub cached: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64, cached: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
            cached,
        }
    }

    /// Read usage back out of a response metadata map (`metadata.token_usage`)
    pub fn from_metadata(metadata: Option<&serde_json::Map<String, Value>>) -> Option<Self> {
        metadata
            .and_then(|m| m.get("token_usage"))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
        self.cached += other.cached;
    }
}

/// Wall-clock window of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTime {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Seconds
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub token_usage: TokenUsage,
    pub processing_time: ProcessingTime,
}

/// Measures one invocation; call `finish` when it is done
pub struct Stopwatch {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn finish(&self, token_usage: TokenUsage) -> Telemetry {
        let duration = self.started.elapsed().as_secs_f64();
        Telemetry {
            token_usage,
            processing_time: ProcessingTime {
                start: self.started_at,
                end: Utc::now(),
                duration,
            },
        }
    }
}

/// Dimensions attached to a metric record (agent name, error category, ...)
pub type Dimensions = BTreeMap<String, String>;

/// External metrics backend.
///
/// Implementations must return quickly; callers go through [`emit_metric`],
/// which swallows failures.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, metric_name: &str, dimensions: &Dimensions, value: f64) -> Result<(), String>;
}

/// Default sink: writes metric records to the debug log
#[derive(Debug, Default)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn emit(&self, metric_name: &str, dimensions: &Dimensions, value: f64) -> Result<(), String> {
        log::debug!("[METRICS] {} {:?} = {}", metric_name, dimensions, value);
        Ok(())
    }
}

/// Emit a metric, logging (and otherwise ignoring) any sink failure
pub fn emit_metric(sink: &dyn MetricsSink, metric_name: &str, dimensions: &Dimensions, value: f64) {
    if let Err(e) = sink.emit(metric_name, dimensions, value) {
        log::warn!("[METRICS] Failed to emit '{}': {}", metric_name, e);
    }
}

/// Build a dimension map from string pairs
pub fn dimensions<const N: usize>(pairs: [(&str, &str); N]) -> Dimensions {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
