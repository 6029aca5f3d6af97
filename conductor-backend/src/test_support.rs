//! Scripted doubles shared by unit tests

use crate::agents::{Agent, AgentDescriptor, AgentResponse, ChatRequest};
use crate::ai::{Completion, CompletionRequest, LlmClient};
use crate::error::AgentError;
use crate::telemetry::{Dimensions, MetricsSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn descriptor(name: &str) -> AgentDescriptor {
    AgentDescriptor::new(name, format!("{} specialist", name), format!("Handle {} requests", name))
}

/// LLM double that replays scripted replies in order and records every request
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<Completion, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<Completion, String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Script of plain-text replies
    pub fn texts(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(Completion::text(*r))).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, String> {
        self.requests.lock().push(request);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

/// Agent that always returns the same response and counts `process` calls
pub struct StaticAgent {
    descriptor: AgentDescriptor,
    response: AgentResponse,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticAgent {
    pub fn with_descriptor(descriptor: AgentDescriptor, content: &str) -> Arc<Self> {
        Self::responding(descriptor, AgentResponse::success(content))
    }

    pub fn responding(descriptor: AgentDescriptor, response: AgentResponse) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            response,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn success(name: &str, content: &str) -> Arc<Self> {
        Self::with_descriptor(descriptor(name), content)
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Self::responding(descriptor(name), AgentResponse::error(message))
    }

    /// Succeeds after sleeping, to shuffle completion order
    pub fn slow(name: &str, content: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            descriptor: descriptor(name),
            response: AgentResponse::success(content),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for StaticAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn process(&self, _request: &ChatRequest) -> Result<AgentResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.response.clone())
    }
}

/// Agent whose `process` panics
pub struct PanickingAgent {
    descriptor: AgentDescriptor,
}

impl PanickingAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { descriptor: descriptor(name) })
    }
}

#[async_trait]
impl Agent for PanickingAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn process(&self, _request: &ChatRequest) -> Result<AgentResponse, AgentError> {
        panic!("agent '{}' blew up", self.descriptor.name);
    }
}

/// Metrics sink that keeps every record, optionally failing every emit
#[derive(Default)]
pub struct RecordingMetricsSink {
    records: Mutex<Vec<(String, Dimensions, f64)>>,
    fail: bool,
}

impl RecordingMetricsSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn records(&self) -> Vec<(String, Dimensions, f64)> {
        self.records.lock().clone()
    }

    /// Sum of values recorded under `metric` with `dimension = value`
    pub fn total(&self, metric: &str, dimension: &str, value: &str) -> f64 {
        self.records
            .lock()
            .iter()
            .filter(|(name, dims, _)| name == metric && dims.get(dimension).map(String::as_str) == Some(value))
            .map(|(_, _, v)| v)
            .sum()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn emit(&self, metric_name: &str, dimensions: &Dimensions, value: f64) -> Result<(), String> {
        self.records
            .lock()
            .push((metric_name.to_string(), dimensions.clone(), value));
        if self.fail {
            Err("metrics backend unreachable".to_string())
        } else {
            Ok(())
        }
    }
}
