//! Collaborator contracts: the experiment being stepped and the recorder
//! that persists what happened.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A rendered frame, already encoded for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// Base64-encoded image bytes.
    Image(String),
    Text(String),
}

/// Result of advancing an experiment by one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: Value,
    pub reward: f64,
    pub done: bool,
    #[serde(default)]
    pub info: Value,
}

/// Opaque stepper driven by a trial. Observation and action contents are
/// never inspected by the session layer.
pub trait Experiment: Send {
    fn start(&mut self, options: &Value) -> Result<()>;
    fn step(&mut self, action: &Value) -> Result<StepOutcome>;
    fn render(&mut self) -> Result<Frame>;
    fn reset(&mut self) -> Result<()>;
    fn close(&mut self);
}

/// Which experiment a trial step runs, and with what options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub id: String,
    #[serde(default)]
    pub options: Value,
}

impl ExperimentSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            options: Value::Null,
        }
    }
}

/// Builds fresh experiment instances. Shared read-only across sessions.
pub trait ExperimentFactory: Send + Sync {
    fn knows(&self, id: &str) -> bool;
    fn create(&self, spec: &ExperimentSpec) -> Result<Box<dyn Experiment>>;
}

/// Append-only sink for trial records.
pub trait Recorder: Send {
    fn record(&mut self, event: Value) -> Result<()>;
    /// Called at every episode boundary.
    fn reset(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}
