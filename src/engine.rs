//! Contract with the external browser-automation engine.
//!
//! The engine itself (LLM inference, DOM parsing, action selection) lives
//! outside this process. The server only requires the small command/callback
//! surface below: build an agent for a task, drive it with cooperative
//! control intents, and receive step updates and structured log records over
//! channels that marshal them onto the server's scheduling domain.

#[cfg(test)]
pub mod testing;

use crate::protocol::{EventType, LogLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// One action in the plan forwarded to the engine.
///
/// The server never inspects action contents beyond forwarding; engines may
/// define arbitrary extensions via `Custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    DetectLocation,
    FindBestWebsite { purpose: String, category: String },
    SearchEcommerce { query: String },
    Custom { name: String, params: Value },
}

/// Payload of the per-step callback the engine invokes after every step.
#[derive(Debug, Clone)]
pub struct StepUpdate {
    pub step_number: u32,
    pub action_name: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Duration,
    /// Engine-defined page state, forwarded to the log stream untouched.
    pub state: Value,
}

/// One structured log record from the engine, before canonicalization.
#[derive(Debug, Clone)]
pub struct EngineRecord {
    pub level: LogLevel,
    pub event_type: EventType,
    pub logger_name: String,
    pub message: String,
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl EngineRecord {
    pub fn new(
        level: LogLevel,
        event_type: EventType,
        logger_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            event_type,
            logger_name: logger_name.into(),
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Channel surface handed to the engine when an agent is created.
///
/// Step updates and log records must only be sent once `run` has begun;
/// both channels are dropped with the agent.
#[derive(Clone)]
pub struct EngineEvents {
    pub steps: mpsc::Sender<StepUpdate>,
    pub records: mpsc::Sender<EngineRecord>,
}

/// Terminal outcome reported by an agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub history: Option<Value>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("agent construction failed: {0}")]
    Construction(String),
    #[error("agent run failed: {0}")]
    Run(String),
}

/// Factory for agents. Construction may be expensive; it is invoked once per
/// task start.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn create(
        &self,
        task: &str,
        cdp_endpoint: Option<&str>,
        plan: Vec<Action>,
        events: EngineEvents,
    ) -> Result<Arc<dyn Agent>, EngineError>;
}

/// A running agent.
///
/// `pause`, `resume` and `stop` are idempotent request intents; the engine
/// honors them at its next step boundary. `guide` injects user guidance into
/// the agent's context before the next step.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, max_steps: u32) -> Result<AgentOutcome, EngineError>;
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    async fn guide(&self, guidance: &str);
}

#[async_trait]
impl<T: Engine + ?Sized> Engine for Arc<T> {
    async fn create(
        &self,
        task: &str,
        cdp_endpoint: Option<&str>,
        plan: Vec<Action>,
        events: EngineEvents,
    ) -> Result<Arc<dyn Agent>, EngineError> {
        (**self).create(task, cdp_endpoint, plan, events).await
    }
}
