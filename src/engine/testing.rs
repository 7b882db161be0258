//! Scripted engine and agent for tests.
//!
//! Steps are gated on permits released by the test, so scenarios can
//! interleave engine progress with server-side reactions deterministically.

use super::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub action_name: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl ScriptedStep {
    pub fn ok(action_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            success: true,
            error_message: None,
            duration: Duration::from_millis(150),
        }
    }

    pub fn fail(action_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            success: false,
            error_message: Some(error.into()),
            duration: Duration::from_millis(150),
        }
    }
}

/// A record of one `create` call.
pub struct CreatedAgent {
    pub task: String,
    pub cdp_endpoint: Option<String>,
    pub plan: Vec<Action>,
}

pub struct ScriptedEngine {
    script: Mutex<Vec<ScriptedStep>>,
    outcome_success: AtomicBool,
    fail_construction: Mutex<Option<String>>,
    pub created: Mutex<Vec<CreatedAgent>>,
    pub agents: Mutex<Vec<Arc<ScriptedAgent>>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script),
            outcome_success: AtomicBool::new(true),
            fail_construction: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            agents: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_construction(error: impl Into<String>) -> Self {
        let engine = Self::new(Vec::new());
        *engine.fail_construction.lock().unwrap() = Some(error.into());
        engine
    }

    pub fn with_outcome_success(self, success: bool) -> Self {
        self.outcome_success.store(success, Ordering::Relaxed);
        self
    }

    pub fn last_agent(&self) -> Arc<ScriptedAgent> {
        self.agents
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no agent created")
    }

    pub fn last_plan(&self) -> Vec<Action> {
        self.created
            .lock()
            .unwrap()
            .last()
            .expect("no agent created")
            .plan
            .clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn create(
        &self,
        task: &str,
        cdp_endpoint: Option<&str>,
        plan: Vec<Action>,
        events: EngineEvents,
    ) -> Result<Arc<dyn Agent>, EngineError> {
        if let Some(error) = self.fail_construction.lock().unwrap().clone() {
            return Err(EngineError::Construction(error));
        }
        self.created.lock().unwrap().push(CreatedAgent {
            task: task.to_string(),
            cdp_endpoint: cdp_endpoint.map(str::to_string),
            plan,
        });
        let agent = Arc::new(ScriptedAgent::new(
            self.script.lock().unwrap().clone(),
            self.outcome_success.load(Ordering::Relaxed),
            events,
        ));
        self.agents.lock().unwrap().push(agent.clone());
        Ok(agent)
    }
}

pub struct ScriptedAgent {
    steps: Mutex<VecDeque<ScriptedStep>>,
    outcome_success: bool,
    events: EngineEvents,
    gate: Semaphore,
    paused: watch::Sender<bool>,
    stop: CancellationToken,
    controls: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    fn new(steps: Vec<ScriptedStep>, outcome_success: bool, events: EngineEvents) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            outcome_success,
            events,
            gate: Semaphore::new(0),
            paused: watch::channel(false).0,
            stop: CancellationToken::new(),
            controls: Mutex::new(Vec::new()),
        }
    }

    /// Let the agent take `n` more steps.
    pub fn release_steps(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn recorded_controls(&self) -> Vec<String> {
        self.controls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn run(&self, max_steps: u32) -> Result<AgentOutcome, EngineError> {
        let mut paused_rx = self.paused.subscribe();
        let mut step_number = 0u32;
        loop {
            if self.stop.is_cancelled() || step_number >= max_steps {
                break;
            }
            if self.steps.lock().unwrap().is_empty() {
                break;
            }
            tokio::select! {
                permit = self.gate.acquire() => match permit {
                    Ok(p) => p.forget(),
                    Err(_) => break,
                },
                () = self.stop.cancelled() => break,
            }
            // Honor pause/stop intents at the step boundary.
            while *paused_rx.borrow_and_update() && !self.stop.is_cancelled() {
                tokio::select! {
                    changed = paused_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = self.stop.cancelled() => break,
                }
            }
            if self.stop.is_cancelled() {
                break;
            }
            let step = match self.steps.lock().unwrap().pop_front() {
                Some(s) => s,
                None => break,
            };
            step_number += 1;
            let update = StepUpdate {
                step_number,
                action_name: step.action_name,
                success: step.success,
                error_message: step.error_message,
                duration: step.duration,
                state: Value::Null,
            };
            if self.events.steps.send(update).await.is_err() {
                break;
            }
        }

        let stopped = self.stop.is_cancelled();
        let exhausted = self.steps.lock().unwrap().is_empty();
        Ok(AgentOutcome {
            success: !stopped && exhausted && self.outcome_success,
            history: None,
        })
    }

    fn pause(&self) {
        self.controls.lock().unwrap().push("pause".to_string());
        let _ = self.paused.send_replace(true);
    }

    fn resume(&self) {
        self.controls.lock().unwrap().push("resume".to_string());
        let _ = self.paused.send_replace(false);
    }

    fn stop(&self) {
        self.controls.lock().unwrap().push("stop".to_string());
        self.stop.cancel();
    }

    async fn guide(&self, guidance: &str) {
        self.controls
            .lock()
            .unwrap()
            .push(format!("guide:{guidance}"));
    }
}
