//! Task manager runtime.
//!
//! A single event loop owns the task state, the agent handle, the stuck
//! detector and the help rendezvous slot. Commands carry reply channels;
//! engine callbacks and timers re-enter the loop as internal events tagged
//! with the task epoch so stale ones are discarded.

use crate::bus::{EventBus, LogCapture};
use crate::engine::{Action, Agent, AgentOutcome, Engine, EngineEvents, EngineRecord, StepUpdate};
use crate::protocol::{
    EventType, LogEvent, LogLevel, ServerEvent, StartTaskPayload, TaskStatus, DEFAULT_MAX_STEPS,
};
use crate::session::SessionRegistry;
use crate::stuck::{ActionRecord, StuckConfig, StuckDetector};
use crate::task::effect::Effect;
use crate::task::event::TaskEvent;
use crate::task::shopping::is_shopping_task;
use crate::task::state::{TaskSpec, TaskState};
use crate::task::transition::transition;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub struct ManagerConfig {
    pub stuck: StuckConfig,
    /// Fallback endpoint for non-extension starts that omit one.
    pub default_cdp_endpoint: Option<String>,
    pub max_steps: u32,
    /// How long the help rendezvous waits for a user response.
    pub help_timeout: Duration,
    /// How long a stop may stay unacknowledged before the agent is abandoned.
    pub stop_timeout: Duration,
    /// Cadence of the timer-driven stall check.
    pub progress_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stuck: StuckConfig::default(),
            default_cdp_endpoint: None,
            max_steps: DEFAULT_MAX_STEPS,
            help_timeout: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(120),
            progress_interval: Duration::from_secs(30),
        }
    }
}

enum Command {
    Start {
        payload: StartTaskPayload,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Stop {
        reply: oneshot::Sender<Result<String, String>>,
    },
    Pause {
        reply: oneshot::Sender<Result<String, String>>,
    },
    Resume {
        reply: oneshot::Sender<Result<String, String>>,
    },
    HelpResponse {
        response: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Status {
        reply: oneshot::Sender<TaskStatus>,
    },
    Internal(Internal),
}

enum Internal {
    AgentReady { epoch: u64, agent: Arc<dyn Agent> },
    AgentFailed { epoch: u64, error: String },
    AgentTerminated { epoch: u64, outcome: AgentOutcome },
    Step { epoch: u64, update: StepUpdate },
    HelpResolved {
        epoch: u64,
        guidance: Option<String>,
        timed_out: bool,
    },
    StopTimedOut { epoch: u64 },
}

/// Cloneable handle for issuing commands to the manager loop.
#[derive(Clone)]
pub struct TaskManagerHandle {
    tx: mpsc::Sender<Command>,
}

const UNAVAILABLE: &str = "task manager unavailable";

impl TaskManagerHandle {
    pub async fn start(&self, payload: StartTaskPayload) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Start { payload, reply })
            .await
            .map_err(|_| UNAVAILABLE.to_string())?;
        rx.await.map_err(|_| UNAVAILABLE.to_string())?
    }

    pub async fn stop(&self) -> Result<String, String> {
        self.action(|reply| Command::Stop { reply }).await
    }

    pub async fn pause(&self) -> Result<String, String> {
        self.action(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<String, String> {
        self.action(|reply| Command::Resume { reply }).await
    }

    pub async fn help_response(&self, response: String) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::HelpResponse { response, reply })
            .await
            .map_err(|_| UNAVAILABLE.to_string())?;
        rx.await.map_err(|_| UNAVAILABLE.to_string())?
    }

    pub async fn status(&self) -> TaskStatus {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Status { reply }).await.is_err() {
            return TaskStatus::default();
        }
        rx.await.unwrap_or_default()
    }

    async fn action<F>(&self, make: F) -> Result<String, String>
    where
        F: FnOnce(oneshot::Sender<Result<String, String>>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| UNAVAILABLE.to_string())?;
        rx.await.map_err(|_| UNAVAILABLE.to_string())?
    }
}

/// Start the manager loop and return its handle.
pub fn spawn(
    engine: Option<Arc<dyn Engine>>,
    bus: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    config: ManagerConfig,
) -> TaskManagerHandle {
    let (tx, rx) = mpsc::channel(64);
    let manager = TaskManager {
        state: TaskState::Idle,
        stuck: StuckDetector::new(config.stuck.clone()),
        capture: Arc::new(LogCapture::new(bus.clone())),
        engine,
        bus,
        registry,
        config,
        agent: None,
        epoch: 0,
        help_slot: None,
        tx: tx.clone(),
    };
    tokio::spawn(manager.run(rx));
    TaskManagerHandle { tx }
}

struct TaskManager {
    state: TaskState,
    engine: Option<Arc<dyn Engine>>,
    bus: Arc<EventBus>,
    capture: Arc<LogCapture>,
    registry: Arc<SessionRegistry>,
    stuck: StuckDetector,
    config: ManagerConfig,
    agent: Option<Arc<dyn Agent>>,
    epoch: u64,
    help_slot: Option<oneshot::Sender<String>>,
    tx: mpsc::Sender<Command>,
}

impl TaskManager {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::info!("Task manager started");
        let mut progress = tokio::time::interval(self.config.progress_interval);
        progress.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        progress.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                _ = progress.tick() => self.check_progress().await,
            }
        }
        tracing::info!("Task manager stopped");
    }

    async fn check_progress(&mut self) {
        if !matches!(self.state, TaskState::Running { .. }) {
            return;
        }
        if let Some(report) = self.stuck.evaluate() {
            self.apply(TaskEvent::StuckDetected { report }).await.ok();
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { payload, reply } => {
                let _ = reply.send(self.handle_start(payload).await);
            }
            Command::Pause { reply } => {
                let result = self
                    .apply(TaskEvent::PauseRequested)
                    .await
                    .map(|()| "Task paused.".to_string());
                let _ = reply.send(result);
            }
            Command::Resume { reply } => {
                let result = self
                    .apply(TaskEvent::ResumeRequested)
                    .await
                    .map(|()| "Task resumed.".to_string());
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let result = self
                    .apply(TaskEvent::StopRequested)
                    .await
                    .map(|()| "Task stop requested.".to_string());
                let _ = reply.send(result);
            }
            Command::HelpResponse { response, reply } => {
                let result = match self.help_slot.take() {
                    Some(slot) => {
                        let _ = slot.send(response);
                        Ok(())
                    }
                    None => Err("no pending help request".to_string()),
                };
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.state.status());
            }
            Command::Internal(internal) => self.handle_internal(internal).await,
        }
    }

    async fn handle_start(&mut self, payload: StartTaskPayload) -> Result<(), String> {
        if self.engine.is_none() {
            return Err("automation engine is not configured".to_string());
        }
        let spec = self.validate_start(payload)?;
        self.apply(TaskEvent::StartRequested { spec }).await
    }

    fn validate_start(&self, payload: StartTaskPayload) -> Result<TaskSpec, String> {
        let task = payload.task.trim();
        if task.is_empty() {
            return Err("task description is empty".to_string());
        }
        if payload.is_extension && payload.cdp_endpoint.is_none() {
            return Err("cdp_endpoint is required for extension tasks".to_string());
        }
        let cdp_endpoint = payload
            .cdp_endpoint
            .or_else(|| self.config.default_cdp_endpoint.clone());
        Ok(TaskSpec {
            task: task.to_string(),
            cdp_endpoint,
        })
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::AgentReady { epoch, agent } => {
                if epoch != self.epoch {
                    return;
                }
                self.agent = Some(agent.clone());
                if self.apply(TaskEvent::AgentReady).await.is_ok() {
                    self.spawn_run(agent, epoch);
                }
            }
            Internal::AgentFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.apply(TaskEvent::AgentFailed { error }).await.ok();
            }
            Internal::AgentTerminated { epoch, outcome } => {
                if epoch != self.epoch {
                    return;
                }
                self.apply(TaskEvent::AgentTerminated { outcome }).await.ok();
            }
            Internal::Step { epoch, update } => {
                if epoch != self.epoch {
                    return;
                }
                self.handle_step(update).await;
            }
            Internal::HelpResolved {
                epoch,
                guidance,
                timed_out,
            } => {
                if epoch != self.epoch {
                    return;
                }
                self.apply(TaskEvent::HelpResolved { guidance, timed_out })
                    .await
                    .ok();
            }
            Internal::StopTimedOut { epoch } => {
                if epoch != self.epoch {
                    return;
                }
                self.apply(TaskEvent::StopTimedOut).await.ok();
            }
        }
    }

    async fn handle_step(&mut self, update: StepUpdate) {
        let message = match (&update.success, &update.error_message) {
            (true, _) => format!("Step {}: {} succeeded", update.step_number, update.action_name),
            (false, Some(err)) => format!(
                "Step {}: {} failed: {err}",
                update.step_number, update.action_name
            ),
            (false, None) => {
                format!("Step {}: {} failed", update.step_number, update.action_name)
            }
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("step_number".to_string(), json!(update.step_number));
        metadata.insert("action".to_string(), json!(update.action_name.clone()));
        metadata.insert("success".to_string(), json!(update.success));
        metadata.insert(
            "duration_ms".to_string(),
            json!(update.duration.as_millis() as u64),
        );
        if !update.state.is_null() {
            metadata.insert("state".to_string(), update.state.clone());
        }
        let level = if update.success {
            LogLevel::Info
        } else {
            LogLevel::Warning
        };
        self.capture.capture(
            EngineRecord::new(level, EventType::AgentStep, "agent", message)
                .with_metadata(metadata),
        );

        // The detector only scores live steps; boundary stragglers after a
        // pause or stop are logged but not scored.
        if matches!(self.state, TaskState::Running { .. }) {
            let record = ActionRecord {
                action_name: update.action_name,
                timestamp: Utc::now(),
                duration: update.duration,
                success: update.success,
                error_message: update.error_message,
                step_number: update.step_number,
            };
            if let Some(report) = self.stuck.record(record) {
                self.apply(TaskEvent::StuckDetected { report }).await.ok();
            }
        }
    }

    /// Run the event through the pure machine, then execute its effects.
    async fn apply(&mut self, event: TaskEvent) -> Result<(), String> {
        let result = match transition(&self.state, event) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(state = self.state.name(), error = %err, "Transition rejected");
                return Err(err.to_string());
            }
        };
        let from = self.state.name();
        self.state = result.new_state;
        if from != self.state.name() {
            tracing::info!(from, to = self.state.name(), "Task state transition");
        }
        for effect in result.effects {
            self.execute_effect(effect).await;
        }
        if matches!(self.state, TaskState::Idle | TaskState::Terminal { .. }) {
            self.agent = None;
        }
        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::ResetStuckDetector => self.stuck.reset(),
            Effect::BuildAgent { spec } => self.build_agent(spec),
            Effect::PauseAgent => {
                if let Some(agent) = &self.agent {
                    agent.pause();
                }
            }
            Effect::ResumeAgent => {
                if let Some(agent) = &self.agent {
                    agent.resume();
                }
            }
            Effect::StopAgent => {
                if let Some(agent) = &self.agent {
                    agent.stop();
                }
            }
            Effect::ForwardGuidance { guidance } => {
                if let Some(agent) = &self.agent {
                    agent.guide(&guidance).await;
                }
            }
            Effect::OpenHelpSlot => self.open_help_slot(),
            // Dropping the sender makes the rendezvous task exit silently.
            Effect::CloseHelpSlot => self.help_slot = None,
            Effect::NotifyTaskStarted => {
                self.registry.broadcast(&ServerEvent::TaskStarted {
                    message: "Task is starting...".to_string(),
                });
            }
            Effect::EmitHelpNeeded { report } => {
                self.registry.broadcast(&ServerEvent::AgentNeedsHelp {
                    reason: report.reason,
                    summary: report.summary,
                    attempted_actions: report.attempted_actions,
                    duration_seconds: report.duration_seconds,
                    suggestion: report.suggestion,
                });
            }
            Effect::EmitTaskResult {
                task,
                success,
                history,
            } => {
                self.registry.broadcast(&ServerEvent::TaskResult {
                    task,
                    success,
                    history,
                });
            }
            Effect::EmitLifecycleLog {
                level,
                event_type,
                message,
            } => {
                self.bus
                    .publish(LogEvent::new(level, event_type, "task_manager", message));
            }
            Effect::BroadcastStatus => {
                self.registry
                    .broadcast(&ServerEvent::Status(self.state.status()));
            }
            Effect::StartStopTimer => {
                let tx = self.tx.clone();
                let epoch = self.epoch;
                let timeout = self.config.stop_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx
                        .send(Command::Internal(Internal::StopTimedOut { epoch }))
                        .await;
                });
            }
        }
    }

    fn build_agent(&mut self, spec: TaskSpec) {
        self.epoch += 1;
        let epoch = self.epoch;
        let Some(engine) = self.engine.clone() else {
            // Guarded at the command boundary; kept for internal callers.
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(Command::Internal(Internal::AgentFailed {
                        epoch,
                        error: "automation engine is not configured".to_string(),
                    }))
                    .await;
            });
            return;
        };

        let (steps_tx, mut steps_rx) = mpsc::channel::<StepUpdate>(64);
        let (records_tx, mut records_rx) = mpsc::channel::<EngineRecord>(256);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(update) = steps_rx.recv().await {
                if tx
                    .send(Command::Internal(Internal::Step { epoch, update }))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let capture = self.capture.clone();
        tokio::spawn(async move {
            while let Some(record) = records_rx.recv().await {
                capture.capture(record);
            }
        });

        let plan = build_plan(&spec);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let events = EngineEvents {
                steps: steps_tx,
                records: records_tx,
            };
            let internal = match engine
                .create(&spec.task, spec.cdp_endpoint.as_deref(), plan, events)
                .await
            {
                Ok(agent) => Internal::AgentReady { epoch, agent },
                Err(err) => Internal::AgentFailed {
                    epoch,
                    error: err.to_string(),
                },
            };
            let _ = tx.send(Command::Internal(internal)).await;
        });
    }

    fn spawn_run(&self, agent: Arc<dyn Agent>, epoch: u64) {
        let tx = self.tx.clone();
        let max_steps = self.config.max_steps;
        tokio::spawn(async move {
            let outcome = match agent.run(max_steps).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(error = %err, "Agent run failed");
                    AgentOutcome {
                        success: false,
                        history: None,
                    }
                }
            };
            let _ = tx
                .send(Command::Internal(Internal::AgentTerminated {
                    epoch,
                    outcome,
                }))
                .await;
        });
    }

    fn open_help_slot(&mut self) {
        let (slot_tx, slot_rx) = oneshot::channel::<String>();
        self.help_slot = Some(slot_tx);
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let timeout = self.config.help_timeout;
        tokio::spawn(async move {
            let internal = tokio::select! {
                response = slot_rx => match response {
                    Ok(guidance) => Internal::HelpResolved {
                        epoch,
                        guidance: Some(guidance),
                        timed_out: false,
                    },
                    // Slot dropped: the task stopped or a new one started.
                    Err(_) => return,
                },
                () = tokio::time::sleep(timeout) => Internal::HelpResolved {
                    epoch,
                    guidance: None,
                    timed_out: true,
                },
            };
            let _ = tx.send(Command::Internal(internal)).await;
        });
    }
}

/// Shopping tasks get location detection and site selection prepended.
fn build_plan(spec: &TaskSpec) -> Vec<Action> {
    if is_shopping_task(&spec.task) {
        vec![
            Action::DetectLocation,
            Action::FindBestWebsite {
                purpose: spec.task.clone(),
                category: "shopping".to_string(),
            },
        ]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ScriptedEngine, ScriptedStep};
    use crate::engine::Action;
    use crate::session::SessionHandle;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        handle: TaskManagerHandle,
        rx: mpsc::Receiver<ServerEvent>,
        engine: Arc<ScriptedEngine>,
    }

    fn payload(task: &str) -> StartTaskPayload {
        StartTaskPayload {
            task: task.to_string(),
            cdp_endpoint: Some("ws://e:9222/1".to_string()),
            is_extension: true,
        }
    }

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            help_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(3600),
            ..ManagerConfig::default()
        }
    }

    fn harness_with(engine: ScriptedEngine, config: ManagerConfig) -> Harness {
        let registry = Arc::new(SessionRegistry::new());
        let bus = Arc::new(EventBus::new(registry.clone()));
        let (tx, rx) = mpsc::channel(256);
        registry.insert("client", Arc::new(SessionHandle::new(tx)));
        bus.attach("client");
        let engine = Arc::new(engine);
        let handle = spawn(Some(engine.clone()), bus, registry, config);
        Harness { handle, rx, engine }
    }

    fn harness(engine: ScriptedEngine) -> Harness {
        harness_with(engine, test_config())
    }

    impl Harness {
        async fn next_event(&mut self) -> ServerEvent {
            timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event stream closed")
        }

        /// Drain events until `pred` matches, returning everything seen.
        async fn events_until<F>(&mut self, pred: F) -> Vec<ServerEvent>
        where
            F: Fn(&ServerEvent) -> bool,
        {
            let mut seen = Vec::new();
            loop {
                let event = self.next_event().await;
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }
    }

    fn is_task_result(event: &ServerEvent) -> bool {
        matches!(event, ServerEvent::TaskResult { .. })
    }

    fn is_task_started(event: &ServerEvent) -> bool {
        matches!(event, ServerEvent::TaskStarted { .. })
    }

    #[tokio::test]
    async fn vanilla_task_runs_to_successful_completion() {
        let mut h = harness(ScriptedEngine::new(vec![
            ScriptedStep::ok("navigate"),
            ScriptedStep::ok("click"),
            ScriptedStep::ok("extract"),
        ]));

        h.handle.start(payload("open example.com")).await.unwrap();
        let prefix = h.events_until(is_task_started).await;
        // Accepting the start broadcast the starting status first.
        assert!(matches!(
            &prefix[0],
            ServerEvent::Status(s) if s.is_running && !s.has_agent
        ));

        h.engine.last_agent().release_steps(3);
        let events = h.events_until(is_task_result).await;

        let step_logs: Vec<&ServerEvent> = events
            .iter()
            .filter(|e| {
                matches!(e, ServerEvent::LogEvent(log) if log.event_type == EventType::AgentStep)
            })
            .collect();
        assert_eq!(step_logs.len(), 3);
        match events.last().unwrap() {
            ServerEvent::TaskResult { task, success, .. } => {
                assert_eq!(task, "open example.com");
                assert!(*success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The terminal status follows the result.
        match h.next_event().await {
            ServerEvent::Status(status) => {
                assert!(!status.is_running);
                assert!(!status.has_agent);
                assert!(status.current_task.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.handle.status().await, TaskStatus::default());
    }

    #[tokio::test]
    async fn stuck_agent_is_paused_and_rescued_by_guidance() {
        let mut h = harness(ScriptedEngine::new(vec![
            ScriptedStep::fail("click", "element not found"),
            ScriptedStep::fail("click", "element not found"),
            ScriptedStep::fail("click", "element not found"),
            ScriptedStep::ok("click"),
        ]));

        h.handle.start(payload("buy widgets")).await.unwrap();
        h.events_until(is_task_started).await;
        h.engine.last_agent().release_steps(3);

        let events = h
            .events_until(|e| matches!(e, ServerEvent::AgentNeedsHelp { .. }))
            .await;
        match events.last().unwrap() {
            ServerEvent::AgentNeedsHelp {
                reason,
                attempted_actions,
                suggestion,
                ..
            } => {
                assert_eq!(*reason, crate::protocol::StuckReason::Repeating);
                assert_eq!(attempted_actions.len(), 3);
                assert!(attempted_actions[0].contains('\u{2717}'));
                assert_eq!(suggestion, "What should it try differently?");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The help log and the paused status precede the help event.
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::LogEvent(log) if log.event_type == EventType::UserHelpNeeded
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::Status(s) if s.is_paused)));

        h.handle
            .help_response("scroll down first".to_string())
            .await
            .unwrap();
        h.events_until(|e| matches!(e, ServerEvent::Status(s) if !s.is_paused))
            .await;

        let controls = h.engine.last_agent().recorded_controls();
        let guide_pos = controls
            .iter()
            .position(|c| c == "guide:scroll down first")
            .expect("guidance forwarded");
        let resume_pos = controls
            .iter()
            .rposition(|c| c == "resume")
            .expect("agent resumed");
        assert!(controls.iter().any(|c| c == "pause"));
        assert!(guide_pos < resume_pos);

        // A second help response has no pending slot to resolve.
        let err = h
            .handle
            .help_response("anything".to_string())
            .await
            .unwrap_err();
        assert_eq!(err, "no pending help request");

        h.engine.last_agent().release_steps(1);
        let events = h.events_until(is_task_result).await;
        assert!(matches!(
            events.last().unwrap(),
            ServerEvent::TaskResult { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn pause_resume_stop_round_trip() {
        let mut h = harness(ScriptedEngine::new(
            (0..10).map(|_| ScriptedStep::ok("navigate")).collect(),
        ));

        h.handle.start(payload("walk the site")).await.unwrap();
        h.events_until(is_task_started).await;
        h.engine.last_agent().release_steps(2);
        h.events_until(|e| {
            matches!(e, ServerEvent::LogEvent(log) if log.message.starts_with("Step 2"))
        })
        .await;

        let ack = h.handle.pause().await.unwrap();
        assert_eq!(ack, "Task paused.");
        h.events_until(|e| matches!(e, ServerEvent::Status(s) if s.is_paused))
            .await;
        // Pausing twice is rejected without a state change.
        assert_eq!(h.handle.pause().await.unwrap_err(), "not running");

        h.handle.resume().await.unwrap();
        h.events_until(|e| matches!(e, ServerEvent::Status(s) if !s.is_paused))
            .await;

        h.handle.stop().await.unwrap();
        let events = h.events_until(is_task_result).await;
        match events.last().unwrap() {
            ServerEvent::TaskResult { task, success, .. } => {
                assert_eq!(task, "walk the site");
                assert!(!*success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // Stop stays idempotent after the task ended.
        assert!(h.handle.stop().await.is_ok());
    }

    #[tokio::test]
    async fn help_timeout_resumes_without_guidance() {
        let config = ManagerConfig {
            help_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let mut h = harness_with(
            ScriptedEngine::new(vec![
                ScriptedStep::fail("click", "nope"),
                ScriptedStep::fail("click", "nope"),
                ScriptedStep::fail("click", "nope"),
                ScriptedStep::ok("click"),
            ]),
            config,
        );

        h.handle.start(payload("press the button")).await.unwrap();
        h.events_until(is_task_started).await;
        h.engine.last_agent().release_steps(3);
        h.events_until(|e| matches!(e, ServerEvent::AgentNeedsHelp { .. }))
            .await;

        // No response arrives; the rendezvous times out and the task resumes.
        let events = h
            .events_until(|e| matches!(e, ServerEvent::Status(s) if !s.is_paused))
            .await;
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::LogEvent(log)
                if log.level == LogLevel::Warning && log.message == "help wait timed out"
        )));
        let controls = h.engine.last_agent().recorded_controls();
        assert!(controls.iter().any(|c| c == "resume"));
        assert!(!controls.iter().any(|c| c.starts_with("guide:")));
    }

    #[tokio::test]
    async fn construction_failure_is_terminal() {
        let mut h = harness(ScriptedEngine::failing_construction("no browser"));
        h.handle.start(payload("open example.com")).await.unwrap();
        let events = h.events_until(is_task_result).await;
        assert!(matches!(
            events.last().unwrap(),
            ServerEvent::TaskResult { success: false, .. }
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::LogEvent(log) if log.event_type == EventType::AgentError
        )));
        // The slot is reusable afterwards.
        assert!(h.handle.status().await.current_task.is_none());
    }

    #[tokio::test]
    async fn start_validation_rejects_bad_requests() {
        let h = harness(ScriptedEngine::new(vec![]));

        let err = h
            .handle
            .start(StartTaskPayload {
                task: "   ".to_string(),
                cdp_endpoint: None,
                is_extension: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err, "task description is empty");

        let err = h
            .handle
            .start(StartTaskPayload {
                task: "open example.com".to_string(),
                cdp_endpoint: None,
                is_extension: true,
            })
            .await
            .unwrap_err();
        assert_eq!(err, "cdp_endpoint is required for extension tasks");

        assert_eq!(h.handle.pause().await.unwrap_err(), "not running");
        assert_eq!(h.handle.stop().await.unwrap_err(), "not running");
        assert_eq!(
            h.handle.help_response("hi".to_string()).await.unwrap_err(),
            "no pending help request"
        );
    }

    #[tokio::test]
    async fn busy_slot_rejects_second_start() {
        let mut h = harness(ScriptedEngine::new(vec![ScriptedStep::ok("navigate")]));
        h.handle.start(payload("first")).await.unwrap();
        h.events_until(is_task_started).await;
        let err = h.handle.start(payload("second")).await.unwrap_err();
        assert_eq!(err, "a task is already running");
    }

    #[tokio::test]
    async fn shopping_tasks_get_injected_plan() {
        let mut h = harness(ScriptedEngine::new(vec![ScriptedStep::ok("navigate")]));
        h.handle
            .start(payload("buy wireless headphones under $100"))
            .await
            .unwrap();
        h.events_until(is_task_started).await;

        let plan = h.engine.last_plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], Action::DetectLocation);
        match &plan[1] {
            Action::FindBestWebsite { purpose, category } => {
                assert!(purpose.contains("headphones"));
                assert_eq!(category, "shopping");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_tasks_get_empty_plan() {
        let mut h = harness(ScriptedEngine::new(vec![ScriptedStep::ok("navigate")]));
        h.handle.start(payload("open example.com")).await.unwrap();
        h.events_until(is_task_started).await;
        assert!(h.engine.last_plan().is_empty());
    }

    #[tokio::test]
    async fn missing_engine_rejects_starts() {
        let registry = Arc::new(SessionRegistry::new());
        let bus = Arc::new(EventBus::new(registry.clone()));
        let handle = spawn(None, bus, registry, test_config());
        let err = handle.start(payload("open example.com")).await.unwrap_err();
        assert_eq!(err, "automation engine is not configured");
    }
}
