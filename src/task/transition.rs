//! Pure state transition function for the task slot.
//!
//! Given the same inputs this function always produces the same outputs; all
//! I/O happens when the manager executes the returned effects.

use super::effect::Effect;
use super::event::TaskEvent;
use super::state::TaskState;
use crate::protocol::{EventType, LogLevel};
use thiserror::Error;

/// Result of a state transition.
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TaskState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TaskState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Rejected transitions. The messages are user-facing ack text.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("a task is already running")]
    AlreadyRunning,
    #[error("task is still starting")]
    StillStarting,
    #[error("not running")]
    NotRunning,
    #[error("not paused")]
    NotPaused,
    #[error("invalid transition: {0}")]
    Invalid(String),
}

fn log_effect(level: LogLevel, event_type: EventType, message: impl Into<String>) -> Effect {
    Effect::EmitLifecycleLog {
        level,
        event_type,
        message: message.into(),
    }
}

#[allow(clippy::too_many_lines)] // The transition table is one match by design
pub fn transition(
    state: &TaskState,
    event: TaskEvent,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Start
        // ============================================================
        (TaskState::Idle | TaskState::Terminal { .. }, TaskEvent::StartRequested { spec }) => {
            Ok(TransitionResult::new(TaskState::Starting { spec: spec.clone() })
                .with_effect(Effect::ResetStuckDetector)
                .with_effect(Effect::BuildAgent { spec })
                .with_effect(Effect::BroadcastStatus))
        }
        (_, TaskEvent::StartRequested { .. }) => Err(TransitionError::AlreadyRunning),

        (TaskState::Starting { spec }, TaskEvent::AgentReady) => Ok(TransitionResult::new(
            TaskState::Running { spec: spec.clone() },
        )
        .with_effect(Effect::NotifyTaskStarted)
        .with_effect(Effect::BroadcastStatus)
        .with_effect(log_effect(
            LogLevel::Info,
            EventType::AgentStart,
            format!("Agent started for task: {}", spec.task),
        ))),

        (TaskState::Starting { spec }, TaskEvent::AgentFailed { error }) => {
            Ok(TransitionResult::new(TaskState::Terminal {
                task: spec.task.clone(),
                success: false,
            })
            .with_effect(log_effect(
                LogLevel::Error,
                EventType::AgentError,
                format!("Agent construction failed: {error}"),
            ))
            .with_effect(Effect::EmitTaskResult {
                task: spec.task.clone(),
                success: false,
                history: None,
            })
            .with_effect(Effect::BroadcastStatus))
        }

        // ============================================================
        // Pause / resume
        // ============================================================
        (TaskState::Running { spec }, TaskEvent::PauseRequested) => Ok(TransitionResult::new(
            TaskState::Paused { spec: spec.clone() },
        )
        .with_effect(Effect::PauseAgent)
        .with_effect(log_effect(
            LogLevel::Info,
            EventType::AgentPause,
            "Task paused by user",
        ))
        .with_effect(Effect::BroadcastStatus)),
        (_, TaskEvent::PauseRequested) => Err(TransitionError::NotRunning),

        (TaskState::Paused { spec }, TaskEvent::ResumeRequested) => Ok(TransitionResult::new(
            TaskState::Running { spec: spec.clone() },
        )
        .with_effect(Effect::ResumeAgent)
        .with_effect(log_effect(
            LogLevel::Info,
            EventType::AgentResume,
            "Task resumed by user",
        ))
        .with_effect(Effect::BroadcastStatus)),
        (_, TaskEvent::ResumeRequested) => Err(TransitionError::NotPaused),

        // ============================================================
        // Stop
        // ============================================================
        (
            TaskState::Running { spec } | TaskState::Paused { spec } | TaskState::AwaitingHelp { spec },
            TaskEvent::StopRequested,
        ) => {
            let mut result = TransitionResult::new(TaskState::Stopping { spec: spec.clone() });
            if matches!(state, TaskState::AwaitingHelp { .. }) {
                result = result.with_effect(Effect::CloseHelpSlot);
            }
            Ok(result
                .with_effect(Effect::StopAgent)
                .with_effect(log_effect(
                    LogLevel::Info,
                    EventType::AgentStop,
                    "Stop requested; waiting for the agent to finish its step",
                ))
                .with_effect(Effect::StartStopTimer)
                .with_effect(Effect::BroadcastStatus))
        }
        // Idempotent: stopping an already-stopping or finished task is a no-op.
        (TaskState::Stopping { .. } | TaskState::Terminal { .. }, TaskEvent::StopRequested) => {
            Ok(TransitionResult::new(state.clone()))
        }
        (TaskState::Starting { .. }, TaskEvent::StopRequested) => Err(TransitionError::StillStarting),
        (TaskState::Idle, TaskEvent::StopRequested) => Err(TransitionError::NotRunning),

        // ============================================================
        // Stuck detection and the help rendezvous
        // ============================================================
        (TaskState::Running { spec }, TaskEvent::StuckDetected { report }) => {
            Ok(TransitionResult::new(TaskState::AwaitingHelp { spec: spec.clone() })
                .with_effect(Effect::PauseAgent)
                .with_effect(log_effect(
                    LogLevel::Warning,
                    EventType::UserHelpNeeded,
                    format!("Agent appears stuck: {}", report.summary),
                ))
                .with_effect(Effect::BroadcastStatus)
                .with_effect(Effect::EmitHelpNeeded { report })
                .with_effect(Effect::OpenHelpSlot))
        }

        (TaskState::AwaitingHelp { spec }, TaskEvent::HelpResolved { guidance, timed_out }) => {
            let mut result = TransitionResult::new(TaskState::Running { spec: spec.clone() })
                .with_effect(Effect::CloseHelpSlot);
            match guidance {
                Some(guidance) => {
                    result = result
                        .with_effect(Effect::ForwardGuidance { guidance })
                        .with_effect(log_effect(
                            LogLevel::Info,
                            EventType::AgentResume,
                            "Resuming with user guidance",
                        ));
                }
                None if timed_out => {
                    result = result.with_effect(log_effect(
                        LogLevel::Warning,
                        EventType::Log,
                        "help wait timed out",
                    ));
                }
                None => {
                    result = result.with_effect(log_effect(
                        LogLevel::Info,
                        EventType::AgentResume,
                        "Resuming without guidance",
                    ));
                }
            }
            Ok(result
                .with_effect(Effect::ResumeAgent)
                .with_effect(Effect::BroadcastStatus))
        }

        // ============================================================
        // Terminal
        // ============================================================
        (
            TaskState::Running { spec }
            | TaskState::Paused { spec }
            | TaskState::AwaitingHelp { spec }
            | TaskState::Stopping { spec },
            TaskEvent::AgentTerminated { outcome },
        ) => {
            let mut result = TransitionResult::new(TaskState::Terminal {
                task: spec.task.clone(),
                success: outcome.success,
            });
            if matches!(state, TaskState::AwaitingHelp { .. }) {
                result = result.with_effect(Effect::CloseHelpSlot);
            }
            let (level, event_type, message) = if outcome.success {
                (
                    LogLevel::Result,
                    EventType::AgentComplete,
                    format!("Task completed: {}", spec.task),
                )
            } else {
                (
                    LogLevel::Warning,
                    EventType::AgentComplete,
                    format!("Task ended without success: {}", spec.task),
                )
            };
            Ok(result
                .with_effect(log_effect(level, event_type, message))
                .with_effect(Effect::EmitTaskResult {
                    task: spec.task.clone(),
                    success: outcome.success,
                    history: outcome.history,
                })
                .with_effect(Effect::BroadcastStatus))
        }

        (TaskState::Stopping { spec }, TaskEvent::StopTimedOut) => {
            Ok(TransitionResult::new(TaskState::Terminal {
                task: spec.task.clone(),
                success: false,
            })
            .with_effect(log_effect(
                LogLevel::Error,
                EventType::AgentError,
                "abandoned: agent did not acknowledge stop",
            ))
            .with_effect(Effect::EmitTaskResult {
                task: spec.task.clone(),
                success: false,
                history: None,
            })
            .with_effect(Effect::BroadcastStatus))
        }

        // Everything else is an internal race (stale timer, late callback).
        (state, event) => Err(TransitionError::Invalid(format!(
            "{event:?} in state {}",
            state.name()
        ))),
    }
}
