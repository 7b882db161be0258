//! Property-based tests for the task state machine.

use super::effect::Effect;
use super::event::TaskEvent;
use super::state::{TaskSpec, TaskState};
use super::transition::{transition, TransitionError};
use crate::engine::AgentOutcome;
use crate::protocol::StuckReason;
use crate::stuck::StuckReport;
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

fn arb_spec() -> impl Strategy<Value = TaskSpec> {
    ("[a-z ]{1,30}", proptest::option::of("[a-z:/0-9]{5,20}")).prop_map(
        |(task, cdp_endpoint)| TaskSpec {
            task,
            cdp_endpoint,
        },
    )
}

fn arb_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Idle),
        arb_spec().prop_map(|spec| TaskState::Starting { spec }),
        arb_spec().prop_map(|spec| TaskState::Running { spec }),
        arb_spec().prop_map(|spec| TaskState::Paused { spec }),
        arb_spec().prop_map(|spec| TaskState::AwaitingHelp { spec }),
        arb_spec().prop_map(|spec| TaskState::Stopping { spec }),
        ("[a-z ]{1,30}", any::<bool>())
            .prop_map(|(task, success)| TaskState::Terminal { task, success }),
    ]
}

fn arb_report() -> impl Strategy<Value = StuckReport> {
    ("[a-z ]{1,20}", 0.0f64..600.0).prop_map(|(summary, duration_seconds)| StuckReport {
        reason: StuckReason::Repeating,
        attempted_actions: vec!["click \u{2717}".to_string()],
        duration_seconds,
        suggestion: "What should it try differently?".to_string(),
        summary,
    })
}

fn arb_event() -> impl Strategy<Value = TaskEvent> {
    prop_oneof![
        arb_spec().prop_map(|spec| TaskEvent::StartRequested { spec }),
        Just(TaskEvent::AgentReady),
        "[a-z ]{1,20}".prop_map(|error| TaskEvent::AgentFailed { error }),
        Just(TaskEvent::PauseRequested),
        Just(TaskEvent::ResumeRequested),
        Just(TaskEvent::StopRequested),
        arb_report().prop_map(|report| TaskEvent::StuckDetected { report }),
        (proptest::option::of("[a-z ]{1,20}"), any::<bool>()).prop_map(
            |(guidance, timed_out)| TaskEvent::HelpResolved {
                timed_out: guidance.is_none() && timed_out,
                guidance,
            }
        ),
        any::<bool>().prop_map(|success| TaskEvent::AgentTerminated {
            outcome: AgentOutcome {
                success,
                history: None,
            }
        }),
        Just(TaskEvent::StopTimedOut),
    ]
}

// ============================================================================
// Invariants
// ============================================================================

proptest! {
    /// The status projection is always internally consistent.
    #[test]
    fn status_projection_is_valid(state in arb_state(), event in arb_event()) {
        if let Ok(result) = transition(&state, event) {
            let status = result.new_state.status();
            prop_assert!(!(status.is_paused && !status.is_running));
            if status.has_agent {
                prop_assert!(status.current_task.is_some());
            }
        }
    }

    /// Exactly the transitions into Terminal emit a task result.
    #[test]
    fn task_result_emitted_only_on_terminal_entry(state in arb_state(), event in arb_event()) {
        let was_terminal = matches!(state, TaskState::Terminal { .. });
        if let Ok(result) = transition(&state, event) {
            let results = result
                .effects
                .iter()
                .filter(|e| matches!(e, Effect::EmitTaskResult { .. }))
                .count();
            if matches!(result.new_state, TaskState::Terminal { .. }) && !was_terminal {
                prop_assert_eq!(results, 1);
            } else {
                prop_assert_eq!(results, 0);
            }
        }
    }

    /// Every state change broadcasts a fresh status.
    #[test]
    fn state_changes_broadcast_status(state in arb_state(), event in arb_event()) {
        if let Ok(result) = transition(&state, event) {
            if result.new_state != state {
                prop_assert!(result
                    .effects
                    .iter()
                    .any(|e| matches!(e, Effect::BroadcastStatus)));
            }
        }
    }

    /// Stop is a success-no-op once stopping or finished.
    #[test]
    fn stop_is_idempotent(state in arb_state()) {
        if matches!(state, TaskState::Stopping { .. } | TaskState::Terminal { .. }) {
            let result = transition(&state, TaskEvent::StopRequested).unwrap();
            prop_assert_eq!(result.new_state, state);
            prop_assert!(result.effects.is_empty());
        }
    }

    /// Pause is only accepted while running, and rejection is user-phrased.
    #[test]
    fn pause_requires_running(state in arb_state()) {
        match transition(&state, TaskEvent::PauseRequested) {
            Ok(result) => {
                let was_running = matches!(state, TaskState::Running { .. });
                let is_paused = matches!(result.new_state, TaskState::Paused { .. });
                prop_assert!(was_running);
                prop_assert!(is_paused);
            }
            Err(err) => {
                let was_running = matches!(state, TaskState::Running { .. });
                prop_assert!(!was_running);
                prop_assert_eq!(err.to_string(), "not running");
            }
        }
    }

    /// A start is accepted exactly when the slot is free, and a fresh start
    /// always resets the stuck detector.
    #[test]
    fn start_only_from_free_slot(state in arb_state(), spec in arb_spec()) {
        match transition(&state, TaskEvent::StartRequested { spec }) {
            Ok(result) => {
                prop_assert!(state.accepts_start());
                let is_starting = matches!(result.new_state, TaskState::Starting { .. });
                prop_assert!(is_starting);
                prop_assert!(result
                    .effects
                    .iter()
                    .any(|e| matches!(e, Effect::ResetStuckDetector)));
            }
            Err(err) => {
                prop_assert!(!state.accepts_start());
                prop_assert!(matches!(err, TransitionError::AlreadyRunning));
            }
        }
    }

    /// Help resolution always resumes the agent.
    #[test]
    fn help_resolution_resumes(spec in arb_spec(), guidance in proptest::option::of("[a-z ]{1,20}")) {
        let state = TaskState::AwaitingHelp { spec };
        let timed_out = guidance.is_none();
        let result = transition(&state, TaskEvent::HelpResolved { guidance, timed_out }).unwrap();
        let is_running = matches!(result.new_state, TaskState::Running { .. });
        prop_assert!(is_running);
        prop_assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ResumeAgent)));
    }
}
