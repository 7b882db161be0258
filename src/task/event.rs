//! Events that drive the task state machine.

use crate::engine::AgentOutcome;
use crate::stuck::StuckReport;
use crate::task::state::TaskSpec;

#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A validated start request.
    StartRequested { spec: TaskSpec },
    /// Agent construction finished.
    AgentReady,
    /// Agent construction failed.
    AgentFailed { error: String },
    PauseRequested,
    ResumeRequested,
    StopRequested,
    /// The stuck detector fired.
    StuckDetected { report: StuckReport },
    /// The help rendezvous resolved, with or without guidance.
    HelpResolved {
        guidance: Option<String>,
        timed_out: bool,
    },
    /// The engine reported a terminal outcome.
    AgentTerminated { outcome: AgentOutcome },
    /// The engine never acknowledged a stop request.
    StopTimedOut,
}
