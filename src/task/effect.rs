//! Effects produced by task state transitions, executed by the manager.

use crate::protocol::{EventType, LogLevel};
use crate::stuck::StuckReport;
use crate::task::state::TaskSpec;
use serde_json::Value;

#[derive(Debug)]
pub enum Effect {
    /// Clear the stuck detector for a fresh task.
    ResetStuckDetector,
    /// Construct the agent and drive it to a terminal signal.
    BuildAgent { spec: TaskSpec },
    PauseAgent,
    ResumeAgent,
    StopAgent,
    /// Inject user guidance into the agent before resuming.
    ForwardGuidance { guidance: String },
    /// Open the single-slot help rendezvous with its timeout.
    OpenHelpSlot,
    /// Invalidate the help rendezvous when leaving the help state.
    CloseHelpSlot,
    /// Broadcast the accept-ack for a started task.
    NotifyTaskStarted,
    /// Broadcast the stuck verdict to all clients.
    EmitHelpNeeded { report: StuckReport },
    /// Broadcast the terminal notification.
    EmitTaskResult {
        task: String,
        success: bool,
        history: Option<Value>,
    },
    /// Publish a lifecycle event onto the bus.
    EmitLifecycleLog {
        level: LogLevel,
        event_type: EventType,
        message: String,
    },
    /// Broadcast the current status projection.
    BroadcastStatus,
    /// Arm the stop-abandon timer.
    StartStopTimer,
}
