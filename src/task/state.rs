//! Task slot states and their status projection.

use crate::protocol::TaskStatus;

/// The accepted task description plus its opaque CDP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub task: String,
    pub cdp_endpoint: Option<String>,
}

/// State of the single task slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaskState {
    /// No task accepted.
    #[default]
    Idle,
    /// Agent construction in flight.
    Starting { spec: TaskSpec },
    /// Agent stepping.
    Running { spec: TaskSpec },
    /// Paused on user request.
    Paused { spec: TaskSpec },
    /// Paused by the stuck detector, waiting for human guidance.
    AwaitingHelp { spec: TaskSpec },
    /// Stop requested, waiting for the engine's terminal signal.
    Stopping { spec: TaskSpec },
    /// Task finished; slot reusable.
    Terminal { task: String, success: bool },
}

impl TaskState {
    /// The externally visible projection of this state.
    pub fn status(&self) -> TaskStatus {
        let is_running = !matches!(self, TaskState::Idle | TaskState::Terminal { .. });
        let is_paused = matches!(
            self,
            TaskState::Paused { .. } | TaskState::AwaitingHelp { .. }
        );
        // The agent exists from agent_ready until the terminal signal.
        let has_agent = matches!(
            self,
            TaskState::Running { .. }
                | TaskState::Paused { .. }
                | TaskState::AwaitingHelp { .. }
                | TaskState::Stopping { .. }
        );
        TaskStatus {
            is_running,
            is_paused,
            has_agent,
            current_task: self.spec().map(|s| s.task.clone()),
            cdp_endpoint: self.spec().and_then(|s| s.cdp_endpoint.clone()),
        }
    }

    pub fn spec(&self) -> Option<&TaskSpec> {
        match self {
            TaskState::Starting { spec }
            | TaskState::Running { spec }
            | TaskState::Paused { spec }
            | TaskState::AwaitingHelp { spec }
            | TaskState::Stopping { spec } => Some(spec),
            TaskState::Idle | TaskState::Terminal { .. } => None,
        }
    }

    /// Whether a new task may be accepted.
    pub fn accepts_start(&self) -> bool {
        matches!(self, TaskState::Idle | TaskState::Terminal { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Starting { .. } => "starting",
            TaskState::Running { .. } => "running",
            TaskState::Paused { .. } => "paused",
            TaskState::AwaitingHelp { .. } => "awaiting_help",
            TaskState::Stopping { .. } => "stopping",
            TaskState::Terminal { .. } => "terminal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TaskSpec {
        TaskSpec {
            task: "open example.com".to_string(),
            cdp_endpoint: Some("ws://e:9222/1".to_string()),
        }
    }

    #[test]
    fn idle_and_terminal_project_as_not_running() {
        for state in [
            TaskState::Idle,
            TaskState::Terminal {
                task: "t".to_string(),
                success: true,
            },
        ] {
            let status = state.status();
            assert!(!status.is_running);
            assert!(!status.is_paused);
            assert!(!status.has_agent);
            assert!(status.current_task.is_none());
        }
    }

    #[test]
    fn starting_is_running_without_agent() {
        let status = TaskState::Starting { spec: spec() }.status();
        assert!(status.is_running);
        assert!(!status.has_agent);
        assert_eq!(status.current_task.as_deref(), Some("open example.com"));
    }

    #[test]
    fn awaiting_help_projects_as_paused() {
        let status = TaskState::AwaitingHelp { spec: spec() }.status();
        assert!(status.is_running);
        assert!(status.is_paused);
        assert!(status.has_agent);
    }
}
