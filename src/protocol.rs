//! Wire protocol for the `/extension` channel.
//!
//! Every frame is a JSON object `{"event": ..., "data": ...}`. Field names
//! are snake_case, enum values are lowercase strings (the stuck-detector
//! reason keeps its screaming-case verdict form), timestamps are ISO-8601
//! with millisecond precision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Logical channel all core events travel on.
pub const NAMESPACE: &str = "/extension";

/// Default listen port for `taskpilot web`.
pub const DEFAULT_PORT: u16 = 5000;

/// Default server URL clients connect to.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000/extension";

/// Client-side reconnect policy.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY_MS: u64 = 1000;

/// Bound on the retained event ring.
pub const MAX_LOG_EVENTS: usize = 1000;

/// Number of recent events replayed to a freshly connected client.
pub const REPLAY_WINDOW: usize = 50;

/// Per-session outbound queue capacity. Overflow disconnects the session.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Step ceiling handed to the engine on each task start.
pub const DEFAULT_MAX_STEPS: u32 = 100;

/// Timestamp codec: ISO-8601 with exactly millisecond precision.
pub mod ts_ms {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Result,
}

/// Category of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Log,
    AgentStart,
    AgentStep,
    AgentAction,
    AgentResult,
    AgentComplete,
    AgentError,
    AgentPause,
    AgentResume,
    AgentStop,
    UserHelpNeeded,
}

/// One entry in the event stream. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(with = "ts_ms")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub event_type: EventType,
    pub logger_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl LogEvent {
    pub fn new(
        level: LogLevel,
        event_type: EventType,
        logger_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
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

/// Authoritative state of the single task slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskStatus {
    pub is_running: bool,
    pub is_paused: bool,
    pub has_agent: bool,
    pub current_task: Option<String>,
    pub cdp_endpoint: Option<String>,
}

/// The stuck detector's verdict category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StuckReason {
    Repeating,
    StepTimeout,
    NoProgress,
    ConsecutiveFailures,
    #[default]
    None,
}

/// Output of the clarification dialog: a ready-to-execute task description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub task_description: String,
    pub is_ready: bool,
    pub confidence: f64,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in a clarification dialog. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(with = "ts_ms")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Payload of `start_task` / `start_clarified_task`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTaskPayload {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_endpoint: Option<String>,
    #[serde(default)]
    pub is_extension: bool,
}

/// Events the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    ExtensionConnect,
    GetStatus,
    StartTask(StartTaskPayload),
    StartClarifiedTask(StartTaskPayload),
    StopTask,
    PauseTask,
    ResumeTask,
    ChatMessage { message: String },
    ResetConversation,
    UserHelpResponse { response: String },
}

/// Ack for stop/pause/resume and rejected starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Events the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Status(TaskStatus),
    LogEvent(LogEvent),
    TaskStarted {
        message: String,
    },
    TaskActionResult(ActionResult),
    TaskResult {
        task: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        history: Option<Value>,
    },
    ChatResponse {
        role: Role,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent: Option<Intent>,
    },
    ConversationReset {
        role: Role,
        content: String,
    },
    AgentNeedsHelp {
        reason: StuckReason,
        summary: String,
        attempted_actions: Vec<String>,
        duration_seconds: f64,
        suggestion: String,
    },
    HelpResponseReceived {
        message: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_event_serializes_canonically() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(250);
        let event = LogEvent {
            timestamp: ts,
            level: LogLevel::Warning,
            event_type: EventType::AgentStep,
            logger_name: "agent".to_string(),
            message: "step 3".to_string(),
            metadata: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["timestamp"], "2024-03-01T12:30:05.250Z");
        assert_eq!(json["level"], "warning");
        assert_eq!(json["event_type"], "agent_step");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn log_event_round_trips() {
        let mut meta = BTreeMap::new();
        meta.insert("step".to_string(), serde_json::json!(7));
        let event = LogEvent::new(LogLevel::Info, EventType::Log, "engine", "hello")
            .with_metadata(meta);
        let json = serde_json::to_string(&event).unwrap();
        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "hello");
        assert_eq!(back.metadata.unwrap()["step"], serde_json::json!(7));
    }

    #[test]
    fn client_events_parse_with_and_without_data() {
        let ev: ClientEvent = serde_json::from_str(r#"{"event":"get_status"}"#).unwrap();
        assert_eq!(ev, ClientEvent::GetStatus);

        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"start_task","data":{"task":"open example.com","cdp_endpoint":"ws://e:9222/1","is_extension":true}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::StartTask(p) => {
                assert_eq!(p.task, "open example.com");
                assert!(p.is_extension);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // is_extension defaults off when omitted
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"start_task","data":{"task":"t"}}"#).unwrap();
        match ev {
            ClientEvent::StartTask(p) => assert!(!p.is_extension),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn status_serializes_null_fields() {
        let json = serde_json::to_value(ServerEvent::Status(TaskStatus::default())).unwrap();
        assert_eq!(json["event"], "status");
        assert_eq!(json["data"]["is_running"], false);
        assert!(json["data"]["current_task"].is_null());
    }

    #[test]
    fn stuck_reason_keeps_verdict_case() {
        let json = serde_json::to_value(StuckReason::Repeating).unwrap();
        assert_eq!(json, "REPEATING");
        let json = serde_json::to_value(StuckReason::ConsecutiveFailures).unwrap();
        assert_eq!(json, "CONSECUTIVE_FAILURES");
    }

    #[test]
    fn action_result_omits_empty_sides() {
        let json = serde_json::to_value(ActionResult::err("not running")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "not running");
        assert!(json.get("message").is_none());
    }
}
