//! Cached client state and the reconnect reconciliation rules.

use super::store::{Area, StateStore};
use crate::chat::GREETING;
use crate::protocol::{
    ClientEvent, ConversationMessage, Intent, LogEvent, Role, ServerEvent, TaskStatus,
    DEFAULT_SERVER_URL, MAX_LOG_EVENTS, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const STATE_KEY: &str = "state";
const SETTINGS_KEY: &str = "settings";

/// User settings, synced across devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub max_log_buffer: usize,
    pub notifications_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            max_log_buffer: MAX_LOG_EVENTS,
            notifications_enabled: true,
        }
    }
}

/// Session-scoped cached state. The server remains authoritative for
/// `status`; this is only the render-first cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PersistedState {
    pub status: TaskStatus,
    pub cdp_endpoint: Option<String>,
    pub last_task: Option<String>,
    pub conversation: Vec<ConversationMessage>,
    pub intent: Option<Intent>,
}

/// UI control affordances, derived strictly from the server status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub can_start: bool,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_stop: bool,
}

pub struct ClientStateManager<S: StateStore> {
    store: S,
    state: PersistedState,
    settings: Settings,
    logs: VecDeque<LogEvent>,
    /// The agent asked for help and no response has been routed yet.
    pending_help: bool,
}

impl<S: StateStore> ClientStateManager<S> {
    /// Load cached state for immediate rendering.
    pub fn load(store: S) -> Self {
        let state = store
            .get(Area::Session, STATE_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let settings = store
            .get(Area::Sync, SETTINGS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        Self {
            store,
            state,
            settings,
            logs: VecDeque::new(),
            pending_help: false,
        }
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn logs(&self) -> &VecDeque<LogEvent> {
        &self.logs
    }

    pub fn update_settings(&mut self, settings: Settings) {
        self.settings = settings;
        if let Ok(value) = serde_json::to_value(&self.settings) {
            self.store.set(Area::Sync, SETTINGS_KEY, value);
        }
    }

    /// Events to send on (re)connect, in order. Prior actions are never
    /// re-sent optimistically.
    pub fn connect_sequence(&self) -> [ClientEvent; 2] {
        [ClientEvent::ExtensionConnect, ClientEvent::GetStatus]
    }

    /// Fold a server event into the cache. `status` overwrites the cached
    /// view unconditionally.
    pub fn apply_server_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Status(status) => {
                self.state.status = status.clone();
                if let Some(task) = &status.current_task {
                    self.state.last_task = Some(task.clone());
                }
                if let Some(endpoint) = &status.cdp_endpoint {
                    self.state.cdp_endpoint = Some(endpoint.clone());
                }
                if !status.is_paused {
                    self.pending_help = false;
                }
                self.persist();
            }
            ServerEvent::AgentNeedsHelp { .. } => {
                self.pending_help = true;
            }
            ServerEvent::HelpResponseReceived { .. } => {
                self.pending_help = false;
            }
            ServerEvent::LogEvent(log) => {
                if self.logs.len() >= self.settings.max_log_buffer {
                    self.logs.pop_front();
                }
                self.logs.push_back(log.clone());
            }
            ServerEvent::ChatResponse {
                role,
                content,
                intent,
            } => {
                self.state
                    .conversation
                    .push(ConversationMessage::new(*role, content.clone()));
                if intent.is_some() {
                    self.state.intent = intent.clone();
                }
                self.persist();
            }
            ServerEvent::ConversationReset { role, content } => {
                self.state.conversation = vec![ConversationMessage::new(*role, content.clone())];
                self.state.intent = None;
                self.persist();
            }
            _ => {}
        }
    }

    /// Record the user's own chat turn before it is sent.
    pub fn record_user_message(&mut self, text: &str) {
        self.state
            .conversation
            .push(ConversationMessage::new(Role::User, text));
        self.persist();
    }

    /// Route an outgoing message: while the agent is waiting for help, the
    /// next message answers it instead of continuing the clarification chat.
    pub fn route_outgoing(&mut self, text: &str) -> ClientEvent {
        if self.pending_help {
            self.pending_help = false;
            ClientEvent::UserHelpResponse {
                response: text.to_string(),
            }
        } else {
            self.record_user_message(text);
            ClientEvent::ChatMessage {
                message: text.to_string(),
            }
        }
    }

    /// Seed an empty conversation with the greeting for first render.
    pub fn ensure_greeting(&mut self) {
        if self.state.conversation.is_empty() {
            self.state
                .conversation
                .push(ConversationMessage::new(Role::Assistant, GREETING));
            self.persist();
        }
    }

    pub fn controls(&self) -> Controls {
        let status = &self.state.status;
        Controls {
            can_start: !status.is_running,
            can_pause: status.is_running && !status.is_paused,
            can_resume: status.is_paused,
            can_stop: status.is_running,
        }
    }

    /// Re-read the persisted state after another page wrote it.
    pub fn refresh(&mut self) {
        if let Some(state) = self
            .store
            .get(Area::Session, STATE_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
        {
            self.state = state;
        }
        if let Some(settings) = self
            .store
            .get(Area::Sync, SETTINGS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
        {
            self.settings = settings;
        }
    }

    fn persist(&self) {
        if let Ok(value) = serde_json::to_value(&self.state) {
            self.store.set(Area::Session, STATE_KEY, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::MemoryStore;
    use super::*;
    use crate::protocol::{EventType, LogLevel};
    use std::sync::Arc;

    fn running_status(task: &str) -> TaskStatus {
        TaskStatus {
            is_running: true,
            is_paused: false,
            has_agent: true,
            current_task: Some(task.to_string()),
            cdp_endpoint: Some("ws://e:9222/1".to_string()),
        }
    }

    #[test]
    fn server_status_overwrites_cache() {
        let mut manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        // Stale cache claims a paused task; the server says running.
        manager.state.status.is_paused = true;
        manager.apply_server_event(&ServerEvent::Status(running_status("open example.com")));
        assert!(!manager.state().status.is_paused);
        assert_eq!(
            manager.state().last_task.as_deref(),
            Some("open example.com")
        );
        assert_eq!(
            manager.state().cdp_endpoint.as_deref(),
            Some("ws://e:9222/1")
        );
    }

    #[test]
    fn connect_sequence_is_connect_then_status() {
        let manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        assert_eq!(
            manager.connect_sequence(),
            [ClientEvent::ExtensionConnect, ClientEvent::GetStatus]
        );
    }

    #[test]
    fn controls_follow_authoritative_status() {
        let mut manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        assert!(manager.controls().can_start);
        assert!(!manager.controls().can_stop);

        manager.apply_server_event(&ServerEvent::Status(running_status("t")));
        let controls = manager.controls();
        assert!(!controls.can_start);
        assert!(controls.can_pause);
        assert!(controls.can_stop);
        assert!(!controls.can_resume);

        let mut paused = running_status("t");
        paused.is_paused = true;
        manager.apply_server_event(&ServerEvent::Status(paused));
        let controls = manager.controls();
        assert!(controls.can_resume);
        assert!(!controls.can_pause);
    }

    #[test]
    fn log_buffer_is_bounded_by_settings() {
        let mut manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        let mut settings = manager.settings().clone();
        settings.max_log_buffer = 3;
        manager.update_settings(settings);

        for i in 0..5 {
            manager.apply_server_event(&ServerEvent::LogEvent(LogEvent::new(
                LogLevel::Info,
                EventType::Log,
                "test",
                format!("e{i}"),
            )));
        }
        assert_eq!(manager.logs().len(), 3);
        assert_eq!(manager.logs()[0].message, "e2");
    }

    #[test]
    fn conversation_and_intent_survive_reload() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = ClientStateManager::load(store.clone());
        manager.record_user_message("buy headphones");
        manager.apply_server_event(&ServerEvent::ChatResponse {
            role: Role::Assistant,
            content: "READY TO START\nTASK: buy headphones on Amazon".to_string(),
            intent: Some(Intent {
                task_description: "buy headphones on Amazon".to_string(),
                is_ready: true,
                confidence: 0.9,
            }),
        });

        // A reload in the same tab sees the persisted dialog.
        let reloaded = ClientStateManager::load(store);
        assert_eq!(reloaded.state().conversation.len(), 2);
        assert!(reloaded.state().intent.as_ref().unwrap().is_ready);
    }

    #[test]
    fn reset_clears_intent_and_keeps_greeting() {
        let mut manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        manager.record_user_message("buy headphones");
        manager.state.intent = Some(Intent {
            task_description: "x".to_string(),
            is_ready: true,
            confidence: 0.9,
        });
        manager.apply_server_event(&ServerEvent::ConversationReset {
            role: Role::Assistant,
            content: GREETING.to_string(),
        });
        assert_eq!(manager.state().conversation.len(), 1);
        assert!(manager.state().intent.is_none());
    }

    #[test]
    fn pending_help_routes_the_next_message() {
        let mut manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        manager.apply_server_event(&ServerEvent::AgentNeedsHelp {
            reason: crate::protocol::StuckReason::Repeating,
            summary: "stuck".to_string(),
            attempted_actions: vec!["click \u{2717}".to_string()],
            duration_seconds: 12.0,
            suggestion: "What should it try differently?".to_string(),
        });

        let routed = manager.route_outgoing("scroll down first");
        assert_eq!(
            routed,
            ClientEvent::UserHelpResponse {
                response: "scroll down first".to_string()
            }
        );
        // Once answered, messages flow back to the clarification chat.
        let routed = manager.route_outgoing("and buy the blue one");
        assert!(matches!(routed, ClientEvent::ChatMessage { .. }));
    }

    #[test]
    fn resumed_status_clears_pending_help() {
        let mut manager = ClientStateManager::load(Arc::new(MemoryStore::new()));
        manager.apply_server_event(&ServerEvent::AgentNeedsHelp {
            reason: crate::protocol::StuckReason::NoProgress,
            summary: "stuck".to_string(),
            attempted_actions: vec![],
            duration_seconds: 300.0,
            suggestion: "What should it try differently?".to_string(),
        });
        // The help wait timed out server-side and the task resumed.
        manager.apply_server_event(&ServerEvent::Status(running_status("t")));
        assert!(matches!(
            manager.route_outgoing("hello again"),
            ClientEvent::ChatMessage { .. }
        ));
    }

    #[tokio::test]
    async fn other_tabs_observe_changes_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let mut tab_a = ClientStateManager::load(store.clone());
        let mut tab_b = ClientStateManager::load(store.clone());
        let mut feed = store.watch();
        feed.borrow_and_update();

        tab_a.apply_server_event(&ServerEvent::Status(running_status("t")));
        feed.changed().await.unwrap();
        tab_b.refresh();
        assert!(tab_b.state().status.is_running);
    }
}
