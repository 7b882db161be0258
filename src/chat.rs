//! Per-session clarification dialogs.
//!
//! Each session gets a dedicated worker task owning its conversation. Turns
//! are processed strictly in arrival order with at most one LLM call in
//! flight; the worker dies with its session.

mod intent;
mod prompt;

pub use intent::parse_intent;

use crate::llm::{ChatRole, LlmMessage, LlmRequest, LlmService};
use crate::protocol::{ConversationMessage, Role, ServerEvent};
use crate::session::SessionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Canonical greeting seeding every conversation.
pub const GREETING: &str = "Hi! Tell me what you'd like the browser to do, \
and I'll help turn it into a task the agent can run.";

const APOLOGY: &str = "Sorry, I couldn't process that just now. \
Could you rephrase your request?";

const UNAVAILABLE: &str = "The clarification assistant is not configured on \
this server, but you can still start tasks directly.";

const CHAT_QUEUE_CAPACITY: usize = 32;

enum ChatCommand {
    Message(String),
    Reset,
    Snapshot(oneshot::Sender<Vec<ConversationMessage>>),
}

pub struct ChatManager {
    llm: Option<Arc<dyn LlmService>>,
    registry: Arc<SessionRegistry>,
    workers: Mutex<HashMap<String, mpsc::Sender<ChatCommand>>>,
}

impl ChatManager {
    pub fn new(llm: Option<Arc<dyn LlmService>>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            llm,
            registry,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Create the session's dialog worker.
    pub fn open(&self, session_id: &str) {
        let (tx, rx) = mpsc::channel(CHAT_QUEUE_CAPACITY);
        let worker = ChatWorker {
            session_id: session_id.to_string(),
            llm: self.llm.clone(),
            registry: self.registry.clone(),
            messages: Vec::new(),
        };
        tokio::spawn(worker.run(rx));
        self.workers
            .lock()
            .expect("chat workers poisoned")
            .insert(session_id.to_string(), tx);
    }

    /// Destroy the session's dialog. The worker drains and exits.
    pub fn close(&self, session_id: &str) {
        self.workers
            .lock()
            .expect("chat workers poisoned")
            .remove(session_id);
    }

    pub async fn message(&self, session_id: &str, text: String) -> bool {
        self.send(session_id, ChatCommand::Message(text)).await
    }

    pub async fn reset(&self, session_id: &str) -> bool {
        self.send(session_id, ChatCommand::Reset).await
    }

    /// Snapshot of the session's conversation, for inspection.
    pub async fn conversation(&self, session_id: &str) -> Option<Vec<ConversationMessage>> {
        let (tx, rx) = oneshot::channel();
        if !self.send(session_id, ChatCommand::Snapshot(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    async fn send(&self, session_id: &str, command: ChatCommand) -> bool {
        let worker = self
            .workers
            .lock()
            .expect("chat workers poisoned")
            .get(session_id)
            .cloned();
        match worker {
            Some(tx) => tx.send(command).await.is_ok(),
            None => false,
        }
    }
}

struct ChatWorker {
    session_id: String,
    llm: Option<Arc<dyn LlmService>>,
    registry: Arc<SessionRegistry>,
    messages: Vec<ConversationMessage>,
}

impl ChatWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<ChatCommand>) {
        self.messages
            .push(ConversationMessage::new(Role::Assistant, GREETING));
        while let Some(command) = rx.recv().await {
            match command {
                ChatCommand::Message(text) => self.handle_message(text).await,
                ChatCommand::Reset => self.handle_reset(),
                ChatCommand::Snapshot(reply) => {
                    let _ = reply.send(self.messages.clone());
                }
            }
        }
        tracing::debug!(session_id = %self.session_id, "Chat worker stopped");
    }

    async fn handle_message(&mut self, text: String) {
        self.messages.push(ConversationMessage::new(Role::User, text));

        let (content, intent) = match &self.llm {
            None => (UNAVAILABLE.to_string(), None),
            Some(llm) => {
                let request = LlmRequest {
                    system: prompt::CLARIFIER_PROMPT.to_string(),
                    messages: self.llm_messages(),
                    max_tokens: Some(1024),
                };
                match llm.complete(&request).await {
                    Ok(response) => {
                        let intent = parse_intent(&response.text);
                        (response.text, intent)
                    }
                    Err(err) => {
                        tracing::warn!(
                            session_id = %self.session_id,
                            kind = ?err.kind,
                            error = %err,
                            "Clarifier LLM call failed"
                        );
                        (APOLOGY.to_string(), None)
                    }
                }
            }
        };

        self.messages
            .push(ConversationMessage::new(Role::Assistant, content.clone()));
        self.registry.emit(
            &self.session_id,
            ServerEvent::ChatResponse {
                role: Role::Assistant,
                content,
                intent,
            },
        );
    }

    fn handle_reset(&mut self) {
        self.messages.clear();
        self.messages
            .push(ConversationMessage::new(Role::Assistant, GREETING));
        self.registry.emit(
            &self.session_id,
            ServerEvent::ConversationReset {
                role: Role::Assistant,
                content: GREETING.to_string(),
            },
        );
    }

    /// Provider requests must begin with a user turn, so the seeded greeting
    /// (and anything before the first user message) is skipped.
    fn llm_messages(&self) -> Vec<LlmMessage> {
        self.messages
            .iter()
            .skip_while(|m| m.role != Role::User)
            .map(|m| LlmMessage {
                role: match m.role {
                    Role::User => ChatRole::User,
                    Role::Assistant => ChatRole::Assistant,
                },
                content: m.content.clone(),
            })
            .collect()
    }
}
