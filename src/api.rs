//! WebSocket API for the extension channel.

mod ws;

use crate::bus::EventBus;
use crate::chat::ChatManager;
use crate::engine::Engine;
use crate::llm::LlmService;
use crate::protocol::NAMESPACE;
use crate::session::SessionRegistry;
use crate::task::{ManagerConfig, TaskManagerHandle};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Shared application state handed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub bus: Arc<EventBus>,
    pub tasks: TaskManagerHandle,
    pub chat: Arc<ChatManager>,
}

impl AppState {
    pub fn new(
        engine: Option<Arc<dyn Engine>>,
        llm: Option<Arc<dyn LlmService>>,
        config: ManagerConfig,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let bus = Arc::new(EventBus::new(registry.clone()));
        let tasks = crate::task::spawn(engine, bus.clone(), registry.clone(), config);
        let chat = Arc::new(ChatManager::new(llm, registry.clone()));
        Self {
            registry,
            bus,
            tasks,
            chat,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(NAMESPACE, get(ws::ws_handler))
        .route("/version", get(version))
        .with_state(state)
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
