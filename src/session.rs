//! Connected-client registry.
//!
//! Each session owns a bounded outbound queue drained by its socket writer.
//! Delivery is best-effort and non-blocking: a session whose queue is full is
//! removed from the registry, which drops the last sender and lets its writer
//! task close the socket. Other sessions are unaffected.

use crate::protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Handle to one connected session.
pub struct SessionHandle {
    tx: mpsc::Sender<ServerEvent>,
    /// Set once the client has sent `extension_connect` and received its
    /// replay. Log events are only fanned out to subscribed sessions.
    subscribed: AtomicBool,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            tx,
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub fn mark_subscribed(&self) {
        self.subscribed.store(true, Ordering::Release);
    }

    /// Non-blocking enqueue. `false` means the session should be dropped.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

/// Tracks connected clients and fans events out to them.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, handle: Arc<SessionHandle>) {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(id.into(), handle);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan-out to all live sessions. Sessions that cannot keep up are
    /// disconnected rather than allowed to block the rest.
    pub fn broadcast(&self, event: &ServerEvent) {
        self.broadcast_filtered(event, |_| true);
    }

    /// Fan-out to sessions matching `include`.
    pub fn broadcast_filtered<F>(&self, event: &ServerEvent, include: F)
    where
        F: Fn(&SessionHandle) -> bool,
    {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        let mut stalled = Vec::new();
        for (id, handle) in sessions.iter() {
            if !include(handle) {
                continue;
            }
            if !handle.send(event.clone()) {
                stalled.push(id.clone());
            }
        }
        for id in stalled {
            tracing::warn!(session_id = %id, "Dropping slow session");
            sessions.remove(&id);
        }
    }

    /// Directed delivery to a single session.
    pub fn emit(&self, id: &str, event: ServerEvent) -> bool {
        let handle = self.get(id);
        match handle {
            Some(h) => {
                if h.send(event) {
                    true
                } else {
                    tracing::warn!(session_id = %id, "Dropping slow session");
                    self.remove(id);
                    false
                }
            }
            None => false,
        }
    }
}
