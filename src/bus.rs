//! In-process event bus with bounded-history replay.
//!
//! Publishing appends to a ring of the most recent events and fans the event
//! out to every subscribed session while the ring lock is held, so a session
//! attached concurrently observes its replay strictly before any live event.

mod capture;

pub use capture::LogCapture;

use crate::protocol::{LogEvent, ServerEvent, MAX_LOG_EVENTS, REPLAY_WINDOW};
use crate::session::{SessionHandle, SessionRegistry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub struct EventBus {
    ring: Mutex<VecDeque<LogEvent>>,
    registry: Arc<SessionRegistry>,
    capacity: usize,
    replay_window: usize,
}

impl EventBus {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_bounds(registry, MAX_LOG_EVENTS, REPLAY_WINDOW)
    }

    pub fn with_bounds(
        registry: Arc<SessionRegistry>,
        capacity: usize,
        replay_window: usize,
    ) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            registry,
            capacity,
            replay_window,
        }
    }

    /// Append to the ring (evicting the oldest on overflow) and fan out to
    /// all subscribed sessions.
    pub fn publish(&self, event: LogEvent) {
        let mut ring = self.ring.lock().expect("event ring poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event.clone());
        self.registry
            .broadcast_filtered(&ServerEvent::LogEvent(event), SessionHandle::is_subscribed);
    }

    /// Replay the most recent events to `session_id` and subscribe it to live
    /// fan-out, atomically with respect to publishers.
    pub fn attach(&self, session_id: &str) {
        let ring = self.ring.lock().expect("event ring poisoned");
        let Some(handle) = self.registry.get(session_id) else {
            return;
        };
        let start = ring.len().saturating_sub(self.replay_window);
        for event in ring.iter().skip(start) {
            if !handle.send(ServerEvent::LogEvent(event.clone())) {
                self.registry.remove(session_id);
                return;
            }
        }
        handle.mark_subscribed();
    }

    /// Snapshot of the retained ring, oldest first.
    pub fn recent(&self) -> Vec<LogEvent> {
        self.ring
            .lock()
            .expect("event ring poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("event ring poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
