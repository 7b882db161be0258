//! Adapter from engine log records to canonical `LogEvent`s.

use super::EventBus;
use crate::engine::EngineRecord;
use crate::protocol::{EventType, LogEvent};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Identical records arriving within this window are collapsed.
const DEDUP_WINDOW_MS: i64 = 100;

pub struct LogCapture {
    bus: Arc<EventBus>,
    last: Mutex<Option<(EventType, String, DateTime<Utc>)>>,
}

impl LogCapture {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            last: Mutex::new(None),
        }
    }

    /// Canonicalize and publish one engine record. Idempotent over identical
    /// records within the dedup window.
    pub fn capture(&self, record: EngineRecord) {
        self.capture_at(record, Utc::now());
    }

    fn capture_at(&self, record: EngineRecord, now: DateTime<Utc>) {
        {
            let mut last = self.last.lock().expect("capture state poisoned");
            if let Some((event_type, message, at)) = last.as_ref() {
                if *event_type == record.event_type
                    && *message == record.message
                    && now.signed_duration_since(*at) <= Duration::milliseconds(DEDUP_WINDOW_MS)
                {
                    return;
                }
            }
            *last = Some((record.event_type, record.message.clone(), now));
        }

        let mut event = LogEvent::new(
            record.level,
            record.event_type,
            record.logger_name,
            record.message,
        );
        event.timestamp = now;
        if let Some(metadata) = record.metadata {
            event.metadata = Some(flatten_metadata(metadata));
        }
        self.bus.publish(event);
    }
}

/// The wire metadata is a shallow map: nested values are coerced to their
/// JSON-string representation.
fn flatten_metadata(metadata: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    metadata
        .into_iter()
        .map(|(key, value)| match value {
            Value::Array(_) | Value::Object(_) => (key, Value::String(value.to_string())),
            scalar => (key, scalar),
        })
        .collect()
}
