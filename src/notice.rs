//! Purpose: Define structured notices for non-fatal client events and the sinks receiving them.
//! Exports: `Notice`, `notice_json`, `EventSink`, `TracingSink`, `MemorySink`.
//! Role: Injectable observability hook for failures the write path downgrades to warnings.
//! Invariants: Notices are non-fatal and never change the result of the emitting call.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Receipt body on an accepted submission could not be decoded.
pub const RECEIPT_DECODE: &str = "receipt_decode";
/// Waiting for an accepted transaction to be indexed failed.
pub const AWAIT_FAILED: &str = "await_failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub op: String,
    pub target: String,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    pub fn new(kind: &str, op: &str, target: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            time: notice_time_now().unwrap_or_default(),
            op: op.to_string(),
            target: target.to_string(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("op".to_string(), json!(notice.op));
    inner.insert("target".to_string(), json!(notice.target));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

pub trait EventSink: Send + Sync {
    fn notice(&self, notice: Notice);
}

/// Default sink: every notice becomes a `warn`-level tracing event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notice(&self, notice: Notice) {
        tracing::warn!(
            kind = %notice.kind,
            op = %notice.op,
            target = %notice.target,
            "{}",
            notice.message
        );
    }
}

/// Keeps notices in memory so callers can inspect downgraded failures.
#[derive(Debug, Default)]
pub struct MemorySink {
    notices: Mutex<Vec<Notice>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(
            &mut *self
                .notices
                .lock()
                .unwrap_or_else(|poison| poison.into_inner()),
        )
    }
}

impl EventSink for MemorySink {
    fn notice(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(notice);
    }
}

fn notice_time_now() -> Option<String> {
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::{AWAIT_FAILED, EventSink, MemorySink, Notice, notice_json};
    use serde_json::{Map, Value};

    #[test]
    fn notice_json_has_required_fields() {
        let mut details = Map::new();
        details.insert("tx_id".to_string(), Value::from(3));

        let notice = Notice {
            kind: AWAIT_FAILED.to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            op: "submit-put".to_string(),
            target: "http://localhost:3000/_xtdb/await-tx".to_string(),
            message: "failed awaiting transaction 3".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("await_failed"));
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("op").and_then(|v| v.as_str()), Some("submit-put"));
        assert_eq!(
            obj.get("message").and_then(|v| v.as_str()),
            Some("failed awaiting transaction 3")
        );
        assert_eq!(obj["details"]["tx_id"], 3);
    }

    #[test]
    fn memory_sink_records_and_drains() {
        let sink = MemorySink::new();
        sink.notice(Notice::new(AWAIT_FAILED, "submit-evict", "t", "late").with_detail("tx_id", 9));
        assert_eq!(sink.notices().len(), 1);
        let drained = sink.take();
        assert_eq!(drained[0].details["tx_id"], 9);
        assert!(!drained[0].time.is_empty());
        assert!(sink.notices().is_empty());
    }
}
