//! Runtime lifecycle event feed.
//!
//! `docker events --format '{{json .}}'` emits one JSON record per line.
//! The transport here only turns raw bytes into typed [`RuntimeEvent`]s:
//! chunks may split a record anywhere (partial lines are buffered) and
//! malformed lines are skipped. Deciding what an event means for a tracked
//! run is the provisioner's job, which keeps this parser trivially testable.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub container_id: String,
    pub action: String,
    pub name: Option<String>,
    pub exit_code: Option<i64>,
}

/// Actions that mean the container is gone, whether or not we asked for it.
pub fn is_termination_action(action: &str) -> bool {
    matches!(action, "die" | "kill" | "stop")
}

#[derive(Default)]
pub struct EventFeedParser {
    buf: Vec<u8>,
}

impl EventFeedParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the event stream; returns every event completed by
    /// this chunk. Bytes after the last newline stay buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RuntimeEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_event_line(line) {
                Some(event) => events.push(event),
                None => tracing::debug!("skipping malformed runtime event: {line}"),
            }
        }
        events
    }
}

fn parse_event_line(line: &str) -> Option<RuntimeEvent> {
    let value: Value = serde_json::from_str(line).ok()?;

    let container_id = value
        .get("id")
        .or_else(|| value.get("ID"))
        .and_then(Value::as_str)?
        .to_string();
    let action = value
        .get("Action")
        .or_else(|| value.get("status"))
        .and_then(Value::as_str)?
        .to_string();
    let name = value
        .pointer("/Actor/Attributes/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let exit_code = value
        .pointer("/Actor/Attributes/exitCode")
        .and_then(Value::as_str)
        .and_then(|code| code.parse().ok());

    Some(RuntimeEvent {
        container_id,
        action,
        name,
        exit_code,
    })
}
