use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::runs::summary::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a pipeline's `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`, plus `record_id` once bound
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Clones share the same file and lock, so a writer can be handed to the
/// scanner and synthesizer of one run without interleaving partial lines.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
    record_id: Option<String>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
            record_id: None,
        }
    }

    /// Returns a writer stamping every event with `record_id`.
    pub fn for_record(&self, record_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            record_id: Some(record_id.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        if let Some(record_id) = &self.record_id {
            event.insert("record_id".to_string(), Value::String(record_id.clone()));
        }
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let mut payload = EventPayload::new();
        payload.insert("photos".to_string(), Value::from(2));
        let emitted = writer.emit("pipeline_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(
            parsed["type"],
            Value::String("pipeline_started".to_string())
        );
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["photos"], Value::from(2));
        assert!(parsed.get("record_id").is_none());

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn record_bound_writer_stamps_record_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123").for_record("42");

        let emitted = writer.emit("roster_ready", EventPayload::new())?;
        assert_eq!(emitted["record_id"], Value::String("42".to_string()));
        assert_eq!(writer.record_id(), Some("42"));
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let mut payload = EventPayload::new();
        payload.insert(
            "run_id".to_string(),
            Value::String("override-run".to_string()),
        );
        let emitted = writer.emit("chibi_generated", payload)?;

        assert_eq!(
            emitted["type"],
            Value::String("chibi_generated".to_string())
        );
        assert_eq!(emitted["run_id"], Value::String("override-run".to_string()));
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");
        let bound = writer.for_record("7");

        writer.emit("one", EventPayload::new())?;
        bound.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], Value::String("one".to_string()));
        assert_eq!(second["type"], Value::String("two".to_string()));
        assert_eq!(second["record_id"], Value::String("7".to_string()));
        Ok(())
    }
}
