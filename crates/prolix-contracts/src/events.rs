use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::{json, Value};

use crate::trace::{now_utc_iso, TraceId};

/// Append-only interaction journal (`events.jsonl`).
///
/// Every line is one compact object: `type`, `trace_id` (null when the trace
/// does not exist yet) and `ts`, followed by the payload fields. Payload keys
/// win over the envelope. A non-object payload is kept under `detail`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    journal: Arc<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            journal: Arc::new(Journal {
                path: path.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn emit(
        &self,
        event_type: &str,
        trace_id: Option<&TraceId>,
        payload: Value,
    ) -> anyhow::Result<Value> {
        let event = envelope(event_type, trace_id, payload);
        self.journal.append(&serde_json::to_string(&event)?)?;
        Ok(event)
    }
}

fn envelope(event_type: &str, trace_id: Option<&TraceId>, payload: Value) -> Value {
    let mut event = json!({
        "type": event_type,
        "trace_id": trace_id.map(TraceId::as_str),
        "ts": now_utc_iso(),
    });
    if let Some(fields) = event.as_object_mut() {
        match payload {
            Value::Object(extra) => fields.extend(extra),
            Value::Null => {}
            detail => {
                fields.insert("detail".to_string(), detail);
            }
        }
    }
    event
}

impl Journal {
    fn append(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let _held = self
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
