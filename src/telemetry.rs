//! # Telemetry
//!
//! Structured run events. The pipeline sends every [`Event`] to an
//! [`EventEmitter`] supplied by the host ([`NoopEmitter`] when it has none);
//! during a run the [`EventLog`] also appends each event to
//! `<logs_dir>/events.ndjson` and mirrors it to `tracing`.
use crate::pipeline::Stage;
use chrono::DateTime;
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "sheet_engine=info";

/// File name of the event log inside the logs directory
pub const EVENTS_FILE_NAME: &str = "events.ndjson";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    /// Dotted event name such as `table.detected`
    pub name: String,
    pub stage: Option<Stage>,
    pub level: EventLevel,
    pub payload: Value,
    pub timestamp: DateTime<Local>,
}

impl Event {
    pub fn new(level: EventLevel, name: &str, stage: Option<Stage>, payload: Value) -> Self {
        Self {
            name: name.to_owned(),
            stage,
            level,
            payload,
            timestamp: Local::now(),
        }
    }

    pub fn debug(name: &str, stage: Stage, payload: Value) -> Self {
        Self::new(EventLevel::Debug, name, Some(stage), payload)
    }

    pub fn info(name: &str, stage: Stage, payload: Value) -> Self {
        Self::new(EventLevel::Info, name, Some(stage), payload)
    }

    pub fn warning(name: &str, stage: Stage, payload: Value) -> Self {
        Self::new(EventLevel::Warning, name, Some(stage), payload)
    }

    pub fn error(name: &str, stage: Stage, payload: Value) -> Self {
        Self::new(EventLevel::Error, name, Some(stage), payload)
    }
}

/// Receives run events. Implementations must not fail; a sink that cannot
/// keep up should drop events.
pub trait EventEmitter {
    fn emit(&self, event: &Event);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: &Event) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEmitter {
    events: RefCell<Vec<Event>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Recorded events with the given name.
    pub fn named(&self, name: &str) -> Vec<Event> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.name == name)
            .cloned()
            .collect()
    }
}

impl EventEmitter for MemoryEmitter {
    fn emit(&self, event: &Event) {
        self.events.borrow_mut().push(event.clone());
    }
}

fn trace_event(event: &Event) {
    let stage = event.stage.map(|stage| stage.as_str()).unwrap_or("run");
    match event.level {
        EventLevel::Debug => debug!(event = %event.name, stage, payload = %event.payload),
        EventLevel::Info => info!(event = %event.name, stage, payload = %event.payload),
        EventLevel::Warning => warn!(event = %event.name, stage, payload = %event.payload),
        EventLevel::Error => error!(event = %event.name, stage, payload = %event.payload),
    }
}

/// The emitter used for the duration of a run: host emitter, NDJSON file and
/// `tracing`.
pub struct EventLog<'a> {
    host: &'a dyn EventEmitter,
    path: Option<PathBuf>,
    file: RefCell<Option<BufWriter<File>>>,
}

impl<'a> EventLog<'a> {
    /// Creates `<logs_dir>/events.ndjson`, truncating an existing log.
    pub fn create(logs_dir: &Path, host: &'a dyn EventEmitter) -> std::io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(EVENTS_FILE_NAME);
        let file = File::create(&path)?;
        Ok(Self {
            host,
            path: Some(path),
            file: RefCell::new(Some(BufWriter::new(file))),
        })
    }

    /// An event log without a file artifact.
    pub fn detached(host: &'a dyn EventEmitter) -> Self {
        Self {
            host,
            path: None,
            file: RefCell::new(None),
        }
    }

    /// Path of the NDJSON artifact, if one is being written.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flushes the NDJSON file.
    pub fn finish(&self) {
        if let Some(writer) = self.file.borrow_mut().as_mut() {
            if let Err(error) = writer.flush() {
                warn!(%error, "cannot flush event log");
            }
        }
    }

    fn append(&self, event: &Event) {
        let mut file = self.file.borrow_mut();
        let Some(writer) = file.as_mut() else {
            return;
        };
        let written = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        if let Err(error) = written {
            warn!(%error, "cannot append to event log, further events are not persisted");
            *file = None;
        }
    }
}

impl EventEmitter for EventLog<'_> {
    fn emit(&self, event: &Event) {
        self.host.emit(event);
        self.append(event);
        trace_event(event);
    }
}

/// Installs a `tracing` fmt subscriber filtered by `RUST_LOG`
/// (default [`DEFAULT_LOG_FILTER`]). Returns false when a global subscriber
/// is already set.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_log_writes_ndjson_and_forwards() {
        let directory = tempfile::tempdir().unwrap();
        let logs = directory.path().join("logs");
        let host = MemoryEmitter::new();
        let log = EventLog::create(&logs, &host).unwrap();

        log.emit(&Event::info("table.detected", Stage::Segment, json!({"rows": 3})));
        log.emit(&Event::warning("hook.failed", Stage::Map, json!({"hook": "audit"})));
        log.finish();

        assert_eq!(host.events().len(), 2);
        assert_eq!(host.named("hook.failed")[0].level, EventLevel::Warning);

        let content = std::fs::read_to_string(logs.join(EVENTS_FILE_NAME)).unwrap();
        let lines: Vec<Value> = content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "table.detected");
        assert_eq!(lines[0]["stage"], "segment");
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["payload"]["rows"], 3);
        assert_eq!(lines[1]["stage"], "map");
    }

    #[test]
    fn detached_log_only_forwards() {
        let host = MemoryEmitter::new();
        let log = EventLog::detached(&host);
        log.emit(&Event::debug("row.classified", Stage::Classify, Value::Null));
        log.finish();
        assert!(log.path().is_none());
        assert_eq!(host.events().len(), 1);
    }

    #[test]
    fn logging_is_installed_once() {
        init_logging();
        assert!(!init_logging());
    }
}
