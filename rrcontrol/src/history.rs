//! Playback history and telemetry events.
//!
//! Recording is fire-and-forget: [`HistorySink::record`] never blocks on I/O
//! and never reports failures to the caller.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use rrsources::Source;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub level: &'static str,
    pub event_type: &'static str,
    pub action: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl HistoryEvent {
    pub fn new(event_type: &'static str, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: "INFO",
            event_type,
            action: action.into(),
            status: "success".to_string(),
            source_id: None,
            source_label: None,
            source_type: None,
            item_name: None,
            value: None,
            duration_ms: None,
            metadata: None,
        }
    }

    pub fn with_source(mut self, source: &Source) -> Self {
        self.source_id = Some(source.id.clone());
        self.source_label = Some(source.label.clone());
        self.source_type = Some(source.source_type.as_str().to_string());
        self
    }
}

/// Destination of history events.
///
/// Only [`record`](HistorySink::record) is required; the typed helpers
/// build the events.
pub trait HistorySink: Send + Sync {
    fn record(&self, event: HistoryEvent);

    fn playback_start(&self, source: &Source, item_name: Option<&str>) {
        let mut event = HistoryEvent::new("system", "playback_start").with_source(source);
        event.item_name = item_name.map(str::to_string);
        self.record(event);
    }

    fn source_change(&self, source: &Source) {
        self.record(HistoryEvent::new("system", "source_change").with_source(source));
    }

    fn user_action(&self, action: &str, source: Option<&Source>) {
        let event = HistoryEvent::new("user_input", action);
        self.record(match source {
            Some(source) => event.with_source(source),
            None => event,
        });
    }

    fn audio_event(&self, action: &str, value: Option<f64>) {
        let mut event = HistoryEvent::new("audio", action);
        event.value = value;
        self.record(event);
    }

    fn performance(&self, action: &str, duration_ms: f64) {
        let mut event = HistoryEvent::new("performance", action);
        event.level = "DEBUG";
        event.duration_ms = Some(duration_ms);
        self.record(event);
    }

    fn network_event(&self, action: &str, status: &str) {
        let mut event = HistoryEvent::new("network", action);
        event.level = match status {
            "failure" | "error" => "ERROR",
            "retry" => "WARNING",
            _ => "INFO",
        };
        event.status = status.to_string();
        self.record(event);
    }

    fn config_event(&self, action: &str, metadata: Option<Value>) {
        let mut event = HistoryEvent::new("config", action);
        event.metadata = metadata;
        self.record(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistory;

impl HistorySink for NullHistory {
    fn record(&self, _event: HistoryEvent) {}
}

/// Appends one JSON object per line from a background writer thread.
pub struct JsonlHistory {
    sender: Mutex<Option<Sender<HistoryEvent>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlHistory {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = unbounded::<HistoryEvent>();
        let shown = path.display().to_string();

        let writer = thread::Builder::new()
            .name("history-writer".into())
            .spawn(move || {
                let mut file = file;
                for event in receiver {
                    if let Err(e) = write_event(&mut file, &event) {
                        warn!(path = %shown, error = %e, "Failed to write history event");
                    }
                }
                debug!(path = %shown, "History writer stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Flushes pending events and stops the writer.
    pub fn close(&self) {
        self.sender.lock().take();
        let writer = self.writer.lock().take();
        if let Some(handle) = writer {
            let _ = handle.join();
        }
    }
}

impl HistorySink for JsonlHistory {
    fn record(&self, event: HistoryEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(event);
        }
    }
}

impl Drop for JsonlHistory {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_event(file: &mut File, event: &HistoryEvent) -> io::Result<()> {
    let line = serde_json::to_string(event)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()
}
