use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

pub const DEFAULT_LABEL_LOG: &str = "detected_objects.txt";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_entry(timestamp: &DateTime<Local>, labels: &[String]) -> String {
    format!("{}: {}\n", timestamp.format(TIMESTAMP_FORMAT), labels.join(", "))
}

/// Append-only text log, one line per processed frame.
pub struct LabelLog {
    writer: BufWriter<File>,
}

impl LabelLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, timestamp: &DateTime<Local>, labels: &[String]) -> Result<()> {
        self.writer
            .write_all(format_entry(timestamp, labels).as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub source: String,
    pub model: String,
    pub device: String,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Serialize)]
pub struct FrameEvent<'a> {
    pub frame_index: u64,
    pub detections: usize,
    pub person_count: usize,
    pub vehicle_count: usize,
    pub fps: f64,
    pub labels: &'a [String],
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    event: &'static str,
    timestamp: String,
    #[serde(flatten)]
    body: &'a T,
}

/// NDJSON run record: one `session_start`, a `frame` per logged frame, and a
/// closing `summary`. Buffered output is flushed on drop.
pub struct EventLog {
    writer: BufWriter<File>,
}

impl EventLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn session_start(&mut self, info: &SessionInfo) -> Result<()> {
        self.write("session_start", info)?;
        self.flush()
    }

    pub fn frame(&mut self, frame: &FrameEvent<'_>) -> Result<()> {
        self.write("frame", frame)
    }

    pub fn summary<T: Serialize>(&mut self, summary: &T) -> Result<()> {
        self.write("summary", summary)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush event log")
    }

    fn write<T: Serialize>(&mut self, event: &'static str, body: &T) -> Result<()> {
        let envelope = Envelope {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            body,
        };
        serde_json::to_writer(&mut self.writer, &envelope)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            tracing::warn!("Failed to flush event log: {}", err);
        }
    }
}
