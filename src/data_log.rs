//! Tagged, timestamped session log file.
//!
//! One line per entry: `<timestamp>, <source>, <TAG>, <message>`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};

use crate::run_log::RunEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Coding,
    Script,
    Map,
    ScriptError,
    ScriptWarning,
    MapError,
    MapWarning,
    System,
    SystemError,
    SystemWarning,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Coding => "CODING",
            LogTag::Script => "SCRIPT",
            LogTag::Map => "MAP",
            LogTag::ScriptError => "SCRIPT_ERROR",
            LogTag::ScriptWarning => "SCRIPT_WARNING",
            LogTag::MapError => "MAP_ERROR",
            LogTag::MapWarning => "MAP_WARNING",
            LogTag::System => "SYSTEM",
            LogTag::SystemError => "SYSTEM_ERROR",
            LogTag::SystemWarning => "SYSTEM_WARNING",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct DataLogger<W: Write> {
    source: String,
    sink: W,
}

impl DataLogger<File> {
    /// Append to `path`, creating it if needed.
    pub fn create(path: &Path, source: impl Into<String>) -> Result<Self, String> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Failed to open log file {:?}: {}", path, e))?;
        Ok(Self::new(file, source))
    }
}

impl<W: Write> DataLogger<W> {
    pub fn new(sink: W, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sink,
        }
    }

    pub fn log(&mut self, tag: LogTag, message: &str) -> Result<(), String> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        writeln!(self.sink, "{}, {}, {}, {}", timestamp, self.source, tag, message)
            .map_err(|e| format!("Failed to write log entry: {}", e))
    }

    /// Persist a run event as a JSON payload.
    pub fn log_event(&mut self, source: &str, event: &RunEvent) -> Result<(), String> {
        let tag = if event.level() == log::Level::Warn {
            LogTag::ScriptWarning
        } else {
            LogTag::Script
        };
        let payload = serde_json::to_string(event)
            .map_err(|e| format!("Failed to serialize event: {}", e))?;
        self.log(tag, &format!("{} {}", source, payload))
    }

    pub fn flush(&mut self) -> Result<(), String> {
        self.sink
            .flush()
            .map_err(|e| format!("Failed to flush log: {}", e))
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
