//! Variable map, data-row table, and in-memory log buffer
//!
//! These are the pure data structures behind one run's execution context.
//! They carry no synchronization: a run is driven by a single worker, so the
//! owning context serializes all access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Per-run variable map.
///
/// Names may be passed wrapped in `${…}`; the wrapper is stripped so module
/// configs can reference a variable the same way they would interpolate it.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    map: Map<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip an optional `${…}` wrapper from a variable name.
    fn unwrap_name(name: &str) -> &str {
        name.strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(Self::unwrap_name(name))
    }

    /// Get a value or fall back to `default`.
    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name).cloned().unwrap_or(default)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        debug!(%name, "Variables::set");
        self.map.insert(name, value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(Self::unwrap_name(name))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot of the whole map (for script-eval payloads).
    pub fn snapshot(&self) -> Map<String, Value> {
        self.map.clone()
    }
}

/// Growing result table.
///
/// Values fill the working row left to right; writing a column that is
/// already present commits the working row and starts a new one, so repeated
/// extraction loops produce one row per pass without explicit commits.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    rows: Vec<Map<String, Value>>,
    current: Map<String, Value>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to the working row, auto-committing on a repeat column.
    pub fn add_value(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        if self.current.contains_key(&column) {
            self.commit_row();
        }
        self.current.insert(column, value);
    }

    /// Append a copy of the working row to the table and clear it.
    pub fn commit_row(&mut self) {
        if !self.current.is_empty() {
            self.rows.push(std::mem::take(&mut self.current));
        }
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn current_row(&self) -> &Map<String, Value> {
        &self.current
    }

    /// All collected rows, including a snapshot of a partially-filled
    /// working row (a run that ends mid-row still exposes its data).
    pub fn collected(&self) -> Vec<Map<String, Value>> {
        let mut out = self.rows.clone();
        if !self.current.is_empty() {
            out.push(self.current.clone());
        }
        out
    }
}

/// Severity of one log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a level name, defaulting to `Info` for unknown spellings.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "success" => Self::Success,
            "warning" | "warn" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One timestamped log entry, exportable during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Ordered in-memory log storage for one run.
///
/// Entries live until the context drops; the log-export module reads them
/// mid-run.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: Vec<LogEntry>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, level: LogLevel, message: impl Into<String>, node_id: Option<String>, duration_ms: Option<u64>) {
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node_id,
            duration_ms,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
