use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Case-insensitive; accepts "warning" as an alias.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            request_id: None,
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    fn mirror_to_tracing(&self) {
        let request_id = self.request_id.as_deref().unwrap_or("-");
        match self.level {
            LogLevel::Debug => {
                tracing::debug!(component = %self.component, request_id, "{}", self.message)
            }
            LogLevel::Info => {
                tracing::info!(component = %self.component, request_id, "{}", self.message)
            }
            LogLevel::Warn => {
                tracing::warn!(component = %self.component, request_id, "{}", self.message)
            }
            LogLevel::Error => {
                tracing::error!(component = %self.component, request_id, "{}", self.message)
            }
        }
    }
}

/// Append-only JSONL file backing a [`Logger`].
struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Entries already on disk, oldest first, capped at `limit`, plus the
    /// number of lines the file held. Lines that do not parse are skipped.
    fn replay(path: &Path, limit: usize) -> std::io::Result<(VecDeque<LogEntry>, usize)> {
        let mut entries = VecDeque::new();
        if !path.exists() {
            return Ok((entries, 0));
        }
        let reader = BufReader::new(File::open(path)?);
        let mut lines = 0;
        for line in reader.lines().map_while(std::result::Result::ok) {
            lines += 1;
            if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                push_bounded(&mut entries, entry, limit);
            }
        }
        Ok((entries, lines))
    }

    /// Buffered append. Warnings and errors are flushed right away; the
    /// rest reach the file when the buffer fills or the sink is dropped.
    fn append(&mut self, entry: &LogEntry) {
        // Logging must never fail a request.
        let Ok(line) = serde_json::to_string(entry) else {
            return;
        };
        let written = writeln!(self.writer, "{}", line);
        if written.is_ok() && entry.level >= LogLevel::Warn {
            let _ = self.writer.flush();
        }
    }

    fn rewrite<'a>(&mut self, entries: impl Iterator<Item = &'a LogEntry>) -> std::io::Result<()> {
        self.writer.flush()?;
        {
            let file = File::create(&self.path)?;
            let mut out = BufWriter::new(file);
            for entry in entries {
                serde_json::to_writer(&mut out, entry)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        *self = Self::open(self.path.clone())?;
        Ok(())
    }
}

fn push_bounded(entries: &mut VecDeque<LogEntry>, entry: LogEntry, limit: usize) {
    while entries.len() >= limit {
        entries.pop_front();
    }
    entries.push_back(entry);
}

/// Ring buffer of the most recent entries, optionally persisted as JSONL.
/// The file never holds more than the buffer after the logger is opened.
pub struct Logger {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    min_level: LogLevel,
    sink: Option<JsonlSink>,
}

impl Logger {
    /// Open (or create) the log file and reload its most recent entries.
    pub fn new(file_path: impl AsRef<Path>, min_level: LogLevel) -> std::io::Result<Self> {
        Self::open(file_path.as_ref(), min_level, MAX_LOG_ENTRIES)
    }

    fn open(path: &Path, min_level: LogLevel, capacity: usize) -> std::io::Result<Self> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
            _ => {}
        }

        let (entries, lines_on_disk) = JsonlSink::replay(path, capacity)?;
        let mut logger = Self {
            entries,
            capacity,
            min_level,
            sink: Some(JsonlSink::open(path.to_path_buf())?),
        };

        if lines_on_disk > logger.entries.len() {
            logger.compact()?;
        }
        Ok(logger)
    }

    /// A logger that never touches the filesystem.
    pub fn in_memory(min_level: LogLevel) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: MAX_LOG_ENTRIES,
            min_level,
            sink: None,
        }
    }

    pub fn log(&mut self, entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        entry.mirror_to_tracing();
        if let Some(sink) = self.sink.as_mut() {
            sink.append(&entry);
        }
        push_bounded(&mut self.entries, entry, self.capacity);
    }

    /// Newest first.
    #[cfg(test)]
    fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Rewrite the file so it holds only the buffered entries.
    fn compact(&mut self) -> std::io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.rewrite(self.entries.iter()),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>, min_level: LogLevel) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path, min_level)?))))
    }

    pub fn in_memory(min_level: LogLevel) -> Self {
        Self(Arc::new(Mutex::new(Logger::in_memory(min_level))))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn debug(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    #[cfg(test)]
    fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }

    /// A handle that stamps every entry with `request_id`.
    pub fn for_request(&self, request_id: impl Into<String>) -> RequestLogger {
        RequestLogger {
            inner: self.clone(),
            request_id: request_id.into(),
        }
    }
}

/// Per-request logging handle. Cheap to clone; moved into stream tasks.
#[derive(Clone)]
pub struct RequestLogger {
    inner: SharedLogger,
    request_id: String,
}

impl RequestLogger {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    fn emit(&self, level: LogLevel, component: &str, message: String, ctx: Option<serde_json::Value>) {
        let mut entry = LogEntry::new(level, component, message).with_request_id(&self.request_id);
        entry.context = ctx;
        self.inner.log(entry);
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.emit(LogLevel::Info, component, message.into(), None);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.emit(LogLevel::Warn, component, message.into(), None);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.emit(LogLevel::Error, component, message.into(), None);
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.emit(LogLevel::Debug, component, message.into(), None);
    }

    pub fn with_context(
        &self,
        level: LogLevel,
        component: &str,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.emit(level, component, message.into(), Some(context));
    }
}
