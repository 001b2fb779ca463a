//! Structured JSONL logging.
//!
//! Provides:
//! - [`LogEntry`]: one log record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file, stderr, or a buffer.
//! - [`log_event`]: the process-wide sink used by the transport layers,
//!   opened lazily from [`crate::config::TransportConfig::log_sink`].
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{LogSink, transport_config};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (case-insensitive); unknown names map to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }

    /// Position in severity order, `Trace` lowest.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Trace => 0,
            Self::Debug => 1,
            Self::Info => 2,
            Self::Warn => 3,
            Self::Error => 4,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    /// Transport operation (`connect`, `read`, `wait`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Socket handle or registry the record is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<i32>,
    /// Positive platform error number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healing_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            op: None,
            handle: None,
            errno: None,
            bytes: None,
            healing_action: None,
            latency_ns: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_handle(mut self, handle: i32) -> Self {
        self.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_healing_action(mut self, action: impl Into<String>) -> Self {
        self.healing_action = Some(action.into());
        self
    }

    #[must_use]
    pub fn with_latency_ns(mut self, ns: u64) -> Self {
        self.latency_ns = Some(ns);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Cloneable in-memory writer; every clone sees the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    seq: u64,
    component: String,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that appends to a file.
    pub fn to_file(path: &Path, component: &str, run_id: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::to_writer(
            Box::new(std::io::LineWriter::new(file)),
            component,
            run_id,
        ))
    }

    /// Create an emitter that writes to standard error.
    #[must_use]
    pub fn to_stderr(component: &str, run_id: &str) -> Self {
        Self::to_writer(Box::new(std::io::stderr()), component, run_id)
    }

    /// Create an emitter that writes to a shared in-memory buffer.
    #[must_use]
    pub fn to_buffer(component: &str, run_id: &str) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (
            Self::to_writer(Box::new(buffer.clone()), component, run_id),
            buffer,
        )
    }

    #[must_use]
    pub fn to_writer(writer: Box<dyn Write + Send>, component: &str, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            component: component.to_string(),
            run_id: run_id.to_string(),
        }
    }

    /// Generate the next trace ID.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.component, self.run_id, self.seq)
    }

    /// Emit a log entry with an auto-generated trace_id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(&trace_id, level, event);
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry; an empty trace_id is filled in.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// Global sink
// ---------------------------------------------------------------------------

enum SinkState {
    Unresolved,
    Disabled,
    Active {
        emitter: LogEmitter,
        min_level: LogLevel,
    },
}

static GLOBAL_SINK: Mutex<SinkState> = Mutex::new(SinkState::Unresolved);

// Lock-free mirror of GLOBAL_SINK: 0 = unresolved, 1 = disabled,
// GATE_ACTIVE + rank = active at that minimum level. Stored under the lock.
static SINK_GATE: AtomicU8 = AtomicU8::new(GATE_UNRESOLVED);

const GATE_UNRESOLVED: u8 = 0;
const GATE_DISABLED: u8 = 1;
const GATE_ACTIVE: u8 = 2;

fn store_sink(sink: &mut SinkState, state: SinkState) {
    let gate = match &state {
        SinkState::Unresolved => GATE_UNRESOLVED,
        SinkState::Disabled => GATE_DISABLED,
        SinkState::Active { min_level, .. } => GATE_ACTIVE + min_level.rank(),
    };
    *sink = state;
    SINK_GATE.store(gate, Ordering::Release);
}

/// `false` when a record at `level` is certainly dropped; checked before
/// taking the sink lock.
fn gate_admits(level: LogLevel) -> bool {
    match SINK_GATE.load(Ordering::Acquire) {
        GATE_UNRESOLVED => true,
        GATE_DISABLED => false,
        gate => GATE_ACTIVE + level.rank() >= gate,
    }
}

fn open_configured_sink() -> SinkState {
    let config = transport_config();
    let run_id = std::process::id().to_string();
    let emitter = match &config.log_sink {
        LogSink::Off => return SinkState::Disabled,
        LogSink::Stderr => LogEmitter::to_stderr("udsmux", &run_id),
        LogSink::File(path) => match LogEmitter::to_file(path, "udsmux", &run_id) {
            Ok(emitter) => emitter,
            // Unwritable log path: run silent rather than fail transport calls.
            Err(_) => return SinkState::Disabled,
        },
    };
    SinkState::Active {
        emitter,
        min_level: config.log_level,
    }
}

/// Route process-wide records to `emitter` instead of the configured sink.
pub fn install_global_emitter(emitter: LogEmitter, min_level: LogLevel) {
    store_sink(&mut GLOBAL_SINK.lock(), SinkState::Active { emitter, min_level });
}

/// Drop the current sink; the next record reopens it from configuration.
pub fn reset_global_sink() {
    store_sink(&mut GLOBAL_SINK.lock(), SinkState::Unresolved);
}

/// Returns true if a record at `level` would be written.
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    if !gate_admits(level) {
        return false;
    }
    let mut sink = GLOBAL_SINK.lock();
    if matches!(*sink, SinkState::Unresolved) {
        let opened = open_configured_sink();
        store_sink(&mut sink, opened);
    }
    matches!(&*sink, SinkState::Active { min_level, .. } if level >= *min_level)
}

/// Write one record to the process-wide sink.
///
/// `fill` only runs when the level passes the configured threshold. Write
/// failures are swallowed: logging never changes a transport result.
pub fn log_event<F>(level: LogLevel, event: &str, fill: F)
where
    F: FnOnce(LogEntry) -> LogEntry,
{
    if !gate_admits(level) {
        return;
    }
    let mut sink = GLOBAL_SINK.lock();
    if matches!(*sink, SinkState::Unresolved) {
        let opened = open_configured_sink();
        store_sink(&mut sink, opened);
    }
    let SinkState::Active { emitter, min_level } = &mut *sink else {
        return;
    };
    if level < *min_level {
        return;
    }
    let entry = fill(LogEntry::new(String::new(), level, event));
    if emitter.emit_entry(entry).is_ok() {
        let _ = emitter.flush();
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let violation = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(violation("<json>", format!("invalid JSON: {e}")));
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        errors.push(violation("<root>", "expected JSON object".to_string()));
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(violation(field, "required field missing".to_string()));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error"].contains(&level)
    {
        errors.push(violation("level", format!("invalid level: '{level}'")));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() != 3
    {
        errors.push(violation(
            "trace_id",
            format!("trace_id should follow <component>::<run_id>::<seq>, got: '{trace_id}'"),
        ));
    }

    if let Some(errno) = obj.get("errno")
        && !errno.as_i64().is_some_and(|e| e > 0)
    {
        errors.push(violation("errno", format!("errno must be a positive integer, got: {errno}")));
    }

    if let Some(handle) = obj.get("handle")
        && !handle.as_i64().is_some_and(|h| h >= 0)
    {
        errors.push(violation(
            "handle",
            format!("handle must be a non-negative integer, got: {handle}"),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(violation("<deserialization>", format!("failed to deserialize: {e}")));
            Err(errors)
        }
    }
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RFC 3339 UTC timestamp with millisecond precision.
fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;

    // Civil-from-days over 400-year eras.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
        millis,
    )
}
