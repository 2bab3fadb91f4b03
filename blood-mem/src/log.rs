//! Runtime Logging
//!
//! Structured, level-filtered logging for allocator and container events.
//! Each entry names the component that produced it (`bump`, `hash_map`, ...)
//! and carries typed key-value fields, so page creation or a table resize can
//! be read by a human (plain format) or a collector (JSON format).
//!
//! # Example
//!
//! ```rust,ignore
//! use blood_mem::log::{LogBuilder, LogLevel};
//!
//! LogBuilder::new(LogLevel::Debug, "bump")
//!     .message("created page")
//!     .field_bytes("size", 65536)
//!     .field_addr("base", ptr as usize)
//!     .emit();
//! ```
//!
//! The level check is a single atomic load, so call sites on hot paths test
//! [`would_log`] before building an entry.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    /// Per-operation detail (resizes, probe statistics).
    Trace = 0,
    /// Page lifecycle events.
    Debug = 1,
    /// Configuration and capability decisions.
    #[default]
    Info = 2,
    /// Degraded behaviour, e.g. a requested SIMD path that is unavailable.
    Warn = 3,
    /// Errors.
    Error = 4,
    /// Nothing is logged.
    Off = 5,
}

impl LogLevel {
    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Off,
        }
    }

    /// Parse a level name (case-insensitive). Numeric levels `0`-`5` map
    /// from `off` up to `trace`, matching the environment variable format.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "5" => Some(LogLevel::Trace),
            "debug" | "4" => Some(LogLevel::Debug),
            "info" | "3" => Some(LogLevel::Info),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "off" | "none" | "0" => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `[secs.millis] LEVEL component: message {k=v, ...}`
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    /// Free-form text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Byte count.
    Bytes(usize),
    /// Memory address, rendered in hex.
    Addr(usize),
    /// Boolean.
    Bool(bool),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Str(s) => f.write_str(s),
            LogValue::Int(i) => write!(f, "{i}"),
            LogValue::Bytes(n) => write!(f, "{n}B"),
            LogValue::Addr(a) => write!(f, "{a:#x}"),
            LogValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl LogValue {
    fn write_json(&self, out: &mut String) {
        match self {
            LogValue::Str(s) => {
                out.push('"');
                escape_json_into(s, out);
                out.push('"');
            }
            LogValue::Int(i) => out.push_str(&i.to_string()),
            LogValue::Bytes(n) => out.push_str(&n.to_string()),
            LogValue::Addr(a) => out.push_str(&format!("\"{a:#x}\"")),
            LogValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        }
    }
}

/// A single log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Producing component.
    pub component: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Structured fields in insertion order.
    pub fields: Vec<(&'static str, LogValue)>,
    /// Unix time in milliseconds.
    pub timestamp: u64,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(level: LogLevel, component: &'static str, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            level,
            component,
            message: message.into(),
            fields: Vec::new(),
            timestamp,
        }
    }

    /// Render in plain format.
    pub fn format_plain(&self) -> String {
        let mut out = format!(
            "[{}.{:03}] {:<5} {}: {}",
            self.timestamp / 1000,
            self.timestamp % 1000,
            self.level.as_str(),
            self.component,
            self.message
        );
        if !self.fields.is_empty() {
            out.push_str(" {");
            for (i, (key, value)) in self.fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{key}={value}"));
            }
            out.push('}');
        }
        out
    }

    /// Render as a single-line JSON object.
    pub fn format_json(&self) -> String {
        let mut out = String::with_capacity(96);
        out.push_str(&format!(
            "{{\"timestamp\":{},\"level\":\"{}\",\"component\":\"{}\",\"message\":\"",
            self.timestamp,
            self.level.as_str(),
            self.component
        ));
        escape_json_into(&self.message, &mut out);
        out.push('"');
        for (key, value) in &self.fields {
            out.push_str(",\"");
            escape_json_into(key, &mut out);
            out.push_str("\":");
            value.write_json(&mut out);
        }
        out.push('}');
        out
    }

    /// Render in the given format.
    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        }
    }
}

fn escape_json_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
}

// ============================================================================
// Global logger state
// ============================================================================

static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static JSON_FORMAT: AtomicBool = AtomicBool::new(false);
/// Serializes writes so concurrent entries never interleave mid-line.
static SINK: Mutex<()> = parking_lot::const_mutex(());

/// Set the minimum level that is emitted.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current minimum level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    JSON_FORMAT.store(format == LogFormat::Json, Ordering::Relaxed);
}

/// Current output format.
pub fn format() -> LogFormat {
    if JSON_FORMAT.load(Ordering::Relaxed) {
        LogFormat::Json
    } else {
        LogFormat::Plain
    }
}

/// Whether an entry at `level` would be written.
#[inline]
pub fn would_log(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

/// Write an entry to stderr if its level passes the filter.
pub fn emit(entry: &LogEntry) {
    if !would_log(entry.level) {
        return;
    }
    let line = entry.format(format());
    let _guard = SINK.lock();
    let _ = writeln!(std::io::stderr(), "{line}");
}

/// Builder for structured entries.
#[derive(Debug)]
pub struct LogBuilder {
    entry: LogEntry,
}

impl LogBuilder {
    /// Start an entry for `component`.
    pub fn new(level: LogLevel, component: &'static str) -> Self {
        Self {
            entry: LogEntry::new(level, component, ""),
        }
    }

    /// Set the message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.entry.message = msg.into();
        self
    }

    /// Add a text field.
    pub fn field_str(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.entry.fields.push((key, LogValue::Str(value.into())));
        self
    }

    /// Add an integer field.
    pub fn field_int(mut self, key: &'static str, value: i64) -> Self {
        self.entry.fields.push((key, LogValue::Int(value)));
        self
    }

    /// Add a byte-count field.
    pub fn field_bytes(mut self, key: &'static str, value: usize) -> Self {
        self.entry.fields.push((key, LogValue::Bytes(value)));
        self
    }

    /// Add an address field.
    pub fn field_addr(mut self, key: &'static str, value: usize) -> Self {
        self.entry.fields.push((key, LogValue::Addr(value)));
        self
    }

    /// Add a boolean field.
    pub fn field_bool(mut self, key: &'static str, value: bool) -> Self {
        self.entry.fields.push((key, LogValue::Bool(value)));
        self
    }

    /// Finish and emit.
    pub fn emit(self) {
        emit(&self.entry);
    }

    /// Finish without emitting.
    pub fn build(self) -> LogEntry {
        self.entry
    }
}

/// Log a plain message.
pub fn log(level: LogLevel, component: &'static str, message: impl Into<String>) {
    if would_log(level) {
        emit(&LogEntry::new(level, component, message));
    }
}

/// Log at trace level.
pub fn trace(component: &'static str, message: impl Into<String>) {
    log(LogLevel::Trace, component, message);
}

/// Log at debug level.
pub fn debug(component: &'static str, message: impl Into<String>) {
    log(LogLevel::Debug, component, message);
}

/// Log at info level.
pub fn info(component: &'static str, message: impl Into<String>) {
    log(LogLevel::Info, component, message);
}

/// Log at warn level.
pub fn warn(component: &'static str, message: impl Into<String>) {
    log(LogLevel::Warn, component, message);
}

/// Log at error level.
pub fn error(component: &'static str, message: impl Into<String>) {
    log(LogLevel::Error, component, message);
}
