//! Logging Infrastructure
//!
//! Structured logging for the runtime: log levels, key-value fields and
//! plain or JSON output. The level gate is a single atomic load so disabled
//! levels cost almost nothing on the hot path.
//!
//! The ghost arena's fault handler never logs; nothing in this module is
//! async-signal-safe.
//!
//! # Example
//!
//! ```rust,ignore
//! use specter::log::{self, LogLevel};
//!
//! log::info("arena online");
//! log::record(LogLevel::Info, "document stored")
//!     .field_int("offset", 24)
//!     .field_int("dim", 256)
//!     .emit();
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Log level enumeration, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Info level (default).
    #[default]
    Info = 2,
    /// Warning level.
    Warn = 3,
    /// Error level.
    Error = 4,
    /// No logging.
    Off = 5,
}

impl LogLevel {
    /// Get the level name as a string.
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

    /// Parse a log level from a string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "off" | "none" => Some(LogLevel::Off),
            _ => None,
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
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output format for emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LogFormat {
    /// Human-readable single line.
    #[default]
    Plain = 0,
    /// One JSON object per line.
    Json = 1,
}

/// A typed field value attached to a record.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// String value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl FieldValue {
    fn to_json(&self) -> String {
        match self {
            FieldValue::Str(s) => format!("\"{}\"", escape_json(s)),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

/// Minimum level gate.
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Selected output format.
static FORMAT: AtomicU8 = AtomicU8::new(LogFormat::Plain as u8);

/// Set the minimum log level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Get the current minimum log level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst))
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    FORMAT.store(format as u8, Ordering::SeqCst);
}

/// Check whether a record at `level` would be emitted.
pub fn would_log(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 >= MIN_LEVEL.load(Ordering::SeqCst)
}

/// A buffered record under construction.
#[derive(Debug)]
pub struct Record {
    level: LogLevel,
    target: Option<&'static str>,
    message: String,
    fields: Vec<(&'static str, FieldValue)>,
    timestamp_ms: u64,
}

impl Record {
    fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            level,
            target: None,
            message: message.into(),
            fields: Vec::new(),
            timestamp_ms,
        }
    }

    /// Set the subsystem target, e.g. `"arena"`.
    pub fn target(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach a string field.
    pub fn field_str(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((key, FieldValue::Str(value.into())));
        self
    }

    /// Attach an integer field.
    pub fn field_int(mut self, key: &'static str, value: i64) -> Self {
        self.fields.push((key, FieldValue::Int(value)));
        self
    }

    /// Attach a float field.
    pub fn field_float(mut self, key: &'static str, value: f64) -> Self {
        self.fields.push((key, FieldValue::Float(value)));
        self
    }

    /// Attach a boolean field.
    pub fn field_bool(mut self, key: &'static str, value: bool) -> Self {
        self.fields.push((key, FieldValue::Bool(value)));
        self
    }

    /// Format and write the record to stderr.
    pub fn emit(self) {
        if !would_log(self.level) {
            return;
        }
        let format = if FORMAT.load(Ordering::SeqCst) == LogFormat::Json as u8 {
            LogFormat::Json
        } else {
            LogFormat::Plain
        };
        let line = self.format(format);
        let _ = writeln!(std::io::stderr(), "{}", line);
    }

    /// Render the record in the given format.
    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        }
    }

    /// Plain lines lead with the level so a terminal scan finds problems
    /// by the left margin: `LEVEL [secs.millis] target: message k=v k=v`.
    fn format_plain(&self) -> String {
        let mut out = format!(
            "{:<5} [{}.{:03}] ",
            self.level.as_str(),
            self.timestamp_ms / 1000,
            self.timestamp_ms % 1000
        );
        if let Some(target) = self.target {
            out.push_str(target);
            out.push_str(": ");
        }
        out.push_str(&self.message);
        for (key, value) in &self.fields {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(&value.to_string());
        }
        out
    }

    /// One JSON object per line: level and message up front, timestamp and
    /// structured fields trailing.
    fn format_json(&self) -> String {
        let mut parts = vec![
            format!("\"level\":\"{}\"", self.level.as_str()),
            format!("\"msg\":\"{}\"", escape_json(&self.message)),
        ];
        if let Some(target) = self.target {
            parts.push(format!("\"target\":\"{}\"", escape_json(target)));
        }
        parts.push(format!("\"ts_ms\":{}", self.timestamp_ms));
        if !self.fields.is_empty() {
            let rendered: Vec<String> = self
                .fields
                .iter()
                .map(|(key, value)| format!("\"{}\":{}", escape_json(key), value.to_json()))
                .collect();
            parts.push(format!("\"fields\":{{{}}}", rendered.join(",")));
        }
        format!("{{{}}}", parts.join(","))
    }
}

/// Escape a string for inclusion in JSON output. Quotes and backslashes
/// get a backslash prefix, the common whitespace controls their short
/// forms, and anything else below 0x20 the `\uXXXX` spelling.
fn escape_json(s: &str) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Start a structured record at the given level.
pub fn record(level: LogLevel, message: impl Into<String>) -> Record {
    Record::new(level, message)
}

/// Log a plain message at the given level.
pub fn log(level: LogLevel, message: impl Into<String>) {
    if would_log(level) {
        Record::new(level, message).emit();
    }
}

/// Log a trace message.
pub fn trace(message: impl Into<String>) {
    log(LogLevel::Trace, message);
}

/// Log a debug message.
pub fn debug(message: impl Into<String>) {
    log(LogLevel::Debug, message);
}

/// Log an info message.
pub fn info(message: impl Into<String>) {
    log(LogLevel::Info, message);
}

/// Log a warning.
pub fn warn(message: impl Into<String>) {
    log(LogLevel::Warn, message);
}

/// Log an error.
pub fn error(message: impl Into<String>) {
    log(LogLevel::Error, message);
}
