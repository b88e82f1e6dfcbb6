use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

const MESSAGE_SEPARATOR: &str = " : ";

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

fn timestamp_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^([0-9]{4}-[0-9]{2}-[0-9]{2}[ T][0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{3})")
            .expect("timestamp pattern is valid")
    })
}

fn level_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^([A-Z]+)\s+").expect("level pattern is valid"))
}

/// Display key of a record. Only unique within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    fn next() -> Self {
        Self(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Trace,
    Unknown,
}

impl LogLevel {
    /// Maps a backend level token. Anything outside the five known levels is `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
            LogLevel::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed backend log line.
///
/// Records are never modified after [`parse_line`] builds them, so the
/// fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    id: RecordId,
    timestamp: String,
    level: LogLevel,
    message: String,
}

impl LogRecord {
    fn new(timestamp: String, level: LogLevel, message: String) -> Self {
        Self {
            id: RecordId::next(),
            timestamp,
            level,
            message,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// `YYYY-MM-DD HH:MM:SS.mmm` (or with a `T`), empty when the line had none.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn parsed_time(&self) -> Option<NaiveDateTime> {
        if self.timestamp.is_empty() {
            return None;
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%d %H:%M:%S%.3f")
            .or_else(|_| NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.3f"))
            .ok()
    }

    /// True when the two records hold the same parsed content, ignoring ids.
    #[cfg(test)]
    pub fn same_content(&self, other: &LogRecord) -> bool {
        self.timestamp == other.timestamp
            && self.level == other.level
            && self.message == other.message
    }
}

/// Parses one raw backend line. Parsing is total: a line without a leading
/// timestamp (stack trace continuation, banner, garbage) becomes an
/// `UNKNOWN` record carrying the whole line.
pub fn parse_line(raw: &str) -> LogRecord {
    let timestamp = match timestamp_regex().captures(raw).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => return LogRecord::new(String::new(), LogLevel::Unknown, raw.to_string()),
    };

    let mut remaining = raw[timestamp.len()..].trim();
    let mut level = LogLevel::Unknown;
    // Level-like token we do not know (FATAL, NOTICE, ...); kept in the message.
    let mut unrecognised = None;

    if let Some(token) = level_regex().captures(remaining).and_then(|c| c.get(1)) {
        match LogLevel::from_token(token.as_str()) {
            Some(known) => level = known,
            None => unrecognised = Some(token.as_str()),
        }
        remaining = remaining[token.end()..].trim();
    }

    let message = match remaining.find(MESSAGE_SEPARATOR) {
        Some(index) => &remaining[index + MESSAGE_SEPARATOR.len()..],
        None => remaining,
    };

    let message = match unrecognised {
        Some(token) => format!("{} {}", token, message),
        None => message.to_string(),
    };

    LogRecord::new(timestamp.to_string(), level, message)
}
