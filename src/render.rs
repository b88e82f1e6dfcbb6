use crate::log_entry::{LogLevel, LogRecord};
use chrono::{DateTime, Utc};
use colored::*;
use std::fmt::Write;

const ID_WIDTH: usize = 6;
const TIMESTAMP_WIDTH: usize = 23;
const LEVEL_WIDTH: usize = 5;

fn level_cell(level: LogLevel, colorize: bool) -> String {
    let text = match level {
        LogLevel::Unknown => "",
        other => other.as_str(),
    };
    // Pad before colouring so escape codes do not eat into the width.
    let cell = format!("{:<width$}", text, width = LEVEL_WIDTH);
    if !colorize {
        return cell;
    }
    match level {
        LogLevel::Error => cell.red().to_string(),
        LogLevel::Warn => cell.yellow().to_string(),
        LogLevel::Info => cell.blue().to_string(),
        _ => cell,
    }
}

/// One record line. Unknown levels render as a blank cell.
pub fn format_record(record: &LogRecord, colorize: bool) -> String {
    format!(
        "{:<tw$} {} {}",
        record.timestamp(),
        level_cell(record.level(), colorize),
        record.message().trim_end_matches(['\r', '\n']),
        tw = TIMESTAMP_WIDTH
    )
}

/// Buffer listing, one row per record keyed by its id.
pub fn format_table<'a>(records: impl IntoIterator<Item = &'a LogRecord>, colorize: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>iw$} {:<tw$} {:<lw$} {}",
        "Id",
        "Timestamp",
        "Level",
        "Message",
        iw = ID_WIDTH,
        tw = TIMESTAMP_WIDTH,
        lw = LEVEL_WIDTH
    );
    let mut rows = 0;
    for record in records {
        let _ = writeln!(
            out,
            "{:>iw$} {}",
            record.id().to_string(),
            format_record(record, colorize),
            iw = ID_WIDTH
        );
        rows += 1;
    }
    if rows == 0 {
        out.push_str("No log entries\n");
    }
    out
}

/// Time range covered by a newest-first list, from the parsable timestamps.
pub fn format_span(records: &[LogRecord]) -> Option<String> {
    let newest = records.iter().find_map(|r| r.parsed_time())?;
    let oldest = records.iter().rev().find_map(|r| r.parsed_time())?;
    Some(format!(
        "{} .. {} ({}s)",
        oldest.format("%Y-%m-%d %H:%M:%S"),
        newest.format("%Y-%m-%d %H:%M:%S"),
        (newest - oldest).num_seconds()
    ))
}

pub fn format_status(
    connected: bool,
    loading: bool,
    len: usize,
    capacity: usize,
    last_message_at: Option<DateTime<Utc>>,
) -> String {
    let mut status = format!(
        "[{}] {}/{} records",
        if connected { "connected" } else { "disconnected" },
        len,
        capacity
    );
    if loading {
        status.push_str(", loading history");
    }
    if let Some(at) = last_message_at {
        let _ = write!(status, ", last live line at {}", at.format("%H:%M:%S"));
    }
    status
}
