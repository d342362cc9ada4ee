use chrono::{DateTime, Local};

/// Format used for the timestamp prefix of firewall event lines
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_event_timestamp(at: &DateTime<Local>) -> String {
    at.format(EVENT_TIMESTAMP_FORMAT).to_string()
}

pub fn format_event_line(at: &DateTime<Local>, message: &str) -> String {
    format!("[{}] {}", format_event_timestamp(at), message)
}
