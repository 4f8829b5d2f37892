use chrono::{DateTime, Local};
use log::warn;
use std::fmt::Display;

/// Local wall-clock timestamp shared by every reading of one tick.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn format_timestamp(ts: DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Local::now())
}

/// Log a failed step and hand back its value, if any. Steps of a tick never
/// propagate their errors.
pub fn logged<T, E: Display>(what: impl Display, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("{}: {}", what, e);
            None
        }
    }
}
