//! The unit of acquisition.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::store::ChannelId;

/// Format of the human-readable timestamp column.
pub const WALL_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One accepted device line, stamped on arrival.
///
/// Built once per accepted line, handed to the sink and the store, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Seconds since session start, millisecond resolution.
    pub elapsed: f64,
    /// Local wall-clock time of arrival.
    pub wall_clock: NaiveDateTime,
    /// One value per channel in record order (`hot0, cold0, hot1, ...`).
    pub values: Vec<f64>,
}

impl Record {
    /// Build a record; `elapsed` is rounded to whole milliseconds.
    pub fn new(elapsed: f64, wall_clock: NaiveDateTime, values: Vec<f64>) -> Self {
        Self {
            elapsed: round_millis(elapsed),
            wall_clock,
            values,
        }
    }

    /// Wall clock as written to the log, `YYYY-MM-DD HH:MM:SS`.
    pub fn wall_clock_string(&self) -> String {
        self.wall_clock.format(WALL_CLOCK_FORMAT).to_string()
    }

    /// Sensors covered by `values`.
    pub fn sensor_count(&self) -> usize {
        self.values.len() / 2
    }

    /// Value of one channel, `None` if out of range.
    pub fn value(&self, channel: ChannelId) -> Option<f64> {
        self.values.get(channel.record_index()).copied()
    }
}

/// Round seconds to millisecond resolution.
pub fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
