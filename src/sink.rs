//! Durable CSV log for an acquisition session.
//!
//! The log is append-only: one header row, then one row per record in arrival
//! order.
//!
//! ```text
//! time_since_start,datetime,hot0,cold0,hot1,cold1
//! 0.104,"2024-03-09 12:00:05",23.5,21.25,nan,21.5
//! ```
//!
//! Every [`CsvSink::append`] flushes to the operating system before it
//! returns, so a crash loses at most the row being written. With
//! [`CsvSink::with_fsync`] the row is also synced to the storage device.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LoggerError, LoggerResult};
use crate::record::Record;
use crate::store::channel_ids;

/// Name of the elapsed-time column.
pub const ELAPSED_COLUMN: &str = "time_since_start";

/// Name of the wall-clock column.
pub const DATETIME_COLUMN: &str = "datetime";

/// Which channel columns go into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogColumns {
    /// Every hot and cold channel.
    #[default]
    HotAndCold,
    /// Hot junctions only. The live store still keeps both.
    HotOnly,
}

impl LogColumns {
    /// Whether the value at `record_index` is logged.
    pub fn includes(self, record_index: usize) -> bool {
        match self {
            LogColumns::HotAndCold => true,
            LogColumns::HotOnly => record_index % 2 == 0,
        }
    }
}

/// Channel column names for `sensor_count` sensors, in record order.
pub fn channel_columns(sensor_count: usize) -> Vec<String> {
    channel_ids(sensor_count).map(|id| id.name()).collect()
}

/// `<root>/<YYYY-MM-DD>/<HH-MM-SS>/<experiment>_<n>ch.csv`
pub fn session_log_path(
    root: &Path,
    experiment: &str,
    sensor_count: usize,
    started: NaiveDateTime,
) -> PathBuf {
    root.join(started.format("%Y-%m-%d").to_string())
        .join(started.format("%H-%M-%S").to_string())
        .join(format!("{experiment}_{sensor_count}ch.csv"))
}

/// Render a value the way the log has always stored floats.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else {
        format!("{value:?}")
    }
}

fn row_writer(file: File) -> csv::Writer<File> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(file)
}

/// Append-only CSV writer owned by one session.
pub struct CsvSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    columns: LogColumns,
    fsync: bool,
    header_written: bool,
    rows_written: u64,
}

impl CsvSink {
    /// Create the log file, making parent directories as needed.
    ///
    /// An existing file is never replaced: opening a path that already exists
    /// fails with [`LoggerError::Persistence`].
    pub fn open(path: impl AsRef<Path>) -> LoggerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                LoggerError::Persistence(format!(
                    "cannot create log directory '{}': {e}",
                    parent.display()
                ))
            })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                LoggerError::Persistence(format!(
                    "cannot create log file '{}': {e}",
                    path.display()
                ))
            })?;

        let writer = row_writer(file);

        info!(path = %path.display(), "Opened CSV log");

        Ok(Self {
            path,
            writer: Some(writer),
            columns: LogColumns::default(),
            fsync: false,
            header_written: false,
            rows_written: 0,
        })
    }

    /// Select which channel columns are written. Call before the header.
    pub fn with_columns(mut self, columns: LogColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Also sync file data to disk after every row.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Channel columns being written.
    pub fn columns(&self) -> LogColumns {
        self.columns
    }

    /// Data rows flushed so far, header excluded.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// False once closed.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Write the header row.
    ///
    /// `channel_names` lists every channel in record order; the configured
    /// [`LogColumns`] decides which of them become columns.
    pub fn write_header(&mut self, channel_names: &[String]) -> LoggerResult<()> {
        if self.header_written {
            return Err(LoggerError::Persistence(
                "header already written".to_string(),
            ));
        }
        let columns = self.columns;
        let mut header = vec![ELAPSED_COLUMN.to_string(), DATETIME_COLUMN.to_string()];
        header.extend(
            channel_names
                .iter()
                .enumerate()
                .filter(|(index, _)| columns.includes(*index))
                .map(|(_, name)| name.clone()),
        );

        // Column names are written with minimal quoting; data rows quote text.
        let mut encoded = WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .from_writer(Vec::new());
        encoded.write_record(&header)?;
        let bytes = encoded
            .into_inner()
            .map_err(|e| LoggerError::Persistence(e.to_string()))?;

        let writer = self.writer.take().ok_or_else(|| {
            LoggerError::Persistence("log is closed".to_string())
        })?;

        let mut file = writer
            .into_inner()
            .map_err(|e| LoggerError::Persistence(format!("cannot flush log: {}", e.error())))?;
        file.write_all(&bytes)
            .and_then(|()| file.flush())
            .map_err(|e| LoggerError::Persistence(format!("cannot write header: {e}")))?;
        self.writer = Some(row_writer(file));

        self.header_written = true;
        debug!(columns = header.len(), "Wrote CSV header");
        self.sync()
    }

    /// Append one record and flush it.
    pub fn append(&mut self, record: &Record) -> LoggerResult<()> {
        if !self.header_written {
            return Err(LoggerError::Persistence(
                "row appended before header".to_string(),
            ));
        }
        let columns = self.columns;
        let writer = self.writer_mut()?;

        let mut row = Vec::with_capacity(record.values.len() + 2);
        row.push(format_value(record.elapsed));
        row.push(record.wall_clock_string());
        row.extend(
            record
                .values
                .iter()
                .enumerate()
                .filter(|(index, _)| columns.includes(*index))
                .map(|(_, &value)| format_value(value)),
        );

        writer.write_record(&row)?;
        writer
            .flush()
            .map_err(|e| LoggerError::Persistence(format!("cannot flush log: {e}")))?;

        self.rows_written += 1;
        self.sync()
    }

    /// Flush and release the file. Safe to call more than once.
    pub fn close(&mut self) -> LoggerResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer
            .flush()
            .map_err(|e| LoggerError::Persistence(format!("cannot flush log on close: {e}")))?;
        if self.fsync {
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| LoggerError::Persistence(format!("cannot sync log: {e}")))?;
        }
        info!(path = %self.path.display(), rows = self.rows_written, "Closed CSV log");
        Ok(())
    }

    fn writer_mut(&mut self) -> LoggerResult<&mut csv::Writer<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| LoggerError::Persistence("log is closed".to_string()))
    }

    fn sync(&mut self) -> LoggerResult<()> {
        if !self.fsync {
            return Ok(());
        }
        let writer = self.writer_mut()?;
        writer
            .get_ref()
            .sync_data()
            .map_err(|e| LoggerError::Persistence(format!("cannot sync log: {e}")))
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "CSV log not closed cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn path_follows_date_time_convention() {
        let path = session_log_path(Path::new("DataLog"), "HotWater", 8, at(9, 5, 7));
        assert_eq!(
            path,
            Path::new("DataLog")
                .join("2024-03-09")
                .join("09-05-07")
                .join("HotWater_8ch.csv")
        );
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("log.csv");
        let sink = CsvSink::open(&path).unwrap();
        assert!(path.exists());
        assert!(sink.is_open());
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let err = CsvSink::open(blocker.join("log.csv")).err().unwrap();
        assert!(matches!(err, LoggerError::Persistence(_)));
    }

    #[test]
    fn open_refuses_to_replace_existing_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut first = CsvSink::open(&path).unwrap();
        first.write_header(&channel_columns(1)).unwrap();
        first
            .append(&Record::new(0.0, at(12, 0, 0), vec![1.0, 2.0]))
            .unwrap();

        let err = CsvSink::open(&path).err().unwrap();
        assert!(matches!(err, LoggerError::Persistence(_)));

        first.close().unwrap();
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn header_then_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.write_header(&channel_columns(2)).unwrap();
        sink.append(&Record::new(0.5, at(12, 0, 0), vec![10.0, 20.0, f64::NAN, 40.25]))
            .unwrap();

        // Flushed before close.
        let lines = read_lines(&path);
        assert_eq!(lines[0], "time_since_start,datetime,hot0,cold0,hot1,cold1");
        assert_eq!(lines[1], "0.5,\"2024-03-09 12:00:00\",10.0,20.0,nan,40.25");
        assert_eq!(sink.rows_written(), 1);
    }

    #[test]
    fn hot_only_drops_cold_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::open(&path)
            .unwrap()
            .with_columns(LogColumns::HotOnly);
        sink.write_header(&channel_columns(2)).unwrap();
        sink.append(&Record::new(1.0, at(12, 0, 1), vec![10.0, 20.0, 30.0, 40.0]))
            .unwrap();
        sink.close().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines[0], "time_since_start,datetime,hot0,hot1");
        assert_eq!(lines[1], "1.0,\"2024-03-09 12:00:01\",10.0,30.0");
    }

    #[test]
    fn header_is_written_exactly_once() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::open(dir.path().join("log.csv")).unwrap();
        sink.write_header(&channel_columns(1)).unwrap();
        assert!(sink.write_header(&channel_columns(1)).is_err());
    }

    #[test]
    fn append_before_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        let err = sink
            .append(&Record::new(0.0, at(0, 0, 0), vec![1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, LoggerError::Persistence(_)));
        sink.close().unwrap();
        assert!(read_lines(&path).is_empty());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::open(dir.path().join("log.csv"))
            .unwrap()
            .with_fsync(true);
        sink.write_header(&channel_columns(1)).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(!sink.is_open());
        assert!(sink
            .append(&Record::new(0.0, at(0, 0, 0), vec![1.0, 2.0]))
            .is_err());
    }

    #[test]
    fn rows_round_trip_through_a_csv_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.write_header(&channel_columns(1)).unwrap();
        for i in 0..3 {
            sink.append(&Record::new(i as f64 * 0.25, at(1, 2, i), vec![i as f64, f64::NAN]))
                .unwrap();
        }
        sink.close().unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][0], "0.5");
        assert_eq!(&rows[2][1], "2024-03-09 01:02:02");
        assert_eq!(rows[2][2].parse::<f64>().unwrap(), 2.0);
        assert!(rows[2][3].parse::<f64>().unwrap().is_nan());
    }

    #[test]
    fn format_value_matches_log_conventions() {
        assert_eq!(format_value(10.0), "10.0");
        assert_eq!(format_value(-0.125), "-0.125");
        assert_eq!(format_value(f64::NAN), "nan");
        assert_eq!(format_value(f64::NEG_INFINITY), "-inf");
    }
}
