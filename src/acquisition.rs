//! The acquisition loop.
//!
//! [`Acquisition`] is the single writer of a session: it owns the line feed and
//! the CSV sink, and is the only code that mutates the channel store.
//!
//! ```text
//! WaitingForReady --(sentinel)--> Streaming --(transport/persistence failure, stop)--> Stopped
//! ```
//!
//! Scheduling is not its concern. A driver (see [`crate::session`]) awaits
//! [`Acquisition::wait_for_ready`] once and then calls [`Acquisition::tick`] on
//! its own timer. Each tick drains the lines already received and returns
//! without waiting for more.
//!
//! Per accepted line the order is: log row (flushed), then store append and
//! window trim under one write lock, then a status update for observers. A
//! failed log write therefore never leaves a row in the live view that is
//! missing from the file.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, trace, warn};

use crate::error::{LoggerError, LoggerResult};
use crate::protocol::{is_ready_line, parse_line_into, record_arity, DEFAULT_READY_SENTINEL};
use crate::record::Record;
use crate::sink::{channel_columns, CsvSink};
use crate::store::SharedChannelStore;

/// Source of session-relative and wall-clock time.
pub trait Clock: Send {
    /// Seconds since the session started.
    fn elapsed_seconds(&self) -> f64;
    /// Local wall-clock time.
    fn wall_clock(&self) -> NaiveDateTime;
}

/// Monotonic elapsed time plus the local system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Start counting from now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn wall_clock(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock moved by hand, for tests and replays.
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the acquisition loop.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(f64, NaiveDateTime)>>,
}

impl ManualClock {
    /// Start at zero elapsed seconds and the given wall-clock time.
    pub fn new(wall_clock_at_start: NaiveDateTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new((0.0, wall_clock_at_start))),
        }
    }

    /// Jump to `elapsed` seconds after start; the wall clock follows.
    pub fn set(&self, elapsed: f64) {
        let mut guard = self.inner.lock();
        let delta = chrono::Duration::milliseconds(((elapsed - guard.0) * 1000.0).round() as i64);
        guard.0 = elapsed;
        guard.1 += delta;
    }

    /// Move forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let now = self.inner.lock().0;
        self.set(now + seconds);
    }
}

impl Clock for ManualClock {
    fn elapsed_seconds(&self) -> f64 {
        self.inner.lock().0
    }

    fn wall_clock(&self) -> NaiveDateTime {
        self.inner.lock().1
    }
}

/// Session parameters the loop needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// Sensors per record; each contributes a hot and a cold value.
    pub sensor_count: usize,
    /// Sliding window applied to the store after every record.
    pub window_seconds: f64,
    /// Line that ends the readiness handshake.
    pub ready_sentinel: String,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sensor_count: 8,
            window_seconds: 60.0,
            ready_sentinel: DEFAULT_READY_SENTINEL.to_string(),
        }
    }
}

/// Lifecycle of an acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    /// Discarding lines until the device prints its sentinel.
    WaitingForReady,
    /// Parsing, logging and storing every line.
    Streaming,
    /// Terminal. Reached on request or on a failure.
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcquisitionState::WaitingForReady => "waiting for ready",
            AcquisitionState::Streaming => "streaming",
            AcquisitionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Lines handled by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Lines parsed and committed.
    pub accepted: usize,
    /// Lines dropped by the parser.
    pub rejected: usize,
}

/// Published to observers after the handshake, after every tick, and on stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    /// Current lifecycle state.
    pub state: AcquisitionState,
    /// Records accepted since the session started.
    pub records: u64,
    /// Outcome of the most recent tick.
    pub last_tick: TickReport,
    /// Why the session stopped, if it stopped on a failure.
    pub failure: Option<String>,
}

impl SessionStatus {
    fn initial() -> Self {
        Self {
            state: AcquisitionState::WaitingForReady,
            records: 0,
            last_tick: TickReport::default(),
            failure: None,
        }
    }
}

/// Owns the transport and the log; sole writer of the channel store.
pub struct Acquisition<C: Clock = SystemClock> {
    settings: AcquisitionSettings,
    feed: crate::transport::LineFeed,
    store: SharedChannelStore,
    sink: CsvSink,
    clock: C,
    state: AcquisitionState,
    records: u64,
    scratch: Vec<f64>,
    status: watch::Sender<SessionStatus>,
}

impl<C: Clock> Acquisition<C> {
    /// Assemble a session and write the log header.
    pub fn new(
        settings: AcquisitionSettings,
        feed: crate::transport::LineFeed,
        store: SharedChannelStore,
        mut sink: CsvSink,
        clock: C,
    ) -> LoggerResult<Self> {
        let store_sensors = store.read().sensor_count();
        if store_sensors != settings.sensor_count {
            return Err(LoggerError::Configuration(format!(
                "channel store sized for {store_sensors} sensors, session expects {}",
                settings.sensor_count
            )));
        }

        sink.write_header(&channel_columns(settings.sensor_count))?;

        let (status, _) = watch::channel(SessionStatus::initial());
        let scratch = Vec::with_capacity(record_arity(settings.sensor_count));

        Ok(Self {
            settings,
            feed,
            store,
            sink,
            clock,
            state: AcquisitionState::WaitingForReady,
            records: 0,
            scratch,
            status,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Settings the session was opened with.
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Handle for readers (`snapshot`, `latest`).
    pub fn store(&self) -> SharedChannelStore {
        Arc::clone(&self.store)
    }

    /// Records accepted so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Path of the CSV log.
    pub fn log_path(&self) -> &std::path::Path {
        self.sink.path()
    }

    /// Observe status changes, including the failure that stopped the session.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Discard everything up to and including the readiness sentinel.
    ///
    /// Waits as long as the device takes; wrap in `tokio::time::timeout` to
    /// bound it. Returns immediately if already streaming.
    pub async fn wait_for_ready(&mut self) -> LoggerResult<()> {
        match self.state {
            AcquisitionState::Streaming => return Ok(()),
            AcquisitionState::Stopped => return Err(LoggerError::SessionStopped),
            AcquisitionState::WaitingForReady => {}
        }

        info!(sentinel = %self.settings.ready_sentinel, "Waiting for device ready signal");
        loop {
            match self.feed.next_line().await {
                Ok(line) if is_ready_line(&line, &self.settings.ready_sentinel) => {
                    self.state = AcquisitionState::Streaming;
                    info!("Device is ready, streaming");
                    self.publish(TickReport::default(), None);
                    return Ok(());
                }
                Ok(line) => trace!(%line, "Discarding line before ready signal"),
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Process every line already received.
    ///
    /// In `WaitingForReady` nothing is consumed. In `Stopped` this returns
    /// [`LoggerError::SessionStopped`]. A transport or persistence failure
    /// stops the session and is returned; records accepted earlier in the same
    /// tick stay committed.
    pub fn tick(&mut self) -> LoggerResult<TickReport> {
        match self.state {
            AcquisitionState::Stopped => return Err(LoggerError::SessionStopped),
            AcquisitionState::WaitingForReady => return Ok(TickReport::default()),
            AcquisitionState::Streaming => {}
        }

        let mut report = TickReport::default();
        loop {
            let line = match self.feed.try_next_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            };

            if parse_line_into(&line, self.settings.sensor_count, &mut self.scratch).is_err() {
                report.rejected += 1;
                continue;
            }

            if let Err(e) = self.commit() {
                self.fail(&e);
                return Err(e);
            }
            report.accepted += 1;
        }

        self.publish(report, None);
        Ok(report)
    }

    /// Stamp the parsed values in `scratch` and fan them out.
    fn commit(&mut self) -> LoggerResult<()> {
        let values = std::mem::take(&mut self.scratch);
        let record = Record::new(self.clock.elapsed_seconds(), self.clock.wall_clock(), values);

        self.sink.append(&record)?;
        {
            let mut store = self.store.write();
            store.append(record.elapsed, &record.values)?;
            store.trim(self.settings.window_seconds);
        }

        self.records += 1;
        self.scratch = record.values;
        Ok(())
    }

    /// Stop on request. Further ticks return `SessionStopped`.
    pub fn stop(&mut self) {
        if self.state != AcquisitionState::Stopped {
            self.state = AcquisitionState::Stopped;
            info!(records = self.records, "Acquisition stopped");
            self.publish(TickReport::default(), None);
        }
    }

    fn fail(&mut self, err: &LoggerError) {
        if err.is_transport_failure() {
            warn!(error = %err, "Device link lost, stopping acquisition");
        } else {
            error!(error = %err, "Acquisition failed, stopping");
        }
        self.state = AcquisitionState::Stopped;
        self.publish(TickReport::default(), Some(err.to_string()));
    }

    fn publish(&self, last_tick: TickReport, failure: Option<String>) {
        let state = self.state;
        let records = self.records;
        self.status.send_modify(|status| {
            status.state = state;
            status.records = records;
            status.last_tick = last_tick;
            if failure.is_some() {
                status.failure = failure;
            }
        });
    }

    /// Release the device port.
    pub async fn close_transport(&mut self) -> LoggerResult<()> {
        self.feed.close().await
    }

    /// Flush and close the log. Idempotent.
    pub fn close_log(&mut self) -> LoggerResult<()> {
        self.sink.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChannelId, ChannelStore};
    use crate::transport::LineFeed;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tracing_test::traced_test;

    fn start_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    struct Harness {
        host: tokio::io::DuplexStream,
        acquisition: Acquisition<ManualClock>,
        clock: ManualClock,
        dir: TempDir,
    }

    fn harness(sensor_count: usize, window_seconds: f64, capacity: usize) -> Harness {
        let dir = TempDir::new().unwrap();
        let (host, device) = tokio::io::duplex(4096);
        let clock = ManualClock::new(start_time());
        let sink = CsvSink::open(dir.path().join("log.csv")).unwrap();
        let acquisition = Acquisition::new(
            AcquisitionSettings {
                sensor_count,
                window_seconds,
                ready_sentinel: "READY".into(),
            },
            LineFeed::spawn(device),
            ChannelStore::shared(sensor_count, capacity),
            sink,
            clock.clone(),
        )
        .unwrap();
        Harness {
            host,
            acquisition,
            clock,
            dir,
        }
    }

    /// Give the reader task time to forward what was written.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn rejects_mismatched_store() {
        let dir = TempDir::new().unwrap();
        let (_host, device) = tokio::io::duplex(64);
        let result = Acquisition::new(
            AcquisitionSettings {
                sensor_count: 2,
                ..Default::default()
            },
            LineFeed::spawn(device),
            ChannelStore::shared(3, 10),
            CsvSink::open(dir.path().join("log.csv")).unwrap(),
            SystemClock::start(),
        );
        assert!(matches!(result, Err(LoggerError::Configuration(_))));
    }

    #[tokio::test]
    async fn handshake_discards_noise_before_sentinel() {
        let mut h = harness(2, 60.0, 100);
        h.host
            .write_all(b"MCP9600 init\n1,2,3,4\nREADY\n5,6,7,8\n")
            .await
            .unwrap();

        assert_eq!(h.acquisition.state(), AcquisitionState::WaitingForReady);
        h.acquisition.wait_for_ready().await.unwrap();
        assert_eq!(h.acquisition.state(), AcquisitionState::Streaming);

        settle().await;
        let report = h.acquisition.tick().unwrap();
        assert_eq!(report.accepted, 1);
        let store = h.acquisition.store();
        assert_eq!(store.read().latest(ChannelId::hot(0)), Some(5.0));
    }

    #[tokio::test]
    async fn reset_noise_does_not_hide_sentinel_or_data() {
        let mut h = harness(1, 60.0, 100);
        h.host
            .write_all(b"\xf0\xffREADY\n\xfe10.0,20.0\n")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_millis(500), h.acquisition.wait_for_ready())
            .await
            .expect("sentinel behind reset noise should be recognised")
            .unwrap();
        settle().await;

        assert_eq!(h.acquisition.tick().unwrap().accepted, 1);
        let store = h.acquisition.store();
        assert_eq!(store.read().latest(ChannelId::cold(0)), Some(20.0));
    }

    #[tokio::test]
    async fn log_failure_stops_before_store_sees_row() {
        let mut h = harness(1, 60.0, 100);
        let mut status = h.acquisition.subscribe();
        h.host.write_all(b"READY\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();

        h.acquisition.close_log().unwrap();
        h.host.write_all(b"1.0,2.0\n").await.unwrap();
        settle().await;

        let err = h.acquisition.tick().unwrap_err();
        assert!(matches!(err, LoggerError::Persistence(_)));
        assert!(!err.is_transport_failure());
        assert_eq!(h.acquisition.state(), AcquisitionState::Stopped);
        assert_eq!(h.acquisition.records(), 0);
        assert!(h.acquisition.store().read().is_empty());

        status
            .wait_for(|s| s.state == AcquisitionState::Stopped)
            .await
            .unwrap();
        let failure = status.borrow().failure.clone();
        assert!(failure.unwrap().contains("Persistence error"));

        // Closing the transport drops the port; the device side sees it go.
        h.acquisition.close_transport().await.unwrap();
        assert!(h.host.write_all(b"2.0,3.0\n").await.is_err());
    }

    #[tokio::test]
    async fn tick_before_ready_consumes_nothing() {
        let mut h = harness(1, 60.0, 100);
        h.host.write_all(b"1,2\n").await.unwrap();
        settle().await;
        assert_eq!(h.acquisition.tick().unwrap(), TickReport::default());
        assert!(h.acquisition.store().read().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_counted_not_stored() {
        let mut h = harness(2, 60.0, 100);
        h.host
            .write_all(b"READY\n10.0,bad,30.0,40.0\n\nREADY\n1,2,3\n10.0,20.0,30.0,40.0\n")
            .await
            .unwrap();
        h.acquisition.wait_for_ready().await.unwrap();
        settle().await;

        let report = h.acquisition.tick().unwrap();
        assert_eq!(
            report,
            TickReport {
                accepted: 1,
                rejected: 4
            }
        );
        assert_eq!(h.acquisition.records(), 1);
        assert_eq!(h.acquisition.store().read().len(), 1);
    }

    #[tokio::test]
    async fn records_are_stamped_with_clock_time() {
        let mut h = harness(1, 60.0, 100);
        h.host.write_all(b"READY\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();

        h.clock.set(1.2346);
        h.host.write_all(b"20.0,21.0\n").await.unwrap();
        settle().await;
        h.acquisition.tick().unwrap();

        let snapshot = h.acquisition.store().read().snapshot();
        assert_eq!(snapshot.timestamps, vec![1.235]);

        h.acquisition.close_log().unwrap();
        let log = std::fs::read_to_string(h.dir.path().join("log.csv")).unwrap();
        assert!(log.contains("1.235,\"2024-03-09 12:00:01\",20.0,21.0"));
    }

    #[tokio::test]
    async fn window_is_applied_after_each_record() {
        let mut h = harness(1, 10.0, 100);
        h.host.write_all(b"READY\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();

        for t in [0.0, 5.0, 12.0, 30.0] {
            h.clock.set(t);
            h.host.write_all(b"1.0,2.0\n").await.unwrap();
            settle().await;
            h.acquisition.tick().unwrap();
        }

        let store = h.acquisition.store();
        let store = store.read();
        assert_eq!(store.snapshot().timestamps, vec![30.0]);
        assert!(store.time_span() <= 10.0);
    }

    #[tokio::test]
    async fn disconnect_stops_and_reports() {
        let mut h = harness(1, 60.0, 100);
        let mut status = h.acquisition.subscribe();
        h.host.write_all(b"READY\n1,2\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();
        drop(h.host);
        settle().await;

        let err = h.acquisition.tick().unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(h.acquisition.state(), AcquisitionState::Stopped);
        // The record before the disconnect was kept.
        assert_eq!(h.acquisition.records(), 1);

        status.changed().await.unwrap();
        let latest = status.borrow().clone();
        assert_eq!(latest.state, AcquisitionState::Stopped);
        assert!(latest.failure.is_some());

        assert!(matches!(
            h.acquisition.tick(),
            Err(LoggerError::SessionStopped)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn handshake_and_disconnect_are_logged() {
        let mut h = harness(1, 60.0, 100);
        h.host.write_all(b"READY\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();
        drop(h.host);
        settle().await;
        assert!(h.acquisition.tick().is_err());

        assert!(logs_contain("Device is ready"));
        assert!(logs_contain("Device link lost"));
    }

    #[tokio::test]
    async fn disconnect_during_handshake_fails_wait() {
        let mut h = harness(1, 60.0, 100);
        h.host.write_all(b"booting\n").await.unwrap();
        drop(h.host);
        let err = h.acquisition.wait_for_ready().await.unwrap_err();
        assert!(matches!(err, LoggerError::TransportClosed));
        assert_eq!(h.acquisition.state(), AcquisitionState::Stopped);
    }

    #[tokio::test]
    async fn status_tracks_record_count() {
        let mut h = harness(1, 60.0, 100);
        let status = h.acquisition.subscribe();
        h.host.write_all(b"READY\n1,2\n3,4\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();
        settle().await;
        h.acquisition.tick().unwrap();

        let current = status.borrow().clone();
        assert_eq!(current.state, AcquisitionState::Streaming);
        assert_eq!(current.records, 2);
        assert_eq!(current.last_tick.accepted, 2);
        assert!(current.failure.is_none());
    }

    #[tokio::test]
    async fn stop_is_final() {
        let mut h = harness(1, 60.0, 100);
        h.host.write_all(b"READY\n").await.unwrap();
        h.acquisition.wait_for_ready().await.unwrap();
        h.acquisition.stop();
        h.acquisition.stop();
        assert!(matches!(
            h.acquisition.tick(),
            Err(LoggerError::SessionStopped)
        ));
        assert!(matches!(
            h.acquisition.wait_for_ready().await,
            Err(LoggerError::SessionStopped)
        ));
    }

    #[test]
    fn manual_clock_moves_wall_clock_along() {
        let clock = ManualClock::new(start_time());
        clock.advance(61.0);
        assert_eq!(clock.elapsed_seconds(), 61.0);
        assert_eq!(
            clock.wall_clock().format("%H:%M:%S").to_string(),
            "12:01:01"
        );
    }
}
