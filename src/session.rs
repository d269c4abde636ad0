//! Session driver: wires a port to the acquisition loop and runs it on a timer.
//!
//! A session owns one log file and one transport for its whole life:
//!
//! 1. [`Session::open`] sizes the store, opens the log at
//!    `ROOT/YYYY-MM-DD/HH-MM-SS/{experiment}_{N}ch.csv` and writes the header
//! 2. [`Session::run`] performs the readiness handshake and then ticks every
//!    poll interval until the device goes away or shutdown is requested
//! 3. [`Session::shutdown`] stops the loop, releases the port, closes the log

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, info_span, warn, Instrument};

use crate::acquisition::{Acquisition, AcquisitionState, Clock, SessionStatus, SystemClock};
use crate::config::LoggerConfig;
use crate::error::{LoggerError, LoggerResult};
use crate::sink::{session_log_path, CsvSink};
use crate::store::{ChannelStore, SharedChannelStore};
use crate::transport::LineFeed;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Records accepted during the session.
    pub records: u64,
    /// The session's CSV log.
    pub log_path: PathBuf,
    /// State when the summary was taken.
    pub state: AcquisitionState,
}

/// One acquisition session from open to shutdown.
pub struct Session<C: Clock = SystemClock> {
    acquisition: Acquisition<C>,
    poll_interval: Duration,
}

impl Session<SystemClock> {
    /// Open a session on `port`, logging under `storage.root_dir`.
    pub fn open<R>(config: &LoggerConfig, port: R) -> LoggerResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let log_path = session_log_path(
            &config.storage.root_dir,
            &config.storage.experiment,
            config.acquisition.sensor_count,
            Local::now().naive_local(),
        );
        Self::open_at(config, port, log_path, SystemClock::start())
    }
}

impl<C: Clock> Session<C> {
    /// Open a session with an explicit log path and clock.
    pub fn open_at<R>(
        config: &LoggerConfig,
        port: R,
        log_path: impl Into<PathBuf>,
        clock: C,
    ) -> LoggerResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let settings = config.acquisition_settings();
        let store = ChannelStore::shared(settings.sensor_count, config.acquisition.buffer_capacity);
        let sink = CsvSink::open(log_path.into())?
            .with_columns(config.storage.columns)
            .with_fsync(config.storage.fsync);
        info!(path = %sink.path().display(), "Saving logs to");

        let feed = LineFeed::spawn(port);
        let acquisition = Acquisition::new(settings, feed, store, sink, clock)?;

        Ok(Self {
            acquisition,
            poll_interval: config.poll_interval(),
        })
    }

    /// Live store handle for readers.
    pub fn store(&self) -> SharedChannelStore {
        self.acquisition.store()
    }

    /// Status updates after every tick.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.acquisition.subscribe()
    }

    /// Path of the CSV log.
    pub fn log_path(&self) -> &Path {
        self.acquisition.log_path()
    }

    /// Current acquisition state.
    pub fn state(&self) -> AcquisitionState {
        self.acquisition.state()
    }

    /// Handshake, then tick until the loop stops or `shutdown` turns true.
    ///
    /// Lines already received when shutdown is requested are still drained
    /// into the log. A transport or persistence failure ends the run with
    /// that error; call [`Session::shutdown`] either way.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> LoggerResult<SessionSummary> {
        let span = info_span!("session", path = %self.log_path().display());
        self.drive(shutdown).instrument(span).await
    }

    async fn drive(&mut self, mut shutdown: watch::Receiver<bool>) -> LoggerResult<SessionSummary> {
        tokio::select! {
            ready = self.acquisition.wait_for_ready() => ready?,
            _ = shutdown_requested(&mut shutdown) => {
                info!("Shutdown requested before device was ready");
                self.acquisition.stop();
                return Ok(self.summary());
            }
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.acquisition.tick()?;
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown requested");
                    self.acquisition.tick()?;
                    self.acquisition.stop();
                    return Ok(self.summary());
                }
            }
        }
    }

    /// Record count, log path and state so far.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            records: self.acquisition.records(),
            log_path: self.acquisition.log_path().to_path_buf(),
            state: self.acquisition.state(),
        }
    }

    /// Stop acquisition, close the transport, close the log.
    ///
    /// Every step runs even if an earlier one failed. Idempotent.
    pub async fn shutdown(&mut self) -> LoggerResult<()> {
        self.acquisition.stop();
        let transport = self.acquisition.close_transport().await;
        let log = self.acquisition.close_log();

        let result = collect_failures([transport, log]);
        match &result {
            Ok(()) => info!(records = self.acquisition.records(), "Session closed"),
            Err(e) => warn!(error = %e, "Session closed with errors"),
        }
        result
    }
}

/// Resolves once the flag is true; never resolves if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn collect_failures<I>(results: I) -> LoggerResult<()>
where
    I: IntoIterator<Item = LoggerResult<()>>,
{
    let errors: Vec<LoggerError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LoggerError::ShutdownFailed(errors))
    }
}
