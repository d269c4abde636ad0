//! # Thermocouple DAQ Library
//!
//! Acquisition pipeline for a multi-channel thermocouple board that streams
//! comma-separated readings over a serial line. Each sensor contributes a hot
//! junction and a cold junction channel.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Line parser. Turns one device line into `2 * N` values or
//!   rejects it; recognises the readiness sentinel.
//! - **`record`**: `Record`, one accepted line stamped with elapsed and
//!   wall-clock time.
//! - **`store`**: `ChannelStore`, bounded per-channel history with a sliding
//!   time window. Shared with readers through a `parking_lot::RwLock`.
//! - **`sink`**: `CsvSink`, the append-only session log, flushed per record.
//! - **`transport`**: `LineFeed`, a background reader that turns any async byte
//!   stream (serial port, simulator, test pipe) into a non-blocking line queue.
//! - **`acquisition`**: The state machine that drains the feed on each tick and
//!   fans accepted records out to the sink and the store.
//! - **`presentation`**: Unit conversion, live readout lines and the per-session
//!   `ViewState`.
//! - **`session`**: Timer-driven session driver with ordered shutdown.
//! - **`simulator`**: A fake board for running without hardware.
//! - **`config`**: Layered `figment` configuration.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The crate-wide `LoggerError`.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod logging;
pub mod presentation;
pub mod protocol;
pub mod record;
pub mod session;
pub mod simulator;
pub mod sink;
pub mod store;
pub mod transport;
