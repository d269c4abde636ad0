//! Simulated thermocouple board for running without hardware.
//!
//! Speaks the same line protocol as the real device: a readiness sentinel,
//! then one CSV line of `hot,cold` pairs per interval. Hot junctions read
//! 20–300 °C, cold junctions 20–40 °C, both with two decimals.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use thermo_daq::simulator::SimulatedDevice;
//! use thermo_daq::transport::LineFeed;
//!
//! # async fn demo() {
//! let (port, _device) = SimulatedDevice::new(8, Duration::from_secs(1)).spawn();
//! let mut feed = LineFeed::spawn(port);
//! # }
//! ```

use std::fmt::Write as _;
use std::ops::Range;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::DEFAULT_READY_SENTINEL;

/// Hot junction range, °C.
pub const HOT_RANGE: Range<f64> = 20.0..300.0;
/// Cold junction range, °C.
pub const COLD_RANGE: Range<f64> = 20.0..40.0;

const PIPE_CAPACITY: usize = 8 * 1024;

/// Generates device lines with random temperatures.
#[derive(Debug)]
pub struct SimulatedDevice {
    sensor_count: usize,
    interval: Duration,
    sentinel: String,
    rng: StdRng,
}

impl SimulatedDevice {
    /// A board with `sensor_count` sensors printing one line per `interval`.
    pub fn new(sensor_count: usize, interval: Duration) -> Self {
        Self {
            sensor_count,
            interval,
            sentinel: DEFAULT_READY_SENTINEL.to_string(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Replace the readiness line printed first.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    /// Next data line, without the newline.
    pub fn generate_line(&mut self) -> String {
        let mut line = String::with_capacity(self.sensor_count * 14);
        for sensor in 0..self.sensor_count {
            if sensor > 0 {
                line.push(',');
            }
            let hot = self.rng.gen_range(HOT_RANGE);
            let cold = self.rng.gen_range(COLD_RANGE);
            let _ = write!(line, "{hot:.2},{cold:.2}");
        }
        line
    }

    /// Run the device on a task; the returned stream is its port.
    ///
    /// The device announces readiness immediately, then writes one line per
    /// interval until the port is dropped.
    pub fn spawn(mut self) -> (DuplexStream, JoinHandle<()>) {
        let (host, mut device) = tokio::io::duplex(PIPE_CAPACITY);

        let handle = tokio::spawn(async move {
            let ready = format!("{}\n", self.sentinel);
            if device.write_all(ready.as_bytes()).await.is_err() {
                return;
            }
            debug!(sensors = self.sensor_count, "Simulated device ready");

            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut line = self.generate_line();
                line.push('\n');
                if device.write_all(line.as_bytes()).await.is_err() {
                    debug!("Simulated device port closed");
                    return;
                }
            }
        });

        (host, handle)
    }
}
