//! Bounded per-channel time series for the live view.
//!
//! The store keeps one shared timestamp sequence and one value sequence per
//! channel. Every mutation goes through [`ChannelStore::append`] and
//! [`ChannelStore::trim`], which move all sequences in lock-step, so the
//! following always hold:
//!
//! - every channel holds exactly as many samples as there are timestamps
//! - the length never exceeds the hard capacity (oldest records go first)
//! - timestamps are non-decreasing from oldest to newest
//!
//! Capacity and the sliding time window are separate concerns. Capacity is a
//! memory bound enforced on every append. The window is applied by `trim`,
//! which the acquisition loop calls after each appended record.
//!
//! For a frontend on another thread, wrap the store in a
//! [`SharedChannelStore`]. Appends take the write lock for the whole record and
//! readers take the read lock, so a snapshot never contains half a record.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{LoggerError, LoggerResult};
use crate::protocol::record_arity;

/// Default hard capacity per sequence.
pub const DEFAULT_CAPACITY: usize = 20_000;

/// Store shared between the acquisition task and readers.
pub type SharedChannelStore = Arc<RwLock<ChannelStore>>;

/// Which junction of a thermocouple amplifier a channel reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Junction {
    /// Measuring junction at the probe tip.
    Hot,
    /// Reference junction on the amplifier board.
    Cold,
}

impl Junction {
    /// Column/curve prefix used on the wire and in the log header.
    pub fn prefix(self) -> &'static str {
        match self {
            Junction::Hot => "hot",
            Junction::Cold => "cold",
        }
    }
}

/// One logical series: a sensor's hot or cold reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    /// Zero-based sensor index.
    pub sensor: usize,
    /// Hot or cold junction.
    pub junction: Junction,
}

impl ChannelId {
    /// Hot junction of `sensor`.
    pub fn hot(sensor: usize) -> Self {
        Self {
            sensor,
            junction: Junction::Hot,
        }
    }

    /// Cold junction of `sensor`.
    pub fn cold(sensor: usize) -> Self {
        Self {
            sensor,
            junction: Junction::Cold,
        }
    }

    /// Position of this channel's value inside a record.
    pub fn record_index(self) -> usize {
        match self.junction {
            Junction::Hot => self.sensor * 2,
            Junction::Cold => self.sensor * 2 + 1,
        }
    }

    /// Inverse of [`ChannelId::record_index`].
    pub fn from_record_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::hot(index / 2)
        } else {
            Self::cold(index / 2)
        }
    }

    /// `hot{i}` / `cold{i}`.
    pub fn name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.junction.prefix(), self.sensor)
    }
}

/// All channels for `sensor_count` sensors, in record order.
pub fn channel_ids(sensor_count: usize) -> impl Iterator<Item = ChannelId> {
    (0..record_arity(sensor_count)).map(ChannelId::from_record_index)
}

/// A single reading with its elapsed-time stamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since session start.
    pub timestamp: f64,
    /// Reading in degrees Celsius.
    pub value: f64,
}

/// Point-in-time copy of the store contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Elapsed seconds, oldest first.
    pub timestamps: Vec<f64>,
    /// One value per timestamp for every channel.
    pub series: BTreeMap<ChannelId, Vec<f64>>,
}

impl Snapshot {
    /// Number of records captured.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when the store was empty.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Values of one channel, aligned with `timestamps`.
    pub fn values(&self, channel: ChannelId) -> Option<&[f64]> {
        self.series.get(&channel).map(Vec::as_slice)
    }

    /// Pair a channel's values with the shared timestamps.
    pub fn samples(&self, channel: ChannelId) -> impl Iterator<Item = Sample> + '_ {
        let values = self.values(channel).unwrap_or(&[]);
        self.timestamps
            .iter()
            .zip(values)
            .map(|(&timestamp, &value)| Sample { timestamp, value })
    }
}

/// Bounded, time-windowed storage for every channel of one session.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    sensor_count: usize,
    capacity: usize,
    timestamps: VecDeque<f64>,
    /// Indexed by [`ChannelId::record_index`].
    series: Vec<VecDeque<f64>>,
}

impl ChannelStore {
    /// Create an empty store. A zero capacity is raised to one.
    pub fn new(sensor_count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let initial = capacity.min(1024);
        Self {
            sensor_count,
            capacity,
            timestamps: VecDeque::with_capacity(initial),
            series: (0..record_arity(sensor_count))
                .map(|_| VecDeque::with_capacity(initial))
                .collect(),
        }
    }

    /// Wrap a new store for sharing with readers.
    pub fn shared(sensor_count: usize, capacity: usize) -> SharedChannelStore {
        Arc::new(RwLock::new(Self::new(sensor_count, capacity)))
    }

    /// Sensors this store was sized for.
    pub fn sensor_count(&self) -> usize {
        self.sensor_count
    }

    /// Hard bound on records held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when no record is held.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Every channel in record order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> {
        channel_ids(self.sensor_count)
    }

    /// Append one record.
    ///
    /// `values` must hold exactly one value per channel in record order. A
    /// timestamp older than the newest one held is clamped to it so arrival
    /// order stays monotonic even if the clock steps backwards.
    pub fn append(&mut self, elapsed: f64, values: &[f64]) -> LoggerResult<()> {
        let expected = self.series.len();
        if values.len() != expected {
            return Err(LoggerError::ArityMismatch {
                expected,
                found: values.len(),
            });
        }

        let timestamp = match self.timestamps.back() {
            Some(&newest) if elapsed < newest || elapsed.is_nan() => newest,
            _ => elapsed,
        };

        self.timestamps.push_back(timestamp);
        for (series, &value) in self.series.iter_mut().zip(values) {
            series.push_back(value);
        }

        while self.timestamps.len() > self.capacity {
            self.pop_oldest();
        }

        Ok(())
    }

    /// Drop the oldest records until the held span fits in `window_seconds`.
    ///
    /// Returns how many records were dropped.
    pub fn trim(&mut self, window_seconds: f64) -> usize {
        let mut dropped = 0;
        while let (Some(&oldest), Some(&newest)) = (self.timestamps.front(), self.timestamps.back())
        {
            if newest - oldest <= window_seconds {
                break;
            }
            self.pop_oldest();
            dropped += 1;
        }
        dropped
    }

    fn pop_oldest(&mut self) {
        self.timestamps.pop_front();
        for series in &mut self.series {
            series.pop_front();
        }
    }

    /// Most recent value of `channel`, `None` if nothing has arrived yet.
    pub fn latest(&self, channel: ChannelId) -> Option<f64> {
        self.series
            .get(channel.record_index())
            .filter(|_| channel.sensor < self.sensor_count)
            .and_then(|series| series.back().copied())
    }

    /// Timestamp of the newest record.
    pub fn latest_timestamp(&self) -> Option<f64> {
        self.timestamps.back().copied()
    }

    /// Newest minus oldest timestamp; zero when fewer than two records.
    pub fn time_span(&self) -> f64 {
        match (self.timestamps.front(), self.timestamps.back()) {
            (Some(oldest), Some(newest)) => newest - oldest,
            _ => 0.0,
        }
    }

    /// Samples of one channel, oldest first.
    pub fn series(&self, channel: ChannelId) -> Vec<Sample> {
        match self.series.get(channel.record_index()) {
            Some(values) if channel.sensor < self.sensor_count => self
                .timestamps
                .iter()
                .zip(values)
                .map(|(&timestamp, &value)| Sample { timestamp, value })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Copy out all sequences.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            timestamps: self.timestamps.iter().copied().collect(),
            series: self
                .series
                .iter()
                .enumerate()
                .map(|(index, values)| {
                    (
                        ChannelId::from_record_index(index),
                        values.iter().copied().collect(),
                    )
                })
                .collect(),
        }
    }

    /// Drop every record; capacity and sensor count are kept.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        for series in &mut self.series {
            series.clear();
        }
    }
}
