//! Display-side helpers: unit conversion, live readouts, and view state.
//!
//! Everything that reads the store here works on a value pulled at call time
//! (`latest()` or a [`Snapshot`]), so what is shown is consistent with the
//! moment it was read. Stored values are always Celsius; conversion happens on
//! the way out.
//!
//! [`ViewState`] holds the per-session display choices a frontend forwards as
//! plain calls (unit toggle, view mode, axis bounds, curve visibility).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoggerError, LoggerResult};
use crate::store::{channel_ids, ChannelId, ChannelStore, Junction, Sample, Snapshot};

/// Temperature unit used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    /// Degrees Celsius, as the board reports.
    #[default]
    #[serde(rename = "C", alias = "c", alias = "celsius")]
    Celsius,
    /// Degrees Fahrenheit.
    #[serde(rename = "F", alias = "f", alias = "fahrenheit")]
    Fahrenheit,
}

impl TemperatureUnit {
    /// `°C` or `°F`.
    pub fn suffix(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    /// The other unit.
    pub fn toggled(self) -> Self {
        match self {
            TemperatureUnit::Celsius => TemperatureUnit::Fahrenheit,
            TemperatureUnit::Fahrenheit => TemperatureUnit::Celsius,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::Celsius => write!(f, "C"),
            TemperatureUnit::Fahrenheit => write!(f, "F"),
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(LoggerError::Configuration(format!(
                "Invalid temperature unit '{other}'. Must be one of: C, F"
            ))),
        }
    }
}

/// Convert a Celsius reading for display. NaN stays NaN.
pub fn convert(celsius: f64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => celsius,
        TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
    }
}

/// Inverse of [`convert`].
pub fn to_celsius(value: f64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => value,
        TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
    }
}

/// Fixed-width live readout for one sensor. `hot` and `cold` are Celsius.
///
/// ```
/// use thermo_daq::presentation::{format_live_line, TemperatureUnit};
///
/// assert_eq!(
///     format_live_line(0, 100.0, 0.0, TemperatureUnit::Fahrenheit),
///     "Sensor 0:  HOT  212.00 °F   COLD   32.00 °F"
/// );
/// ```
pub fn format_live_line(sensor_index: usize, hot: f64, cold: f64, unit: TemperatureUnit) -> String {
    let suffix = unit.suffix();
    format!(
        "Sensor {sensor_index}:  HOT {:7.2} {suffix}   COLD {:7.2} {suffix}",
        convert(hot, unit),
        convert(cold, unit),
    )
}

/// Readouts for every sensor that has data, from each channel's latest value.
pub fn live_lines(store: &ChannelStore, unit: TemperatureUnit) -> Vec<String> {
    (0..store.sensor_count())
        .filter_map(|sensor| {
            let hot = store.latest(ChannelId::hot(sensor))?;
            let cold = store.latest(ChannelId::cold(sensor))?;
            Some(format_live_line(sensor, hot, cold, unit))
        })
        .collect()
}

/// One channel of a snapshot, converted for display.
pub fn converted_series(snapshot: &Snapshot, channel: ChannelId, unit: TemperatureUnit) -> Vec<f64> {
    snapshot
        .values(channel)
        .map(|values| values.iter().map(|&v| convert(v, unit)).collect())
        .unwrap_or_default()
}

/// How curves are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// All channels on one plot.
    #[default]
    Merged,
    /// One plot per sensor, in two columns.
    #[serde(alias = "split2")]
    Split,
}

/// Manual axis limits. `None` means autoscale on that side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisBounds {
    /// Lower time bound, seconds.
    #[serde(default)]
    pub x_min: Option<f64>,
    /// Upper time bound, seconds.
    #[serde(default)]
    pub x_max: Option<f64>,
    /// Lower temperature bound, display unit.
    #[serde(default)]
    pub y_min: Option<f64>,
    /// Upper temperature bound, display unit.
    #[serde(default)]
    pub y_max: Option<f64>,
}

impl AxisBounds {
    /// Each manual min must be below its max.
    pub fn validate(&self) -> LoggerResult<()> {
        for (axis, min, max) in [("x", self.x_min, self.x_max), ("y", self.y_min, self.y_max)] {
            if let (Some(min), Some(max)) = (min, max) {
                if !(min < max) {
                    return Err(LoggerError::Configuration(format!(
                        "Invalid {axis} axis bounds: min {min} must be below max {max}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// True when no bound is set.
    pub fn is_auto(&self) -> bool {
        *self == AxisBounds::default()
    }
}

/// Sensor placement for [`ViewMode::Split`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLayout {
    /// Sensor indices in the left column.
    pub left: Vec<usize>,
    /// Sensor indices in the right column.
    pub right: Vec<usize>,
}

impl SplitLayout {
    /// First half of the sensors on the left, the rest on the right.
    pub fn halves(sensor_count: usize) -> Self {
        let mid = sensor_count.div_ceil(2);
        Self {
            left: (0..mid).collect(),
            right: (mid..sensor_count).collect(),
        }
    }
}

/// One plot area and the sensors drawn in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotGroup {
    /// Zero-based column.
    pub column: usize,
    /// Zero-based row within the column.
    pub row: usize,
    /// Sensors drawn in this area.
    pub sensors: Vec<usize>,
}

/// Mutable display state for one session.
#[derive(Debug, Clone)]
pub struct ViewState {
    sensor_count: usize,
    unit: TemperatureUnit,
    mode: ViewMode,
    axis: AxisBounds,
    split: SplitLayout,
    sensor_names: Vec<String>,
    hot_label: String,
    cold_label: String,
    /// Indexed by [`ChannelId::record_index`].
    visible: Vec<bool>,
}

impl ViewState {
    /// All channels visible, Celsius, combined view, autoscaled.
    pub fn new(sensor_count: usize) -> Self {
        Self {
            sensor_count,
            unit: TemperatureUnit::default(),
            mode: ViewMode::default(),
            axis: AxisBounds::default(),
            split: SplitLayout::halves(sensor_count),
            sensor_names: (0..sensor_count).map(|i| format!("Sensor {i}")).collect(),
            hot_label: "Hot".to_string(),
            cold_label: "Cold".to_string(),
            visible: vec![true; sensor_count * 2],
        }
    }

    /// Set the display unit.
    pub fn with_unit(mut self, unit: TemperatureUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Set the view mode.
    pub fn with_mode(mut self, mode: ViewMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set manual bounds without validation; see [`ViewState::set_axis`].
    pub fn with_axis(mut self, axis: AxisBounds) -> Self {
        self.axis = axis;
        self
    }

    /// Place sensors for the split view.
    pub fn with_split_layout(mut self, split: SplitLayout) -> Self {
        self.split = split;
        self
    }

    /// Cosmetic names; missing entries fall back to `Sensor {i}`.
    pub fn with_labels(
        mut self,
        sensor_names: &[String],
        hot_label: impl Into<String>,
        cold_label: impl Into<String>,
    ) -> Self {
        for (slot, name) in self.sensor_names.iter_mut().zip(sensor_names) {
            slot.clone_from(name);
        }
        self.hot_label = hot_label.into();
        self.cold_label = cold_label.into();
        self
    }

    /// Current display unit.
    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Switch the display unit. Stored values stay in Celsius.
    pub fn set_unit(&mut self, unit: TemperatureUnit) {
        self.unit = unit;
    }

    /// Current view mode.
    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Switch between combined and split plots.
    pub fn set_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
    }

    /// Current manual bounds.
    pub fn axis(&self) -> AxisBounds {
        self.axis
    }

    /// Replace the manual bounds; rejected bounds leave the old ones in place.
    pub fn set_axis(&mut self, axis: AxisBounds) -> LoggerResult<()> {
        axis.validate()?;
        self.axis = axis;
        Ok(())
    }

    /// Whether `channel` is drawn. Unknown channels are hidden.
    pub fn is_visible(&self, channel: ChannelId) -> bool {
        self.visible
            .get(channel.record_index())
            .copied()
            .unwrap_or(false)
    }

    /// Show or hide one channel. Out-of-range channels are ignored.
    pub fn set_visible(&mut self, channel: ChannelId, visible: bool) {
        if channel.sensor < self.sensor_count {
            self.visible[channel.record_index()] = visible;
        }
    }

    /// Show or hide every hot junction.
    pub fn set_all_hot(&mut self, visible: bool) {
        self.set_all(Junction::Hot, visible);
    }

    /// Show or hide every cold junction.
    pub fn set_all_cold(&mut self, visible: bool) {
        self.set_all(Junction::Cold, visible);
    }

    fn set_all(&mut self, junction: Junction, visible: bool) {
        for channel in channel_ids(self.sensor_count).filter(|c| c.junction == junction) {
            self.visible[channel.record_index()] = visible;
        }
    }

    /// Legend text, e.g. `TC1 Hot`.
    pub fn channel_label(&self, channel: ChannelId) -> String {
        let sensor = self
            .sensor_names
            .get(channel.sensor)
            .cloned()
            .unwrap_or_else(|| format!("Sensor {}", channel.sensor));
        let junction = match channel.junction {
            Junction::Hot => &self.hot_label,
            Junction::Cold => &self.cold_label,
        };
        format!("{sensor} {junction}")
    }

    /// Y axis title, e.g. `Temperature (°C)`.
    pub fn value_axis_label(&self) -> String {
        format!("Temperature ({})", self.unit.suffix())
    }

    /// Plot areas for the current view mode.
    pub fn plot_groups(&self) -> Vec<PlotGroup> {
        match self.mode {
            ViewMode::Merged => vec![PlotGroup {
                column: 0,
                row: 0,
                sensors: (0..self.sensor_count).collect(),
            }],
            ViewMode::Split => [&self.split.left, &self.split.right]
                .into_iter()
                .enumerate()
                .flat_map(|(column, sensors)| {
                    sensors.iter().enumerate().map(move |(row, &sensor)| PlotGroup {
                        column,
                        row,
                        sensors: vec![sensor],
                    })
                })
                .collect(),
        }
    }

    /// Visible channels of a snapshot in the current unit.
    pub fn visible_series(&self, snapshot: &Snapshot) -> Vec<(ChannelId, Vec<Sample>)> {
        channel_ids(self.sensor_count)
            .filter(|&channel| self.is_visible(channel))
            .map(|channel| {
                let samples = snapshot
                    .samples(channel)
                    .map(|s| Sample {
                        timestamp: s.timestamp,
                        value: convert(s.value, self.unit),
                    })
                    .collect();
                (channel, samples)
            })
            .collect()
    }

    /// Readouts for every sensor with data, in the current unit.
    pub fn live_lines(&self, store: &ChannelStore) -> Vec<String> {
        live_lines(store, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn celsius_is_identity() {
        for v in [-40.0, 0.0, 21.5, 1200.0] {
            assert_eq!(convert(v, TemperatureUnit::Celsius), v);
        }
    }

    #[test]
    fn fahrenheit_known_points() {
        assert!((convert(0.0, TemperatureUnit::Fahrenheit) - 32.0).abs() < EPS);
        assert!((convert(100.0, TemperatureUnit::Fahrenheit) - 212.0).abs() < EPS);
        assert!((convert(-40.0, TemperatureUnit::Fahrenheit) + 40.0).abs() < EPS);
    }

    #[test]
    fn fahrenheit_round_trip() {
        for v in [-273.15, -12.5, 0.0, 37.0, 299.99, 1e4] {
            let back = to_celsius(convert(v, TemperatureUnit::Fahrenheit), TemperatureUnit::Fahrenheit);
            assert!((back - v).abs() < 1e-9 * v.abs().max(1.0), "{v} -> {back}");
        }
    }

    #[test]
    fn nan_survives_conversion() {
        assert!(convert(f64::NAN, TemperatureUnit::Fahrenheit).is_nan());
        assert!(format_live_line(0, f64::NAN, 20.0, TemperatureUnit::Celsius).contains("NaN"));
    }

    #[test]
    fn unit_parsing() {
        assert_eq!("C".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Celsius);
        assert_eq!("f".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Fahrenheit);
        assert!("K".parse::<TemperatureUnit>().is_err());
        assert_eq!(TemperatureUnit::Celsius.toggled(), TemperatureUnit::Fahrenheit);
    }

    #[test]
    fn live_line_is_fixed_width() {
        let a = format_live_line(3, 5.0, 21.25, TemperatureUnit::Celsius);
        let b = format_live_line(3, 250.5, 30.0, TemperatureUnit::Celsius);
        assert_eq!(a, "Sensor 3:  HOT    5.00 °C   COLD   21.25 °C");
        assert_eq!(a.chars().count(), b.chars().count());
    }

    #[test]
    fn live_lines_skip_sensors_without_data() {
        let store = ChannelStore::new(2, 10);
        assert!(live_lines(&store, TemperatureUnit::Celsius).is_empty());

        let mut store = store;
        store.append(0.0, &[100.0, 0.0, 50.0, 10.0]).unwrap();
        let lines = live_lines(&store, TemperatureUnit::Fahrenheit);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Sensor 0:  HOT  212.00 °F   COLD   32.00 °F");
    }

    #[test]
    fn converted_series_uses_snapshot() {
        let mut store = ChannelStore::new(1, 10);
        store.append(0.0, &[0.0, 10.0]).unwrap();
        store.append(1.0, &[100.0, 20.0]).unwrap();
        let snap = store.snapshot();
        let hot = converted_series(&snap, ChannelId::hot(0), TemperatureUnit::Fahrenheit);
        assert_eq!(hot, vec![32.0, 212.0]);
        assert!(converted_series(&snap, ChannelId::hot(4), TemperatureUnit::Celsius).is_empty());
    }

    #[test]
    fn visibility_toggles() {
        let mut view = ViewState::new(3);
        view.set_all_hot(false);
        assert!(!view.is_visible(ChannelId::hot(0)));
        assert!(!view.is_visible(ChannelId::hot(2)));
        assert!(view.is_visible(ChannelId::cold(1)));

        view.set_visible(ChannelId::hot(1), true);
        view.set_all_cold(false);
        let visible: Vec<ChannelId> = channel_ids(3).filter(|&c| view.is_visible(c)).collect();
        assert_eq!(visible, vec![ChannelId::hot(1)]);

        // Unknown channels are ignored.
        view.set_visible(ChannelId::hot(9), true);
        assert!(!view.is_visible(ChannelId::hot(9)));
    }

    #[test]
    fn plot_groups_follow_view_mode() {
        let mut view = ViewState::new(8);
        assert_eq!(view.plot_groups().len(), 1);
        assert_eq!(view.plot_groups()[0].sensors.len(), 8);

        view.set_mode(ViewMode::Split);
        let groups = view.plot_groups();
        assert_eq!(groups.len(), 8);
        assert_eq!(
            groups[4],
            PlotGroup {
                column: 1,
                row: 0,
                sensors: vec![4]
            }
        );
    }

    #[test]
    fn odd_sensor_counts_split_left_heavy() {
        let layout = SplitLayout::halves(3);
        assert_eq!(layout.left, vec![0, 1]);
        assert_eq!(layout.right, vec![2]);
    }

    #[test]
    fn axis_bounds_validation() {
        let mut view = ViewState::new(1);
        let good = AxisBounds {
            y_min: Some(0.0),
            y_max: Some(300.0),
            ..Default::default()
        };
        view.set_axis(good).unwrap();
        assert_eq!(view.axis(), good);

        let bad = AxisBounds {
            x_min: Some(10.0),
            x_max: Some(5.0),
            ..Default::default()
        };
        assert!(view.set_axis(bad).is_err());
        assert_eq!(view.axis(), good);
        assert!(AxisBounds::default().is_auto());
    }

    #[test]
    fn labels_use_configured_names() {
        let names = vec!["TC1".to_string(), "TC2".to_string()];
        let view = ViewState::new(3)
            .with_labels(&names, "Hot", "Cold")
            .with_unit(TemperatureUnit::Fahrenheit);
        assert_eq!(view.channel_label(ChannelId::cold(1)), "TC2 Cold");
        assert_eq!(view.channel_label(ChannelId::hot(2)), "Sensor 2 Hot");
        assert_eq!(view.value_axis_label(), "Temperature (°F)");
    }

    #[test]
    fn visible_series_converts_and_filters() {
        let mut store = ChannelStore::new(1, 10);
        store.append(0.0, &[100.0, 0.0]).unwrap();
        let mut view = ViewState::new(1).with_unit(TemperatureUnit::Fahrenheit);
        view.set_all_cold(false);
        let series = view.visible_series(&store.snapshot());
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].0, ChannelId::hot(0));
        assert_eq!(series[0].1[0].value, 212.0);
    }
}
