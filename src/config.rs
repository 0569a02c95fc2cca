//! Rig configuration: acquisition cadence, channels, interlock threshold, calibration, output.
//!
//! Loaded from TOML (see `config/rig.toml`); every field has a documented default.
//! `validate()` runs before any hardware is touched: a configuration error means the
//! acquisition never begins.

use std::{collections::HashSet, fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::acquisition::{
    converter::Calibration,
    sensor::{ChannelId, ChannelKind, ThermocoupleType},
};
use crate::error::{AcqError, AcqResult};

/// Thermocouple conversion time bounds the temperature sampling rate (datasheet: 1 Hz or slower).
pub const MAX_TEMPERATURE_RATE_HZ: f64 = 1.0;

pub const DEFAULT_PRESSURE_THRESHOLD_BAR: f64 = 130.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// One row per rising edge of the external trigger.
    Triggered,
    /// `sample_count` rows paced at `acquisition_frequency_hz`.
    FreeRunning,
}

impl AcquisitionMode {
    pub fn name(&self) -> &'static str {
        match self {
            AcquisitionMode::Triggered => "triggered",
            AcquisitionMode::FreeRunning => "free-running",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Period of the simulated trigger source.
    pub trigger_period_ms: u64,
    /// Nominal transducer output; 2.6 V is the 130 bar trip point at the default calibration.
    pub pressure_volts: f64,
    /// Chance that a thermocouple read reports a fault sentinel.
    pub fault_probability: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            trigger_period_ms: 1_000,
            pressure_volts: 1.0,
            fault_probability: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub acquisition_frequency_hz: f64,
    pub mode: AcquisitionMode,
    pub sample_count: u64,
    pub pressure_threshold: f64,
    pub temperature_channels: Vec<ChannelId>,
    pub pressure_channels: Vec<ChannelId>,
    pub thermocouple_type: ThermocoupleType,
    pub calibration: Calibration,
    pub monitor_interval_ms: u64,
    pub hot_wall_temperature: f64,
    pub output_path: PathBuf,
    pub capture_core: Option<usize>,
    pub simulation: SimulationSettings,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            acquisition_frequency_hz: 1.0,
            mode: AcquisitionMode::Triggered,
            sample_count: 10,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD_BAR,
            temperature_channels: vec![0, 1],
            pressure_channels: vec![0, 1],
            thermocouple_type: ThermocoupleType::K,
            calibration: Calibration::default(),
            monitor_interval_ms: 500,
            hot_wall_temperature: 50.0,
            output_path: PathBuf::from("data/tp_acquisition.csv"),
            capture_core: None,
            simulation: SimulationSettings::default(),
        }
    }
}

impl RigConfig {
    pub fn from_toml_str(s: &str) -> AcqResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> AcqResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> AcqResult<()> {
        let f = self.acquisition_frequency_hz;
        if !f.is_finite() || f <= 0.0 {
            return Err(AcqError::configuration(
                "acquisition_frequency_hz",
                format!("must be a positive number, got {}", f),
            ));
        }
        self.sample_period()?;
        if !self.temperature_channels.is_empty() && f > MAX_TEMPERATURE_RATE_HZ {
            return Err(AcqError::configuration(
                "acquisition_frequency_hz",
                format!(
                    "{} Hz exceeds the thermocouple maximum of {} Hz",
                    f, MAX_TEMPERATURE_RATE_HZ
                ),
            ));
        }

        if self.temperature_channels.is_empty() && self.pressure_channels.is_empty() {
            return Err(AcqError::configuration(
                "temperature_channels",
                "no temperature or pressure channels enabled",
            ));
        }
        validate_channels(
            "temperature_channels",
            ChannelKind::Temperature,
            &self.temperature_channels,
        )?;
        validate_channels(
            "pressure_channels",
            ChannelKind::Pressure,
            &self.pressure_channels,
        )?;

        if !self.pressure_threshold.is_finite() {
            return Err(AcqError::configuration(
                "pressure_threshold",
                format!("must be finite, got {}", self.pressure_threshold),
            ));
        }
        if !self.calibration.is_finite() {
            return Err(AcqError::configuration(
                "calibration",
                format!(
                    "slope and offset must be finite, got slope={} offset={}",
                    self.calibration.slope, self.calibration.offset
                ),
            ));
        }
        if self.monitor_interval_ms == 0 {
            return Err(AcqError::configuration("monitor_interval_ms", "must be at least 1 ms"));
        }
        if self.mode == AcquisitionMode::FreeRunning && self.sample_count == 0 {
            return Err(AcqError::configuration(
                "sample_count",
                "free-running mode needs at least one sample",
            ));
        }
        Ok(())
    }

    /// Period between free-running rows. Fails when the period does not fit a `Duration`.
    pub fn sample_period(&self) -> AcqResult<Duration> {
        Duration::try_from_secs_f64(1.0 / self.acquisition_frequency_hz).map_err(|_| {
            AcqError::configuration(
                "acquisition_frequency_hz",
                format!(
                    "{} Hz gives a sample period too long to schedule",
                    self.acquisition_frequency_hz
                ),
            )
        })
    }
}

fn validate_channels(param: &'static str, kind: ChannelKind, channels: &[ChannelId]) -> AcqResult<()> {
    let mut seen = HashSet::new();
    for &channel in channels {
        if channel as usize >= kind.channel_count() {
            return Err(AcqError::configuration(
                param,
                format!(
                    "channel {} out of range (device has {} channels)",
                    channel,
                    kind.channel_count()
                ),
            ));
        }
        if !seen.insert(channel) {
            return Err(AcqError::configuration(param, format!("channel {} listed twice", channel)));
        }
    }
    Ok(())
}
