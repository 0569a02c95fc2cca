//! sensor.rs
//! Sensor gateway contract: thermocouple and analog pressure channels behind one capability trait.
//! - Readings carry a quality tag; open-circuit / over-range / common-mode never raise errors
//! - Only an unreachable or misconfigured device surfaces as `AcqError::Hardware`
//! - `SimulatedGateway` stands in for the DAQ boards; `ScriptedGateway` is the deterministic fake

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{random_bool, random_range};
use serde::Deserialize;

use crate::acquisition::converter::Calibration;
use crate::error::{AcqError, AcqResult};

pub type ChannelId = u8;

/// Thermocouple inputs on the temperature board.
pub const TEMPERATURE_CHANNEL_COUNT: usize = 4;
/// Single-ended analog inputs on the pressure board.
pub const PRESSURE_CHANNEL_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Temperature,
    Pressure,
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Temperature => "Temperature",
            ChannelKind::Pressure => "Pressure",
        }
    }

    /// Column prefix used in persisted headers and on the display (`T1`, `P2`, ...).
    pub fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::Temperature => "T",
            ChannelKind::Pressure => "P",
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            ChannelKind::Temperature => TEMPERATURE_CHANNEL_COUNT,
            ChannelKind::Pressure => PRESSURE_CHANNEL_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum ThermocoupleType {
    J,
    #[default]
    K,
    T,
    E,
    R,
    S,
    B,
    N,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Thermocouple(ThermocoupleType),
    PressureTransducer,
}

impl SensorType {
    pub fn kind(&self) -> ChannelKind {
        match self {
            SensorType::Thermocouple(_) => ChannelKind::Temperature,
            SensorType::PressureTransducer => ChannelKind::Pressure,
        }
    }

    /// Nominal simulated value (°C for thermocouples, volts for transducers).
    pub fn base_value(&self) -> f64 {
        match self {
            SensorType::Thermocouple(_) => 25.0,
            SensorType::PressureTransducer => 1.0,
        }
    }

    pub fn noise_range(&self) -> (f64, f64) {
        match self {
            SensorType::Thermocouple(_) => (-0.2, 0.2),
            SensorType::PressureTransducer => (-0.02, 0.02),
        }
    }

    pub fn name(&self) -> String {
        match self {
            SensorType::Thermocouple(tc) => format!("Thermocouple({:?})", tc),
            SensorType::PressureTransducer => "PressureTransducer".to_string(),
        }
    }
}

/// Quality-tagged value of a single reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quality {
    Ok(f64),
    OpenCircuit,
    OverRange,
    CommonMode,
}

impl Quality {
    /// Sentinels reported by the thermocouple board in place of a temperature.
    pub const OPEN_TC_VALUE: f64 = -9999.0;
    pub const OVERRANGE_TC_VALUE: f64 = -8888.0;
    pub const COMMON_MODE_TC_VALUE: f64 = -7777.0;

    pub fn from_thermocouple(raw: f64) -> Self {
        if raw == Self::OPEN_TC_VALUE {
            Quality::OpenCircuit
        } else if raw == Self::OVERRANGE_TC_VALUE {
            Quality::OverRange
        } else if raw == Self::COMMON_MODE_TC_VALUE {
            Quality::CommonMode
        } else {
            Quality::Ok(raw)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Quality::Ok(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        !matches!(self, Quality::Ok(_))
    }

    /// Textual marker for fault values; `None` for numeric readings.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Quality::Ok(_) => None,
            Quality::OpenCircuit => Some("Open"),
            Quality::OverRange => Some("OverRange"),
            Quality::CommonMode => Some("Common Mode"),
        }
    }

    /// Applies `f` to numeric readings, leaving fault tags untouched.
    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Quality::Ok(v) => Quality::Ok(f(v)),
            fault => fault,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.value(), self.marker()) {
            (Some(v), _) => write!(f, "{}", v),
            (None, Some(m)) => f.write_str(m),
            (None, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub channel: ChannelId,
    pub kind: ChannelKind,
    pub quality: Quality,
}

impl Reading {
    pub fn temperature(channel: ChannelId, quality: Quality) -> Self {
        Self {
            channel,
            kind: ChannelKind::Temperature,
            quality,
        }
    }

    pub fn pressure(channel: ChannelId, quality: Quality) -> Self {
        Self {
            channel,
            kind: ChannelKind::Pressure,
            quality,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.quality.value()
    }

    pub fn is_fault(&self) -> bool {
        self.quality.is_fault()
    }
}

/// Capability interface over the acquisition hardware.
///
/// Implementations are shared between the capture worker and the monitor loop, so every
/// method takes `&self`. `read_pressure` returns the raw transducer voltage; conversion to
/// bar happens in [`read_snapshot`].
pub trait SensorGateway: Send + Sync {
    fn configure_channel(&self, channel: ChannelId, sensor_type: SensorType) -> AcqResult<()>;
    fn read_temperature(&self, channel: ChannelId) -> AcqResult<Reading>;
    fn read_pressure(&self, channel: ChannelId) -> AcqResult<Reading>;
}

/// One reading per configured channel, in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub temperatures: Vec<Reading>,
    pub pressures: Vec<Reading>,
}

/// Reads every temperature channel, then every pressure channel (converted through `calibration`).
/// The snapshot is logical only: channels are read one after another, not simultaneously.
pub fn read_snapshot(
    gateway: &dyn SensorGateway,
    temperature_channels: &[ChannelId],
    pressure_channels: &[ChannelId],
    calibration: &Calibration,
) -> AcqResult<Snapshot> {
    let mut temperatures = Vec::with_capacity(temperature_channels.len());
    for &channel in temperature_channels {
        temperatures.push(gateway.read_temperature(channel)?);
    }

    let mut pressures = Vec::with_capacity(pressure_channels.len());
    for &channel in pressure_channels {
        let raw = gateway.read_pressure(channel)?;
        pressures.push(Reading {
            quality: raw.quality.map(|volts| calibration.apply(volts)),
            ..raw
        });
    }

    Ok(Snapshot {
        temperatures,
        pressures,
    })
}

/// One-time channel setup performed before any acquisition starts.
pub fn configure_all(
    gateway: &dyn SensorGateway,
    temperature_channels: &[ChannelId],
    pressure_channels: &[ChannelId],
    thermocouple: ThermocoupleType,
) -> AcqResult<()> {
    for &channel in temperature_channels {
        gateway.configure_channel(channel, SensorType::Thermocouple(thermocouple))?;
    }
    for &channel in pressure_channels {
        gateway.configure_channel(channel, SensorType::PressureTransducer)?;
    }
    Ok(())
}

fn channel_label(kind: ChannelKind, channel: ChannelId) -> String {
    format!("{} channel {}", kind.name().to_lowercase(), channel)
}

fn check_configured(
    configured: &DashMap<(ChannelKind, ChannelId), SensorType>,
    kind: ChannelKind,
    channel: ChannelId,
) -> AcqResult<SensorType> {
    configured
        .get(&(kind, channel))
        .map(|entry| *entry.value())
        .ok_or_else(|| AcqError::hardware(channel_label(kind, channel), "channel not configured"))
}

fn check_range(kind: ChannelKind, channel: ChannelId) -> AcqResult<()> {
    if (channel as usize) < kind.channel_count() {
        Ok(())
    } else {
        Err(AcqError::hardware(
            channel_label(kind, channel),
            format!("device has only {} channels", kind.channel_count()),
        ))
    }
}

/// Noise-around-nominal stand-in for the DAQ boards.
pub struct SimulatedGateway {
    configured: DashMap<(ChannelKind, ChannelId), SensorType>,
    pressure_volts: f64,
    fault_probability: f64,
}

impl SimulatedGateway {
    pub fn new(pressure_volts: f64, fault_probability: f64) -> Self {
        Self {
            configured: DashMap::new(),
            pressure_volts,
            fault_probability: fault_probability.clamp(0.0, 1.0),
        }
    }

    fn noisy(base: f64, (lo, hi): (f64, f64)) -> f64 {
        if lo < hi { base + random_range(lo..hi) } else { base }
    }
}

impl SensorGateway for SimulatedGateway {
    fn configure_channel(&self, channel: ChannelId, sensor_type: SensorType) -> AcqResult<()> {
        check_range(sensor_type.kind(), channel)?;
        self.configured.insert((sensor_type.kind(), channel), sensor_type);
        Ok(())
    }

    fn read_temperature(&self, channel: ChannelId) -> AcqResult<Reading> {
        let sensor_type = check_configured(&self.configured, ChannelKind::Temperature, channel)?;

        let raw = if self.fault_probability > 0.0 && random_bool(self.fault_probability) {
            match random_range(0..3u8) {
                0 => Quality::OPEN_TC_VALUE,
                1 => Quality::OVERRANGE_TC_VALUE,
                _ => Quality::COMMON_MODE_TC_VALUE,
            }
        } else {
            Self::noisy(sensor_type.base_value(), sensor_type.noise_range())
        };

        Ok(Reading::temperature(channel, Quality::from_thermocouple(raw)))
    }

    fn read_pressure(&self, channel: ChannelId) -> AcqResult<Reading> {
        let sensor_type = check_configured(&self.configured, ChannelKind::Pressure, channel)?;
        let volts = Self::noisy(self.pressure_volts, sensor_type.noise_range());
        Ok(Reading::pressure(channel, Quality::Ok(volts)))
    }
}

/// Deterministic gateway for tests and benches.
///
/// Each channel replays its scripted values in order and then keeps repeating the last one.
/// Unscripted channels read 20 °C / 1 V. `fail_after(n)` makes every read after the first
/// `n` return a hardware error.
pub struct ScriptedGateway {
    configured: DashMap<(ChannelKind, ChannelId), SensorType>,
    scripts: Mutex<HashMap<(ChannelKind, ChannelId), VecDeque<Quality>>>,
    reads: AtomicU64,
    fail_after: u64,
    read_delay: Duration,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    pub const DEFAULT_TEMPERATURE: f64 = 20.0;
    pub const DEFAULT_PRESSURE_VOLTS: f64 = 1.0;

    pub fn new() -> Self {
        Self {
            configured: DashMap::new(),
            scripts: Mutex::new(HashMap::new()),
            reads: AtomicU64::new(0),
            fail_after: u64::MAX,
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_temperature(self, channel: ChannelId, values: impl IntoIterator<Item = Quality>) -> Self {
        self.scripts
            .lock()
            .insert((ChannelKind::Temperature, channel), values.into_iter().collect());
        self
    }

    /// Values are raw transducer volts (faults allowed).
    pub fn with_pressure(self, channel: ChannelId, values: impl IntoIterator<Item = Quality>) -> Self {
        self.scripts
            .lock()
            .insert((ChannelKind::Pressure, channel), values.into_iter().collect());
        self
    }

    pub fn fail_after(mut self, reads: u64) -> Self {
        self.fail_after = reads;
        self
    }

    /// Per-read delay, used to widen race windows in concurrency tests.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn next(&self, kind: ChannelKind, channel: ChannelId) -> AcqResult<Quality> {
        check_configured(&self.configured, kind, channel)?;

        let n = self.reads.fetch_add(1, Ordering::Relaxed);
        if n >= self.fail_after {
            return Err(AcqError::hardware(channel_label(kind, channel), "device not responding"));
        }
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }

        let mut scripts = self.scripts.lock();
        let value = match scripts.get_mut(&(kind, channel)) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().copied(),
            None => None,
        };
        Ok(value.unwrap_or(match kind {
            ChannelKind::Temperature => Quality::Ok(Self::DEFAULT_TEMPERATURE),
            ChannelKind::Pressure => Quality::Ok(Self::DEFAULT_PRESSURE_VOLTS),
        }))
    }
}

impl SensorGateway for ScriptedGateway {
    fn configure_channel(&self, channel: ChannelId, sensor_type: SensorType) -> AcqResult<()> {
        check_range(sensor_type.kind(), channel)?;
        self.configured.insert((sensor_type.kind(), channel), sensor_type);
        Ok(())
    }

    fn read_temperature(&self, channel: ChannelId) -> AcqResult<Reading> {
        Ok(Reading::temperature(channel, self.next(ChannelKind::Temperature, channel)?))
    }

    fn read_pressure(&self, channel: ChannelId) -> AcqResult<Reading> {
        Ok(Reading::pressure(channel, self.next(ChannelKind::Pressure, channel)?))
    }
}
