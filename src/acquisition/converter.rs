//! converter.rs
//! Linear voltage → engineering unit conversion for analog pressure transducers.
//!
//! The coefficients come from a per-deployment calibration step; the default maps the
//! 0–5 V transducer output to bar with 50 bar/V and no offset.

use serde::Deserialize;

pub const DEFAULT_SLOPE: f64 = 50.0;
pub const DEFAULT_OFFSET: f64 = 0.0;

/// `value = raw_voltage * slope + offset`
#[inline]
pub fn to_engineering_unit(raw_voltage: f64, slope: f64, offset: f64) -> f64 {
    raw_voltage * slope + offset
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub slope: f64,
    pub offset: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: DEFAULT_SLOPE,
            offset: DEFAULT_OFFSET,
        }
    }
}

impl Calibration {
    pub fn new(slope: f64, offset: f64) -> Self {
        Self { slope, offset }
    }

    #[inline]
    pub fn apply(&self, raw_voltage: f64) -> f64 {
        to_engineering_unit(raw_voltage, self.slope, self.offset)
    }

    pub fn is_finite(&self) -> bool {
        self.slope.is_finite() && self.offset.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_volts_is_zero_bar() {
        assert_eq!(to_engineering_unit(0.0, 50.0, 0.0), 0.0);
    }

    #[test]
    fn default_slope_maps_2_6_volts_to_130_bar() {
        let bar = to_engineering_unit(2.6, 50.0, 0.0);
        assert!((bar - 130.0).abs() < 1e-9);
        assert!((Calibration::default().apply(2.6) - 130.0).abs() < 1e-9);
    }

    #[test]
    fn offset_shifts_result() {
        let cal = Calibration::new(10.0, -1.5);
        assert!((cal.apply(1.0) - 8.5).abs() < 1e-12);
    }
}
