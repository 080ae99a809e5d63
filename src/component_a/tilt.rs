//! tilt.rs
//! Single-axis pitch estimate from a raw accelerometer sample.
//!
//! The estimate treats one lateral axis as a tilt proxy: pitch = axis × scale
//! (scale 90 maps ±1 g to ±90°). It is only valid for small angles and low
//! dynamics; there is no gyro integration and no complementary or Kalman
//! fusion. That is a known accuracy limit of this estimator.

use crate::{
    config::{ControlConfig, DEFAULT_TILT_SCALE, TiltAxis},
    error::PeripheralError,
};

/// Raw 3-axis acceleration in g.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TiltSample {
    pub pitch_degrees: f64,
}

/// Inertial sensor collaborator (accelerometer over I2C or similar).
pub trait InertialSensor: Send {
    fn read_acceleration(&mut self) -> Result<Acceleration, PeripheralError>;

    fn release(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TiltEstimator {
    axis: TiltAxis,
    scale: f64,
}

impl Default for TiltEstimator {
    fn default() -> Self {
        Self::new(TiltAxis::Y, DEFAULT_TILT_SCALE)
    }
}

impl TiltEstimator {
    pub fn new(axis: TiltAxis, scale: f64) -> Self {
        Self { axis, scale }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(config.tilt_axis, config.tilt_scale)
    }

    /// Pitch in degrees. A non-finite axis reading yields 0°.
    pub fn estimate_pitch(&self, accel: Acceleration) -> TiltSample {
        let raw = match self.axis {
            TiltAxis::X => accel.x,
            TiltAxis::Y => accel.y,
            TiltAxis::Z => accel.z,
        };
        let pitch = raw * self.scale;
        TiltSample {
            pitch_degrees: if pitch.is_finite() { pitch } else { 0.0 },
        }
    }

    /// Reads the sensor and estimates in one step.
    pub fn sample(&self, sensor: &mut dyn InertialSensor) -> Result<TiltSample, PeripheralError> {
        let accel = sensor.read_acceleration()?;
        Ok(self.estimate_pitch(accel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lateral_axis_scaled_by_ninety() {
        let est = TiltEstimator::default();
        let s = est.estimate_pitch(Acceleration { x: 0.3, y: 0.1, z: 0.95 });
        assert!((s.pitch_degrees - 9.0).abs() < 1e-9);
    }

    #[test]
    fn axis_is_selectable() {
        let est = TiltEstimator::new(TiltAxis::X, 90.0);
        let s = est.estimate_pitch(Acceleration { x: -0.5, y: 0.1, z: 0.0 });
        assert_eq!(s.pitch_degrees, -45.0);
    }

    #[test]
    fn non_finite_reading_is_level() {
        let est = TiltEstimator::default();
        let s = est.estimate_pitch(Acceleration { x: 0.0, y: f64::NAN, z: 1.0 });
        assert_eq!(s.pitch_degrees, 0.0);
    }

    struct FailingImu;

    impl InertialSensor for FailingImu {
        fn read_acceleration(&mut self) -> Result<Acceleration, PeripheralError> {
            Err(PeripheralError::bus("read_acceleration", 0, "nack"))
        }
    }

    #[test]
    fn sensor_failure_propagates() {
        let est = TiltEstimator::default();
        assert!(est.sample(&mut FailingImu).is_err());
    }
}
