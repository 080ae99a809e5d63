//! Control-loop configuration.
//!
//! Every tunable the loop uses lives here as a named default. A JSON file can
//! override any subset of them (`#[serde(default)]` everywhere), so gains and
//! cadence can be retuned without recompiling.
//!
//! ```json
//! { "pid": { "kp": 35.0, "ki": 0.5, "kd": 0.4 }, "tick_period_ms": 20 }
//! ```

use std::{collections::HashSet, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_KP: f64 = 40.0;
pub const DEFAULT_KI: f64 = 0.0;
pub const DEFAULT_KD: f64 = 0.5;

pub const DEFAULT_TICK_PERIOD_MS: u64 = 20;
pub const DEFAULT_SETTLE_MS: u64 = 500;

pub const OPEN_ANGLE: f64 = 30.0;
pub const CLOSED_ANGLE: f64 = 70.0;

/// Servo PWM frequency; 50 Hz gives a 20 ms frame.
pub const DEFAULT_SERVO_FREQUENCY_HZ: u32 = 50;
/// 16-bit duty for a 0.5 ms pulse at 50 Hz (0°).
pub const DEFAULT_MIN_PULSE: u16 = 1_638;
/// 16-bit duty for a 2.5 ms pulse at 50 Hz (180°).
pub const DEFAULT_MAX_PULSE: u16 = 8_191;

/// Accelerometer value (in g) to degrees; small-angle proxy.
pub const DEFAULT_TILT_SCALE: f64 = 90.0;

pub const SERVO_CHANNELS: usize = 12;

/// Shoulders, elbow and wrist held here; thumb and mitten start open.
pub const DEFAULT_INITIAL_POSE: [f64; SERVO_CHANNELS] = [
    // left: shoulder pitch, shoulder roll, elbow, wrist, thumb, mitten
    90.0, 20.0, 90.0, 90.0, OPEN_ANGLE, OPEN_ANGLE,
    // right
    90.0, 160.0, 90.0, 90.0, OPEN_ANGLE, OPEN_ANGLE,
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub frequency_hz: u32,
    pub min_pulse: u16,
    pub max_pulse: u16,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_SERVO_FREQUENCY_HZ,
            min_pulse: DEFAULT_MIN_PULSE,
            max_pulse: DEFAULT_MAX_PULSE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperAngles {
    pub open: f64,
    pub closed: f64,
}

impl Default for GripperAngles {
    fn default() -> Self {
        Self {
            open: OPEN_ANGLE,
            closed: CLOSED_ANGLE,
        }
    }
}

/// Servo channels of one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmChannels {
    pub shoulder_pitch: u8,
    pub shoulder_roll: u8,
    pub elbow: u8,
    pub wrist: u8,
    pub thumb: u8,
    pub mitten: u8,
}

impl ArmChannels {
    const fn starting_at(base: u8) -> Self {
        Self {
            shoulder_pitch: base,
            shoulder_roll: base + 1,
            elbow: base + 2,
            wrist: base + 3,
            thumb: base + 4,
            mitten: base + 5,
        }
    }

    pub fn all(&self) -> [u8; 6] {
        [
            self.shoulder_pitch,
            self.shoulder_roll,
            self.elbow,
            self.wrist,
            self.thumb,
            self.mitten,
        ]
    }
}

/// Servo and digital-input channel assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub left_arm: ArmChannels,
    pub right_arm: ArmChannels,
    pub left_palm: u8,
    pub right_palm: u8,
    pub body: [u8; 4],
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            left_arm: ArmChannels::starting_at(0),
            right_arm: ArmChannels::starting_at(6),
            left_palm: 0,
            right_palm: 1,
            body: [2, 3, 4, 5],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TiltAxis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub pid: PidGains,
    pub tick_period_ms: u64,
    pub settle_ms: u64,
    pub gripper: GripperAngles,
    pub servo: ServoConfig,
    pub channels: ChannelMap,
    /// Indexed by servo channel.
    pub initial_pose: [f64; SERVO_CHANNELS],
    pub tilt_axis: TiltAxis,
    pub tilt_scale: f64,
    /// Consecutive ticks a palm reading must hold before the gripper follows.
    /// 0 disables filtering.
    pub debounce_ticks: u32,
    /// Subtract tick work time from the sleep instead of sleeping a full period.
    pub compensate_drift: bool,
    pub telemetry: bool,
    /// Core to pin the control thread to, if any.
    pub pin_core: Option<usize>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pid: PidGains::default(),
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            gripper: GripperAngles::default(),
            servo: ServoConfig::default(),
            channels: ChannelMap::default(),
            initial_pose: DEFAULT_INITIAL_POSE,
            tilt_axis: TiltAxis::Y,
            tilt_scale: DEFAULT_TILT_SCALE,
            debounce_ticks: 0,
            compensate_drift: false,
            telemetry: true,
            pin_core: None,
        }
    }
}

impl ControlConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let PidGains { kp, ki, kd } = self.pid;
        if ![kp, ki, kd].iter().all(|g| g.is_finite()) {
            return Err(ConfigError::invalid("PID gains must be finite"));
        }
        if self.tick_period_ms == 0 {
            return Err(ConfigError::invalid("tick_period_ms must be positive"));
        }
        if self.servo.min_pulse >= self.servo.max_pulse {
            return Err(ConfigError::invalid(format!(
                "servo pulse range inverted: {}..{}",
                self.servo.min_pulse, self.servo.max_pulse
            )));
        }
        if self.servo.frequency_hz == 0 {
            return Err(ConfigError::invalid("servo frequency must be positive"));
        }
        if !self.tilt_scale.is_finite() {
            return Err(ConfigError::invalid("tilt_scale must be finite"));
        }

        let angles = [self.gripper.open, self.gripper.closed];
        if let Some(a) = angles
            .iter()
            .chain(self.initial_pose.iter())
            .find(|a| !(0.0..=180.0).contains(*a))
        {
            return Err(ConfigError::invalid(format!("joint angle {a} outside 0..=180")));
        }

        let mut seen = HashSet::new();
        for ch in self
            .channels
            .left_arm
            .all()
            .into_iter()
            .chain(self.channels.right_arm.all())
        {
            if usize::from(ch) >= SERVO_CHANNELS {
                return Err(ConfigError::invalid(format!("servo channel {ch} out of range")));
            }
            if !seen.insert(ch) {
                return Err(ConfigError::invalid(format!("servo channel {ch} assigned twice")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ControlConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: ControlConfig =
            serde_json::from_str(r#"{ "pid": { "ki": 1.5 }, "tick_period_ms": 10 }"#).unwrap();
        assert_eq!(config.pid.kp, DEFAULT_KP);
        assert_eq!(config.pid.ki, 1.5);
        assert_eq!(config.tick_period(), Duration::from_millis(10));
        assert_eq!(config.gripper.closed, CLOSED_ANGLE);
    }

    #[test]
    fn rejects_duplicate_servo_channel() {
        let mut config = ControlConfig::default();
        config.channels.right_arm.thumb = config.channels.left_arm.thumb;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_tick_period_and_inverted_pulses() {
        let mut config = ControlConfig::default();
        config.tick_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ControlConfig::default();
        config.servo.min_pulse = config.servo.max_pulse;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_pose() {
        let mut config = ControlConfig::default();
        config.initial_pose[3] = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ControlConfig::load_or_default("does/not/exist.json").unwrap();
        assert_eq!(config, ControlConfig::default());
    }
}
