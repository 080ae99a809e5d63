//! actuator.rs
//! Translates joint angles and normalized wheel speeds into the signals the
//! driver chips expect, and owns the clamping rules.
//!
//! - Servos: angle clamped to [0, 180], mapped linearly onto the configured
//!   16-bit pulse range.
//! - Motors: speed clamped to [-1, 1]; the sign drives two direction lines per
//!   motor and the magnitude becomes a duty cycle in [0, 100] %.
//!
//! Errors from the underlying transaction are returned as-is. Nothing here
//! retries; the scheduler decides what a failure means.

use crate::{
    component_b::controller::{DriveCommand, clamp_unit},
    config::ServoConfig,
    error::PeripheralError,
};

pub const MIN_ANGLE: f64 = 0.0;
pub const MAX_ANGLE: f64 = 180.0;

/// PWM servo controller (PCA9685-style, 16 channels, 16-bit duty).
pub trait ServoBus: Send {
    fn set_pulse(&mut self, channel: u8, pulse: u16) -> Result<(), PeripheralError>;

    /// Deinitializes the bus.
    fn release(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Motor {
    Left,
    Right,
}

impl Motor {
    pub fn channel(self) -> u8 {
        match self {
            Motor::Left => 0,
            Motor::Right => 1,
        }
    }
}

/// Dual H-bridge: two direction lines and one PWM output per motor.
pub trait MotorDriver: Send {
    fn set_direction(&mut self, motor: Motor, forward: bool, backward: bool) -> Result<(), PeripheralError>;

    fn set_duty(&mut self, motor: Motor, percent: f64) -> Result<(), PeripheralError>;

    /// Stops PWM and releases the direction pins.
    fn release(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }
}

/// Direction lines + duty for one motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSignal {
    pub forward: bool,
    pub backward: bool,
    pub duty_percent: f64,
}

impl MotorSignal {
    pub fn from_speed(speed: f64) -> Self {
        let speed = clamp_unit(speed);
        Self {
            forward: speed > 0.0,
            backward: speed < 0.0,
            duty_percent: (speed.abs() * 100.0).clamp(0.0, 100.0),
        }
    }
}

/// Clamp to [0, 180]; NaN maps to 0.
#[inline]
pub fn clamp_angle(angle: f64) -> f64 {
    if angle.is_nan() {
        MIN_ANGLE
    } else {
        angle.clamp(MIN_ANGLE, MAX_ANGLE)
    }
}

/// Linear angle → pulse mapping inside `[min_pulse, max_pulse]`.
pub fn pulse_for_angle(angle: f64, servo: &ServoConfig) -> u16 {
    let angle = clamp_angle(angle);
    let span = f64::from(servo.max_pulse) - f64::from(servo.min_pulse);
    let pulse = f64::from(servo.min_pulse) + span * angle / MAX_ANGLE;
    (pulse.round() as u16).clamp(servo.min_pulse, servo.max_pulse)
}

/// Stateless front for the servo bus and the motor driver.
pub struct Actuators {
    servos: Box<dyn ServoBus>,
    motors: Box<dyn MotorDriver>,
    servo: ServoConfig,
}

impl Actuators {
    pub fn new(servos: Box<dyn ServoBus>, motors: Box<dyn MotorDriver>, servo: ServoConfig) -> Self {
        Self { servos, motors, servo }
    }

    pub fn set_joint_angle(&mut self, channel: u8, angle_degrees: f64) -> Result<(), PeripheralError> {
        let pulse = pulse_for_angle(angle_degrees, &self.servo);
        self.servos.set_pulse(channel, pulse)
    }

    pub fn set_motor_speeds(&mut self, left: f64, right: f64) -> Result<(), PeripheralError> {
        self.write_motor(Motor::Left, MotorSignal::from_speed(left))?;
        self.write_motor(Motor::Right, MotorSignal::from_speed(right))
    }

    pub fn drive(&mut self, command: DriveCommand) -> Result<(), PeripheralError> {
        self.set_motor_speeds(command.left, command.right)
    }

    fn write_motor(&mut self, motor: Motor, signal: MotorSignal) -> Result<(), PeripheralError> {
        self.motors.set_direction(motor, signal.forward, signal.backward)?;
        self.motors.set_duty(motor, signal.duty_percent)
    }

    pub fn release_servo_bus(&mut self) -> Result<(), PeripheralError> {
        self.servos.release()
    }

    pub fn release_motor_pins(&mut self) -> Result<(), PeripheralError> {
        self.motors.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn pulse_endpoints_and_midpoint() {
        let servo = ServoConfig::default();
        assert_eq!(pulse_for_angle(0.0, &servo), servo.min_pulse);
        assert_eq!(pulse_for_angle(180.0, &servo), servo.max_pulse);
        let mid = pulse_for_angle(90.0, &servo);
        assert_eq!(mid, ((f64::from(servo.min_pulse) + f64::from(servo.max_pulse)) / 2.0).round() as u16);
    }

    #[test]
    fn pulse_never_leaves_configured_range() {
        let servo = ServoConfig {
            frequency_hz: 50,
            min_pulse: 1_000,
            max_pulse: 2_000,
        };
        for angle in [-1e9, -1.0, 0.0, 30.0, 179.9, 180.0, 181.0, 1e9, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let p = pulse_for_angle(angle, &servo);
            assert!((1_000..=2_000).contains(&p), "angle {angle} -> {p}");
        }
    }

    #[test]
    fn motor_duty_never_leaves_percent_range() {
        for speed in [-1e6, -1.5, -1.0, -0.25, 0.0, 0.4, 1.0, 7.0, f64::NAN, f64::INFINITY] {
            let s = MotorSignal::from_speed(speed);
            assert!((0.0..=100.0).contains(&s.duty_percent), "speed {speed}");
            assert!(!(s.forward && s.backward));
        }
    }

    #[test]
    fn sign_selects_direction() {
        assert_eq!(
            MotorSignal::from_speed(0.4),
            MotorSignal { forward: true, backward: false, duty_percent: 40.0 }
        );
        assert_eq!(
            MotorSignal::from_speed(-2.0),
            MotorSignal { forward: false, backward: true, duty_percent: 100.0 }
        );
        assert_eq!(
            MotorSignal::from_speed(0.0),
            MotorSignal { forward: false, backward: false, duty_percent: 0.0 }
        );
    }

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl ServoBus for Log {
        fn set_pulse(&mut self, channel: u8, pulse: u16) -> Result<(), PeripheralError> {
            self.0.lock().unwrap().push(format!("servo {channel} {pulse}"));
            Ok(())
        }
    }

    impl MotorDriver for Log {
        fn set_direction(&mut self, motor: Motor, forward: bool, backward: bool) -> Result<(), PeripheralError> {
            self.0.lock().unwrap().push(format!("dir {motor:?} {forward} {backward}"));
            Ok(())
        }

        fn set_duty(&mut self, motor: Motor, percent: f64) -> Result<(), PeripheralError> {
            self.0.lock().unwrap().push(format!("duty {motor:?} {percent}"));
            Ok(())
        }
    }

    #[test]
    fn actuators_write_clamped_signals_in_order() {
        let log = Log::default();
        let servo = ServoConfig::default();
        let mut act = Actuators::new(Box::new(log.clone()), Box::new(log.clone()), servo);

        act.set_joint_angle(4, 250.0).unwrap();
        act.set_motor_speeds(-3.0, 0.5).unwrap();

        let lines = log.0.lock().unwrap().clone();
        assert_eq!(
            lines,
            vec![
                format!("servo 4 {}", servo.max_pulse),
                "dir Left false true".to_string(),
                "duty Left 100".to_string(),
                "dir Right true false".to_string(),
                "duty Right 50".to_string(),
            ]
        );
    }

    struct Broken;

    impl ServoBus for Broken {
        fn set_pulse(&mut self, channel: u8, _: u16) -> Result<(), PeripheralError> {
            Err(PeripheralError::bus("set_pulse", channel, "arbitration lost"))
        }
    }

    #[test]
    fn bus_failure_is_reported_not_retried() {
        let log = Log::default();
        let mut act = Actuators::new(Box::new(Broken), Box::new(log), ServoConfig::default());
        let err = act.set_joint_angle(7, 90.0).unwrap_err();
        assert!(matches!(err, PeripheralError::Bus { channel: 7, .. }));
    }
}
