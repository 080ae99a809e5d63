//! controller.rs
//! Balance controller: PID on pitch error, symmetric wheel drive.
//!
//! error = 0 - angle, integral += error*dt, derivative = (error - prev)/dt,
//! output = Kp*e + Ki*I + Kd*D clamped to [-1, 1]. The same output drives
//! both wheels; heading is not controlled.
//!
//! A non-positive or non-finite timestep (clock anomaly) skips the update and
//! returns the previous output, so the derivative never divides by zero.

use crate::config::PidGains;

/// Upright.
pub const SETPOINT_DEGREES: f64 = 0.0;

/// PID memory carried between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
    pub previous_error: f64,
    pub integral: f64,
}

/// Normalized wheel speeds, each in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
}

impl DriveCommand {
    /// Same speed on both wheels, clamped.
    pub fn symmetric(output: f64) -> Self {
        let speed = clamp_unit(output);
        Self {
            left: speed,
            right: speed,
        }
    }
}

/// Clamp to [-1, 1]; NaN maps to 0.
#[inline]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// One PID step on an explicit state. Returns the next state and the
/// unclamped output. `dt` must be positive.
pub fn pid_step(gains: &PidGains, state: ControllerState, error: f64, dt: f64) -> (ControllerState, f64) {
    let integral = state.integral + error * dt;
    let derivative = (error - state.previous_error) / dt;
    let output = gains.kp * error + gains.ki * integral + gains.kd * derivative;
    (
        ControllerState {
            previous_error: error,
            integral,
        },
        output,
    )
}

#[derive(Debug, Clone)]
pub struct BalanceController {
    gains: PidGains,
    state: ControllerState,
    last_output: f64,
    skipped: u64,
}

impl BalanceController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            state: ControllerState::default(),
            last_output: 0.0,
            skipped: 0,
        }
    }

    /// Starts from a given state, e.g. to replay a logged run.
    pub fn with_state(gains: PidGains, state: ControllerState) -> Self {
        Self {
            state,
            ..Self::new(gains)
        }
    }

    /// Advance one tick. Returns the clamped output in [-1, 1].
    pub fn update(&mut self, current_angle: f64, elapsed_seconds: f64) -> f64 {
        if !(elapsed_seconds > 0.0 && elapsed_seconds.is_finite()) || !current_angle.is_finite() {
            self.skipped += 1;
            return self.last_output;
        }

        let error = SETPOINT_DEGREES - current_angle;
        let (next, raw) = pid_step(&self.gains, self.state, error, elapsed_seconds);
        if !raw.is_finite() {
            // Overflow from extreme gains or a tiny dt: keep the old state.
            self.skipped += 1;
            return self.last_output;
        }

        self.state = next;
        self.last_output = clamp_unit(raw);
        self.last_output
    }

    #[inline]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[inline]
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    #[inline]
    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Ticks whose update was skipped because of a timing anomaly.
    #[inline]
    pub fn skipped_updates(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains { kp, ki, kd }
    }

    #[test]
    fn large_tilt_saturates_negative() {
        let mut pid = BalanceController::new(gains(40.0, 0.0, 0.5));
        // e = -10, d = -500, out = -400 - 250 = -650
        let (_, raw) = pid_step(&pid.gains(), ControllerState::default(), -10.0, 0.02);
        assert!((raw + 650.0).abs() < 1e-9);

        let out = pid.update(10.0, 0.02);
        assert_eq!(out, -1.0);
        assert_eq!(DriveCommand::symmetric(out), DriveCommand { left: -1.0, right: -1.0 });
        assert_eq!(pid.state().previous_error, -10.0);
    }

    #[test]
    fn zero_dt_holds_previous_output() {
        let mut pid = BalanceController::new(gains(0.02, 0.1, 0.001));
        let first = pid.update(5.0, 0.02);
        let state = pid.state();

        let held = pid.update(-30.0, 0.0);
        assert_eq!(held, first);
        assert_eq!(pid.state(), state);
        assert!(held.is_finite());

        assert_eq!(pid.update(3.0, -0.01), first);
        assert_eq!(pid.update(3.0, f64::NAN), first);
        assert_eq!(pid.skipped_updates(), 3);
    }

    #[test]
    fn zero_dt_on_first_tick_returns_zero() {
        let mut pid = BalanceController::new(PidGains::default());
        assert_eq!(pid.update(12.0, 0.0), 0.0);
        assert_eq!(pid.state(), ControllerState::default());
    }

    #[test]
    fn non_finite_angle_is_ignored() {
        let mut pid = BalanceController::new(PidGains::default());
        let out = pid.update(f64::INFINITY, 0.02);
        assert_eq!(out, 0.0);
        assert_eq!(pid.state(), ControllerState::default());
    }

    #[test]
    fn closed_loop_with_integral_settles_to_zero() {
        // Plant: pitch responds to drive; 10° initial lean.
        let dt = 0.02;
        let mut pid = BalanceController::new(gains(0.05, 0.01, 0.0));
        let mut angle = 10.0;
        let mut out = 0.0;
        for _ in 0..3_000 {
            out = pid.update(angle, dt);
            angle += dt * 50.0 * out;
        }
        assert!(angle.abs() < 1e-3, "angle {angle}");
        assert!(out.abs() < 1e-3, "output {out}");
    }

    #[test]
    fn decaying_tilt_without_integral_drives_output_to_zero() {
        let mut pid = BalanceController::new(gains(0.05, 0.0, 0.01));
        let mut angle = 8.0;
        let mut out = 1.0;
        for _ in 0..500 {
            out = pid.update(angle, 0.02);
            angle *= 0.97;
        }
        assert!(out.abs() < 1e-4);
    }

    #[test]
    fn instances_are_independent() {
        let mut a = BalanceController::new(PidGains::default());
        let b = BalanceController::new(PidGains::default());
        a.update(4.0, 0.02);
        assert_ne!(a.state(), b.state());
        assert_eq!(b.state(), ControllerState::default());
    }

    #[test]
    fn output_stays_within_unit_range() {
        let mut pid = BalanceController::new(gains(1e3, 1e3, 1e3));
        for angle in [-90.0, 45.0, 0.0, 1e6, -1e6] {
            let out = pid.update(angle, 0.02);
            assert!((-1.0..=1.0).contains(&out));
        }
    }
}
