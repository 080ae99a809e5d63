//! Simulated peripherals so the loop runs end-to-end on a development host.
//!
//! One shared `Plant` models the robot body as an inverted pendulum on two
//! wheels: gravity tips it over, wheel drive pushes the pitch back. The IMU
//! advances the plant by the wall time since its previous read, so the loop's
//! own cadence drives the simulation. Proximity sensors follow a fixed
//! schedule of objects entering and leaving each palm.
//!
//! `SimServos::fail_after` injects a bus error on the N-th write.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use log::debug;
use rand::random_range;

use crate::{
    advanced::telemetry::{Frame, FrameSource, FrameSurface, OffloadedVideo, VideoSink},
    component_a::{proximity::DigitalInputs, tilt::Acceleration, tilt::InertialSensor},
    component_b::actuator::{Motor, MotorDriver, ServoBus},
    config::{ControlConfig, SERVO_CHANNELS},
    error::PeripheralError,
    scheduler::Peripherals,
};

const GRAVITY: f64 = 9.81;
const PENDULUM_LENGTH_M: f64 = 0.35;
/// Angular acceleration at full drive, rad/s².
const DRIVE_AUTHORITY: f64 = 60.0;
const DAMPING: f64 = 0.8;
const SUBSTEP: Duration = Duration::from_millis(1);
const MAX_ADVANCE: Duration = Duration::from_millis(100);
const ACCEL_NOISE: f64 = 0.002;

#[derive(Debug, Clone)]
pub struct Plant {
    pub pitch_rad: f64,
    pub pitch_rate: f64,
    /// Signed normalized drive per wheel, reconstructed from pins + duty.
    pub wheel: [f64; 2],
    direction: [(bool, bool); 2],
    duty: [f64; 2],
    pub servo_pulses: [u16; SERVO_CHANNELS],
    pub elapsed: Duration,
    pub noise: bool,
}

impl Plant {
    pub fn leaning(pitch_deg: f64) -> Self {
        Self {
            pitch_rad: pitch_deg.to_radians(),
            pitch_rate: 0.0,
            wheel: [0.0; 2],
            direction: [(false, false); 2],
            duty: [0.0; 2],
            servo_pulses: [0; SERVO_CHANNELS],
            elapsed: Duration::ZERO,
            noise: true,
        }
    }

    fn refresh_wheel(&mut self, idx: usize) {
        let (fwd, back) = self.direction[idx];
        let sign = match (fwd, back) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };
        self.wheel[idx] = sign * self.duty[idx] / 100.0;
    }

    /// Integrates the pitch dynamics over `dt` in 1 ms substeps.
    pub fn advance(&mut self, dt: Duration) {
        let mut remaining = dt.min(MAX_ADVANCE);
        let drive = (self.wheel[0] + self.wheel[1]) / 2.0;
        while !remaining.is_zero() {
            let step = remaining.min(SUBSTEP);
            let h = step.as_secs_f64();
            let accel = GRAVITY / PENDULUM_LENGTH_M * self.pitch_rad.sin() + DRIVE_AUTHORITY * drive
                - DAMPING * self.pitch_rate;
            self.pitch_rate += accel * h;
            self.pitch_rad += self.pitch_rate * h;
            // Lying on the floor.
            self.pitch_rad = self.pitch_rad.clamp(-1.4, 1.4);
            remaining -= step;
        }
        self.elapsed += dt;
    }

    pub fn pitch_degrees(&self) -> f64 {
        self.pitch_rad.to_degrees()
    }
}

pub type SharedPlant = Arc<Mutex<Plant>>;

fn lock(plant: &SharedPlant) -> MutexGuard<'_, Plant> {
    match plant.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct SimImu {
    plant: SharedPlant,
    last: Option<Instant>,
}

impl SimImu {
    pub fn new(plant: SharedPlant) -> Self {
        Self { plant, last: None }
    }
}

impl InertialSensor for SimImu {
    fn read_acceleration(&mut self) -> Result<Acceleration, PeripheralError> {
        let now = Instant::now();
        let mut p = lock(&self.plant);
        if let Some(last) = self.last {
            p.advance(now.duration_since(last));
        }
        self.last = Some(now);

        let noise = if p.noise { random_range(-ACCEL_NOISE..ACCEL_NOISE) } else { 0.0 };
        Ok(Acceleration {
            x: 0.0,
            y: p.pitch_rad.sin() + noise,
            z: p.pitch_rad.cos(),
        })
    }
}

pub struct SimMotors {
    plant: SharedPlant,
}

impl SimMotors {
    pub fn new(plant: SharedPlant) -> Self {
        Self { plant }
    }
}

impl MotorDriver for SimMotors {
    fn set_direction(&mut self, motor: Motor, forward: bool, backward: bool) -> Result<(), PeripheralError> {
        if forward && backward {
            return Err(PeripheralError::bus("set_direction", motor.channel(), "both direction lines high"));
        }
        let idx = usize::from(motor.channel());
        let mut p = lock(&self.plant);
        p.direction[idx] = (forward, backward);
        p.refresh_wheel(idx);
        Ok(())
    }

    fn set_duty(&mut self, motor: Motor, percent: f64) -> Result<(), PeripheralError> {
        let idx = usize::from(motor.channel());
        let mut p = lock(&self.plant);
        p.duty[idx] = percent;
        p.refresh_wheel(idx);
        Ok(())
    }

    fn release(&mut self) -> Result<(), PeripheralError> {
        let mut p = lock(&self.plant);
        p.direction = [(false, false); 2];
        p.duty = [0.0; 2];
        p.wheel = [0.0; 2];
        Ok(())
    }
}

pub struct SimServos {
    plant: SharedPlant,
    writes: u64,
    fail_after: Option<u64>,
}

impl SimServos {
    pub fn new(plant: SharedPlant) -> Self {
        Self {
            plant,
            writes: 0,
            fail_after: None,
        }
    }

    /// Write number `n` (1-based) and every later one fails.
    pub fn fail_after(mut self, n: u64) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl ServoBus for SimServos {
    fn set_pulse(&mut self, channel: u8, pulse: u16) -> Result<(), PeripheralError> {
        self.writes += 1;
        if self.fail_after.is_some_and(|n| self.writes >= n) {
            return Err(PeripheralError::bus("set_pulse", channel, "simulated bus fault"));
        }
        let slot = lock(&self.plant)
            .servo_pulses
            .get_mut(usize::from(channel))
            .map(|s| *s = pulse);
        slot.ok_or_else(|| PeripheralError::bus("set_pulse", channel, "no such channel"))
    }

    fn release(&mut self) -> Result<(), PeripheralError> {
        lock(&self.plant).servo_pulses = [0; SERVO_CHANNELS];
        Ok(())
    }
}

/// Objects come and go on a fixed schedule; one period per palm.
pub struct SimProximity {
    plant: SharedPlant,
    left_palm: u8,
    right_palm: u8,
    period: Duration,
}

impl SimProximity {
    pub fn new(plant: SharedPlant, config: &ControlConfig) -> Self {
        Self {
            plant,
            left_palm: config.channels.left_palm,
            right_palm: config.channels.right_palm,
            period: Duration::from_secs(4),
        }
    }

    fn occupied(&self, elapsed: Duration, offset: Duration) -> bool {
        let t = (elapsed + offset).as_millis() % self.period.as_millis();
        t < self.period.as_millis() / 2
    }
}

impl DigitalInputs for SimProximity {
    fn read_digital(&mut self, channel: u8) -> Result<bool, PeripheralError> {
        let elapsed = lock(&self.plant).elapsed;
        let detected = if channel == self.left_palm {
            self.occupied(elapsed, Duration::ZERO)
        } else if channel == self.right_palm {
            self.occupied(elapsed, self.period * 3 / 4)
        } else {
            false
        };
        // active-low
        Ok(!detected)
    }
}

pub struct SimCamera {
    open: bool,
    seq: u64,
}

impl SimCamera {
    pub fn new(open: bool) -> Self {
        Self { open, seq: 0 }
    }
}

impl FrameSource for SimCamera {
    fn is_open(&self) -> bool {
        self.open
    }

    fn capture(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }
        self.seq += 1;
        Some(Frame::blank(self.seq, 320, 240))
    }

    fn release(&mut self) -> Result<(), PeripheralError> {
        self.open = false;
        Ok(())
    }
}

/// Stand-in display: logs every 50th overlay.
#[derive(Default)]
pub struct LogSurface {
    shown: u64,
}

impl FrameSurface for LogSurface {
    fn show(&mut self, frame: &Frame) {
        self.shown += 1;
        if self.shown % 50 == 1 {
            debug!("[Display] frame {} {}", frame.seq, frame.overlay.join(" | "));
        }
    }

    fn close(&mut self) {
        debug!("[Display] closed after {} frames", self.shown);
    }
}

/// Builds a full simulated peripheral set around `plant`.
pub fn simulated_peripherals(config: &ControlConfig, plant: SharedPlant) -> Result<Peripherals, PeripheralError> {
    let video = if config.telemetry {
        let video = OffloadedVideo::spawn(SimCamera::new(true), LogSurface::default())?;
        Some(Box::new(video) as Box<dyn VideoSink>)
    } else {
        None
    };

    Ok(Peripherals {
        imu: Box::new(SimImu::new(plant.clone())),
        inputs: Box::new(SimProximity::new(plant.clone(), config)),
        servos: Box::new(SimServos::new(plant.clone())),
        motors: Box::new(SimMotors::new(plant)),
        video,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(pitch_deg: f64) -> SharedPlant {
        let mut p = Plant::leaning(pitch_deg);
        p.noise = false;
        Arc::new(Mutex::new(p))
    }

    #[test]
    fn unpowered_plant_falls_over() {
        let plant = quiet(2.0);
        let mut p = lock(&plant);
        for _ in 0..10 {
            p.advance(Duration::from_millis(100));
        }
        assert!(p.pitch_degrees() > 30.0);
    }

    #[test]
    fn backward_drive_pushes_pitch_back() {
        let plant = quiet(5.0);
        let mut motors = SimMotors::new(plant.clone());
        for m in [Motor::Left, Motor::Right] {
            motors.set_direction(m, false, true).unwrap();
            motors.set_duty(m, 100.0).unwrap();
        }
        let mut p = lock(&plant);
        assert_eq!(p.wheel, [-1.0, -1.0]);
        p.advance(Duration::from_millis(100));
        assert!(p.pitch_degrees() < 5.0);
    }

    #[test]
    fn imu_reports_sine_of_pitch() {
        let plant = quiet(10.0);
        let mut imu = SimImu::new(plant);
        let a = imu.read_acceleration().unwrap();
        assert!((a.y - 10f64.to_radians().sin()).abs() < 1e-12);
    }

    #[test]
    fn servo_fault_injection() {
        let plant = quiet(0.0);
        let mut servos = SimServos::new(plant.clone()).fail_after(3);
        servos.set_pulse(0, 2_000).unwrap();
        servos.set_pulse(1, 2_100).unwrap();
        assert!(servos.set_pulse(2, 2_200).is_err());
        assert_eq!(lock(&plant).servo_pulses[1], 2_100);
    }

    #[test]
    fn servo_write_to_missing_channel_fails() {
        let plant = quiet(0.0);
        let mut servos = SimServos::new(plant.clone());
        let err = servos.set_pulse(99, 1).unwrap_err();
        assert_eq!(err, PeripheralError::bus("set_pulse", 99, "no such channel"));
        servos.set_pulse(11, 4_000).unwrap();
        assert_eq!(lock(&plant).servo_pulses[11], 4_000);
    }

    #[test]
    fn palm_schedule_is_active_low() {
        let plant = quiet(0.0);
        let mut prox = SimProximity::new(plant.clone(), &ControlConfig::default());
        // t = 0: left occupied, right not yet
        assert!(!prox.read_digital(0).unwrap());
        assert!(prox.read_digital(1).unwrap());
        assert!(prox.read_digital(3).unwrap());
    }
}
