//! scheduler.rs
//! The control loop: INITIALIZING → RUNNING → SHUTTING_DOWN.
//!
//! Each RUNNING tick is one strictly ordered sequence on the calling thread:
//! tilt read → PID → drive write → proximity read → gripper write →
//! (optional) frame annotate. The stop flag is checked only at the top of an
//! iteration, so shutdown always starts from a completed tick.
//!
//! Cadence is best-effort: by default the loop sleeps a fixed period after the
//! work, so the achieved rate drifts under load. `compensate_drift` subtracts
//! the work time instead. Ticks whose work exceeds the period are counted as
//! overruns.
//!
//! Any peripheral error while RUNNING is fatal. The shutdown sequence runs
//! exactly once, whatever ended RUNNING, and every step is attempted even if
//! an earlier one failed.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::{
    advanced::telemetry::{VideoSink, overlay_text},
    component_a::{
        proximity::{DigitalInputs, ProximityState, read_proximity},
        tilt::{InertialSensor, TiltEstimator, TiltSample},
    },
    component_b::{
        actuator::{Actuators, MotorDriver, ServoBus, clamp_angle},
        controller::{BalanceController, DriveCommand},
        gripper::{GripperFilter, GripperTarget, decide_targets},
    },
    config::{ControlConfig, SERVO_CHANNELS},
    error::{PeripheralError, RobotError},
    utils::metrics::{Event, SharedMetrics, TickRecorder, lock_metrics},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    ShuttingDown,
}

impl LoopState {
    pub fn name(self) -> &'static str {
        match self {
            LoopState::Initializing => "INITIALIZING",
            LoopState::Running => "RUNNING",
            LoopState::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// Authoritative commanded angle of every servo channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointAngles([f64; SERVO_CHANNELS]);

impl JointAngles {
    pub fn new(angles: [f64; SERVO_CHANNELS]) -> Self {
        Self(angles.map(clamp_angle))
    }

    /// `None` for a channel outside the servo bus.
    pub fn get(&self, channel: u8) -> Option<f64> {
        self.0.get(usize::from(channel)).copied()
    }

    fn set(&mut self, channel: u8, angle: f64) {
        self.0[usize::from(channel)] = clamp_angle(angle);
    }

    pub fn as_array(&self) -> &[f64; SERVO_CHANNELS] {
        &self.0
    }
}

/// External collaborators the loop drives.
pub struct Peripherals {
    pub imu: Box<dyn InertialSensor>,
    pub inputs: Box<dyn DigitalInputs>,
    pub servos: Box<dyn ServoBus>,
    pub motors: Box<dyn MotorDriver>,
    pub video: Option<Box<dyn VideoSink>>,
}

/// What one RUNNING iteration produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub tilt: TiltSample,
    pub drive: DriveCommand,
    pub proximity: ProximityState,
    pub gripper: GripperTarget,
    pub frame_shown: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    /// Cooperative stop.
    Stopped,
    /// Peripheral failure while RUNNING.
    Fault(PeripheralError),
}

/// Outcome of each best-effort release step, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub actuator_bus: Result<(), PeripheralError>,
    pub capture: Result<(), PeripheralError>,
    pub display: Result<(), PeripheralError>,
    pub digital_pins: Result<(), PeripheralError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.actuator_bus.is_ok() && self.capture.is_ok() && self.display.is_ok() && self.digital_pins.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub exit: ExitReason,
    pub shutdown: ShutdownReport,
}

/// First error wins; both operations already ran.
fn both(a: Result<(), PeripheralError>, b: Result<(), PeripheralError>) -> Result<(), PeripheralError> {
    a.and(b)
}

pub struct ControlLoop {
    config: ControlConfig,
    state: LoopState,
    estimator: TiltEstimator,
    controller: BalanceController,
    filter: GripperFilter,
    actuators: Actuators,
    imu: Box<dyn InertialSensor>,
    inputs: Box<dyn DigitalInputs>,
    video: Option<Box<dyn VideoSink>>,
    joints: JointAngles,
    last_gripper: Option<GripperTarget>,
    metrics: SharedMetrics,
    recorder: TickRecorder,
    started_at: Option<Instant>,
    ticks: u64,
    shutdown_report: Option<ShutdownReport>,
}

impl ControlLoop {
    pub fn new(config: ControlConfig, peripherals: Peripherals, metrics: SharedMetrics, recorder: TickRecorder) -> Self {
        let Peripherals {
            imu,
            inputs,
            servos,
            motors,
            video,
        } = peripherals;

        Self {
            estimator: TiltEstimator::from_config(&config),
            controller: BalanceController::new(config.pid),
            filter: GripperFilter::new(config.debounce_ticks),
            actuators: Actuators::new(servos, motors, config.servo),
            joints: JointAngles::new(config.initial_pose),
            state: LoopState::Initializing,
            imu,
            inputs,
            video,
            last_gripper: None,
            metrics,
            recorder,
            started_at: None,
            ticks: 0,
            shutdown_report: None,
            config,
        }
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[inline]
    pub fn joints(&self) -> &JointAngles {
        &self.joints
    }

    #[inline]
    pub fn controller(&self) -> &BalanceController {
        &self.controller
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Release results of the shutdown sequence, once it has run.
    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        self.shutdown_report.as_ref()
    }

    fn require(&self, operation: &'static str, state: LoopState) -> Result<(), RobotError> {
        if self.state == state {
            Ok(())
        } else {
            Err(RobotError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn enter(&mut self, state: LoopState) {
        info!("[Loop] {} -> {}", self.state.name(), state.name());
        self.state = state;
        self.recorder.record(Event::StateChange {
            ts_ns: self.recorder.now_ns(),
            state: state.name(),
        });
    }

    /// Full lifecycle, once per loop. Fails without touching any peripheral
    /// unless the loop is still INITIALIZING. If INITIALIZING fails the
    /// shutdown sequence still runs and its results stay available through
    /// `shutdown_report`.
    pub fn run(&mut self, running: &AtomicBool) -> Result<RunSummary, RobotError> {
        self.require("run", LoopState::Initializing)?;

        if let Err(e) = self.initialize() {
            error!("[Loop] initialization failed: {}", e);
            if let Some(report) = self.shutdown() {
                if !report.is_clean() {
                    error!("[Loop] release after failed initialization: {:?}", report);
                }
            }
            return Err(e);
        }

        let exit = self.run_until_stopped(running);
        let shutdown = self.shutdown().ok_or(RobotError::InvalidState {
            operation: "shutdown",
            state: self.state.name(),
        })?;

        Ok(RunSummary {
            ticks: self.ticks,
            exit,
            shutdown,
        })
    }

    /// Initial pose, motors stopped, settle, start timestamp.
    pub fn initialize(&mut self) -> Result<(), RobotError> {
        self.require("initialize", LoopState::Initializing)?;
        info!("[Loop] initializing ({} servo channels)", SERVO_CHANNELS);

        if self.config.telemetry {
            if let Some(video) = &self.video {
                if !video.is_open() {
                    return Err(RobotError::DeviceUnavailable("video capture".into()));
                }
            }
        }

        self.actuators.set_motor_speeds(0.0, 0.0)?;
        for channel in 0..SERVO_CHANNELS as u8 {
            let angle = self.config.initial_pose[usize::from(channel)];
            self.actuators.set_joint_angle(channel, angle)?;
            self.joints.set(channel, angle);
        }

        thread::sleep(self.config.settle_time());
        self.started_at = Some(Instant::now());
        self.enter(LoopState::Running);
        Ok(())
    }

    fn run_until_stopped(&mut self, running: &AtomicBool) -> ExitReason {
        let period = self.config.tick_period();
        let period_us = period.as_micros() as u64;
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut last_start = self.started_at.unwrap_or_else(Instant::now);

        info!("[Loop] running at {} ms period", self.config.tick_period_ms);

        while running.load(Ordering::Acquire) {
            let tick_start = Instant::now();
            let elapsed = tick_start.duration_since(last_start);
            last_start = tick_start;

            let outcome = match self.step(elapsed.as_secs_f64()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("[Loop] peripheral failure in {}: {}", e.operation(), e);
                    self.recorder.record(Event::Fault {
                        ts_ns: self.recorder.now_ns(),
                        operation: e.operation(),
                    });
                    return ExitReason::Fault(e);
                }
            };

            let work = tick_start.elapsed();
            self.account(&outcome, elapsed, work, period);

            let sleep_for = if self.config.compensate_drift {
                period.saturating_sub(work)
            } else {
                period
            };
            if !sleep_for.is_zero() {
                sleeper.sleep(sleep_for);
            }
            debug!(
                "[Loop] tick {} pitch={:.2} drive={:.3} work={}us/{}us",
                self.ticks,
                outcome.tilt.pitch_degrees,
                outcome.drive.left,
                work.as_micros(),
                period_us
            );
        }

        info!("[Loop] stop requested after {} ticks", self.ticks);
        ExitReason::Stopped
    }

    fn account(&mut self, outcome: &TickOutcome, elapsed: Duration, work: Duration, period: Duration) {
        let elapsed_us = elapsed.as_micros() as u64;
        let work_us = work.as_micros() as u64;
        {
            let mut m = lock_metrics(&self.metrics);
            m.record_tick(
                outcome.tilt.pitch_degrees,
                outcome.drive.left,
                elapsed_us,
                period.as_micros() as u64,
                work_us,
            );
            if work > period {
                m.overruns += 1;
            }
        }
        if work > period {
            warn!("[Loop] overrun: tick {} took {}us (period {}us)", self.ticks, work_us, period.as_micros());
        }

        self.recorder.record(Event::Tick {
            seq: self.ticks,
            ts_ns: self.recorder.now_ns(),
            elapsed_us,
            work_us,
            pitch_deg: outcome.tilt.pitch_degrees,
            drive: outcome.drive.left,
            left_palm: outcome.proximity.left_palm,
            right_palm: outcome.proximity.right_palm,
        });
    }

    /// One RUNNING iteration without the cadence sleep.
    pub fn tick(&mut self, elapsed_seconds: f64) -> Result<TickOutcome, RobotError> {
        self.require("tick", LoopState::Running)?;
        Ok(self.step(elapsed_seconds)?)
    }

    fn step(&mut self, elapsed_seconds: f64) -> Result<TickOutcome, PeripheralError> {
        // Balance path.
        let tilt = self.estimator.sample(self.imu.as_mut())?;
        let skipped_before = self.controller.skipped_updates();
        let output = self.controller.update(tilt.pitch_degrees, elapsed_seconds);
        let anomaly = self.controller.skipped_updates() > skipped_before;
        let drive = DriveCommand::symmetric(output);
        self.actuators.drive(drive)?;

        // Gripper path.
        let raw = read_proximity(self.inputs.as_mut(), &self.config.channels)?;
        let proximity = self.filter.apply(raw);
        let gripper = decide_targets(&proximity, &self.config.gripper);
        self.write_gripper(gripper)?;

        let changed = self.last_gripper.is_some_and(|prev| prev != gripper);
        self.last_gripper = Some(gripper);

        let frame_shown = self.annotate_frame(tilt.pitch_degrees, drive.left);

        {
            let mut m = lock_metrics(&self.metrics);
            if anomaly {
                m.timing_anomalies += 1;
            }
            if changed {
                m.gripper_changes += 1;
            }
            if self.config.telemetry && self.video.is_some() {
                if frame_shown {
                    m.frames_shown += 1;
                } else {
                    m.frames_skipped += 1;
                }
            }
        }
        if anomaly {
            warn!("[Loop] non-positive elapsed time ({elapsed_seconds}s); holding drive output");
        }

        self.ticks += 1;
        Ok(TickOutcome {
            tilt,
            drive,
            proximity,
            gripper,
            frame_shown,
        })
    }

    fn write_gripper(&mut self, target: GripperTarget) -> Result<(), PeripheralError> {
        let left = self.config.channels.left_arm;
        let right = self.config.channels.right_arm;
        let live = [
            (left.thumb, target.left.thumb),
            (left.mitten, target.left.mitten),
            (right.thumb, target.right.thumb),
            (right.mitten, target.right.mitten),
        ];
        for (channel, angle) in live {
            let angle = clamp_angle(angle);
            self.actuators.set_joint_angle(channel, angle)?;
            self.joints.set(channel, angle);
        }
        Ok(())
    }

    /// Best-effort; a missing frame or a display error only skips telemetry.
    fn annotate_frame(&mut self, pitch: f64, speed: f64) -> bool {
        if !self.config.telemetry {
            return false;
        }
        let Some(video) = self.video.as_mut() else {
            return false;
        };
        let Some(mut frame) = video.capture_frame() else {
            return false;
        };
        video.annotate(&mut frame, &overlay_text(pitch, speed));
        match video.display(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("[Loop] telemetry skipped: {}", e);
                false
            }
        }
    }

    /// Releases everything, once. Later calls return `None`.
    pub fn shutdown(&mut self) -> Option<ShutdownReport> {
        if self.shutdown_report.is_some() {
            return None;
        }
        self.enter(LoopState::ShuttingDown);

        let actuator_bus = both(self.actuators.release_servo_bus(), self.imu.release());
        self.log_release("actuator_bus", &actuator_bus);

        let capture = match self.video.as_mut() {
            Some(video) => video.release_capture(),
            None => Ok(()),
        };
        self.log_release("capture", &capture);

        let display = match self.video.as_mut() {
            Some(video) => video.teardown_display(),
            None => Ok(()),
        };
        self.log_release("display", &display);

        let digital_pins = both(self.actuators.release_motor_pins(), self.inputs.release());
        self.log_release("digital_pins", &digital_pins);

        let report = ShutdownReport {
            actuator_bus,
            capture,
            display,
            digital_pins,
        };
        if report.is_clean() {
            info!("[Loop] shutdown complete");
        } else {
            warn!("[Loop] shutdown finished with errors");
        }
        self.shutdown_report = Some(report.clone());
        Some(report)
    }

    fn log_release(&self, step: &'static str, result: &Result<(), PeripheralError>) {
        if let Err(e) = result {
            warn!("[Loop] release {} failed: {}", step, e);
        }
        self.recorder.record(Event::Release {
            ts_ns: self.recorder.now_ns(),
            step,
            ok: result.is_ok(),
        });
    }
}
