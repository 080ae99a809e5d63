//! # Balance Bot Entry Point
//!
//! Runs the balance + gripper control loop against the simulated peripheral
//! set for a fixed duration, then shuts down and exports the run.
//!
//! ## Threads
//! - **control:** `ThreadPriority::Max`, optionally pinned to `pin_core`.
//!   Owns every peripheral; runs INITIALIZING → RUNNING → SHUTTING_DOWN.
//! - **display:** presents annotated frames (drops when behind).
//! - **tick_exporter:** drains the tick event queue into CSV.
//! - **main:** waits, flips the `running` flag, joins, exports.
//!
//! Ctrl-C / SIGTERM clear `running` as well, so an interrupted run still
//! goes through the shutdown sequence before the process exits.
//!
//! ## Outputs
//! - `data/logs/ticks.csv`: lifecycle + per-tick events.
//! - `data/summary.csv`: cadence, pitch and drive statistics.
//!
//! Configuration comes from `balance_bot.json` in the working directory when
//! present; there are no command-line flags. Log level via `RUST_LOG`.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use balance_bot::{
    advanced::sim::{Plant, simulated_peripherals},
    config::ControlConfig,
    error::RobotError,
    scheduler::{ControlLoop, ExitReason, RunSummary},
    utils::{
        export::run_exports,
        metrics::{TickRecorder, shared_metrics},
    },
};
use log::{error, info, warn};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

const CONFIG_PATH: &str = "balance_bot.json";
const TICK_LOG_PATH: &str = "data/logs/ticks.csv";
const SUMMARY_PATH: &str = "data/summary.csv";
const RUN_DURATION_SECS: u64 = 30;
const INITIAL_LEAN_DEG: f64 = 3.0;

fn main() {
    env_logger::init();
    info!("=== BALANCE BOT START ===");

    match run() {
        Ok(()) => info!("=== BALANCE BOT FINISHED ==="),
        Err(e) => {
            error!("=== BALANCE BOT FAILED: {} ===", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), RobotError> {
    let config = ControlConfig::load_or_default(CONFIG_PATH)?;
    info!(
        "Gains kp={} ki={} kd={}, period {} ms, telemetry {}",
        config.pid.kp, config.pid.ki, config.pid.kd, config.tick_period_ms, config.telemetry
    );

    let metrics = shared_metrics();
    let recorder = TickRecorder::new();
    let exporter = match recorder.start_exporter(PathBuf::from(TICK_LOG_PATH)) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Tick log disabled: {}", e);
            None
        }
    };

    let plant = Arc::new(Mutex::new(Plant::leaning(INITIAL_LEAN_DEG)));
    let peripherals = simulated_peripherals(&config, plant.clone())?;
    let running = Arc::new(AtomicBool::new(true));
    install_interrupt_handler(&running);

    let control_handle = {
        let running = running.clone();
        let metrics = metrics.clone();
        let recorder = recorder.clone();
        let pin_core = config.pin_core;

        thread::Builder::new()
            .name("control".into())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("Control thread runs at default priority: {:?}", e);
                }
                if let Some(core) = pin_core {
                    pin_current_thread(core);
                }
                let mut control = ControlLoop::new(config, peripherals, metrics, recorder);
                control.run(&running)
            })
            .map_err(|e| RobotError::ControlThread(e.to_string()))?
    };

    // Wait out the run, but notice a control thread that ended early.
    let deadline = Instant::now() + Duration::from_secs(RUN_DURATION_SECS);
    while Instant::now() < deadline && !control_handle.is_finished() && running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(100));
    }
    if running.load(Ordering::Acquire) {
        info!("[Main] Time's up! Setting running = false");
    }
    running.store(false, Ordering::Release);

    let result = control_handle
        .join()
        .map_err(|_| RobotError::ControlThread("control thread panicked".into()))?;

    recorder.stop_exporter();
    if let Some(handle) = exporter {
        if handle.join().is_err() {
            error!("Tick exporter thread panicked");
        }
    }
    if recorder.dropped() > 0 {
        warn!("{} tick events dropped", recorder.dropped());
    }
    run_exports(&metrics, Path::new(SUMMARY_PATH));

    let summary = result?;
    report(&summary, plant_pitch(&plant));
    match summary.exit {
        ExitReason::Stopped => Ok(()),
        ExitReason::Fault(e) => Err(e.into()),
    }
}

fn install_interrupt_handler(running: &Arc<AtomicBool>) {
    let running = running.clone();
    let installed = ctrlc::set_handler(move || {
        warn!("[Main] Interrupt received, stopping control loop");
        running.store(false, Ordering::Release);
    });
    if let Err(e) = installed {
        warn!("Interrupt handler not installed, run stops on timer only: {}", e);
    }
}

fn pin_current_thread(core: usize) {
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    match cores.get(core) {
        Some(id) if core_affinity::set_for_current(*id) => info!("Control thread pinned to core {}", core),
        Some(_) => error!("Failed to pin control thread to core {}", core),
        None => error!("Core {} not found among available system cores", core),
    }
}

fn plant_pitch(plant: &Arc<Mutex<Plant>>) -> f64 {
    plant.lock().map(|p| p.pitch_degrees()).unwrap_or(f64::NAN)
}

fn report(summary: &RunSummary, final_pitch: f64) {
    info!("[Main] {} ticks, final simulated pitch {:.2} deg", summary.ticks, final_pitch);
    if !summary.shutdown.is_clean() {
        warn!("[Main] shutdown report: {:?}", summary.shutdown);
    }
}
