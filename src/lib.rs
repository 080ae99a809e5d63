//! Control loop for a two-wheel self-balancing robot with two six-joint arms
//! and proximity-triggered grippers.
//!
//! - `component_a`: sensing (tilt estimate, proximity inputs).
//! - `component_b`: decisions and actuation (PID, gripper logic, actuator front).
//! - `scheduler`: the INITIALIZING → RUNNING → SHUTTING_DOWN loop.
//! - `utils`: loop metrics, tick log and summary export.
//! - `advanced`: telemetry overlay and simulated peripherals.

pub mod advanced;
pub mod component_a;
pub mod component_b;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod utils;
