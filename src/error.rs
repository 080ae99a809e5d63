//! Error taxonomy for the control loop.
//!
//! - `PeripheralError`: a bus/transaction failure on one read or write. Fatal
//!   once the loop is running; carries operation + channel context.
//! - `ConfigError`: configuration could not be read or is out of range.
//! - `RobotError`: what the scheduler reports to its caller.
//!
//! Timing anomalies are not errors; the balance controller absorbs them.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single peripheral transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeripheralError {
    /// Bus-level failure (I2C NACK, arbitration loss, short write ...).
    #[error("bus error during {operation} on channel {channel}: {reason}")]
    Bus {
        operation: &'static str,
        channel: u8,
        reason: String,
    },

    /// Transaction did not complete within its bounded timeout.
    #[error("{operation} on channel {channel} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        channel: u8,
        after: Duration,
    },

    /// Device did not answer at its address.
    #[error("no device at address {address:#04x} during {operation}")]
    Addressing { operation: &'static str, address: u8 },
}

impl PeripheralError {
    pub fn bus(operation: &'static str, channel: u8, reason: impl Into<String>) -> Self {
        Self::Bus {
            operation,
            channel,
            reason: reason.into(),
        }
    }

    /// Operation name, used for log context.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Bus { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::Addressing { operation, .. } => operation,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// Errors surfaced by the scheduler to the process entry point.
#[derive(Debug, Error)]
pub enum RobotError {
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),

    /// A required device could not be opened while initializing.
    #[error("device unavailable at startup: {0}")]
    DeviceUnavailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation called in a loop state that does not allow it.
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The control thread could not be spawned or panicked.
    #[error("control thread failed: {0}")]
    ControlThread(String),
}
