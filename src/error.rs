// src/error.rs
//! Unified error taxonomy for the acquisition core.
//!
//! Safety rejections (`ShortCircuitRisk`, `OverVoltageRisk`) are fail-closed
//! values consumed by the caller; they never unwind an acquisition. Two
//! recoverable conditions are deliberately *not* errors: out-of-spec config
//! values are clamped with a warning at load time, and cabling misses are
//! skipped with a warning during switching.

use thiserror::Error;

/// Result alias for acquisition operations.
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

/// Faults raised by the register-level bus primitives (I2C/Modbus bindings
/// live behind [`crate::hal::bus::RegisterBus`]; the core never sees the wire).
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Register read failed.
    #[error("read of register 0x{register:04x} failed: {reason}")]
    Read { register: u16, reason: String },

    /// Register write failed.
    #[error("write of 0x{value:04x} to register 0x{register:04x} failed: {reason}")]
    Write {
        register: u16,
        value: u16,
        reason: String,
    },

    /// Device did not acknowledge a presence probe.
    #[error("device did not acknowledge probe: {0}")]
    NoAck(String),
}

/// Rejections raised by the relay safety interlock before any relay is
/// energized. A rejected request leaves every relay in its prior state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwitchError {
    /// The same electrode was requested as both injection poles, which would
    /// short the source through the electrode.
    #[error("short-circuit risk: electrode(s) {0:?} requested as both A and B")]
    ShortCircuitRisk(Vec<u16>),

    /// A measurement electrode (M/N) was also requested as an injection
    /// electrode (A/B), putting injection voltage on the RX front end.
    #[error("over-voltage risk: electrode(s) {0:?} hold both an injection and a measurement role")]
    OverVoltageRisk(Vec<u16>),
}

/// Top-level error for the acquisition core.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// A switch request was rejected by the safety interlock.
    #[error("switch request rejected: {0}")]
    Switch(#[from] SwitchError),

    /// A board failed its bus probe at initialization. Fatal for that board
    /// only; the rest of the system keeps running.
    #[error("board '{board}' is unresponsive: {source}")]
    DeviceUnresponsive { board: String, source: BusError },

    /// Register-level device fault during an operation.
    #[error("device fault: {0}")]
    Bus(#[from] BusError),

    /// Invalid configuration that cannot be recovered by clamping.
    #[error("configuration error: {0}")]
    Config(String),

    /// An acquisition worker thread panicked.
    #[error("acquisition worker thread panicked during {0}")]
    WorkerPanic(&'static str),
}
