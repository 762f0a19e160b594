// src/hal/types.rs
//! Core types for the electrode/relay/waveform domain.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Role an electrode plays within one measurement.
///
/// `A`/`B` are the injection poles (+/-), `M`/`N` the potential-measurement
/// pair. Within one switching operation the same electrode must never hold
/// both A and B, and must not mix injection with measurement roles unless
/// explicitly bypassed for calibration checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectrodeRole {
    /// Positive injection pole.
    A,
    /// Negative injection pole.
    B,
    /// First potential-measurement electrode.
    M,
    /// Second potential-measurement electrode.
    N,
}

impl ElectrodeRole {
    /// All four roles in canonical order.
    pub const ALL: [ElectrodeRole; 4] = [Self::A, Self::B, Self::M, Self::N];

    /// True for the current-injection roles A and B.
    pub fn is_injection(self) -> bool {
        matches!(self, Self::A | Self::B)
    }

    /// True for the potential-measurement roles M and N.
    pub fn is_measurement(self) -> bool {
        !self.is_injection()
    }
}

impl fmt::Display for ElectrodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::M => write!(f, "M"),
            Self::N => write!(f, "N"),
        }
    }
}

/// Injection polarity driven by the transmitter relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Current flows A to B.
    Forward,
    /// Polarity relays open, no injection.
    #[default]
    Off,
    /// Current flows B to A.
    Reverse,
}

impl Polarity {
    /// Signed representation recorded in readings: +1 / 0 / -1.
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Forward => 1,
            Self::Off => 0,
            Self::Reverse => -1,
        }
    }

    /// Opposite injection polarity; `Off` stays `Off`.
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Off => Self::Off,
            Self::Reverse => Self::Forward,
        }
    }
}

impl From<i8> for Polarity {
    fn from(value: i8) -> Self {
        match value {
            v if v > 0 => Self::Forward,
            v if v < 0 => Self::Reverse,
            _ => Self::Off,
        }
    }
}

/// Target state of a relay switch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Relay coil energized, contact closed.
    On,
    /// Relay coil released, contact open.
    Off,
}

/// Resolved hardware location of an (electrode, role) pair.
///
/// Computed once from the board cabling configuration at bank
/// initialization; immutable during acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayAddress {
    /// Board identifier from the multiplexer configuration.
    pub board: String,
    /// Relay channel on that board.
    pub channel: u16,
}

/// One synchronized sample taken during an active injection window.
///
/// `elapsed` is measured from the start of the pulse-train, so it is
/// monotonically non-decreasing across the whole waveform buffer. `polarity`
/// is constant for all readings sharing the same `pulse` index.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Reading {
    /// Time since the start of the pulse-train.
    pub elapsed: Duration,
    /// Index of the pulse this sample belongs to.
    pub pulse: u32,
    /// Signed injection polarity at sampling time: +1 / 0 / -1.
    pub polarity: i8,
    /// Injected current [mA], signed with the polarity.
    pub current_ma: f64,
    /// Measured potential difference [mV].
    pub voltage_mv: f64,
}
