// src/hal/traits.rs
//! Capability traits at the device seams.
//!
//! Boards implement only the capabilities they support; composition replaces
//! the deep inheritance chains of legacy firmware stacks. Everything below
//! the traits is a thin register translation; the algorithmic work lives in
//! the acquisition layer.

use crate::error::BusError;
use crate::hal::types::Polarity;

/// A controllable power source feeding the transmitter.
pub trait PowerControl: Send {
    /// Enable or disable the output. Enabling applies the source's settling
    /// delay before returning; disabling is immediate.
    fn set_state(&mut self, on: bool) -> Result<(), BusError>;

    /// Whether the output is currently enabled.
    fn is_on(&self) -> bool;

    /// Measured output voltage [V].
    fn voltage(&mut self) -> Result<f64, BusError>;

    /// Request an output voltage [V]; returns the voltage actually applied.
    ///
    /// Adjustable sources clamp into their bounds, write the set-point and
    /// block until the measured voltage settles (or the poll budget runs
    /// out). Fixed sources ignore the request and report their nominal
    /// voltage.
    fn set_voltage(&mut self, volts: f64) -> Result<f64, BusError>;

    /// Measured output current [mA], when the source can sense it.
    fn current_ma(&mut self) -> Result<f64, BusError>;

    /// Whether `set_voltage` has any effect on this source.
    fn voltage_adjustable(&self) -> bool;
}

/// Current-injection front end: polarity relays plus shunt current sense.
pub trait CurrentInjector: Send {
    /// Drive the polarity relays. The caller owns the settle delays.
    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), BusError>;

    /// Injected current measured across the shunt [mA], signed with the
    /// active polarity.
    fn current_ma(&mut self) -> Result<f64, BusError>;
}

/// Differential potential measurement across the M/N electrodes.
pub trait VoltageSensor: Send {
    /// Instantaneous potential difference [mV].
    fn voltage_mv(&mut self) -> Result<f64, BusError>;

    /// Auto-range the internal gain ladder based on the present signal.
    fn gain_auto(&mut self) -> Result<(), BusError>;

    /// Return to minimum sensitivity (widest range), used before probe
    /// pulses so ADC saturation cannot bias the voltage optimization.
    fn reset_gain(&mut self) -> Result<(), BusError>;
}

/// Bank of addressable relays on one multiplexer board.
pub trait RelayArray: Send {
    /// Number of addressable channels.
    fn channel_count(&self) -> u16;

    /// Drive one relay coil.
    fn set_relay(&mut self, channel: u16, on: bool) -> Result<(), BusError>;

    /// Force every relay off.
    fn reset_all(&mut self) -> Result<(), BusError>;
}
