// src/hal/tx.rs
//! Transmitter: polarity state machine over mechanical relays plus a bound
//! power source.
//!
//! Polarity transitions always pass through the relays with a settle delay
//! before control returns. When the bound source is not voltage-adjustable
//! (battery), a nonzero polarity implicitly turns the source on and zero
//! turns it off, so no standing current drains the pack between pulses.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::TxConfig;
use crate::error::{AcquisitionError, BusError};
use crate::hal::bus::RegisterBus;
use crate::hal::traits::{CurrentInjector, PowerControl};
use crate::hal::types::Polarity;

/// Polarity relay register: 0 off, 1 forward, 2 reverse.
const REG_POLARITY: u16 = 0x08;
/// Shunt voltage register [tenths of mV].
const REG_SHUNT_DMV: u16 = 0x0A;

/// Register-level injection board: polarity relays + shunt current sense.
pub struct InjectionBoard {
    bus: Box<dyn RegisterBus>,
    r_shunt_ohm: f64,
    polarity: Polarity,
}

impl InjectionBoard {
    /// Probe the board and force the polarity relays off.
    pub fn new(mut bus: Box<dyn RegisterBus>, config: &TxConfig) -> Result<Self, BusError> {
        bus.probe()?;
        bus.write(REG_POLARITY, 0)?;
        Ok(Self {
            bus,
            r_shunt_ohm: config.r_shunt_ohm,
            polarity: Polarity::Off,
        })
    }
}

impl CurrentInjector for InjectionBoard {
    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), BusError> {
        let code = match polarity {
            Polarity::Off => 0,
            Polarity::Forward => 1,
            Polarity::Reverse => 2,
        };
        self.bus.write(REG_POLARITY, code)?;
        self.polarity = polarity;
        Ok(())
    }

    fn current_ma(&mut self) -> Result<f64, BusError> {
        let shunt_mv = f64::from(self.bus.read(REG_SHUNT_DMV)?) / 10.0;
        Ok(shunt_mv / self.r_shunt_ohm * f64::from(self.polarity.as_i8()))
    }
}

/// Transmitter unit: injector + bound power source + settle delays.
pub struct Tx {
    injector: Box<dyn CurrentInjector>,
    pwr: Box<dyn PowerControl>,
    activation_delay: Duration,
    release_delay: Duration,
    polarity: Polarity,
}

impl Tx {
    /// Bind an injector and a power source under one polarity state machine.
    pub fn new(
        injector: Box<dyn CurrentInjector>,
        pwr: Box<dyn PowerControl>,
        config: &TxConfig,
    ) -> Self {
        Self {
            injector,
            pwr,
            activation_delay: Duration::from_millis(config.activation_delay_ms),
            release_delay: Duration::from_millis(config.release_delay_ms),
            polarity: Polarity::Off,
        }
    }

    /// Currently driven polarity.
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Drive the polarity relays, honoring settle delays and the implicit
    /// power on/off contract for fixed supplies.
    pub fn set_polarity(&mut self, polarity: Polarity) -> Result<(), AcquisitionError> {
        if polarity == self.polarity {
            return Ok(());
        }
        match polarity {
            Polarity::Off => {
                self.injector.set_polarity(Polarity::Off)?;
                thread::sleep(self.release_delay);
                if !self.pwr.voltage_adjustable() && self.pwr.is_on() {
                    self.pwr.set_state(false)?;
                }
            }
            _ => {
                if !self.pwr.is_on() {
                    self.pwr.set_state(true)?;
                }
                self.injector.set_polarity(polarity)?;
                thread::sleep(self.activation_delay);
            }
        }
        self.polarity = polarity;
        debug!(polarity = polarity.as_i8(), "tx polarity set");
        Ok(())
    }

    /// Request an injection voltage; out-of-range values are corrected to the
    /// nearest boundary by the source, never a hard failure.
    pub fn set_voltage(&mut self, volts: f64) -> Result<f64, AcquisitionError> {
        Ok(self.pwr.set_voltage(volts)?)
    }

    pub fn voltage(&mut self) -> Result<f64, AcquisitionError> {
        Ok(self.pwr.voltage()?)
    }

    /// Injected current through the shunt [mA], signed with polarity.
    pub fn current_ma(&mut self) -> Result<f64, AcquisitionError> {
        Ok(self.injector.current_ma()?)
    }

    /// Whether the bound source supports the voltage-optimization loop.
    pub fn voltage_adjustable(&self) -> bool {
        self.pwr.voltage_adjustable()
    }

    /// Release relays and power down the source; used on shutdown paths.
    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        self.set_polarity(Polarity::Off)?;
        if self.pwr.is_on() {
            self.pwr.set_state(false)?;
        }
        Ok(())
    }
}
