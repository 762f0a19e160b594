// src/hal/mux.rs
//! Register-level relay array driver for one multiplexer board.
//!
//! Models the usual GPIO-expander arrangement: relay coils hang off output
//! latch registers of 8 bits each. Pure register translation; the safety
//! interlock and cabling logic live in [`crate::hal::relay_bank`].

use tracing::debug;

use crate::error::BusError;
use crate::hal::bus::RegisterBus;
use crate::hal::traits::RelayArray;

/// Base address of the output-latch register block.
const OLAT_BASE: u16 = 0x14;

/// Relay array driven through GPIO-expander output latches.
pub struct GpioRelayArray {
    bus: Box<dyn RegisterBus>,
    channels: u16,
    /// Shadow of the latch registers, avoids a read-modify-write per toggle.
    shadow: Vec<u8>,
}

impl GpioRelayArray {
    /// Probe the expander and start with every latch cleared.
    pub fn new(mut bus: Box<dyn RegisterBus>, channels: u16) -> Result<Self, BusError> {
        bus.probe()?;
        let banks = (usize::from(channels) + 7) / 8;
        let mut array = Self {
            bus,
            channels,
            shadow: vec![0; banks],
        };
        array.reset_all()?;
        Ok(array)
    }

    fn locate(&self, channel: u16) -> Result<(usize, u8), BusError> {
        if channel >= self.channels {
            return Err(BusError::Write {
                register: OLAT_BASE + channel / 8,
                value: 0,
                reason: format!("channel {} beyond {}-channel board", channel, self.channels),
            });
        }
        Ok((usize::from(channel / 8), 1u8 << (channel % 8)))
    }
}

impl RelayArray for GpioRelayArray {
    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn set_relay(&mut self, channel: u16, on: bool) -> Result<(), BusError> {
        let (bank, mask) = self.locate(channel)?;
        let next = if on {
            self.shadow[bank] | mask
        } else {
            self.shadow[bank] & !mask
        };
        if next != self.shadow[bank] {
            self.bus.write(OLAT_BASE + bank as u16, u16::from(next))?;
            self.shadow[bank] = next;
        }
        Ok(())
    }

    fn reset_all(&mut self) -> Result<(), BusError> {
        for bank in 0..self.shadow.len() {
            self.bus.write(OLAT_BASE + bank as u16, 0)?;
            self.shadow[bank] = 0;
        }
        debug!(channels = self.channels, "relay array cleared");
        Ok(())
    }
}
