// src/hal/rx.rs
//! Receiver: differential voltage measurement with an auto-ranging gain
//! ladder and a two-position hardware attenuation stage.
//!
//! The ladder widens the range once |signal| exceeds 83 % of the current
//! full scale and narrows it otherwise, maximizing ADC resolution without
//! saturating. The attenuation stage extends dynamic range beyond the ADC
//! alone: `gain_auto` engages it whenever the unattenuated signal would
//! already saturate the widest range.

use tracing::debug;

use crate::config::constants::rx::{GAIN_FULL_SCALE_MV, GAIN_WIDEN_FRACTION};
use crate::config::RxConfig;
use crate::error::BusError;
use crate::hal::bus::RegisterBus;
use crate::hal::traits::VoltageSensor;

/// Signed conversion result register.
const REG_CONVERSION: u16 = 0x00;
/// Gain ladder index register.
const REG_GAIN: u16 = 0x01;
/// Attenuation stage relay register: 1 = engaged.
const REG_ATTEN: u16 = 0x03;

/// Differential ADC receiver with software-selectable attenuation.
pub struct AdsReceiver {
    bus: Box<dyn RegisterBus>,
    attenuation_ratio: f64,
    gain_index: usize,
    attenuated: bool,
}

impl AdsReceiver {
    /// Probe the ADC and start at minimum sensitivity.
    pub fn new(mut bus: Box<dyn RegisterBus>, config: &RxConfig) -> Result<Self, BusError> {
        bus.probe()?;
        let mut rx = Self {
            bus,
            attenuation_ratio: config.attenuation_ratio,
            gain_index: 0,
            attenuated: true,
        };
        rx.apply()?;
        Ok(rx)
    }

    fn apply(&mut self) -> Result<(), BusError> {
        self.bus.write(REG_GAIN, self.gain_index as u16)?;
        self.bus.write(REG_ATTEN, u16::from(self.attenuated))?;
        Ok(())
    }

    /// Signal at the ADC pins [mV], before undoing the attenuation stage.
    fn adc_mv(&mut self) -> Result<f64, BusError> {
        let raw = self.bus.read(REG_CONVERSION)? as i16;
        let full_scale = GAIN_FULL_SCALE_MV[self.gain_index];
        Ok(f64::from(raw) * full_scale / f64::from(i16::MAX))
    }

    fn input_ratio(&self) -> f64 {
        if self.attenuated {
            self.attenuation_ratio
        } else {
            1.0
        }
    }
}

impl VoltageSensor for AdsReceiver {
    fn voltage_mv(&mut self) -> Result<f64, BusError> {
        Ok(self.adc_mv()? / self.input_ratio())
    }

    fn gain_auto(&mut self) -> Result<(), BusError> {
        let signal_mv = self.voltage_mv()?.abs();

        // Attenuation first: engage it only when the bare signal would
        // already exceed the widest ADC range.
        let widest = GAIN_FULL_SCALE_MV[0];
        self.attenuated = signal_mv >= GAIN_WIDEN_FRACTION * widest;
        let at_adc = signal_mv * self.input_ratio();

        // Narrowest range that still leaves headroom below the widen
        // threshold; fall back to the widest when nothing fits.
        self.gain_index = GAIN_FULL_SCALE_MV
            .iter()
            .rposition(|&fs| at_adc < GAIN_WIDEN_FRACTION * fs)
            .unwrap_or(0);

        self.apply()?;
        debug!(
            signal_mv,
            gain_index = self.gain_index,
            attenuated = self.attenuated,
            "rx gain auto-ranged"
        );
        Ok(())
    }

    fn reset_gain(&mut self) -> Result<(), BusError> {
        self.gain_index = 0;
        self.attenuated = true;
        self.apply()
    }
}
