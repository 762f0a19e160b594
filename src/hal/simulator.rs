// src/hal/simulator.rs
//! Simulated rig: a resistive earth model behind the capability traits.
//!
//! One shared state carries the supply voltage and active polarity; the
//! simulated injector and sensor derive current and potential difference
//! from it, so the synchronized sampling loop observes physically coherent
//! values across threads exactly as it would on hardware. Used by the
//! integration tests and the strategy convergence properties.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::BusError;
use crate::hal::traits::{CurrentInjector, PowerControl, RelayArray, VoltageSensor};
use crate::hal::types::Polarity;

/// Earth-model parameters for the simulated rig.
#[derive(Debug, Clone)]
pub struct SimRigConfig {
    /// Resistance seen between the injection electrodes [ohm].
    pub rab_ohm: f64,
    /// Fraction of the injection voltage appearing across M/N.
    pub vmn_ratio: f64,
    /// Self-potential offset on the measured voltage [mV].
    pub sp_mv: f64,
    /// Gaussian-ish measurement noise amplitude [mV].
    pub noise_mv: f64,
    /// Whether the simulated supply accepts voltage set-points.
    pub adjustable: bool,
    /// Initial (or fixed) supply voltage [V].
    pub supply_v: f64,
    /// Supply clamp range [V].
    pub supply_max_v: f64,
}

impl Default for SimRigConfig {
    fn default() -> Self {
        Self {
            rab_ohm: 100.0,
            vmn_ratio: 0.05,
            sp_mv: 0.0,
            noise_mv: 0.0,
            adjustable: true,
            supply_v: 5.0,
            supply_max_v: 50.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    vab_v: f64,
    polarity: i8,
    on: bool,
    relays_on: Vec<bool>,
}

/// Handle constructing the simulated devices over one shared earth model.
#[derive(Clone)]
pub struct SimRig {
    config: Arc<SimRigConfig>,
    state: Arc<Mutex<SimState>>,
}

impl SimRig {
    /// Fresh rig with the supply off and every relay open.
    pub fn new(config: SimRigConfig) -> Self {
        let state = SimState {
            vab_v: config.supply_v,
            polarity: 0,
            on: false,
            relays_on: vec![false; 64],
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Power source over the shared earth model.
    pub fn power(&self) -> SimPower {
        SimPower { rig: self.clone() }
    }

    /// Injection front end over the shared earth model.
    pub fn injector(&self) -> SimInjector {
        SimInjector { rig: self.clone() }
    }

    /// Receiver over the shared earth model.
    pub fn sensor(&self) -> SimSensor {
        SimSensor { rig: self.clone() }
    }

    /// Relay array over the shared earth model.
    pub fn relays(&self) -> SimRelays {
        SimRelays { rig: self.clone() }
    }

    fn injected_current_ma(&self) -> f64 {
        let state = self.state.lock();
        if !state.on || state.polarity == 0 {
            return 0.0;
        }
        f64::from(state.polarity) * state.vab_v / self.config.rab_ohm * 1000.0
    }

    fn measured_voltage_mv(&self) -> f64 {
        let (vab_v, polarity, on) = {
            let state = self.state.lock();
            (state.vab_v, state.polarity, state.on)
        };
        let driven = if on {
            f64::from(polarity) * vab_v * self.config.vmn_ratio * 1000.0
        } else {
            0.0
        };
        let noise = if self.config.noise_mv > 0.0 {
            rand::thread_rng().gen_range(-self.config.noise_mv..self.config.noise_mv)
        } else {
            0.0
        };
        driven + self.config.sp_mv + noise
    }
}

/// Simulated power source.
pub struct SimPower {
    rig: SimRig,
}

impl PowerControl for SimPower {
    fn set_state(&mut self, on: bool) -> Result<(), BusError> {
        self.rig.state.lock().on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.rig.state.lock().on
    }

    fn voltage(&mut self) -> Result<f64, BusError> {
        Ok(self.rig.state.lock().vab_v)
    }

    fn set_voltage(&mut self, volts: f64) -> Result<f64, BusError> {
        if !self.rig.config.adjustable {
            return Ok(self.rig.state.lock().vab_v);
        }
        let applied = volts.clamp(0.0, self.rig.config.supply_max_v);
        self.rig.state.lock().vab_v = applied;
        Ok(applied)
    }

    fn current_ma(&mut self) -> Result<f64, BusError> {
        Ok(self.rig.injected_current_ma().abs())
    }

    fn voltage_adjustable(&self) -> bool {
        self.rig.config.adjustable
    }
}

/// Simulated injection front end.
pub struct SimInjector {
    rig: SimRig,
}

impl CurrentInjector for SimInjector {
    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), BusError> {
        self.rig.state.lock().polarity = polarity.as_i8();
        Ok(())
    }

    fn current_ma(&mut self) -> Result<f64, BusError> {
        Ok(self.rig.injected_current_ma())
    }
}

/// Simulated receiver.
pub struct SimSensor {
    rig: SimRig,
}

impl VoltageSensor for SimSensor {
    fn voltage_mv(&mut self) -> Result<f64, BusError> {
        Ok(self.rig.measured_voltage_mv())
    }

    fn gain_auto(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    fn reset_gain(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Simulated relay array (64 channels, no bus).
pub struct SimRelays {
    rig: SimRig,
}

impl RelayArray for SimRelays {
    fn channel_count(&self) -> u16 {
        64
    }

    fn set_relay(&mut self, channel: u16, on: bool) -> Result<(), BusError> {
        let mut state = self.rig.state.lock();
        if let Some(slot) = state.relays_on.get_mut(usize::from(channel)) {
            *slot = on;
        }
        Ok(())
    }

    fn reset_all(&mut self) -> Result<(), BusError> {
        for slot in self.rig.state.lock().relays_on.iter_mut() {
            *slot = false;
        }
        Ok(())
    }
}
