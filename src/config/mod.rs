// src/config/mod.rs
//! Hardware configuration: bounds tables per device class, clamped against
//! the static specification ranges in [`constants`] at load time.
//!
//! The resolved [`HardwareConfig`] is constructed once and handed by value
//! into `HardwareController::new`; nothing here mutates after load.

pub mod constants;
pub mod loader;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hal::types::ElectrodeRole;

pub use loader::{load_from_path, from_toml_str, ConfigError};

/// A (min, req, max) triple for one controlled quantity.
///
/// `req` is the operator-requested target; `min`/`max` bound what the
/// strategies may choose. All three are clamped into the hardware spec range.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bounds {
    /// Smallest value the strategies may choose.
    pub min: f64,
    /// Operator-requested target.
    pub req: f64,
    /// Largest value the strategies may choose.
    pub max: f64,
}

impl Bounds {
    /// Clamp all three values into `[lo, hi]` and re-order so that
    /// min <= req <= max holds afterwards. Logs each correction.
    fn clamp_into(mut self, lo: f64, hi: f64, what: &str) -> Self {
        for (field, value) in [("min", &mut self.min), ("req", &mut self.req), ("max", &mut self.max)] {
            let clamped = value.clamp(lo, hi);
            if clamped != *value {
                warn!(
                    quantity = what,
                    field,
                    configured = *value,
                    clamped,
                    "config value out of hardware spec, bounded"
                );
                *value = clamped;
            }
        }
        if self.max < self.min {
            warn!(quantity = what, "max below min after clamping, swapping");
            std::mem::swap(&mut self.min, &mut self.max);
        }
        if self.req < self.min || self.req > self.max {
            let fixed = self.req.clamp(self.min, self.max);
            warn!(quantity = what, configured = self.req, clamped = fixed, "req outside [min, max], bounded");
            self.req = fixed;
        }
        self
    }
}

/// Controller-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CtlConfig {
    /// Cadence of the synchronized sampler [Hz].
    pub sampling_rate_hz: f64,
    /// Portion of each half-cycle discarded before aggregation [s].
    pub delay_s: f64,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: constants::ctl::DEFAULT_SAMPLING_RATE_HZ,
            delay_s: constants::ctl::DEFAULT_DELAY_S,
        }
    }
}

/// Kind of power source bound to the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PwrKind {
    /// Fixed supply (battery); voltage is not adjustable, the voltage
    /// optimization loop is skipped entirely.
    Battery,
    /// Register-driven adjustable supply.
    Adjustable,
}

/// Power-source settings and injection bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PwrConfig {
    /// Kind of source bound to the transmitter.
    pub kind: PwrKind,
    /// Injection voltage bounds (Vab) [V].
    pub voltage: Bounds,
    /// Injection current bounds (Iab) [mA].
    pub current_ma: Bounds,
    /// Injection power bounds [W].
    pub power_w: Bounds,
    /// Settle-poll tolerance band around the target voltage [V].
    pub settle_tolerance_v: f64,
    /// Maximum number of settle polls.
    pub settle_poll_max: u32,
    /// Pause between settle polls [ms].
    pub settle_poll_ms: u64,
    /// Output-enable settling delay [ms].
    pub on_delay_ms: u64,
    /// Nominal voltage of a fixed supply [V].
    pub battery_voltage_v: f64,
    /// Bus interface identifier of the adjustable supply.
    pub interface_name: Option<String>,
}

impl Default for PwrConfig {
    fn default() -> Self {
        Self {
            kind: PwrKind::Adjustable,
            voltage: Bounds { min: 1.0, req: 5.0, max: constants::pwr::VOLTAGE_MAX_V },
            current_ma: Bounds { min: 0.1, req: 50.0, max: constants::pwr::CURRENT_MAX_MA },
            power_w: Bounds { min: 0.0, req: 10.0, max: constants::pwr::POWER_MAX_W },
            settle_tolerance_v: constants::pwr::DEFAULT_SETTLE_TOLERANCE_V,
            settle_poll_max: constants::pwr::DEFAULT_SETTLE_POLL_MAX,
            settle_poll_ms: constants::pwr::DEFAULT_SETTLE_POLL_MS,
            on_delay_ms: constants::pwr::DEFAULT_ON_DELAY_MS,
            battery_voltage_v: 12.0,
            interface_name: None,
        }
    }
}

/// Transmitter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TxConfig {
    /// Polarity-relay settle delay when engaging [ms].
    pub activation_delay_ms: u64,
    /// Polarity-relay settle delay when releasing [ms].
    pub release_delay_ms: u64,
    /// Current-sense shunt [ohm].
    pub r_shunt_ohm: f64,
    /// Bus interface identifier of the injection board.
    pub interface_name: Option<String>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            activation_delay_ms: constants::tx::DEFAULT_ACTIVATION_DELAY_MS,
            release_delay_ms: constants::tx::DEFAULT_RELEASE_DELAY_MS,
            r_shunt_ohm: constants::tx::DEFAULT_R_SHUNT_OHM,
            interface_name: None,
        }
    }
}

/// Receiver settings and measured-potential bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RxConfig {
    /// Potential-difference bounds (Vmn) [mV].
    pub vmn_mv: Bounds,
    /// Two-position hardware attenuation ratio (1.0 disables the stage).
    pub attenuation_ratio: f64,
    /// Bus interface identifier of the receiver ADC.
    pub interface_name: Option<String>,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            vmn_mv: Bounds { min: 1.0, req: 100.0, max: constants::rx::VMN_MAX_MV },
            attenuation_ratio: constants::rx::DEFAULT_ATTENUATION_RATIO,
            interface_name: None,
        }
    }
}

/// One explicit cabling entry: (electrode, role) wired to a relay channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CablingEntry {
    /// Electrode number on the line.
    pub electrode: u16,
    /// Role this wiring serves.
    pub role: ElectrodeRole,
    /// Relay channel on the board.
    pub channel: u16,
}

/// Settings shared by all multiplexer boards unless overridden per board.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxDefaults {
    /// Relay settle delay when energizing [ms].
    pub activation_delay_ms: u64,
    /// Relay settle delay when releasing [ms].
    pub release_delay_ms: u64,
}

impl Default for MuxDefaults {
    fn default() -> Self {
        Self {
            activation_delay_ms: constants::mux::DEFAULT_ACTIVATION_DELAY_MS,
            release_delay_ms: constants::mux::DEFAULT_RELEASE_DELAY_MS,
        }
    }
}

/// Per-board multiplexer configuration.
///
/// When `cabling` is absent the map is generated electrode-major over
/// `roles`, matching the factory inner-cabling tables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxBoardConfig {
    /// Electrode numbers wired to this board.
    pub electrodes: Vec<u16>,
    /// Roles this board can connect (subset of A/B/M/N).
    pub roles: Vec<ElectrodeRole>,
    /// Explicit cabling entries overriding the generated map.
    pub cabling: Option<Vec<CablingEntry>>,
    /// Per-board override of the default activation delay [ms].
    pub activation_delay_ms: Option<u64>,
    /// Per-board override of the default release delay [ms].
    pub release_delay_ms: Option<u64>,
    /// Bus interface identifier of this board.
    pub interface_name: Option<String>,
}

/// Multiplexer section: shared defaults plus one entry per board.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Delays applied where a board gives no override.
    pub default: MuxDefaults,
    /// Boards keyed by identifier.
    pub boards: BTreeMap<String, MuxBoardConfig>,
}

/// Complete hardware configuration consumed by the controller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Controller-level settings.
    pub ctl: CtlConfig,
    /// Power source and injection bounds.
    pub pwr: PwrConfig,
    /// Transmitter settings.
    pub tx: TxConfig,
    /// Receiver settings and potential bounds.
    pub rx: RxConfig,
    /// Multiplexer boards.
    pub mux: MuxConfig,
}

impl HardwareConfig {
    /// Clamp every numeric field into its hardware specification range.
    ///
    /// Holds the config-validity invariant for the lifetime of a controller:
    /// out-of-spec values are silently bounded (with a warning), not rejected.
    pub fn clamped(mut self) -> Self {
        use constants::*;

        self.pwr.voltage = self.pwr.voltage.clamp_into(pwr::VOLTAGE_MIN_V, pwr::VOLTAGE_MAX_V, "pwr.voltage");
        self.pwr.current_ma = self.pwr.current_ma.clamp_into(0.0, pwr::CURRENT_MAX_MA, "pwr.current_ma");
        self.pwr.power_w = self.pwr.power_w.clamp_into(0.0, pwr::POWER_MAX_W, "pwr.power_w");
        self.rx.vmn_mv = self.rx.vmn_mv.clamp_into(0.0, rx::VMN_MAX_MV, "rx.vmn_mv");

        let rate = self.ctl.sampling_rate_hz.clamp(ctl::SAMPLING_RATE_MIN_HZ, ctl::SAMPLING_RATE_MAX_HZ);
        if rate != self.ctl.sampling_rate_hz {
            warn!(configured = self.ctl.sampling_rate_hz, clamped = rate, "ctl.sampling_rate_hz out of spec, bounded");
            self.ctl.sampling_rate_hz = rate;
        }
        if self.ctl.delay_s < 0.0 {
            warn!(configured = self.ctl.delay_s, "ctl.delay_s negative, bounded to 0");
            self.ctl.delay_s = 0.0;
        }

        let shunt = self.tx.r_shunt_ohm.clamp(tx::R_SHUNT_MIN_OHM, tx::R_SHUNT_MAX_OHM);
        if shunt != self.tx.r_shunt_ohm {
            warn!(configured = self.tx.r_shunt_ohm, clamped = shunt, "tx.r_shunt_ohm out of spec, bounded");
            self.tx.r_shunt_ohm = shunt;
        }
        self.tx.activation_delay_ms = self.tx.activation_delay_ms.min(tx::ACTIVATION_DELAY_MAX_MS);
        self.tx.release_delay_ms = self.tx.release_delay_ms.min(tx::ACTIVATION_DELAY_MAX_MS);

        self.mux.default.activation_delay_ms = clamp_mux_delay(self.mux.default.activation_delay_ms, "mux.default.activation_delay_ms");
        self.mux.default.release_delay_ms = clamp_mux_delay(self.mux.default.release_delay_ms, "mux.default.release_delay_ms");
        for board in self.mux.boards.values_mut() {
            if let Some(d) = board.activation_delay_ms {
                board.activation_delay_ms = Some(clamp_mux_delay(d, "mux.boards.*.activation_delay_ms"));
            }
            if let Some(d) = board.release_delay_ms {
                board.release_delay_ms = Some(clamp_mux_delay(d, "mux.boards.*.release_delay_ms"));
            }
        }

        self
    }
}

fn clamp_mux_delay(value: u64, what: &str) -> u64 {
    use constants::mux::{ACTIVATION_DELAY_MAX_MS, ACTIVATION_DELAY_MIN_MS};
    let clamped = value.clamp(ACTIVATION_DELAY_MIN_MS, ACTIVATION_DELAY_MAX_MS);
    if clamped != value {
        warn!(quantity = what, configured = value, clamped, "relay delay out of spec, bounded");
    }
    clamped
}
