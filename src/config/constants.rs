// src/config/constants.rs
//! Hardware specification ranges and control-loop tuning defaults.
//!
//! Config values are clamped into these ranges at load time; the ranges are
//! enforced by the hardware itself (relay ratings, ADC full scale, supply
//! limits), so an out-of-spec config is bounded, never rejected.

/// Power-source specification limits.
pub mod pwr {
    /// Minimum injection voltage the supply can produce [V].
    pub const VOLTAGE_MIN_V: f64 = 0.0;
    /// Maximum injection voltage any supported supply can produce [V].
    pub const VOLTAGE_MAX_V: f64 = 50.0;
    /// Maximum injection current the supply can source [mA].
    pub const CURRENT_MAX_MA: f64 = 4800.0;
    /// Maximum continuous injection power [W].
    pub const POWER_MAX_W: f64 = 200.0;
    /// Default tolerance band for the voltage settle poll [V].
    pub const DEFAULT_SETTLE_TOLERANCE_V: f64 = 0.3;
    /// Default number of settle polls before giving up.
    pub const DEFAULT_SETTLE_POLL_MAX: u32 = 10;
    /// Default pause between settle polls [ms].
    pub const DEFAULT_SETTLE_POLL_MS: u64 = 20;
    /// Default output-enable settling delay [ms].
    pub const DEFAULT_ON_DELAY_MS: u64 = 50;
}

/// Transmitter specification limits.
pub mod tx {
    /// Maximum polarity-relay activation delay [ms].
    pub const ACTIVATION_DELAY_MAX_MS: u64 = 1000;
    /// Default polarity-relay activation delay [ms].
    pub const DEFAULT_ACTIVATION_DELAY_MS: u64 = 10;
    /// Default polarity-relay release delay [ms].
    pub const DEFAULT_RELEASE_DELAY_MS: u64 = 5;
    /// Default current-sense shunt [ohm].
    pub const DEFAULT_R_SHUNT_OHM: f64 = 2.0;
    /// Smallest shunt resistor the firmware supports [ohm].
    pub const R_SHUNT_MIN_OHM: f64 = 0.001;
    /// Largest shunt resistor the firmware supports [ohm].
    pub const R_SHUNT_MAX_OHM: f64 = 100.0;
}

/// Receiver specification limits.
pub mod rx {
    /// Largest potential difference the protected front end tolerates [mV].
    pub const VMN_MAX_MV: f64 = 5000.0;
    /// Default two-position hardware attenuation ratio.
    pub const DEFAULT_ATTENUATION_RATIO: f64 = 0.5;
    /// Fraction of the current full-scale range above which the gain ladder
    /// widens to the next range.
    pub const GAIN_WIDEN_FRACTION: f64 = 0.83;
    /// ADC full-scale ranges of the discrete gain ladder, widest first [mV].
    pub const GAIN_FULL_SCALE_MV: [f64; 6] = [6144.0, 4096.0, 2048.0, 1024.0, 512.0, 256.0];
}

/// Multiplexer specification limits.
pub mod mux {
    /// Relay mechanical bounce bound: minimum usable activation delay [ms].
    pub const ACTIVATION_DELAY_MIN_MS: u64 = 1;
    /// Maximum sensible relay settle delay [ms].
    pub const ACTIVATION_DELAY_MAX_MS: u64 = 1000;
    /// Default relay activation delay [ms].
    pub const DEFAULT_ACTIVATION_DELAY_MS: u64 = 10;
    /// Default relay release delay [ms].
    pub const DEFAULT_RELEASE_DELAY_MS: u64 = 5;
}

/// Controller defaults.
pub mod ctl {
    /// Default sampling cadence of the synchronized sampler [Hz].
    pub const DEFAULT_SAMPLING_RATE_HZ: f64 = 200.0;
    /// Slowest supported sampling cadence [Hz].
    pub const SAMPLING_RATE_MIN_HZ: f64 = 1.0;
    /// Fastest supported sampling cadence [Hz].
    pub const SAMPLING_RATE_MAX_HZ: f64 = 10_000.0;
    /// Default window delay discarding the polarization/RC transient at the
    /// start of each half-cycle [s].
    pub const DEFAULT_DELAY_S: f64 = 0.05;
}

/// Voltage-optimization tuning.
///
/// `SIGMA_BOUND` and `SAFETY_HEADROOM` reproduce the empirically tuned
/// margins of the original instrument (2-sigma robust bounds, 90 % headroom
/// below each hardware limit). Flagged for domain-expert review; change them
/// through [`crate::acquisition::strategy::Tuning`], not here.
pub mod tuning {
    /// Robust-bound width in standard deviations.
    pub const SIGMA_BOUND: f64 = 2.0;
    /// Fraction of each hardware limit the optimizer is allowed to use.
    pub const SAFETY_HEADROOM: f64 = 0.9;
    /// Convergence threshold on the candidate voltage change [V].
    pub const VAB_CONVERGENCE_THRESHOLD_V: f64 = 2.5;
    /// Iteration budget for the probe loop.
    pub const VAB_MAX_ITERATIONS: u32 = 4;
    /// Duration of one probe half-cycle [s].
    pub const PROBE_PULSE_DURATION_S: f64 = 0.2;
}
