// src/acquisition/strategy.rs
//! Injection-voltage selection.
//!
//! All strategies except `Constant` probe the ground with short bipolar
//! pulses, derive robust bounds on the contact resistance and the geometric
//! transfer ratio, and pick a voltage that honors every hardware limit with
//! headroom. The loop re-probes at the new voltage until the candidate
//! stops moving or the iteration budget runs out; contact resistance is
//! mildly voltage-dependent in the field, one probe is rarely enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::acquisition::controller::HardwareController;
use crate::config::constants::tuning;
use crate::error::AcquisitionResult;
use crate::hal::types::Polarity;
use crate::utils::stats::sigma_bounds;

/// How the injection voltage for a quadrupole is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InjectionStrategy {
    /// Fixed operator-chosen voltage, no probing.
    Constant { vab_v: f64 },
    /// Largest voltage every hardware limit allows; best signal-to-noise.
    VoltageMax,
    /// Smallest voltage that still reaches the requested potential
    /// difference; gentlest on the electrodes and the power budget.
    VoltageMin,
    /// Satisfy the requested targets: with `min_agg` any one target
    /// suffices (take the smallest voltage that reaches one), otherwise
    /// all of them must hold (take the largest requirement).
    Flex { min_agg: bool },
}

impl Default for InjectionStrategy {
    fn default() -> Self {
        Self::VoltageMax
    }
}

/// Probe-loop tuning knobs; defaults mirror the field-calibrated values.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct Tuning {
    /// Robust-bound width in standard deviations.
    pub sigma_bound: f64,
    /// Fraction of each hardware limit the optimizer may use.
    pub safety_headroom: f64,
    /// Stop re-probing when the candidate moves less than this [V].
    pub convergence_threshold_v: f64,
    /// Probe-loop iteration budget.
    pub max_iterations: u32,
    /// Duration of one probe half-cycle [s].
    pub probe_duration_s: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            sigma_bound: tuning::SIGMA_BOUND,
            safety_headroom: tuning::SAFETY_HEADROOM,
            convergence_threshold_v: tuning::VAB_CONVERGENCE_THRESHOLD_V,
            max_iterations: tuning::VAB_MAX_ITERATIONS,
            probe_duration_s: tuning::PROBE_PULSE_DURATION_S,
        }
    }
}

/// Robust estimates from one bipolar probe.
struct ProbeStats {
    /// Contact resistance bounds Vab/Iab [ohm].
    rab_lo: f64,
    rab_hi: f64,
    /// Transfer ratio bounds Vmn/Vab [dimensionless].
    k_lo: f64,
    k_hi: f64,
}

/// Pick the injection voltage for the quadrupole currently switched in.
///
/// Returns the voltage the source actually applied. On a fixed supply the
/// probe loop is skipped entirely: there is nothing to adjust.
pub fn compute_injection_voltage(
    ctl: &mut HardwareController,
    strategy: InjectionStrategy,
    tuning: &Tuning,
) -> AcquisitionResult<f64> {
    let bounds = ctl.vab_bounds();

    if !ctl.voltage_adjustable() {
        debug!("fixed supply, skipping voltage optimization");
        return ctl.voltage();
    }

    ctl.reset_gain()?;

    if let InjectionStrategy::Constant { vab_v } = strategy {
        let target = vab_v.clamp(bounds.min, bounds.max);
        if target != vab_v {
            warn!(requested = vab_v, applied = target, "constant voltage bounded");
        }
        return ctl.set_voltage(target);
    }

    let probe_duration = Duration::from_secs_f64(tuning.probe_duration_s);
    let mut vab = bounds.req.clamp(bounds.min, bounds.max);

    for iteration in 0..tuning.max_iterations {
        let applied = ctl.set_voltage(vab)?;
        let Some(stats) = probe(ctl, applied, probe_duration, tuning)? else {
            warn!(iteration, vab, "probe returned no injection samples, keeping current voltage");
            break;
        };

        // Voltage ceilings implied by each hardware limit, with headroom.
        // Pessimistic bound on each: lowest resistance draws the most
        // current and power, highest transfer ratio yields the largest Vmn.
        let iab_cap_v = tuning.safety_headroom * (ctl.iab_bounds_ma().max / 1000.0) * stats.rab_lo;
        let vmn_cap_v = tuning.safety_headroom * (ctl.vmn_bounds_mv().max / 1000.0) / stats.k_hi;
        let power_cap_v = tuning.safety_headroom * (ctl.power_bounds_w().max * stats.rab_lo).sqrt();
        let cap = bounds.max.min(iab_cap_v).min(vmn_cap_v).min(power_cap_v);

        let candidate = match strategy {
            InjectionStrategy::VoltageMax => cap,
            InjectionStrategy::VoltageMin => {
                let vmn_target_v = (ctl.vmn_bounds_mv().req / 1000.0) / stats.k_lo;
                vmn_target_v.clamp(bounds.min, cap)
            }
            InjectionStrategy::Flex { min_agg } => {
                // Voltage needed to reach each requested target, assuming
                // the worst case for that target.
                let needed = [
                    (ctl.vmn_bounds_mv().req / 1000.0) / stats.k_lo,
                    (ctl.iab_bounds_ma().req / 1000.0) * stats.rab_hi,
                    (ctl.power_bounds_w().req * stats.rab_hi).sqrt(),
                    bounds.req,
                ];
                let agg = if min_agg {
                    needed.into_iter().fold(f64::INFINITY, f64::min)
                } else {
                    needed.into_iter().fold(0.0, f64::max)
                };
                agg.clamp(bounds.min, cap)
            }
            InjectionStrategy::Constant { .. } => unreachable!("handled above"),
        };

        debug!(
            iteration,
            vab,
            candidate,
            rab_lo = stats.rab_lo,
            rab_hi = stats.rab_hi,
            cap,
            "voltage optimization step"
        );

        let converged = (candidate - vab).abs() < tuning.convergence_threshold_v;
        vab = candidate;
        if converged {
            break;
        }
    }

    let applied = ctl.set_voltage(vab)?;
    info!(strategy = ?strategy, vab_v = applied, "injection voltage selected");
    Ok(applied)
}

/// One bipolar probe at the supply's current voltage; returns robust bounds
/// over the injection samples, or `None` when the probe saw no current.
fn probe(
    ctl: &mut HardwareController,
    vab_v: f64,
    duration: Duration,
    tuning: &Tuning,
) -> AcquisitionResult<Option<ProbeStats>> {
    ctl.run_pulse(vab_v, duration, Polarity::Forward, false)?;
    ctl.run_pulse(vab_v, duration, Polarity::Reverse, true)?;
    // The conversion register still holds the last sample of the probe, so
    // auto-ranging here sees a representative signal level.
    ctl.auto_gain()?;

    let readings = ctl.readings();
    let iab_ma: Vec<f64> = readings
        .iter()
        .filter(|r| r.polarity != 0)
        .map(|r| r.current_ma.abs())
        .collect();
    let vmn_mv: Vec<f64> = readings
        .iter()
        .filter(|r| r.polarity != 0)
        .map(|r| f64::from(r.polarity) * r.voltage_mv)
        .collect();
    if iab_ma.is_empty() {
        return Ok(None);
    }

    let (iab_lo_ma, iab_hi_ma) = sigma_bounds(&iab_ma, tuning.sigma_bound, 1e-3);
    let (vmn_lo_mv, vmn_hi_mv) = sigma_bounds(&vmn_mv, tuning.sigma_bound, 1e-3);

    Ok(Some(ProbeStats {
        rab_lo: vab_v / (iab_hi_ma / 1000.0),
        rab_hi: vab_v / (iab_lo_ma / 1000.0),
        k_lo: (vmn_lo_mv / 1000.0) / vab_v,
        k_hi: (vmn_hi_mv / 1000.0) / vab_v,
    }))
}
