// src/acquisition/orchestrator.rs
//! Sequence orchestration: walk a list of quadrupoles, pick a voltage,
//! stack a square wave and collect one measurement per quadrupole.
//!
//! A quadrupole that trips the interlock or fails mid-measurement is
//! skipped with a warning and the sequence continues; a field survey must
//! survive one bad electrode. The stop flag is honored at quadrupole
//! boundaries only, so relays are never abandoned mid-switch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::acquisition::controller::HardwareController;
use crate::acquisition::strategy::{compute_injection_voltage, InjectionStrategy, Tuning};
use crate::hal::types::{ElectrodeRole, Polarity, Reading, RelayState};

/// One four-electrode measurement geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Quadrupole {
    /// Positive injection electrode.
    pub a: u16,
    /// Negative injection electrode.
    pub b: u16,
    /// First measurement electrode.
    pub m: u16,
    /// Second measurement electrode.
    pub n: u16,
}

impl Quadrupole {
    /// Electrode numbers in role order A, B, M, N.
    pub fn electrodes(&self) -> [u16; 4] {
        [self.a, self.b, self.m, self.n]
    }
}

impl fmt::Display for Quadrupole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{} B{} M{} N{}", self.a, self.b, self.m, self.n)
    }
}

/// Per-sequence acquisition settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub strategy: InjectionStrategy,
    pub tuning: Tuning,
    /// Duration of one injection half-cycle [s].
    pub injection_duration_s: f64,
    /// Fraction of each half-cycle spent injecting; the rest is a rest
    /// pulse with the polarity relays open.
    pub duty_cycle: f64,
    /// Number of full bipolar cycles stacked into one measurement.
    pub nb_stack: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            strategy: InjectionStrategy::default(),
            tuning: Tuning::default(),
            injection_duration_s: 0.5,
            duty_cycle: 1.0,
            nb_stack: 2,
        }
    }
}

/// Aggregated result for one quadrupole.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    /// The geometry this measurement was taken on.
    pub quadrupole: Quadrupole,
    /// Injection voltage actually applied [V].
    pub vab_v: f64,
    /// Stacked transfer resistance [ohm].
    pub resistance_ohm: f64,
    /// Percent deviation of the per-pulse resistances.
    pub dev_percent: f64,
    /// Mean injected current magnitude [mA].
    pub iab_ma: f64,
    /// Mean polarity-corrected potential difference [mV].
    pub vmn_mv: f64,
    /// Self-potential estimate [mV].
    pub sp_mv: f64,
    /// Number of stacked bipolar cycles.
    pub stacks: u32,
    /// Full synchronized waveform behind the aggregates.
    pub readings: Vec<Reading>,
}

impl Measurement {
    /// One JSON line for survey logs.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Contact-resistance estimate for one injection pair.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ContactCheck {
    /// Positive injection electrode of the probed pair.
    pub a: u16,
    /// Negative injection electrode of the probed pair.
    pub b: u16,
    /// Probe voltage applied [V].
    pub vab_v: f64,
    /// Current drawn during the probe [mA].
    pub iab_ma: f64,
    /// Contact resistance Vab/Iab, absent when no current flowed.
    pub rab_ohm: Option<f64>,
}

/// Walks quadrupole sequences against one controller.
pub struct AcquisitionOrchestrator {
    ctl: HardwareController,
    settings: AcquisitionSettings,
    stop: Arc<AtomicBool>,
}

impl AcquisitionOrchestrator {
    /// Bind settings to a controller.
    pub fn new(ctl: HardwareController, settings: AcquisitionSettings) -> Self {
        Self {
            ctl,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag another thread can raise to stop the sequence at the next
    /// quadrupole boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Active acquisition settings.
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Shared view of the underlying controller.
    pub fn controller(&self) -> &HardwareController {
        &self.ctl
    }

    /// Measure every quadrupole in order; skipped ones yield no entry.
    pub fn run_sequence(&mut self, sequence: &[Quadrupole]) -> Vec<Measurement> {
        let mut measurements = Vec::with_capacity(sequence.len());
        for (index, quadrupole) in sequence.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                info!(completed = index, total = sequence.len(), "sequence stopped");
                break;
            }
            info!(%quadrupole, index, "measuring");
            if let Some(measurement) = self.measure(quadrupole) {
                measurements.push(measurement);
            }
        }
        self.ctl.reset_all_relays();
        measurements
    }

    /// One full measurement: switch in, pick a voltage, stack, switch out.
    pub fn measure(&mut self, quadrupole: &Quadrupole) -> Option<Measurement> {
        let electrodes = quadrupole.electrodes();
        let roles = ElectrodeRole::ALL;

        if let Err(err) = self.ctl.switch_relays(&electrodes, &roles, RelayState::On, false) {
            warn!(%quadrupole, %err, "switch-in failed, quadrupole skipped");
            self.switch_out(&electrodes, &roles);
            return None;
        }

        let vab_v = match compute_injection_voltage(
            &mut self.ctl,
            self.settings.strategy,
            &self.settings.tuning,
        ) {
            Ok(v) => v,
            Err(err) => {
                warn!(%quadrupole, %err, "voltage selection failed, quadrupole skipped");
                self.switch_out(&electrodes, &roles);
                return None;
            }
        };

        let cycle = Duration::from_secs_f64(2.0 * self.settings.injection_duration_s);
        if let Err(err) = self.ctl.run_square_wave(
            vab_v,
            cycle,
            self.settings.nb_stack,
            Polarity::Forward,
            self.settings.duty_cycle,
        ) {
            warn!(%quadrupole, %err, "square wave failed, quadrupole skipped");
            self.switch_out(&electrodes, &roles);
            return None;
        }

        let measurement = Measurement {
            quadrupole: *quadrupole,
            vab_v,
            resistance_ohm: self.ctl.resistance(),
            dev_percent: self.ctl.dev_percent(),
            iab_ma: self.ctl.iab_ma(),
            vmn_mv: self.ctl.vmn_mv(),
            sp_mv: self.ctl.sp_mv(),
            stacks: self.settings.nb_stack,
            readings: self.ctl.readings(),
        };
        self.switch_out(&electrodes, &roles);
        Some(measurement)
    }

    /// Contact-resistance sweep over injection pairs. Diagnostic run before
    /// a survey: a pair with poor galvanic contact shows up as a very large
    /// or absent resistance.
    pub fn rs_check(&mut self, pairs: &[(u16, u16)], vab_v: f64) -> Vec<ContactCheck> {
        let roles = [ElectrodeRole::A, ElectrodeRole::B];
        let probe = Duration::from_secs_f64(self.settings.tuning.probe_duration_s.max(0.1));
        let mut checks = Vec::with_capacity(pairs.len());

        for &(a, b) in pairs {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let electrodes = [a, b];
            if let Err(err) = self.ctl.switch_relays(&electrodes, &roles, RelayState::On, false) {
                warn!(a, b, %err, "contact check pair skipped");
                continue;
            }
            let outcome = self
                .ctl
                .set_voltage(vab_v)
                .and_then(|applied| {
                    self.ctl
                        .run_pulse(applied, probe, Polarity::Forward, false)
                        .map(|()| applied)
                });
            self.switch_out(&electrodes, &roles);

            match outcome {
                Ok(applied) => {
                    let iab_ma = self.ctl.iab_ma();
                    let rab_ohm = (iab_ma > 0.0).then(|| applied / (iab_ma / 1000.0));
                    info!(a, b, iab_ma, ?rab_ohm, "contact check");
                    checks.push(ContactCheck { a, b, vab_v: applied, iab_ma, rab_ohm });
                }
                Err(err) => warn!(a, b, %err, "contact check probe failed"),
            }
        }
        checks
    }

    /// Best-effort switch-out; failures are logged, never propagated.
    fn switch_out(&self, electrodes: &[u16], roles: &[ElectrodeRole]) {
        if let Err(err) = self
            .ctl
            .switch_relays(electrodes, roles, RelayState::Off, false)
        {
            warn!(%err, "switch-out failed, forcing a full relay reset");
            self.ctl.reset_all_relays();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HardwareConfig, MuxBoardConfig, MuxDefaults};
    use crate::hal::relay_bank::RelayBank;
    use crate::hal::simulator::{SimRig, SimRigConfig};
    use crate::hal::tx::Tx;

    fn sim_orchestrator(rig: &SimRig) -> AcquisitionOrchestrator {
        let mut config = HardwareConfig::default();
        config.tx.activation_delay_ms = 0;
        config.tx.release_delay_ms = 0;
        config.ctl.sampling_rate_hz = 1000.0;
        config.ctl.delay_s = 0.0;
        let tx = Tx::new(Box::new(rig.injector()), Box::new(rig.power()), &config.tx);
        let board_config = MuxBoardConfig {
            electrodes: (1..=8).collect(),
            roles: ElectrodeRole::ALL.to_vec(),
            ..Default::default()
        };
        let defaults = MuxDefaults { activation_delay_ms: 0, release_delay_ms: 0 };
        let bank = RelayBank::new("sim", Box::new(rig.relays()), &board_config, &defaults).unwrap();
        let ctl = HardwareController::new(tx, Box::new(rig.sensor()), vec![bank], &config);
        let settings = AcquisitionSettings {
            strategy: InjectionStrategy::Constant { vab_v: 10.0 },
            tuning: Tuning { probe_duration_s: 0.02, ..Tuning::default() },
            injection_duration_s: 0.04,
            duty_cycle: 1.0,
            nb_stack: 2,
        };
        AcquisitionOrchestrator::new(ctl, settings)
    }

    #[test]
    fn test_measure_on_sim_rig() {
        let rig = SimRig::new(SimRigConfig::default());
        let mut orchestrator = sim_orchestrator(&rig);

        let q = Quadrupole { a: 1, b: 4, m: 2, n: 3 };
        let m = orchestrator.measure(&q).unwrap();
        // 10 V over 100 ohm, transfer ratio 0.05: R = 5 ohm, Iab = 100 mA.
        assert!((m.resistance_ohm - 5.0).abs() < 1e-6, "got {}", m.resistance_ohm);
        assert!((m.iab_ma - 100.0).abs() < 1e-6);
        assert!((m.vmn_mv - 500.0).abs() < 1e-6);
        assert_eq!(m.vab_v, 10.0);
        assert_eq!(m.stacks, 2);
        assert!(!m.readings.is_empty());

        let line = m.to_json().unwrap();
        assert!(line.contains("\"resistance_ohm\""));
        assert!(line.contains("\"quadrupole\""));
    }

    #[test]
    fn test_unsafe_quadrupole_is_skipped_not_fatal() {
        let rig = SimRig::new(SimRigConfig::default());
        let mut orchestrator = sim_orchestrator(&rig);

        let sequence = [
            Quadrupole { a: 1, b: 1, m: 2, n: 3 }, // A/B short
            Quadrupole { a: 1, b: 4, m: 2, n: 3 },
        ];
        let measurements = orchestrator.run_sequence(&sequence);
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].quadrupole, sequence[1]);
    }

    #[test]
    fn test_stop_flag_halts_at_boundary() {
        let rig = SimRig::new(SimRigConfig::default());
        let mut orchestrator = sim_orchestrator(&rig);
        orchestrator.stop_handle().store(true, Ordering::SeqCst);

        let sequence = [Quadrupole { a: 1, b: 4, m: 2, n: 3 }];
        assert!(orchestrator.run_sequence(&sequence).is_empty());
    }

    #[test]
    fn test_rs_check_reports_contact_resistance() {
        let rig = SimRig::new(SimRigConfig::default());
        let mut orchestrator = sim_orchestrator(&rig);

        let checks = orchestrator.rs_check(&[(1, 2), (2, 3)], 5.0);
        assert_eq!(checks.len(), 2);
        for check in checks {
            let rab = check.rab_ohm.unwrap();
            assert!((rab - 100.0).abs() < 1e-6, "got {rab}");
        }
    }
}
