// tests/acquisition_integration.rs
//! End-to-end acquisition runs against the simulated rig. Timing-sensitive,
//! hence serialized: parallel test threads starve the samplers and make the
//! cadence assertions flaky.

use std::time::Duration;

use serial_test::serial;

use resistivity_core::acquisition::{
    AcquisitionOrchestrator, AcquisitionSettings, HardwareController, InjectionStrategy,
    Quadrupole, Tuning,
};
use resistivity_core::config::{HardwareConfig, MuxBoardConfig, MuxDefaults};
use resistivity_core::hal::relay_bank::RelayBank;
use resistivity_core::hal::simulator::{SimRig, SimRigConfig};
use resistivity_core::hal::tx::Tx;
use resistivity_core::hal::types::ElectrodeRole;

fn controller(rig: &SimRig, config: &HardwareConfig) -> HardwareController {
    let tx = Tx::new(Box::new(rig.injector()), Box::new(rig.power()), &config.tx);
    let board = MuxBoardConfig {
        electrodes: (1..=8).collect(),
        roles: ElectrodeRole::ALL.to_vec(),
        ..Default::default()
    };
    let defaults = MuxDefaults { activation_delay_ms: 0, release_delay_ms: 0 };
    let bank = RelayBank::new("sim", Box::new(rig.relays()), &board, &defaults).unwrap();
    HardwareController::new(tx, Box::new(rig.sensor()), vec![bank], config)
}

fn fast_config() -> HardwareConfig {
    let mut config = HardwareConfig::default();
    config.tx.activation_delay_ms = 0;
    config.tx.release_delay_ms = 0;
    config.ctl.sampling_rate_hz = 1000.0;
    config.ctl.delay_s = 0.0;
    config
}

fn fast_settings(strategy: InjectionStrategy) -> AcquisitionSettings {
    AcquisitionSettings {
        strategy,
        tuning: Tuning { probe_duration_s: 0.02, ..Tuning::default() },
        injection_duration_s: 0.04,
        duty_cycle: 1.0,
        nb_stack: 2,
    }
}

#[test]
#[serial]
fn test_constant_strategy_survey() {
    let rig = SimRig::new(SimRigConfig::default());
    let ctl = controller(&rig, &fast_config());
    let mut orchestrator = AcquisitionOrchestrator::new(
        ctl,
        fast_settings(InjectionStrategy::Constant { vab_v: 10.0 }),
    );

    let sequence = [
        Quadrupole { a: 1, b: 4, m: 2, n: 3 },
        Quadrupole { a: 2, b: 5, m: 3, n: 4 },
    ];
    let measurements = orchestrator.run_sequence(&sequence);
    assert_eq!(measurements.len(), 2);
    for m in &measurements {
        // Default rig: R = 0.05 * 100 ohm = 5 ohm at 10 V, 100 mA.
        assert!((m.resistance_ohm - 5.0).abs() < 1e-6, "got {}", m.resistance_ohm);
        assert!((m.iab_ma - 100.0).abs() < 1e-6);
        assert!((m.vmn_mv - 500.0).abs() < 1e-6);
        assert_eq!(m.vab_v, 10.0);
        assert!(m.dev_percent < 1e-6);

        // nb_stack = 2 at duty 1.0: two positive and two negative pulses.
        let mut by_polarity = (0u32, 0u32);
        let mut pulses: Vec<(u32, i8)> = m.readings.iter().map(|r| (r.pulse, r.polarity)).collect();
        pulses.sort_unstable();
        pulses.dedup();
        for (_, polarity) in &pulses {
            match polarity {
                1 => by_polarity.0 += 1,
                -1 => by_polarity.1 += 1,
                _ => {}
            }
        }
        assert_eq!(by_polarity, (2, 2));
    }
}

#[test]
#[serial]
fn test_voltage_max_honors_current_limit_end_to_end() {
    let rig = SimRig::new(SimRigConfig::default());
    let mut config = fast_config();
    config.pwr.current_ma.max = 200.0;
    let ctl = controller(&rig, &config);
    let mut orchestrator =
        AcquisitionOrchestrator::new(ctl, fast_settings(InjectionStrategy::VoltageMax));

    let m = orchestrator.measure(&Quadrupole { a: 1, b: 4, m: 2, n: 3 }).unwrap();
    // 0.9 headroom * 200 mA * 100 ohm = 18 V ceiling from the current limit.
    assert!((m.vab_v - 18.0).abs() < 1.0, "got {}", m.vab_v);
    assert!(m.iab_ma <= 200.0, "current limit violated: {} mA", m.iab_ma);
}

#[test]
#[serial]
fn test_self_potential_recovered_end_to_end() {
    let rig = SimRig::new(SimRigConfig { sp_mv: 40.0, ..SimRigConfig::default() });
    let ctl = controller(&rig, &fast_config());
    let mut orchestrator = AcquisitionOrchestrator::new(
        ctl,
        fast_settings(InjectionStrategy::Constant { vab_v: 10.0 }),
    );

    let m = orchestrator.measure(&Quadrupole { a: 1, b: 4, m: 2, n: 3 }).unwrap();
    // The SP offset must cancel out of the resistance and show up in sp_mv.
    assert!((m.resistance_ohm - 5.0).abs() < 1e-6, "got {}", m.resistance_ohm);
    assert!((m.sp_mv - 40.0).abs() < 1e-6, "got {}", m.sp_mv);
}

#[test]
#[serial]
fn test_stacking_and_duty_cycle_pulse_layout() {
    let rig = SimRig::new(SimRigConfig::default());
    let ctl = controller(&rig, &fast_config());
    let mut settings = fast_settings(InjectionStrategy::Constant { vab_v: 10.0 });
    settings.nb_stack = 3;
    settings.duty_cycle = 0.5;
    settings.injection_duration_s = 0.06;
    let mut orchestrator = AcquisitionOrchestrator::new(ctl, settings);

    let m = orchestrator.measure(&Quadrupole { a: 1, b: 4, m: 2, n: 3 }).unwrap();
    // Duty 0.5: each half-cycle is injection + rest, 4 pulses per cycle.
    let mut pulses: Vec<u32> = m.readings.iter().map(|r| r.pulse).collect();
    pulses.sort_unstable();
    pulses.dedup();
    assert_eq!(pulses.len(), 12);

    // Injection pulses alternate polarity; rest pulses carry none.
    let polarities: Vec<i8> = pulses
        .iter()
        .map(|p| m.readings.iter().find(|r| r.pulse == *p).unwrap().polarity)
        .collect();
    assert_eq!(&polarities[..4], &[1, 0, -1, 0]);
    assert!((m.resistance_ohm - 5.0).abs() < 1e-6);
}

#[test]
#[serial]
fn test_sampling_cadence_is_deadline_based() {
    let rig = SimRig::new(SimRigConfig::default());
    let mut config = fast_config();
    config.ctl.sampling_rate_hz = 500.0;
    let ctl = controller(&rig, &config);
    let mut orchestrator = AcquisitionOrchestrator::new(
        ctl,
        fast_settings(InjectionStrategy::Constant { vab_v: 10.0 }),
    );

    let m = orchestrator.measure(&Quadrupole { a: 1, b: 4, m: 2, n: 3 }).unwrap();
    // 4 injection half-cycles of 40 ms at 500 Hz: roughly 20 samples each,
    // with generous slack for scheduling.
    assert!(m.readings.len() >= 40, "only {} samples", m.readings.len());
    assert!(
        m.readings.windows(2).all(|w| w[0].elapsed <= w[1].elapsed),
        "elapsed must be monotonic across the train"
    );
}

#[test]
#[serial]
fn test_noisy_rig_keeps_deviation_small() {
    let rig = SimRig::new(SimRigConfig { noise_mv: 5.0, ..SimRigConfig::default() });
    let ctl = controller(&rig, &fast_config());
    let mut orchestrator = AcquisitionOrchestrator::new(
        ctl,
        fast_settings(InjectionStrategy::Constant { vab_v: 10.0 }),
    );

    let m = orchestrator.measure(&Quadrupole { a: 1, b: 4, m: 2, n: 3 }).unwrap();
    // 5 mV of noise on a 500 mV signal: resistance within a percent, and
    // the stacked deviation stays small.
    assert!((m.resistance_ohm - 5.0).abs() < 0.05, "got {}", m.resistance_ohm);
    assert!(m.dev_percent < 5.0, "got {}", m.dev_percent);
}

#[test]
#[serial]
fn test_contact_check_flags_the_line() {
    let rig = SimRig::new(SimRigConfig::default());
    let ctl = controller(&rig, &fast_config());
    let mut orchestrator = AcquisitionOrchestrator::new(
        ctl,
        fast_settings(InjectionStrategy::Constant { vab_v: 10.0 }),
    );

    let checks = orchestrator.rs_check(&[(1, 2), (3, 4), (5, 6)], 5.0);
    assert_eq!(checks.len(), 3);
    for check in &checks {
        let rab = check.rab_ohm.expect("current must flow on the sim rig");
        assert!((rab - 100.0).abs() < 1e-6, "got {rab}");
    }
}

#[test]
#[serial]
fn test_stop_handle_from_another_thread() {
    let rig = SimRig::new(SimRigConfig::default());
    let ctl = controller(&rig, &fast_config());
    let mut orchestrator = AcquisitionOrchestrator::new(
        ctl,
        fast_settings(InjectionStrategy::Constant { vab_v: 10.0 }),
    );
    let stop = orchestrator.stop_handle();

    let sequence: Vec<Quadrupole> = (1..=5)
        .map(|i| Quadrupole { a: i, b: i + 3, m: i + 1, n: i + 2 })
        .collect();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(60));
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
    });
    let measurements = orchestrator.run_sequence(&sequence);
    handle.join().unwrap();
    // At least one quadrupole completes before the flag lands, and the
    // sequence must not run to completion.
    assert!(!measurements.is_empty());
    assert!(measurements.len() < sequence.len());
}
