// tests/safety_interlock.rs
//! Safety-interlock properties, from the pure check up through multi-board
//! switching.

use proptest::prelude::*;

use resistivity_core::acquisition::HardwareController;
use resistivity_core::config::{HardwareConfig, MuxBoardConfig, MuxDefaults, PwrConfig, TxConfig};
use resistivity_core::error::AcquisitionError;
use resistivity_core::hal::bus::{MockBus, MockBusHandle};
use resistivity_core::hal::mux::GpioRelayArray;
use resistivity_core::hal::pwr::BatterySource;
use resistivity_core::hal::relay_bank::{check_roles, role_request, RelayBank};
use resistivity_core::hal::rx::AdsReceiver;
use resistivity_core::hal::tx::{InjectionBoard, Tx};
use resistivity_core::hal::types::{ElectrodeRole, RelayState};

/// Reference predicate: a request is safe iff A and B are disjoint and no
/// injection electrode doubles as a measurement electrode.
fn safe_by_sets(pairs: &[(u16, ElectrodeRole)]) -> bool {
    use std::collections::BTreeSet;
    let set = |role: ElectrodeRole| -> BTreeSet<u16> {
        pairs
            .iter()
            .filter(|(_, r)| *r == role)
            .map(|(e, _)| *e)
            .collect()
    };
    let a = set(ElectrodeRole::A);
    let b = set(ElectrodeRole::B);
    let injection: BTreeSet<u16> = a.union(&b).copied().collect();
    let measurement: BTreeSet<u16> = set(ElectrodeRole::M)
        .union(&set(ElectrodeRole::N))
        .copied()
        .collect();
    a.is_disjoint(&b) && injection.is_disjoint(&measurement)
}

proptest! {
    #[test]
    fn prop_interlock_matches_set_predicate(
        raw in prop::collection::vec((0u16..6, 0usize..4), 1..8)
    ) {
        let pairs: Vec<(u16, ElectrodeRole)> = raw
            .into_iter()
            .map(|(electrode, role)| (electrode, ElectrodeRole::ALL[role]))
            .collect();
        let electrodes: Vec<u16> = pairs.iter().map(|p| p.0).collect();
        let roles: Vec<ElectrodeRole> = pairs.iter().map(|p| p.1).collect();
        let request = role_request(&electrodes, &roles);
        prop_assert_eq!(check_roles(&request).is_ok(), safe_by_sets(&pairs));
    }

    /// Any accepted on/off round trip restores the post-reset relay state.
    #[test]
    fn prop_roundtrip_restores_reset_state(
        raw in prop::collection::vec((0u16..8, 0usize..4), 1..8)
    ) {
        let electrodes: Vec<u16> = raw.iter().map(|(e, _)| *e).collect();
        let roles: Vec<ElectrodeRole> = raw.iter().map(|(_, r)| ElectrodeRole::ALL[*r]).collect();
        let request = role_request(&electrodes, &roles);
        prop_assume!(check_roles(&request).is_ok());

        let (bus, handle) = MockBus::new();
        let array = GpioRelayArray::new(Box::new(bus), 64).unwrap();
        let board = MuxBoardConfig {
            electrodes: (0..8).collect(),
            roles: ElectrodeRole::ALL.to_vec(),
            ..Default::default()
        };
        let defaults = MuxDefaults { activation_delay_ms: 0, release_delay_ms: 0 };
        let bank = RelayBank::new("prop", Box::new(array), &board, &defaults).unwrap();

        bank.reset();
        let baseline: Vec<u16> = (0..8).map(|b| handle.register(0x14 + b)).collect();

        bank.switch(&request, RelayState::On, false).unwrap();
        bank.switch(&request, RelayState::Off, false).unwrap();

        let after: Vec<u16> = (0..8).map(|b| handle.register(0x14 + b)).collect();
        prop_assert_eq!(baseline, after);
    }
}

/// Two banks behind one controller, each with its own inspectable bus.
fn two_bank_controller() -> (HardwareController, MockBusHandle, MockBusHandle) {
    let mut config = HardwareConfig::default();
    config.tx.activation_delay_ms = 0;
    config.tx.release_delay_ms = 0;
    config.pwr.on_delay_ms = 0;

    let bank = |id: &str, electrodes: Vec<u16>| -> (RelayBank, MockBusHandle) {
        let (bus, handle) = MockBus::new();
        let array = GpioRelayArray::new(Box::new(bus), 64).unwrap();
        let board = MuxBoardConfig {
            electrodes,
            roles: ElectrodeRole::ALL.to_vec(),
            ..Default::default()
        };
        let defaults = MuxDefaults { activation_delay_ms: 0, release_delay_ms: 0 };
        (RelayBank::new(id, Box::new(array), &board, &defaults).unwrap(), handle)
    };
    let (left, left_handle) = bank("left", (1..=4).collect());
    let (right, right_handle) = bank("right", (5..=8).collect());

    let tx_config = TxConfig { activation_delay_ms: 0, release_delay_ms: 0, ..TxConfig::default() };
    let (tx_bus, _) = MockBus::new();
    let injector = InjectionBoard::new(Box::new(tx_bus), &tx_config).unwrap();
    let pwr = BatterySource::new(&PwrConfig { on_delay_ms: 0, ..PwrConfig::default() });
    let tx = Tx::new(Box::new(injector), Box::new(pwr), &tx_config);

    let (rx_bus, _) = MockBus::new();
    let rx = AdsReceiver::new(Box::new(rx_bus), &config.rx).unwrap();

    let ctl = HardwareController::new(tx, Box::new(rx), vec![left, right], &config);
    (ctl, left_handle, right_handle)
}

#[test]
fn test_rejected_request_moves_no_relay_on_any_bank() {
    let (ctl, left, right) = two_bank_controller();
    let left_baseline = left.write_count();
    let right_baseline = right.write_count();

    // A and M on the same electrode, with B routed to the other bank.
    let err = ctl
        .switch_relays(
            &[1, 5, 1, 3],
            &ElectrodeRole::ALL,
            RelayState::On,
            false,
        )
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Switch(_)));
    assert_eq!(left.write_count(), left_baseline);
    assert_eq!(right.write_count(), right_baseline);
}

#[test]
fn test_safe_request_energizes_both_banks() {
    let (ctl, left, right) = two_bank_controller();
    let left_baseline = left.write_count();
    let right_baseline = right.write_count();

    // A/M on the left bank, B/N on the right bank.
    ctl.switch_relays(&[1, 5, 2, 6], &ElectrodeRole::ALL, RelayState::On, false)
        .unwrap();
    assert!(left.write_count() > left_baseline);
    assert!(right.write_count() > right_baseline);

    ctl.switch_relays(&[1, 5, 2, 6], &ElectrodeRole::ALL, RelayState::Off, false)
        .unwrap();

    // Round trip leaves every latch cleared on both boards.
    for handle in [&left, &right] {
        for bank in 0..8u16 {
            assert_eq!(handle.register(0x14 + bank), 0);
        }
    }
}

#[test]
fn test_bank_fault_mid_commit_rolls_back_the_peers() {
    let (ctl, left, right) = two_bank_controller();
    // The right board probed fine at init but dies before the commit.
    right.set_responsive(false);

    let err = ctl
        .switch_relays(&[1, 5, 2, 6], &ElectrodeRole::ALL, RelayState::On, false)
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Bus(_)));

    // The left bank energized its slice, then backed it out when the peer
    // faulted: the quadrupole is never left half-switched.
    for bank in 0..8u16 {
        assert_eq!(left.register(0x14 + bank), 0);
    }
}

#[test]
fn test_bypass_permits_calibration_topology() {
    let (ctl, left, _right) = two_bank_controller();
    let baseline = left.write_count();

    // A and M on the same electrode is legal only with the bypass, used by
    // contact-calibration runs.
    ctl.switch_relays(
        &[1, 2, 1, 3],
        &ElectrodeRole::ALL,
        RelayState::On,
        true,
    )
    .unwrap();
    assert!(left.write_count() > baseline);
    ctl.reset_all_relays();
}

#[test]
fn test_unrouted_electrode_is_skipped() {
    let (ctl, left, right) = two_bank_controller();
    let left_baseline = left.write_count();
    let right_baseline = right.write_count();

    // Electrode 99 exists on neither bank; the rest must still switch.
    ctl.switch_relays(
        &[1, 99, 2, 3],
        &ElectrodeRole::ALL,
        RelayState::On,
        false,
    )
    .unwrap();
    assert!(left.write_count() > left_baseline);
    assert_eq!(right.write_count(), right_baseline);
    ctl.reset_all_relays();
}
