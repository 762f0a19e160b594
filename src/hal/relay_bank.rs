// src/hal/relay_bank.rs
//! Relay bank: per-board relay ownership, cabling resolution and the
//! safety interlock.
//!
//! The interlock runs before any relay is touched, so a rejected request
//! leaves every relay in its prior state (all-or-nothing). Pairs absent
//! from this board's cabling are skipped with a warning, never an error:
//! partial quadrupoles are common during commissioning, and it is what lets
//! several banks be switched at once for one logical quadrupole.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{MuxBoardConfig, MuxDefaults};
use crate::error::{AcquisitionError, SwitchError};
use crate::hal::traits::RelayArray;
use crate::hal::types::{ElectrodeRole, RelayAddress, RelayState};

/// A switch request: for each role, the electrodes to connect.
pub type RoleRequest = BTreeMap<ElectrodeRole, Vec<u16>>;

/// Build a [`RoleRequest`] from parallel electrode/role slices.
pub fn role_request(electrodes: &[u16], roles: &[ElectrodeRole]) -> RoleRequest {
    let mut request = RoleRequest::new();
    for (&electrode, &role) in electrodes.iter().zip(roles.iter()) {
        request.entry(role).or_default().push(electrode);
    }
    request
}

/// Safety interlock: reject requests that would energize a dangerous relay
/// combination. Pure over the request, touches no hardware.
///
/// Rejections are fail-closed values, never panics: the caller skips the
/// quadrupole and the survey continues.
pub fn check_roles(request: &RoleRequest) -> Result<(), SwitchError> {
    let collect = |role: ElectrodeRole| -> BTreeSet<u16> {
        request.get(&role).map(|v| v.iter().copied().collect()).unwrap_or_default()
    };
    let a = collect(ElectrodeRole::A);
    let b = collect(ElectrodeRole::B);
    let m = collect(ElectrodeRole::M);
    let n = collect(ElectrodeRole::N);

    // Same electrode as both injection poles shorts the source.
    let shorts: Vec<u16> = a.intersection(&b).copied().collect();
    if !shorts.is_empty() {
        return Err(SwitchError::ShortCircuitRisk(shorts));
    }

    // Injection voltage on a measurement electrode endangers the RX front
    // end. M and N may share an electrode with each other, just not with A/B.
    let injection: BTreeSet<u16> = a.union(&b).copied().collect();
    let measurement: BTreeSet<u16> = m.union(&n).copied().collect();
    let overlaps: Vec<u16> = injection.intersection(&measurement).copied().collect();
    if !overlaps.is_empty() {
        return Err(SwitchError::OverVoltageRisk(overlaps));
    }

    Ok(())
}

/// One multiplexer board: relay array + immutable cabling map + delays.
pub struct RelayBank {
    board_id: String,
    relays: Mutex<Box<dyn RelayArray>>,
    cabling: HashMap<(u16, ElectrodeRole), u16>,
    activation_delay: Duration,
    release_delay: Duration,
}

impl std::fmt::Debug for RelayBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBank")
            .field("board_id", &self.board_id)
            .finish_non_exhaustive()
    }
}

impl RelayBank {
    /// Resolve the cabling map and wrap the relay array.
    ///
    /// The map is computed once here and never mutated during acquisition.
    /// Explicit `cabling` entries win; otherwise the map is generated
    /// electrode-major over the board's role list.
    pub fn new(
        board_id: &str,
        relays: Box<dyn RelayArray>,
        config: &MuxBoardConfig,
        defaults: &MuxDefaults,
    ) -> Result<Self, AcquisitionError> {
        let channel_count = relays.channel_count();
        let mut cabling = HashMap::new();

        if let Some(entries) = &config.cabling {
            for entry in entries {
                insert_address(&mut cabling, board_id, entry.electrode, entry.role, entry.channel, channel_count)?;
            }
        } else {
            for (ei, &electrode) in config.electrodes.iter().enumerate() {
                for (ri, &role) in config.roles.iter().enumerate() {
                    let channel = (ei * config.roles.len() + ri) as u16;
                    insert_address(&mut cabling, board_id, electrode, role, channel, channel_count)?;
                }
            }
        }

        Ok(Self {
            board_id: board_id.to_string(),
            relays: Mutex::new(relays),
            cabling,
            activation_delay: Duration::from_millis(
                config.activation_delay_ms.unwrap_or(defaults.activation_delay_ms),
            ),
            release_delay: Duration::from_millis(
                config.release_delay_ms.unwrap_or(defaults.release_delay_ms),
            ),
        })
    }

    /// Identifier from the multiplexer configuration.
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Whether this board owns the given (electrode, role) pair.
    pub fn owns(&self, electrode: u16, role: ElectrodeRole) -> bool {
        self.cabling.contains_key(&(electrode, role))
    }

    /// Resolved hardware address of a pair, when owned.
    pub fn address(&self, electrode: u16, role: ElectrodeRole) -> Option<RelayAddress> {
        self.cabling.get(&(electrode, role)).map(|&channel| RelayAddress {
            board: self.board_id.clone(),
            channel,
        })
    }

    /// Switch the requested pairs after the safety interlock.
    ///
    /// The check runs only when energizing; releasing relays is always safe.
    pub fn switch(
        &self,
        request: &RoleRequest,
        state: RelayState,
        bypass_check: bool,
    ) -> Result<(), AcquisitionError> {
        if state == RelayState::On && !bypass_check {
            check_roles(request)?;
        }
        self.switch_unchecked(request, state)
    }

    /// Toggle owned pairs without re-running the interlock. Used by the
    /// controller after its request-wide check has already passed.
    pub(crate) fn switch_unchecked(
        &self,
        request: &RoleRequest,
        state: RelayState,
    ) -> Result<(), AcquisitionError> {
        let on = state == RelayState::On;
        let mut toggled = 0u32;
        {
            let mut relays = self.relays.lock();
            for (&role, electrodes) in request {
                for &electrode in electrodes {
                    match self.cabling.get(&(electrode, role)) {
                        Some(&channel) => {
                            relays.set_relay(channel, on)?;
                            toggled += 1;
                        }
                        None => {
                            warn!(
                                board = %self.board_id,
                                electrode,
                                %role,
                                "no cabling for electrode/role on this board, skipped"
                            );
                        }
                    }
                }
            }
        }
        if toggled > 0 {
            // Relay mechanical bounce time; part of the switch contract.
            thread::sleep(if on { self.activation_delay } else { self.release_delay });
            debug!(board = %self.board_id, toggled, on, "relays switched");
        }
        Ok(())
    }

    /// Force every owned relay off. Never fails: a bus fault here is logged
    /// and swallowed because reset runs on recovery paths.
    pub fn reset(&self) {
        if let Err(err) = self.relays.lock().reset_all() {
            warn!(board = %self.board_id, %err, "relay reset reported a bus fault");
        }
        thread::sleep(self.release_delay);
    }

    /// Commissioning sweep: each requested pair on, wait, off, wait.
    /// Diagnostic only, not on the acquisition hot path.
    pub fn test(&self, request: &RoleRequest, activation_time: Duration) -> Result<(), AcquisitionError> {
        for (&role, electrodes) in request {
            for &electrode in electrodes {
                let Some(&channel) = self.cabling.get(&(electrode, role)) else {
                    continue;
                };
                let mut single = RoleRequest::new();
                single.insert(role, vec![electrode]);
                debug!(board = %self.board_id, electrode, %role, channel, "mux test step");
                self.switch_unchecked(&single, RelayState::On)?;
                thread::sleep(activation_time);
                self.switch_unchecked(&single, RelayState::Off)?;
                thread::sleep(activation_time);
            }
        }
        Ok(())
    }
}

fn insert_address(
    cabling: &mut HashMap<(u16, ElectrodeRole), u16>,
    board_id: &str,
    electrode: u16,
    role: ElectrodeRole,
    channel: u16,
    channel_count: u16,
) -> Result<(), AcquisitionError> {
    if channel >= channel_count {
        return Err(AcquisitionError::Config(format!(
            "board '{board_id}': cabling for electrode {electrode} role {role} points at channel {channel}, but the board has {channel_count} channels"
        )));
    }
    if cabling.insert((electrode, role), channel).is_some() {
        warn!(board = board_id, electrode, %role, "duplicate cabling entry, keeping the last one");
    }
    Ok(())
}
