// src/acquisition/controller.rs
//! Hardware controller: quadrupole switching across relay banks and the
//! synchronized pulse engine.
//!
//! Switching is all-or-nothing across boards: the interlock runs once over
//! the full request, then every involved bank commits behind a barrier; a
//! bus fault on any bank raises an abort flag and the peers back their
//! slice out, so no board is left half-switched. Sampling runs against
//! absolute deadlines derived from the pulse start, so cadence does not
//! drift with per-sample jitter; a sampler that falls behind by more than
//! one period skips the missed slots instead of bunching readings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::acquisition::waveform::Waveform;
use crate::config::{Bounds, HardwareConfig, PwrKind};
use crate::error::{AcquisitionError, AcquisitionResult, BusError};
use crate::hal::bus::RegisterBus;
use crate::hal::mux::GpioRelayArray;
use crate::hal::pwr::{BatterySource, RegulatedSupply};
use crate::hal::relay_bank::{check_roles, role_request, RelayBank, RoleRequest};
use crate::hal::rx::AdsReceiver;
use crate::hal::traits::{PowerControl, VoltageSensor};
use crate::hal::tx::{InjectionBoard, Tx};
use crate::hal::types::{ElectrodeRole, Polarity, Reading, RelayState};

/// Opens the bus device behind a configured interface name.
pub type BusOpener<'a> = dyn FnMut(&str) -> Result<Box<dyn RegisterBus>, BusError> + 'a;

/// Orchestrates the transmitter, receiver and relay banks for one rig.
pub struct HardwareController {
    tx: Arc<Mutex<Tx>>,
    rx: Arc<Mutex<Box<dyn VoltageSensor>>>,
    banks: Vec<RelayBank>,
    waveform: Arc<RwLock<Waveform>>,
    sampling_period: Duration,
    delay: Duration,
    pulse_counter: u32,
    train_start: Instant,
    vab_bounds: Bounds,
    iab_bounds_ma: Bounds,
    power_bounds_w: Bounds,
    vmn_bounds_mv: Bounds,
}

impl std::fmt::Debug for HardwareController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareController").finish_non_exhaustive()
    }
}

impl HardwareController {
    /// Wrap already-constructed devices; [`from_config`](Self::from_config)
    /// is the usual entry point on real hardware.
    ///
    /// The config is clamped into the hardware specification ranges here,
    /// so the bounds the strategies see stay in spec regardless of how the
    /// config was produced.
    pub fn new(
        tx: Tx,
        rx: Box<dyn VoltageSensor>,
        banks: Vec<RelayBank>,
        config: &HardwareConfig,
    ) -> Self {
        let config = config.clone().clamped();
        info!(
            banks = banks.len(),
            sampling_rate_hz = config.ctl.sampling_rate_hz,
            "hardware controller up"
        );
        Self {
            tx: Arc::new(Mutex::new(tx)),
            rx: Arc::new(Mutex::new(rx)),
            banks,
            waveform: Arc::new(RwLock::new(Waveform::new())),
            sampling_period: Duration::from_secs_f64(1.0 / config.ctl.sampling_rate_hz),
            delay: Duration::from_secs_f64(config.ctl.delay_s),
            pulse_counter: 0,
            train_start: Instant::now(),
            vab_bounds: config.pwr.voltage,
            iab_bounds_ma: config.pwr.current_ma,
            power_bounds_w: config.pwr.power_w,
            vmn_bounds_mv: config.rx.vmn_mv,
        }
    }

    /// Assemble the controller from configuration, opening each device
    /// through `open_bus`.
    ///
    /// The power source, transmitter and receiver are essential: a failed
    /// probe on any of them aborts assembly. A multiplexer board that does
    /// not answer is dropped with a warning and the rest of the rig comes up.
    pub fn from_config(
        config: &HardwareConfig,
        open_bus: &mut BusOpener<'_>,
    ) -> AcquisitionResult<Self> {
        let config = config.clone().clamped();
        let interface = |name: &Option<String>, fallback: &str| -> String {
            name.clone().unwrap_or_else(|| fallback.to_string())
        };
        let unresponsive = |board: String| {
            move |source: BusError| AcquisitionError::DeviceUnresponsive { board, source }
        };

        let pwr: Box<dyn PowerControl> = match config.pwr.kind {
            PwrKind::Battery => Box::new(BatterySource::new(&config.pwr)),
            PwrKind::Adjustable => {
                let name = interface(&config.pwr.interface_name, "pwr");
                let supply = RegulatedSupply::new(open_bus(&name)?, &config.pwr)
                    .map_err(unresponsive(name))?;
                Box::new(supply)
            }
        };

        let tx_name = interface(&config.tx.interface_name, "tx");
        let injector = InjectionBoard::new(open_bus(&tx_name)?, &config.tx)
            .map_err(unresponsive(tx_name))?;
        let tx = Tx::new(Box::new(injector), pwr, &config.tx);

        let rx_name = interface(&config.rx.interface_name, "rx");
        let rx = AdsReceiver::new(open_bus(&rx_name)?, &config.rx)
            .map_err(unresponsive(rx_name))?;

        let mut banks = Vec::new();
        for (board_id, board_config) in &config.mux.boards {
            let name = interface(&board_config.interface_name, board_id);
            let channels = match &board_config.cabling {
                Some(entries) => entries
                    .iter()
                    .map(|e| e.channel.saturating_add(1))
                    .max()
                    .unwrap_or(0),
                None => (board_config.electrodes.len() * board_config.roles.len()) as u16,
            };
            let array = open_bus(&name)
                .and_then(|bus| GpioRelayArray::new(bus, channels));
            match array {
                Ok(array) => banks.push(RelayBank::new(
                    board_id,
                    Box::new(array),
                    board_config,
                    &config.mux.default,
                )?),
                Err(err) => {
                    warn!(board = %board_id, %err, "multiplexer board unresponsive, dropped");
                }
            }
        }

        Ok(Self::new(tx, Box::new(rx), banks, &config))
    }

    /// Injection voltage bounds [V].
    pub fn vab_bounds(&self) -> Bounds {
        self.vab_bounds
    }

    /// Injection current bounds [mA].
    pub fn iab_bounds_ma(&self) -> Bounds {
        self.iab_bounds_ma
    }

    /// Injection power bounds [W].
    pub fn power_bounds_w(&self) -> Bounds {
        self.power_bounds_w
    }

    /// Measured potential bounds [mV].
    pub fn vmn_bounds_mv(&self) -> Bounds {
        self.vmn_bounds_mv
    }

    /// Whether the bound power source supports the optimization loop.
    pub fn voltage_adjustable(&self) -> bool {
        self.tx.lock().voltage_adjustable()
    }

    /// Request an injection voltage from the source; returns the value it
    /// actually applied.
    pub fn set_voltage(&self, volts: f64) -> AcquisitionResult<f64> {
        self.tx.lock().set_voltage(volts)
    }

    /// Voltage the source currently reports [V].
    pub fn voltage(&self) -> AcquisitionResult<f64> {
        self.tx.lock().voltage()
    }

    /// Partition a quadrupole request across the banks and switch them as
    /// one atomic group.
    ///
    /// The interlock runs once over the full request, before any thread is
    /// spawned; conflicting roles can land on different banks, so per-slice
    /// checks would not see them. The banks then commit together behind a
    /// barrier, and a bus fault on any bank makes the others roll their
    /// slice back, keeping the group all-or-nothing even mid-commit. Pairs
    /// no bank owns are skipped with a warning.
    pub fn switch_relays(
        &self,
        electrodes: &[u16],
        roles: &[ElectrodeRole],
        state: RelayState,
        bypass_check: bool,
    ) -> AcquisitionResult<()> {
        let energizing = state == RelayState::On && !bypass_check;
        if energizing {
            check_roles(&role_request(electrodes, roles))?;
        }

        let mut per_bank: HashMap<usize, RoleRequest> = HashMap::new();
        for (&electrode, &role) in electrodes.iter().zip(roles.iter()) {
            match self.banks.iter().position(|b| b.owns(electrode, role)) {
                Some(index) => {
                    per_bank
                        .entry(index)
                        .or_default()
                        .entry(role)
                        .or_default()
                        .push(electrode);
                }
                None => warn!(electrode, %role, "no bank owns this electrode/role, skipped"),
            }
        }
        if per_bank.is_empty() {
            return Ok(());
        }

        let barrier = Barrier::new(per_bank.len());
        let abort = AtomicBool::new(false);
        let outcomes = thread::scope(|scope| {
            let handles: Vec<_> = per_bank
                .iter()
                .map(|(&index, request)| {
                    let bank = &self.banks[index];
                    let barrier = &barrier;
                    let abort = &abort;
                    scope.spawn(move || -> AcquisitionResult<()> {
                        barrier.wait();
                        let outcome = bank.switch_unchecked(request, state);
                        if outcome.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        barrier.wait();
                        if state == RelayState::On && outcome.is_ok() && abort.load(Ordering::SeqCst) {
                            // A peer faulted mid-commit; back this slice out.
                            if let Err(err) = bank.switch_unchecked(request, RelayState::Off) {
                                warn!(
                                    board = bank.board_id(),
                                    %err,
                                    "rollback after a peer bank fault also failed"
                                );
                            }
                        }
                        outcome
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        });

        for outcome in outcomes {
            outcome.map_err(|_| AcquisitionError::WorkerPanic("relay switch worker"))??;
        }
        debug!(?state, electrodes = ?electrodes, "quadrupole switched");
        Ok(())
    }

    /// Force every relay on every bank off.
    pub fn reset_all_relays(&self) {
        for bank in &self.banks {
            bank.reset();
        }
    }

    /// Commissioning sweep over the given pairs on every owning bank.
    pub fn test_mux(
        &self,
        electrodes: &[u16],
        roles: &[ElectrodeRole],
        activation_time: Duration,
    ) -> AcquisitionResult<()> {
        let request = role_request(electrodes, roles);
        for bank in &self.banks {
            bank.test(&request, activation_time)?;
        }
        Ok(())
    }

    /// Auto-range the receiver against the signal currently present.
    pub fn auto_gain(&self) -> AcquisitionResult<()> {
        Ok(self.rx.lock().gain_auto()?)
    }

    /// Return the receiver to minimum sensitivity.
    pub fn reset_gain(&self) -> AcquisitionResult<()> {
        Ok(self.rx.lock().reset_gain()?)
    }

    /// Run one pulse: drive the polarity for `duration` while the sampler
    /// records synchronized readings at the configured cadence.
    ///
    /// `append = false` starts a new pulse-train: the waveform buffer is
    /// cleared and the pulse clock restarts. The injection and sampling
    /// workers hand off through an arm signal carrying the exact instant
    /// the polarity engaged, so sample deadlines are anchored to it.
    pub fn run_pulse(
        &mut self,
        vab_v: f64,
        duration: Duration,
        polarity: Polarity,
        append: bool,
    ) -> AcquisitionResult<()> {
        if !append {
            self.waveform.write().clear();
            self.pulse_counter = 0;
            self.train_start = Instant::now();
        }
        let pulse = self.pulse_counter;
        self.pulse_counter += 1;

        let period = self.sampling_period;
        let train_start = self.train_start;
        let tx = &self.tx;
        let rx = &self.rx;
        let released = AtomicBool::new(false);
        let released = &released;
        let (armed_tx, armed_rx) = channel::bounded::<Instant>(1);
        let (sample_tx, sample_rx) = channel::unbounded::<Reading>();

        let (injection, sampling) = thread::scope(|scope| {
            let injector = scope.spawn(move || -> AcquisitionResult<()> {
                let outcome = (|| {
                    let mut tx = tx.lock();
                    if polarity != Polarity::Off {
                        tx.set_voltage(vab_v)?;
                    }
                    tx.set_polarity(polarity)
                })();
                if outcome.is_err() {
                    // Dropping the arm sender unblocks the sampler.
                    released.store(true, Ordering::SeqCst);
                    return outcome;
                }
                let _ = armed_tx.send(Instant::now());
                thread::sleep(duration);
                released.store(true, Ordering::SeqCst);
                tx.lock().set_polarity(Polarity::Off)
            });

            let sampler = scope.spawn(move || -> AcquisitionResult<()> {
                let Ok(start) = armed_rx.recv() else {
                    return Ok(()); // injection bailed before arming
                };
                let mut slot: u32 = 0;
                while !released.load(Ordering::SeqCst) {
                    let deadline = start + period * slot;
                    let now = Instant::now();
                    if now < deadline {
                        thread::sleep(deadline - now);
                    } else if now > deadline + period {
                        let behind = now.duration_since(start).as_secs_f64() / period.as_secs_f64();
                        warn!(pulse, from = slot, to = behind as u32, "sampler fell behind, skipping slots");
                        slot = behind as u32;
                        continue;
                    }
                    // The pulse may have ended while waiting for the deadline.
                    if released.load(Ordering::SeqCst) {
                        break;
                    }
                    let current_ma = tx.lock().current_ma()?;
                    let voltage_mv = rx.lock().voltage_mv()?;
                    // `released` is stored before the relays open, so a false
                    // read here proves the sample was taken with them closed.
                    if released.load(Ordering::SeqCst) {
                        break;
                    }
                    let _ = sample_tx.send(Reading {
                        elapsed: train_start.elapsed(),
                        pulse,
                        polarity: polarity.as_i8(),
                        current_ma,
                        voltage_mv,
                    });
                    slot += 1;
                }
                Ok(())
            });

            (injector.join(), sampler.join())
        });

        injection.map_err(|_| AcquisitionError::WorkerPanic("injection worker"))??;
        sampling.map_err(|_| AcquisitionError::WorkerPanic("sampling worker"))??;

        let mut waveform = self.waveform.write();
        waveform.extend(sample_rx.try_iter());
        debug!(pulse, polarity = polarity.as_i8(), readings = waveform.readings().len(), "pulse complete");
        Ok(())
    }

    /// Run a full square wave: `cycles` bipolar cycles, each half-cycle of
    /// `cycle_duration / 2`, with `duty_cycle` of each half spent injecting
    /// and the remainder at rest. The whole wave accumulates into one
    /// pulse-train.
    pub fn run_square_wave(
        &mut self,
        vab_v: f64,
        cycle_duration: Duration,
        cycles: u32,
        leading: Polarity,
        duty_cycle: f64,
    ) -> AcquisitionResult<()> {
        if leading == Polarity::Off {
            return Err(AcquisitionError::Config(
                "square wave needs a nonzero leading polarity".into(),
            ));
        }
        let duty = duty_cycle.clamp(0.0, 1.0);
        let half = cycle_duration / 2;
        let on_time = half.mul_f64(duty);
        let rest = half.mul_f64(1.0 - duty);

        let mut first = true;
        for _ in 0..cycles {
            for polarity in [leading, leading.reversed()] {
                self.run_pulse(vab_v, on_time, polarity, !first)?;
                first = false;
                if !rest.is_zero() {
                    self.run_pulse(vab_v, rest, Polarity::Off, true)?;
                }
            }
        }
        Ok(())
    }

    /// Release the transmitter and every relay; recovery/shutdown path.
    pub fn stop(&self) -> AcquisitionResult<()> {
        let outcome = self.tx.lock().stop();
        self.reset_all_relays();
        outcome
    }

    /// Snapshot of the current pulse-train readings.
    pub fn readings(&self) -> Vec<Reading> {
        self.waveform.read().readings().to_vec()
    }

    /// Stacked transfer resistance over the delay window [ohm].
    pub fn resistance(&self) -> f64 {
        self.waveform.read().resistance(self.delay)
    }

    /// Percent deviation of the per-pulse resistances.
    pub fn dev_percent(&self) -> f64 {
        self.waveform.read().dev_percent(self.delay)
    }

    /// Mean injected current magnitude [mA].
    pub fn iab_ma(&self) -> f64 {
        self.waveform.read().iab_ma(self.delay)
    }

    /// Mean polarity-corrected potential difference [mV].
    pub fn vmn_mv(&self) -> f64 {
        self.waveform.read().vmn_mv(self.delay)
    }

    /// Self-potential estimate [mV].
    pub fn sp_mv(&self) -> f64 {
        self.waveform.read().sp_mv(self.delay)
    }
}
