// src/lib.rs
//! Acquisition core for a multi-electrode DC resistivity meter.
//!
//! The crate drives one transmitter (current injection through a switched
//! power source), one receiver (auto-ranging differential voltage
//! measurement) and any number of relay multiplexer boards, and turns
//! quadrupole sequences into stacked transfer-resistance measurements.
//!
//! Layer map:
//! - [`config`]: TOML-backed hardware configuration, clamped to spec ranges
//! - [`hal`]: capability traits, register-level drivers, relay safety
//!   interlock and the simulated rig
//! - [`acquisition`]: pulse engine, voltage strategies, orchestration
//!
//! ```no_run
//! use resistivity_core::acquisition::{
//!     AcquisitionOrchestrator, AcquisitionSettings, HardwareController, Quadrupole,
//! };
//! use resistivity_core::config::HardwareConfig;
//! use resistivity_core::hal::relay_bank::RelayBank;
//! use resistivity_core::hal::simulator::{SimRig, SimRigConfig};
//! use resistivity_core::hal::tx::Tx;
//! use resistivity_core::hal::types::ElectrodeRole;
//!
//! let config = HardwareConfig::default();
//! let rig = SimRig::new(SimRigConfig::default());
//! let tx = Tx::new(Box::new(rig.injector()), Box::new(rig.power()), &config.tx);
//! let board = resistivity_core::config::MuxBoardConfig {
//!     electrodes: (1..=8).collect(),
//!     roles: ElectrodeRole::ALL.to_vec(),
//!     ..Default::default()
//! };
//! let bank = RelayBank::new("b1", Box::new(rig.relays()), &board, &config.mux.default)?;
//! let ctl = HardwareController::new(tx, Box::new(rig.sensor()), vec![bank], &config);
//!
//! let mut orchestrator = AcquisitionOrchestrator::new(ctl, AcquisitionSettings::default());
//! let _results = orchestrator.run_sequence(&[Quadrupole { a: 1, b: 4, m: 2, n: 3 }]);
//! # Ok::<(), resistivity_core::error::AcquisitionError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acquisition;
pub mod config;
pub mod error;
pub mod hal;
pub mod utils;

pub use acquisition::{
    AcquisitionOrchestrator, AcquisitionSettings, HardwareController, InjectionStrategy,
    Measurement, Quadrupole,
};
pub use config::HardwareConfig;
pub use error::{AcquisitionError, AcquisitionResult};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
