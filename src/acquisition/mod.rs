// src/acquisition/mod.rs
//! Acquisition engine: pulse generation, synchronized sampling, voltage
//! strategies and sequence orchestration.

pub mod controller;
pub mod orchestrator;
pub mod strategy;
pub mod waveform;

pub use controller::{BusOpener, HardwareController};
pub use orchestrator::{AcquisitionOrchestrator, AcquisitionSettings, ContactCheck, Measurement, Quadrupole};
pub use strategy::{compute_injection_voltage, InjectionStrategy, Tuning};
pub use waveform::Waveform;
