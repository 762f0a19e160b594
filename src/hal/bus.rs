// src/hal/bus.rs
//! Register-level bus primitive.
//!
//! The one seam between this crate and the vendor I2C/Modbus bindings: every
//! leaf driver (mux, tx, rx, pwr) talks registers through this trait and
//! nothing else. A board whose `probe` fails at initialization surfaces
//! `DeviceUnresponsive` and is dropped; the rest of the system keeps going.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BusError;

/// Raw register read/write primitive for one device on one bus.
pub trait RegisterBus: Send {
    /// Check the device answers on the bus (address ACK or ID register).
    fn probe(&mut self) -> Result<(), BusError>;

    /// Read one 16-bit register.
    fn read(&mut self, register: u16) -> Result<u16, BusError>;

    /// Write one 16-bit register.
    fn write(&mut self, register: u16, value: u16) -> Result<(), BusError>;
}

/// Shared state behind a [`MockBus`], inspectable from tests.
#[derive(Debug, Default)]
pub struct MockBusState {
    /// Current register contents.
    pub registers: HashMap<u16, u16>,
    /// Every write in order, as (register, value).
    pub writes: Vec<(u16, u16)>,
    /// When false, every access fails with `NoAck`.
    pub responsive: bool,
}

/// Scriptable in-memory bus for unit and integration tests.
///
/// Cloneable handle semantics: the test keeps a [`MockBusHandle`] to inspect
/// writes after the driver has taken ownership of the bus.
pub struct MockBus {
    state: Arc<Mutex<MockBusState>>,
}

/// Test-side view into a [`MockBus`].
#[derive(Clone)]
pub struct MockBusHandle {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    /// Create a responsive mock bus plus its inspection handle.
    pub fn new() -> (Self, MockBusHandle) {
        let state = Arc::new(Mutex::new(MockBusState {
            responsive: true,
            ..Default::default()
        }));
        (
            Self { state: state.clone() },
            MockBusHandle { state },
        )
    }

    /// Create a bus that never acknowledges, for init-failure tests.
    pub fn unresponsive() -> (Self, MockBusHandle) {
        let (bus, handle) = Self::new();
        handle.state.lock().responsive = false;
        (bus, handle)
    }
}

impl MockBusHandle {
    /// Number of writes issued so far.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Snapshot of all writes issued so far.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().writes.clone()
    }

    /// Current value of a register (0 when never written).
    pub fn register(&self, register: u16) -> u16 {
        self.state.lock().registers.get(&register).copied().unwrap_or(0)
    }

    /// Preload a register value, e.g. a measured-voltage readback.
    pub fn preload(&self, register: u16, value: u16) {
        self.state.lock().registers.insert(register, value);
    }

    /// Flip the device between answering and dead, e.g. to fault a board
    /// mid-operation after it probed fine at init.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().responsive = responsive;
    }
}

impl RegisterBus for MockBus {
    fn probe(&mut self) -> Result<(), BusError> {
        if self.state.lock().responsive {
            Ok(())
        } else {
            Err(BusError::NoAck("mock device configured unresponsive".into()))
        }
    }

    fn read(&mut self, register: u16) -> Result<u16, BusError> {
        let state = self.state.lock();
        if !state.responsive {
            return Err(BusError::Read {
                register,
                reason: "no ack".into(),
            });
        }
        Ok(state.registers.get(&register).copied().unwrap_or(0))
    }

    fn write(&mut self, register: u16, value: u16) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if !state.responsive {
            return Err(BusError::Write {
                register,
                value,
                reason: "no ack".into(),
            });
        }
        state.registers.insert(register, value);
        state.writes.push((register, value));
        Ok(())
    }
}
