// src/hal/mod.rs
//! Hardware abstraction layer: capability traits, register-level board
//! drivers and the simulated rig.

pub mod bus;
pub mod mux;
pub mod pwr;
pub mod relay_bank;
pub mod rx;
pub mod simulator;
pub mod traits;
pub mod tx;
pub mod types;

pub use relay_bank::{check_roles, role_request, RelayBank, RoleRequest};
pub use traits::*;
pub use types::*;
