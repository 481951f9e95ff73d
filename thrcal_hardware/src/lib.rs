//! Front-end transports implementing `thrcal_traits::Acquirer`.
//!
//! Only the simulated device ships here; a real transport lives outside this
//! workspace and plugs into the same trait.
pub mod error;
pub mod sim;

pub use error::HwError;
pub use sim::{ADC_MAX, SimParams, SimulatedFrontend, device_seed};
