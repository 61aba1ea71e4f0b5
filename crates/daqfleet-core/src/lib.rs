pub mod controller;
pub mod driver;
pub mod error;
pub mod launch;
pub mod persist;
pub mod sequencer;
pub mod session;
pub mod status;
pub mod topology;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testutil;

pub use controller::Controller;
pub use driver::Driver;
pub use error::{DaqError, Result};
pub use status::{StatusDocument, StatusRecord};
pub use topology::{Topology, TopologyProvider};
