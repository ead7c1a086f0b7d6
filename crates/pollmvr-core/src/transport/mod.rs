//! Transport layer module.

pub mod mock;
pub mod robe;
pub mod serial;
pub mod sim;
pub mod traits;

pub use mock::MockLink;
pub use robe::{RobeFrame, RobeTransport};
pub use serial::SerialPortLink;
pub use sim::{SimulatedBus, SimulatedResponder};
pub use traits::{RdmReply, RdmTransport, SerialLink, TransportError};
