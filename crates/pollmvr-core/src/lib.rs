//! PollMVR-Core: lighting fixture discovery over ArtNet and RDM.
//!
//! Finds devices with an ArtPoll broadcast and with E1.20 discovery through a
//! Robe Universal Interface, and merges both into one device registry whose
//! snapshot feeds scene export.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: ArtPoll/ArtPollReply and RDM codecs, UIDs
//! - **Heuristics**: DMX universe/address extraction from node names
//! - **Transport**: serial links, Robe framing, simulated RDM bus
//! - **Discovery**: ArtNet and RDM discoverers, cancellation
//! - **Registry**: merged device records
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//! - **Network**: interface and serial port enumeration
//!
//! # Example
//!
//! ```no_run
//! use pollmvr_core::session::{DiscoverySession, SessionConfig};
//!
//! let session = DiscoverySession::new(SessionConfig::default());
//! let report = session.run().expect("invalid configuration");
//! for device in session.registry().snapshot() {
//!     println!("{} {:?}", device.name, device.ip);
//! }
//! assert!(report.is_success());
//! ```

pub mod discovery;
pub mod events;
pub mod heuristics;
pub mod network;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use discovery::{
    ArtNetConfig, ArtNetDiscoverer, ArtNetScan, CancellationToken, DiscoveryError, RdmDiscoverer,
    ScanOutcome,
};
pub use events::{DiscoveryEvent, DiscoveryObserver, LogLevel, NullObserver, TracingObserver};
pub use heuristics::{AddressPatterns, extract_address_universe};
pub use protocol::{ArtPollReply, PacketError, Uid, UidRange};
pub use record::{DeviceKey, DeviceRecord, DiscoverySource};
pub use registry::{DeviceRegistry, MergeOutcome};
pub use session::{ConfigError, DiscoverySession, SessionConfig, SessionReport};
pub use transport::{
    MockLink, RdmReply, RdmTransport, RobeTransport, SerialLink, SerialPortLink, SimulatedBus,
    TransportError,
};
