//! Discoverers and what they share: cancellation, outcomes, errors.

pub mod artnet;
pub mod rdm;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;

use crate::transport::TransportError;

pub use artnet::{ArtNetConfig, ArtNetDiscoverer, ArtNetScan};
pub use rdm::{RdmDiscoverer, RdmSummary};

/// Cooperative cancellation flag shared between a session and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a discovery window ended. All three are normal endings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
    DeadlineReached,
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Device unavailable: {port}: {source}")]
    DeviceUnavailable {
        port: String,
        #[source]
        source: TransportError,
    },

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Link lost: {0}")]
    Transport(#[from] TransportError),

    #[error("Discovery worker panicked")]
    WorkerPanicked,
}
