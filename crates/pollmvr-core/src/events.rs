//! Event system for UI decoupling.
//!
//! Front ends subscribe to discovery progress through `DiscoveryObserver`
//! without reaching into the engine.

use std::fmt;
use std::net::SocketAddr;

use crate::discovery::ScanOutcome;
use crate::protocol::uid::{Uid, UidRange};
use crate::record::{DeviceKey, DiscoverySource};
use crate::registry::MergeOutcome;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// What a unique branch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchResult {
    Empty,
    Single(Uid),
    Collision,
}

impl fmt::Display for BranchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchResult::Empty => write!(f, "empty"),
            BranchResult::Single(uid) => write!(f, "single {}", uid),
            BranchResult::Collision => write!(f, "collision"),
        }
    }
}

/// Events emitted during a discovery session.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A discoverer started.
    ScanStarted { source: DiscoverySource },
    /// ArtPoll broadcast.
    PollSent { target: SocketAddr },
    /// One DISC_UNIQUE_BRANCH finished.
    BranchSearched { range: UidRange, result: BranchResult },
    /// A responder acknowledged its mute.
    UidFound { uid: Uid },
    /// A record reached the registry.
    DeviceMerged {
        key: DeviceKey,
        name: String,
        outcome: MergeOutcome,
    },
    /// A discoverer ended normally.
    ScanFinished {
        source: DiscoverySource,
        outcome: ScanOutcome,
        devices: usize,
    },
    /// A discoverer failed; the other one is unaffected.
    ScanFailed {
        source: DiscoverySource,
        message: String,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving discovery events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DiscoveryObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DiscoveryEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DiscoveryObserver for NullObserver {
    fn on_event(&self, _event: &DiscoveryEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DiscoveryObserver for TracingObserver {
    fn on_event(&self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::ScanStarted { source } => {
                tracing::info!(source = %source, "Scan started");
            }
            DiscoveryEvent::PollSent { target } => {
                tracing::debug!(target = %target, "ArtPoll sent");
            }
            DiscoveryEvent::BranchSearched { range, result } => {
                tracing::trace!(range = %range, result = %result, "Branch searched");
            }
            DiscoveryEvent::UidFound { uid } => {
                tracing::debug!(uid = %uid, "UID found");
            }
            DiscoveryEvent::DeviceMerged { key, name, outcome } => match outcome {
                MergeOutcome::Inserted => tracing::info!(key = %key, name = %name, "Device found"),
                MergeOutcome::Updated => tracing::debug!(key = %key, name = %name, "Device updated"),
                MergeOutcome::Unchanged => {}
            },
            DiscoveryEvent::ScanFinished {
                source,
                outcome,
                devices,
            } => {
                tracing::info!(source = %source, outcome = ?outcome, devices, "Scan finished");
            }
            DiscoveryEvent::ScanFailed { source, message } => {
                tracing::error!(source = %source, "Scan failed: {}", message);
            }
            DiscoveryEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
