//! Discovery session - runs the enabled discoverers against one registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::discovery::artnet::{ArtNetConfig, ArtNetDiscoverer};
use crate::discovery::rdm::{RdmDiscoverer, open_interface};
use crate::discovery::{CancellationToken, DiscoveryError, ScanOutcome};
use crate::events::{DiscoveryEvent, DiscoveryObserver, LogLevel, TracingObserver};
use crate::heuristics::{AddressPatterns, PatternError};
use crate::protocol::constants::ROBE_BAUD_RATE;
use crate::record::{DeviceRecord, DiscoverySource};
use crate::registry::DeviceRegistry;
use crate::transport::{RdmTransport, RobeTransport, SerialPortLink};

/// Default discovery window.
pub const DEFAULT_TIMEOUT_SECS: f64 = 1.5;

/// Longest accepted discovery or RDM window, one day.
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("Invalid timeout: {0}")]
    Timeout(f64),
}

/// RDM interface settings. RDM runs only when this table is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdmConfig {
    /// Serial port of the interface, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    /// Own window for the UID search, which outlasts a short ArtPoll window.
    #[serde(default)]
    pub window_secs: Option<f64>,
}

fn default_baud_rate() -> u32 {
    ROBE_BAUD_RATE
}

fn default_transaction_timeout_ms() -> u64 {
    200
}

impl RdmConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            window_secs: None,
        }
    }
}

/// ArtNet settings plus an on/off switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtNetSettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub config: ArtNetConfig,
}

impl Default for ArtNetSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            config: ArtNetConfig::default(),
        }
    }
}

/// Configuration for a discovery session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Discovery window in seconds.
    pub timeout_secs: f64,
    /// Extra universe/address regexes with `universe` and `address` groups.
    pub address_patterns: Vec<String>,
    pub artnet: ArtNetSettings,
    pub rdm: Option<RdmConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            address_patterns: Vec::new(),
            artnet: ArtNetSettings::default(),
            rdm: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for secs in std::iter::once(self.timeout_secs)
            .chain(self.rdm.as_ref().and_then(|r| r.window_secs))
        {
            if !(0.0..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(ConfigError::Timeout(secs));
            }
        }
        self.patterns()?;
        Ok(())
    }

    /// Built-in patterns followed by the configured ones.
    pub fn patterns(&self) -> Result<AddressPatterns, ConfigError> {
        Ok(AddressPatterns::with_extra(&self.address_patterns)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }

    /// Window of the RDM search: its own when set, else the session's.
    pub fn rdm_window(&self) -> Duration {
        self.rdm
            .as_ref()
            .and_then(|r| r.window_secs)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| self.timeout())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtNetReport {
    pub outcome: ScanOutcome,
    /// Records handed to the registry, changed repeats included.
    pub records: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmReport {
    pub port: String,
    pub outcome: ScanOutcome,
    pub records: usize,
    pub transactions: usize,
}

/// Per-discoverer results of one run. `None` means the discoverer was off.
#[derive(Debug)]
pub struct SessionReport {
    pub artnet: Option<Result<ArtNetReport, DiscoveryError>>,
    pub rdm: Option<Result<RdmReport, DiscoveryError>>,
    /// Registry size after the run.
    pub devices: usize,
    pub elapsed: Duration,
}

impl SessionReport {
    /// True when every enabled discoverer ended normally.
    pub fn is_success(&self) -> bool {
        !matches!(self.artnet, Some(Err(_))) && !matches!(self.rdm, Some(Err(_)))
    }

    /// True when at least one discoverer was cancelled.
    pub fn was_cancelled(&self) -> bool {
        let artnet = matches!(&self.artnet, Some(Ok(r)) if r.outcome == ScanOutcome::Cancelled);
        let rdm = matches!(&self.rdm, Some(Ok(r)) if r.outcome == ScanOutcome::Cancelled);
        artnet || rdm
    }
}

/// Discovery session - one bounded run of the enabled discoverers.
pub struct DiscoverySession<O: DiscoveryObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    registry: Arc<DeviceRegistry>,
    cancel: CancellationToken,
}

impl DiscoverySession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DiscoveryObserver + 'static> DiscoverySession<O> {
    /// Create a new session with a custom observer and a fresh registry.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            registry: Arc::new(DeviceRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Merge into an existing registry instead of a fresh one.
    pub fn with_registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Token that stops this session's workers when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the configured discoverers, opening the RDM interface if one is
    /// configured.
    #[instrument(skip(self))]
    pub fn run(&self) -> Result<SessionReport, ConfigError> {
        self.execute::<RobeTransport<SerialPortLink>>(None)
    }

    /// Run with a caller-supplied RDM transport in place of the serial port.
    #[instrument(skip_all)]
    pub fn run_with_transport<T: RdmTransport>(&self, transport: T) -> Result<SessionReport, ConfigError> {
        self.execute(Some(transport))
    }

    fn execute<T: RdmTransport>(&self, injected: Option<T>) -> Result<SessionReport, ConfigError> {
        self.config.validate()?;
        let patterns = self.config.patterns()?;
        let started = Instant::now();
        let deadline = started + self.config.timeout();
        let rdm_deadline = started + self.config.rdm_window();

        let (artnet, rdm) = thread::scope(|s| {
            let artnet = self
                .config
                .artnet
                .enabled
                .then(|| s.spawn(move || self.guard(DiscoverySource::ArtNet, || self.run_artnet(patterns, deadline))));

            let rdm = match injected {
                Some(transport) => Some(s.spawn(move || {
                    self.guard(DiscoverySource::Rdm, || self.run_rdm(transport, rdm_deadline))
                })),
                None => self.config.rdm.as_ref().map(|cfg| {
                    s.spawn(move || {
                        self.guard(DiscoverySource::Rdm, || {
                            let transport = open_interface(
                                &cfg.port,
                                cfg.baud_rate,
                                Duration::from_millis(cfg.transaction_timeout_ms),
                            )?;
                            self.run_rdm(transport, rdm_deadline)
                        })
                    })
                }),
            };

            (
                artnet.map(|h| h.join().unwrap_or(Err(DiscoveryError::WorkerPanicked))),
                rdm.map(|h| h.join().unwrap_or(Err(DiscoveryError::WorkerPanicked))),
            )
        });

        let report = SessionReport {
            artnet,
            rdm,
            devices: self.registry.len(),
            elapsed: started.elapsed(),
        };
        info!(devices = report.devices, elapsed_ms = report.elapsed.as_millis() as u64, "Session finished");
        Ok(report)
    }

    /// Run one discoverer, reporting its failure without touching the other.
    fn guard<R>(
        &self,
        source: DiscoverySource,
        work: impl FnOnce() -> Result<R, DiscoveryError>,
    ) -> Result<R, DiscoveryError> {
        self.observer.on_event(&DiscoveryEvent::ScanStarted { source });
        let result = work();
        if let Err(e) = &result {
            self.observer.on_event(&DiscoveryEvent::ScanFailed {
                source,
                message: e.to_string(),
            });
        }
        result
    }

    fn run_artnet(&self, patterns: AddressPatterns, deadline: Instant) -> Result<ArtNetReport, DiscoveryError> {
        let discoverer = ArtNetDiscoverer::with_patterns(self.config.artnet.config.clone(), patterns);
        let mut scan = discoverer.discover(deadline, &self.cancel)?;
        self.observer.on_event(&DiscoveryEvent::PollSent {
            target: SocketAddr::V4(discoverer.config().broadcast),
        });

        let mut records = 0;
        for record in scan.by_ref() {
            records += 1;
            self.merge(record);
        }
        let outcome = scan.outcome().unwrap_or(ScanOutcome::Completed);
        self.observer.on_event(&DiscoveryEvent::ScanFinished {
            source: DiscoverySource::ArtNet,
            outcome,
            devices: records,
        });
        Ok(ArtNetReport {
            outcome,
            records,
            dropped: scan.dropped(),
        })
    }

    fn run_rdm<T: RdmTransport>(&self, transport: T, deadline: Instant) -> Result<RdmReport, DiscoveryError> {
        let port = transport.port_name().to_string();
        let mut discoverer = RdmDiscoverer::new(transport);
        let mut records = 0;
        let summary = discoverer.discover(deadline, &self.cancel, self.observer.as_ref(), &mut |record: DeviceRecord| {
            records += 1;
            self.merge(record);
        })?;
        if summary.outcome == ScanOutcome::DeadlineReached {
            self.observer.on_event(&DiscoveryEvent::Log {
                level: LogLevel::Warn,
                message: format!(
                    "RDM window ended after {} UIDs; raise rdm.window_secs for a complete search",
                    summary.uids.len()
                ),
            });
        }
        self.observer.on_event(&DiscoveryEvent::ScanFinished {
            source: DiscoverySource::Rdm,
            outcome: summary.outcome,
            devices: records,
        });
        Ok(RdmReport {
            port,
            outcome: summary.outcome,
            records,
            transactions: summary.transactions,
        })
    }

    fn merge(&self, record: DeviceRecord) {
        let key = record.key.clone();
        let name = record.name.clone();
        let outcome = self.registry.merge(record);
        self.observer.on_event(&DiscoveryEvent::DeviceMerged { key, name, outcome });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::protocol::uid::Uid;
    use crate::transport::SimulatedBus;

    fn rdm_only(timeout_secs: f64) -> SessionConfig {
        SessionConfig {
            timeout_secs,
            artnet: ArtNetSettings {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert!(config.artnet.enabled);
        assert_eq!(config.artnet.config.port, 6454);
        assert!(config.rdm.is_none());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = SessionConfig {
            timeout_secs: 3.0,
            rdm: Some(RdmConfig::new("/dev/ttyUSB0")),
            address_patterns: vec![r"U(?P<universe>\d+)\.(?P<address>\d+)".into()],
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: SessionConfig = toml::from_str(
            r#"
            timeout_secs = 2.5

            [artnet]
            bind_ip = "10.0.0.5"

            [rdm]
            port = "COM3"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.artnet.config.bind_ip, std::net::Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(parsed.artnet.config.port, 6454);
        assert!(parsed.artnet.enabled);
        let rdm = parsed.rdm.unwrap();
        assert_eq!(rdm.baud_rate, 250_000);
        assert_eq!(rdm.transaction_timeout_ms, 200);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = SessionConfig {
            address_patterns: vec!["(?P<universe>\\d+)".into()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Pattern(_))));

        let config = SessionConfig {
            timeout_secs: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Timeout(_))));
    }

    #[test]
    fn test_huge_windows_rejected() {
        let config = SessionConfig {
            timeout_secs: 9e18,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Timeout(_))));
        assert!(matches!(
            DiscoverySession::new(config).run(),
            Err(ConfigError::Timeout(_))
        ));

        let mut config = rdm_only(1.0);
        let mut rdm = RdmConfig::new("sim");
        rdm.window_secs = Some(f64::INFINITY);
        config.rdm = Some(rdm);
        assert!(matches!(config.validate(), Err(ConfigError::Timeout(_))));

        let config = SessionConfig {
            timeout_secs: MAX_TIMEOUT_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rdm_window_override() {
        let mut config = rdm_only(1.0);
        let mut rdm = RdmConfig::new("sim");
        rdm.window_secs = Some(20.0);
        config.rdm = Some(rdm);
        assert_eq!(config.rdm_window(), Duration::from_secs(20));
    }

    #[test]
    fn test_session_with_simulated_bus() {
        let bus = SimulatedBus::with_uids([Uid::new(1), Uid::new(2), Uid::new(0x5253_0000_0001)]);
        let session = DiscoverySession::with_observer(rdm_only(10.0), Arc::new(NullObserver));
        let report = session.run_with_transport(bus).unwrap();

        assert!(report.is_success());
        assert!(report.artnet.is_none());
        let rdm = report.rdm.unwrap().unwrap();
        assert_eq!(rdm.outcome, ScanOutcome::Completed);
        assert_eq!(rdm.records, 3);
        assert_eq!(report.devices, 3);
        assert_eq!(session.registry().len(), 3);
    }

    #[derive(Default)]
    struct Recorder {
        events: std::sync::Mutex<Vec<DiscoveryEvent>>,
    }

    impl DiscoveryObserver for Recorder {
        fn on_event(&self, event: &DiscoveryEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_session_events() {
        let recorder = Arc::new(Recorder::default());
        let session = DiscoverySession::with_observer(rdm_only(10.0), recorder.clone());
        session
            .run_with_transport(SimulatedBus::with_uids([Uid::new(3)]))
            .unwrap();

        let events = recorder.events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(DiscoveryEvent::ScanStarted { source: DiscoverySource::Rdm })
        ));
        assert!(events.iter().any(|e| matches!(e, DiscoveryEvent::UidFound { uid } if *uid == Uid::new(3))));
        assert!(matches!(
            events.last(),
            Some(DiscoveryEvent::ScanFinished {
                outcome: ScanOutcome::Completed,
                devices: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_window_warns_and_keeps_going() {
        let recorder = Arc::new(Recorder::default());
        let session = DiscoverySession::with_observer(rdm_only(0.0), recorder.clone());
        let report = session
            .run_with_transport(SimulatedBus::with_uids([Uid::new(3)]))
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.rdm.unwrap().unwrap().outcome, ScanOutcome::DeadlineReached);
        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, DiscoveryEvent::Log { level: LogLevel::Warn, .. })));
    }

    #[test]
    fn test_session_shares_given_registry() {
        let registry = Arc::new(DeviceRegistry::new());
        let session = DiscoverySession::with_observer(rdm_only(10.0), Arc::new(NullObserver))
            .with_registry(registry.clone());
        session
            .run_with_transport(SimulatedBus::with_uids([Uid::new(7)]))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
