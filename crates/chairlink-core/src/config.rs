// ── Runtime session configuration ──
//
// These types describe *how* to reach the fleet backend and broker.
// They carry credential data and tuning, but never touch disk.
// The CLI constructs a `FleetConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use chairlink_api::{ReconnectConfig, TlsMode, TransportConfig};

use crate::summary::SummaryThresholds;

/// Broker endpoint used when none is configured.
pub const DEFAULT_BROKER_URL: &str =
    "ws://broker.firstcorea.com:8080/socket.io/?EIO=4&transport=websocket";

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed staging backends).
    DangerAcceptInvalid,
}

/// Configuration for one fleet session.
///
/// Built by the CLI, passed to `FleetSession`. Core never reads config files.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Backend root, e.g. `https://fleet.example.com`.
    pub api_url: Url,
    /// Broker WebSocket endpoint.
    pub broker_url: Url,
    /// Bearer token for REST calls and the WebSocket upgrade.
    pub token: Option<SecretString>,
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// How often to re-fetch the full snapshot (seconds). 0 = never.
    pub refresh_interval_secs: u64,
    /// Subscribe to the broker stream on open.
    pub websocket_enabled: bool,
    pub reconnect: ReconnectConfig,
    /// Upper bound on alarms fetched per snapshot.
    pub alarm_limit: Option<u32>,
    /// Battery percentage below which a chair counts as low.
    pub low_battery_pct: f64,
    /// Age after which a chair's last report counts as stale.
    pub stale_after: Duration,
}

impl FleetConfig {
    /// A config with default tuning for the given endpoints.
    pub fn new(api_url: Url, broker_url: Url) -> Self {
        Self {
            api_url,
            broker_url,
            token: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            refresh_interval_secs: 0,
            websocket_enabled: true,
            reconnect: ReconnectConfig::default(),
            alarm_limit: None,
            low_battery_pct: 20.0,
            stale_after: Duration::from_secs(300),
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
            token: self.token.clone(),
        }
    }

    /// Summary thresholds derived from this config.
    pub fn thresholds(&self) -> SummaryThresholds {
        SummaryThresholds {
            low_battery_pct: self.low_battery_pct,
            stale_after: chrono::Duration::from_std(self.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }
}
