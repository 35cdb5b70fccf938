// chairlink-core: Telemetry reconciliation between chairlink-api and consumers.
//
// Raw snapshot and broker payloads are normalized once in `convert`, folded
// into a single `FleetState` by the pure reducer in `store::reducer`, and
// published to subscribers through the `DataStore`. `FleetSession` owns the
// whole pipeline for one open/close cycle.

pub mod classify;
pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod session;
pub mod store;
pub mod stream;
pub mod summary;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{NoopNotifier, Notifier, RecordingNotifier};
pub use command::{Command, CommandResult};
pub use config::{DEFAULT_BROKER_URL, FleetConfig, TlsVerification};
pub use error::CoreError;
pub use session::{ConnectionState, FleetSession};
pub use store::{DataStore, FleetEvent, FleetState, SyncPhase};
pub use stream::{AlarmFilter, DeviceFilter, FleetStream};
pub use summary::{FleetSummary, SummaryThresholds};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Alarm, AlarmId, AlarmSeverity, Device, DeviceId, DeviceStatus, EntityId, OperatingState,
    StatusDelta,
};

// Transport knobs consumers need when building a `FleetConfig`.
pub use chairlink_api::{ReconnectConfig, StreamState};
