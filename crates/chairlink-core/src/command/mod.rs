// ── Command API ──
//
// Write operations flow through a unified `Command` enum. The session's
// command processor runs them one at a time against the backend and
// folds each success into the store.

use crate::error::CoreError;
use crate::model::{AlarmId, DeviceId};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// Operations a session can perform on behalf of its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Re-fetch the device and alarm snapshots.
    Refresh,
    /// Acknowledge one alarm.
    ResolveAlarm { id: AlarmId },
    /// Acknowledge every unresolved alarm, optionally for one device.
    ResolveAllAlarms { device_id: Option<DeviceId> },
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Refreshed { devices: usize, alarms: usize },
    /// Number of alarms that moved to resolved locally.
    Resolved { count: usize },
}
