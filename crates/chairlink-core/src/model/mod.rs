// ── Domain model ──
//
// Canonical types produced by the normalization boundary in `convert`.
// Nothing past that boundary sees raw backend field names.

pub mod alarm;
pub mod device;
pub mod entity_id;

pub use alarm::{Alarm, AlarmSeverity};
pub use device::{Device, DeviceStatus, MOVING_SPEED_KMH, OperatingState};
pub use entity_id::{AlarmId, DeviceId, EntityId};

/// A partial status update for one chair, as carried by a `status_update`
/// broker event.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatusDelta {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
}
