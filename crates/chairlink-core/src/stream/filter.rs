// ── Filter predicates for fleet snapshots ──
//
// Used by consumers to slice a snapshot without re-querying the backend.

use chrono::{DateTime, Utc};

use crate::model::{Alarm, AlarmSeverity, Device, DeviceId, OperatingState};

/// Filter predicate for devices.
pub enum DeviceFilter {
    All,
    ByState(OperatingState),
    Connected,
    Disconnected,
    /// Battery reading below the given percentage.
    LowBattery(f64),
    /// No report within `max_age` of `now`.
    Stale {
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    },
    Custom(Box<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::All => true,
            Self::ByState(state) => device.operating_state() == *state,
            Self::Connected => device.is_connected(),
            Self::Disconnected => !device.is_connected(),
            Self::LowBattery(threshold) => device.is_low_battery(*threshold),
            Self::Stale { now, max_age } => device.is_stale(*now, *max_age),
            Self::Custom(f) => f(device),
        }
    }
}

/// Filter predicate for alarms.
pub enum AlarmFilter {
    All,
    /// Unresolved and not a positive signal.
    Active,
    BySeverity(AlarmSeverity),
    ByDevice(DeviceId),
    Custom(Box<dyn Fn(&Alarm) -> bool + Send + Sync>),
}

impl AlarmFilter {
    pub fn matches(&self, alarm: &Alarm) -> bool {
        match self {
            Self::All => true,
            Self::Active => alarm.is_active(),
            Self::BySeverity(severity) => alarm.severity() == *severity,
            Self::ByDevice(id) => alarm.device_id == *id,
            Self::Custom(f) => f(alarm),
        }
    }

    /// Both predicates must hold.
    pub fn and(self, other: AlarmFilter) -> AlarmFilter {
        Self::Custom(Box::new(move |a| self.matches(a) && other.matches(a)))
    }
}
