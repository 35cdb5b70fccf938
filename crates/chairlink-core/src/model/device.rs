// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::entity_id::DeviceId;

/// Speed (km/h) above which a chair counts as moving.
pub const MOVING_SPEED_KMH: f64 = 0.1;

/// Derived activity classification of a chair.
///
/// Computed from telemetry on every read; never transported.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OperatingState {
    Operating,
    Charging,
    Idle,
}

impl OperatingState {
    /// Classify by precedence: moving, then drawing charge current, then idle.
    /// Missing readings count as zero.
    pub fn classify(speed: Option<f64>, current: Option<f64>) -> Self {
        if speed.unwrap_or(0.0) > MOVING_SPEED_KMH {
            Self::Operating
        } else if current.unwrap_or(0.0) > 0.0 {
            Self::Charging
        } else {
            Self::Idle
        }
    }
}

/// Sparse real-time telemetry for one chair.
///
/// Every field is optional. In a delta, `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub battery_pct: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub current_a: Option<f64>,
    pub voltage_v: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub seat_angle: Option<f64>,
    pub back_angle: Option<f64>,
    pub leg_angle: Option<f64>,
    pub tilt_angle: Option<f64>,
    pub inclination: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub connected: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub mode: Option<String>,
}

macro_rules! overlay {
    ($target:expr, $delta:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(ref value) = $delta.$field {
                $target.$field = Some(value.clone());
            }
        )+
    };
}

impl DeviceStatus {
    /// Overlay every field present in `delta`; absent fields keep their value.
    pub fn merge(&mut self, delta: &DeviceStatus) {
        overlay!(self, delta;
            battery_pct, speed_kmh, current_a, voltage_v,
            latitude, longitude,
            seat_angle, back_angle, leg_angle, tilt_angle, inclination,
            temperature_c, humidity_pct,
            connected, last_seen, mode,
        );
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// A registered wheelchair and its last known telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub name: Option<String>,
    /// Owner or assignee label (patient, ward, facility).
    pub assigned_to: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl Device {
    /// A record carrying only its identity.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            serial: None,
            model: None,
            name: None,
            assigned_to: None,
            registered_at: None,
            status: DeviceStatus::default(),
        }
    }

    pub fn operating_state(&self) -> OperatingState {
        OperatingState::classify(self.status.speed_kmh, self.status.current_a)
    }

    /// Unknown connectivity counts as disconnected.
    pub fn is_connected(&self) -> bool {
        self.status.connected.unwrap_or(false)
    }

    pub fn is_low_battery(&self, threshold_pct: f64) -> bool {
        self.status.battery_pct.is_some_and(|b| b < threshold_pct)
    }

    /// Stale when the last report is older than `max_age`, or never arrived.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.status.last_seen {
            Some(seen) => now - seen > max_age,
            None => true,
        }
    }

    /// Best human-facing label: name, then serial, then id.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.serial.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_overwrites_present_and_keeps_absent() {
        let mut status = DeviceStatus {
            battery_pct: Some(80.0),
            speed_kmh: Some(2.0),
            ..DeviceStatus::default()
        };
        let delta = DeviceStatus {
            battery_pct: Some(50.0),
            ..DeviceStatus::default()
        };

        status.merge(&delta);

        assert_eq!(status.battery_pct, Some(50.0));
        assert_eq!(status.speed_kmh, Some(2.0));
    }

    #[test]
    fn empty_merge_is_identity() {
        let before = DeviceStatus {
            connected: Some(true),
            mode: Some("indoor".into()),
            ..DeviceStatus::default()
        };
        let mut after = before.clone();
        after.merge(&DeviceStatus::default());
        assert_eq!(after, before);
    }

    #[test]
    fn classification_precedence() {
        assert_eq!(
            OperatingState::classify(Some(1.5), Some(3.0)),
            OperatingState::Operating
        );
        assert_eq!(
            OperatingState::classify(Some(0.1), Some(3.0)),
            OperatingState::Charging
        );
        assert_eq!(
            OperatingState::classify(Some(0.0), Some(0.0)),
            OperatingState::Idle
        );
        assert_eq!(OperatingState::classify(None, None), OperatingState::Idle);
        assert_eq!(
            OperatingState::classify(None, Some(0.5)),
            OperatingState::Charging
        );
    }

    #[test]
    fn operating_state_parses_case_insensitively() {
        let state: OperatingState = "Charging".parse().unwrap_or(OperatingState::Idle);
        assert_eq!(state, OperatingState::Charging);
        assert_eq!(OperatingState::Operating.to_string(), "operating");
    }

    #[test]
    fn missing_last_seen_is_stale() {
        let device = Device::new("dev-1");
        assert!(device.is_stale(Utc::now(), chrono::Duration::seconds(300)));
    }

    #[test]
    fn recent_last_seen_is_fresh() {
        let now = Utc::now();
        let mut device = Device::new("dev-1");
        device.status.last_seen = Some(now - chrono::Duration::seconds(10));
        assert!(!device.is_stale(now, chrono::Duration::seconds(300)));
    }

    #[test]
    fn label_falls_back_to_serial_then_id() {
        let mut device = Device::new("dev-1");
        assert_eq!(device.label(), "dev-1");
        device.serial = Some("WC-7".into());
        assert_eq!(device.label(), "WC-7");
        device.name = Some("Ward 3 chair".into());
        assert_eq!(device.label(), "Ward 3 chair");
    }
}
