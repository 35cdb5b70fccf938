// ── Fleet summary ──
//
// Aggregate counts derived from one snapshot. Computed on demand, never
// stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{AlarmSeverity, OperatingState};
use crate::store::FleetState;

/// Thresholds that turn telemetry into "needs attention" counts.
#[derive(Debug, Clone, Copy)]
pub struct SummaryThresholds {
    pub low_battery_pct: f64,
    pub stale_after: chrono::Duration,
}

impl Default for SummaryThresholds {
    fn default() -> Self {
        Self {
            low_battery_pct: 20.0,
            stale_after: chrono::Duration::seconds(300),
        }
    }
}

/// Counts for a dashboard header or a `summary` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub operating: usize,
    pub charging: usize,
    pub idle: usize,
    pub low_battery: usize,
    pub stale: usize,
    pub active_critical: usize,
    pub active_warning: usize,
    pub last_snapshot: Option<DateTime<Utc>>,
}

impl FleetSummary {
    pub fn compute(state: &FleetState, thresholds: &SummaryThresholds, now: DateTime<Utc>) -> Self {
        let mut summary = Self {
            last_snapshot: state.last_snapshot(),
            ..Self::default()
        };

        for device in state.devices() {
            summary.total += 1;
            if device.is_connected() {
                summary.connected += 1;
            } else {
                summary.disconnected += 1;
            }
            match device.operating_state() {
                OperatingState::Operating => summary.operating += 1,
                OperatingState::Charging => summary.charging += 1,
                OperatingState::Idle => summary.idle += 1,
            }
            if device.is_low_battery(thresholds.low_battery_pct) {
                summary.low_battery += 1;
            }
            if device.is_stale(now, thresholds.stale_after) {
                summary.stale += 1;
            }
        }

        for alarm in state.alarms().filter(|a| a.is_active()) {
            match alarm.severity() {
                AlarmSeverity::Critical => summary.active_critical += 1,
                AlarmSeverity::Warning => summary.active_warning += 1,
            }
        }

        summary
    }

    pub fn active_alarms(&self) -> usize {
        self.active_critical + self.active_warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Alarm, Device, DeviceStatus};
    use pretty_assertions::assert_eq;

    fn chair(id: &str, status: DeviceStatus) -> Device {
        Device {
            status,
            ..Device::new(id)
        }
    }

    fn alarm(id: &str, alarm_type: &str, resolved: bool) -> Alarm {
        Alarm {
            id: id.into(),
            device_id: "dev-1".into(),
            alarm_type: alarm_type.into(),
            detail: serde_json::Value::Null,
            timestamp: Utc::now(),
            resolved,
            resolved_at: None,
        }
    }

    #[test]
    fn counts_partition_the_fleet() {
        let now = Utc::now();
        let devices = vec![
            chair(
                "dev-1",
                DeviceStatus {
                    speed_kmh: Some(3.0),
                    battery_pct: Some(15.0),
                    connected: Some(true),
                    last_seen: Some(now),
                    ..DeviceStatus::default()
                },
            ),
            chair(
                "dev-2",
                DeviceStatus {
                    current_a: Some(2.0),
                    connected: Some(true),
                    last_seen: Some(now - chrono::Duration::seconds(900)),
                    ..DeviceStatus::default()
                },
            ),
            chair("dev-3", DeviceStatus::default()),
        ];
        let state = FleetState::new()
            .apply_snapshot(devices, now)
            .0
            .apply_alarm_snapshot(vec![
                alarm("al-1", "FALL_DETECTED", false),
                alarm("al-2", "LOW_VOLTAGE", false),
                alarm("al-3", "OBSTACLE", true),
                alarm("al-4", "POSTURE_COMPLETE", false),
            ])
            .0;

        let summary = FleetSummary::compute(&state, &SummaryThresholds::default(), now);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.connected, 2);
        assert_eq!(summary.disconnected, 1);
        assert_eq!(
            (summary.operating, summary.charging, summary.idle),
            (1, 1, 1)
        );
        assert_eq!(summary.low_battery, 1);
        assert_eq!(summary.stale, 2);
        assert_eq!(summary.active_critical, 1);
        assert_eq!(summary.active_warning, 1);
        assert_eq!(summary.active_alarms(), 2);
        assert_eq!(summary.last_snapshot, Some(now));
    }

    #[test]
    fn empty_fleet_is_all_zero() {
        let summary =
            FleetSummary::compute(&FleetState::new(), &SummaryThresholds::default(), Utc::now());
        assert_eq!(summary, FleetSummary::default());
    }
}
