// ── Fleet state reducer ──
//
// Pure functions from (state, event) to (state, outcome). No I/O, no
// clock reads, no logging of anything but dropped input. The store runs
// these under its write lock; tests run them directly.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

use crate::model::{Alarm, AlarmId, Device, DeviceId, StatusDelta};

/// Deltas held while waiting for the first snapshot. The oldest is
/// evicted once the buffer is full.
pub const MAX_PENDING_DELTAS: usize = 512;

/// Whether the device map has been populated yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No snapshot has been applied; deltas are buffered.
    AwaitingSnapshot,
    /// At least one snapshot has been applied; deltas merge directly.
    Synced,
}

/// The single current view of the fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetState {
    devices: IndexMap<DeviceId, Device>,
    alarms: IndexMap<AlarmId, Alarm>,
    phase: SyncPhase,
    pending: VecDeque<StatusDelta>,
    last_snapshot: Option<DateTime<Utc>>,
    last_delta: Option<DateTime<Utc>>,
}

impl Default for FleetState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of applying one status delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// At least one field changed.
    Applied,
    /// The device is known but every sent field already had that value.
    Unchanged,
    /// No device with this id is present; the delta was dropped.
    UnknownDevice,
    /// Held until the first snapshot. `evicted` is set when the buffer
    /// was full and the oldest delta made room.
    Buffered { evicted: bool },
}

/// Result of a pushed alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    Inserted,
    /// Already present by id; nothing changed.
    Duplicate,
}

/// Result of acknowledging a single alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    AlreadyResolved,
    NotFound,
}

/// Everything that can change a `FleetState`.
#[derive(Debug, Clone)]
pub enum FleetEvent {
    DeviceSnapshot {
        devices: Vec<Device>,
        at: DateTime<Utc>,
    },
    AlarmSnapshot(Vec<Alarm>),
    StatusDelta(StatusDelta),
    AlarmCreated(Alarm),
    AlarmResolved {
        id: AlarmId,
        at: DateTime<Utc>,
    },
    AllAlarmsResolved {
        device_id: Option<DeviceId>,
        at: DateTime<Utc>,
    },
}

/// What a single `reduce` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    DevicesReplaced { count: usize, replayed: usize },
    AlarmsReplaced { count: usize, retained: usize },
    Delta(DeltaOutcome),
    Alarm(AlarmOutcome),
    Resolve(ResolveOutcome),
    ResolvedAll { count: usize },
}

impl Outcome {
    /// Whether subscribers should see a new snapshot.
    pub fn changed(&self) -> bool {
        match self {
            Self::DevicesReplaced { .. } | Self::AlarmsReplaced { .. } => true,
            Self::Delta(d) => *d == DeltaOutcome::Applied,
            Self::Alarm(a) => *a == AlarmOutcome::Inserted,
            Self::Resolve(r) => *r == ResolveOutcome::Resolved,
            Self::ResolvedAll { count } => *count > 0,
        }
    }
}

/// New state plus what happened.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub state: FleetState,
    pub outcome: Outcome,
}

impl FleetState {
    pub fn new() -> Self {
        Self {
            devices: IndexMap::new(),
            alarms: IndexMap::new(),
            phase: SyncPhase::AwaitingSnapshot,
            pending: VecDeque::new(),
            last_snapshot: None,
            last_delta: None,
        }
    }

    // ── Read accessors ───────────────────────────────────────────────

    /// Devices in snapshot order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Alarms in arrival order, resolved ones included.
    pub fn alarms(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.values()
    }

    pub fn alarm(&self, id: &AlarmId) -> Option<&Alarm> {
        self.alarms.get(id)
    }

    pub fn alarm_count(&self) -> usize {
        self.alarms.len()
    }

    /// Unresolved, non-positive alarms, newest first.
    pub fn active_alarms(&self) -> Vec<&Alarm> {
        let mut active: Vec<&Alarm> = self.alarms.values().filter(|a| a.is_active()).collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        active
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_synced(&self) -> bool {
        self.phase == SyncPhase::Synced
    }

    /// Deltas waiting for the first snapshot.
    pub fn pending_deltas(&self) -> usize {
        self.pending.len()
    }

    pub fn last_snapshot(&self) -> Option<DateTime<Utc>> {
        self.last_snapshot
    }

    /// Report time of the most recent delta that changed something.
    pub fn last_delta(&self) -> Option<DateTime<Utc>> {
        self.last_delta
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Replace the device map wholesale.
    ///
    /// The first snapshot also replays buffered deltas in arrival order;
    /// those for devices the snapshot does not contain are dropped.
    /// Returns the number of deltas replayed.
    pub fn apply_snapshot(mut self, records: Vec<Device>, at: DateTime<Utc>) -> (Self, usize) {
        self.devices = records.into_iter().map(|d| (d.id.clone(), d)).collect();
        self.last_snapshot = Some(at);

        let mut replayed = 0;
        if self.phase == SyncPhase::AwaitingSnapshot {
            self.phase = SyncPhase::Synced;
            for delta in std::mem::take(&mut self.pending) {
                if self.merge_delta(&delta) != DeltaOutcome::UnknownDevice {
                    replayed += 1;
                }
            }
        }
        (self, replayed)
    }

    /// Merge one partial status into its device.
    pub fn apply_delta(mut self, delta: StatusDelta) -> (Self, DeltaOutcome) {
        if self.phase == SyncPhase::AwaitingSnapshot {
            let evicted = self.pending.len() >= MAX_PENDING_DELTAS;
            if evicted {
                if let Some(old) = self.pending.pop_front() {
                    debug!(device_id = %old.device_id, "pending delta buffer full; evicting oldest");
                }
            }
            self.pending.push_back(delta);
            return (self, DeltaOutcome::Buffered { evicted });
        }

        let outcome = self.merge_delta(&delta);
        (self, outcome)
    }

    fn merge_delta(&mut self, delta: &StatusDelta) -> DeltaOutcome {
        let Some(device) = self.devices.get_mut(&delta.device_id) else {
            debug!(device_id = %delta.device_id, "dropping delta for unknown device");
            return DeltaOutcome::UnknownDevice;
        };

        let before = device.status.clone();
        device.status.merge(&delta.status);
        if device.status == before {
            return DeltaOutcome::Unchanged;
        }

        if delta.status.last_seen.is_some() {
            self.last_delta = delta.status.last_seen;
        }
        DeltaOutcome::Applied
    }

    /// Take the backend's alarm list as authoritative for the alarms it
    /// names, in its order.
    ///
    /// Alarms held locally but absent from the list (pushed while the fetch
    /// was in flight, or older than the fetch limit) are kept after it. A
    /// local resolution is never undone by a snapshot that still shows the
    /// alarm unresolved. Returns how many alarms were kept that way.
    pub fn apply_alarm_snapshot(mut self, alarms: Vec<Alarm>) -> (Self, usize) {
        let mut previous = std::mem::take(&mut self.alarms);
        let mut merged: IndexMap<AlarmId, Alarm> = IndexMap::with_capacity(alarms.len());

        for mut alarm in alarms {
            if let Some(local) = previous.shift_remove(&alarm.id) {
                if local.resolved && !alarm.resolved {
                    alarm.resolved = true;
                    alarm.resolved_at = local.resolved_at;
                }
            }
            merged.insert(alarm.id.clone(), alarm);
        }

        let retained = previous.len();
        for (id, alarm) in previous {
            merged.entry(id).or_insert(alarm);
        }

        self.alarms = merged;
        (self, retained)
    }

    /// Insert a pushed alarm unless one with the same id is present.
    pub fn apply_alarm_created(mut self, alarm: Alarm) -> (Self, AlarmOutcome) {
        if self.alarms.contains_key(&alarm.id) {
            debug!(alarm_id = %alarm.id, "ignoring re-delivered alarm");
            return (self, AlarmOutcome::Duplicate);
        }
        self.alarms.insert(alarm.id.clone(), alarm);
        (self, AlarmOutcome::Inserted)
    }

    /// Mark one alarm resolved.
    pub fn resolve_alarm(mut self, id: &AlarmId, at: DateTime<Utc>) -> (Self, ResolveOutcome) {
        let outcome = match self.alarms.get_mut(id) {
            None => ResolveOutcome::NotFound,
            Some(alarm) if alarm.resolved => ResolveOutcome::AlreadyResolved,
            Some(alarm) => {
                alarm.resolved = true;
                alarm.resolved_at = Some(at);
                ResolveOutcome::Resolved
            }
        };
        (self, outcome)
    }

    /// Mark every unresolved alarm resolved, optionally for one device.
    /// Returns how many changed; a second call returns zero.
    pub fn resolve_all(mut self, device_id: Option<&DeviceId>, at: DateTime<Utc>) -> (Self, usize) {
        let mut count = 0;
        for alarm in self.alarms.values_mut() {
            if alarm.resolved || device_id.is_some_and(|d| *d != alarm.device_id) {
                continue;
            }
            alarm.resolved = true;
            alarm.resolved_at = Some(at);
            count += 1;
        }
        (self, count)
    }
}

/// Apply one event.
pub fn reduce(state: FleetState, event: FleetEvent) -> Reduction {
    let (state, outcome) = match event {
        FleetEvent::DeviceSnapshot { devices, at } => {
            let count = devices.len();
            let (state, replayed) = state.apply_snapshot(devices, at);
            (state, Outcome::DevicesReplaced { count, replayed })
        }
        FleetEvent::AlarmSnapshot(alarms) => {
            let count = alarms.len();
            let (state, retained) = state.apply_alarm_snapshot(alarms);
            (state, Outcome::AlarmsReplaced { count, retained })
        }
        FleetEvent::StatusDelta(delta) => {
            let (state, outcome) = state.apply_delta(delta);
            (state, Outcome::Delta(outcome))
        }
        FleetEvent::AlarmCreated(alarm) => {
            let (state, outcome) = state.apply_alarm_created(alarm);
            (state, Outcome::Alarm(outcome))
        }
        FleetEvent::AlarmResolved { id, at } => {
            let (state, outcome) = state.resolve_alarm(&id, at);
            (state, Outcome::Resolve(outcome))
        }
        FleetEvent::AllAlarmsResolved { device_id, at } => {
            let (state, count) = state.resolve_all(device_id.as_ref(), at);
            (state, Outcome::ResolvedAll { count })
        }
    };
    Reduction { state, outcome }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceStatus, EntityId};
    use pretty_assertions::assert_eq;

    fn device(id: &str, status: DeviceStatus) -> Device {
        Device {
            status,
            ..Device::new(id)
        }
    }

    fn delta(id: &str, status: DeviceStatus) -> StatusDelta {
        StatusDelta {
            device_id: id.into(),
            status,
        }
    }

    fn alarm(id: &str, device_id: &str, alarm_type: &str) -> Alarm {
        Alarm {
            id: id.into(),
            device_id: device_id.into(),
            alarm_type: alarm_type.into(),
            detail: serde_json::Value::Null,
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
        }
    }

    fn synced(devices: Vec<Device>) -> FleetState {
        FleetState::new().apply_snapshot(devices, Utc::now()).0
    }

    #[test]
    fn merge_preserves_absent_fields() {
        let state = synced(vec![device(
            "dev-1",
            DeviceStatus {
                battery_pct: Some(80.0),
                speed_kmh: Some(2.0),
                ..DeviceStatus::default()
            },
        )]);

        let (state, outcome) = state.apply_delta(delta(
            "dev-1",
            DeviceStatus {
                battery_pct: Some(50.0),
                ..DeviceStatus::default()
            },
        ));

        assert_eq!(outcome, DeltaOutcome::Applied);
        let status = &state.device(&"dev-1".into()).unwrap().status;
        assert_eq!(status.battery_pct, Some(50.0));
        assert_eq!(status.speed_kmh, Some(2.0));
    }

    #[test]
    fn unknown_device_delta_is_a_no_op() {
        let state = synced(vec![device("dev-1", DeviceStatus::default())]);
        let before = state.clone();

        let (after, outcome) = state.apply_delta(delta(
            "dev-404",
            DeviceStatus {
                battery_pct: Some(10.0),
                ..DeviceStatus::default()
            },
        ));

        assert_eq!(outcome, DeltaOutcome::UnknownDevice);
        assert_eq!(after, before);
    }

    #[test]
    fn identical_delta_reports_unchanged() {
        let status = DeviceStatus {
            connected: Some(true),
            ..DeviceStatus::default()
        };
        let state = synced(vec![device("dev-1", status.clone())]);
        let (_, outcome) = state.apply_delta(delta("dev-1", status));
        assert_eq!(outcome, DeltaOutcome::Unchanged);
    }

    #[test]
    fn deltas_before_snapshot_are_buffered_then_replayed_in_order() {
        let state = FleetState::new();
        let (state, first) = state.apply_delta(delta(
            "dev-1",
            DeviceStatus {
                battery_pct: Some(70.0),
                ..DeviceStatus::default()
            },
        ));
        let (state, _) = state.apply_delta(delta(
            "dev-1",
            DeviceStatus {
                battery_pct: Some(65.0),
                ..DeviceStatus::default()
            },
        ));
        let (state, _) = state.apply_delta(delta(
            "dev-ghost",
            DeviceStatus {
                speed_kmh: Some(1.0),
                ..DeviceStatus::default()
            },
        ));

        assert_eq!(first, DeltaOutcome::Buffered { evicted: false });
        assert_eq!(state.pending_deltas(), 3);
        assert_eq!(state.device_count(), 0);

        let (state, replayed) = state.apply_snapshot(
            vec![device(
                "dev-1",
                DeviceStatus {
                    battery_pct: Some(90.0),
                    ..DeviceStatus::default()
                },
            )],
            Utc::now(),
        );

        assert_eq!(replayed, 2);
        assert!(state.is_synced());
        assert_eq!(state.pending_deltas(), 0);
        assert_eq!(
            state.device(&"dev-1".into()).unwrap().status.battery_pct,
            Some(65.0)
        );
        assert!(state.device(&"dev-ghost".into()).is_none());
    }

    #[test]
    fn pending_buffer_evicts_oldest() {
        let mut state = FleetState::new();
        for i in 0..MAX_PENDING_DELTAS {
            state = state.apply_delta(delta(&format!("dev-{i}"), DeviceStatus::default())).0;
        }
        let (state, outcome) = state.apply_delta(delta("dev-last", DeviceStatus::default()));

        assert_eq!(outcome, DeltaOutcome::Buffered { evicted: true });
        assert_eq!(state.pending_deltas(), MAX_PENDING_DELTAS);
        assert_eq!(state.pending.front().unwrap().device_id, EntityId::from("dev-1"));
    }

    #[test]
    fn later_snapshot_replaces_merged_status() {
        let state = synced(vec![device("dev-1", DeviceStatus::default())]);
        let (state, _) = state.apply_delta(delta(
            "dev-1",
            DeviceStatus {
                speed_kmh: Some(4.0),
                ..DeviceStatus::default()
            },
        ));
        let (state, replayed) = state.apply_snapshot(
            vec![device("dev-2", DeviceStatus::default())],
            Utc::now(),
        );

        assert_eq!(replayed, 0);
        assert!(state.device(&"dev-1".into()).is_none());
        assert_eq!(state.device_count(), 1);
    }

    #[test]
    fn re_delivered_alarm_is_deduplicated() {
        let state = synced(vec![]);
        let (state, first) = state.apply_alarm_created(alarm("al-1", "dev-1", "FALL_DETECTED"));
        let (state, second) = state.apply_alarm_created(alarm("al-1", "dev-1", "FALL_DETECTED"));

        assert_eq!(first, AlarmOutcome::Inserted);
        assert_eq!(second, AlarmOutcome::Duplicate);
        assert_eq!(state.alarm_count(), 1);
    }

    #[test]
    fn resolve_all_is_idempotent() {
        let (state, _) = synced(vec![]).apply_alarm_snapshot(vec![
            alarm("al-1", "dev-1", "FALL_DETECTED"),
            alarm("al-2", "dev-1", "LOW_VOLTAGE"),
            alarm("al-3", "dev-2", "OBSTACLE"),
        ]);
        let at = Utc::now();

        let (once, first) = state.resolve_all(None, at);
        let (twice, second) = once.clone().resolve_all(None, at);

        assert_eq!(first, 3);
        assert_eq!(second, 0);
        assert_eq!(once, twice);
        assert!(twice.active_alarms().is_empty());
    }

    #[test]
    fn resolve_all_scoped_to_device() {
        let (state, _) = synced(vec![]).apply_alarm_snapshot(vec![
            alarm("al-1", "dev-1", "FALL_DETECTED"),
            alarm("al-2", "dev-2", "OBSTACLE"),
        ]);

        let (state, count) = state.resolve_all(Some(&"dev-1".into()), Utc::now());

        assert_eq!(count, 1);
        let active: Vec<String> = state
            .active_alarms()
            .iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(active, vec!["al-2"]);
    }

    #[test]
    fn resolve_single_alarm_outcomes() {
        let (state, _) = synced(vec![]).apply_alarm_snapshot(vec![alarm("al-1", "dev-1", "FALL")]);
        let at = Utc::now();

        let (state, first) = state.resolve_alarm(&"al-1".into(), at);
        let (state, again) = state.resolve_alarm(&"al-1".into(), at);
        let (_, missing) = state.clone().resolve_alarm(&"al-9".into(), at);

        assert_eq!(first, ResolveOutcome::Resolved);
        assert_eq!(again, ResolveOutcome::AlreadyResolved);
        assert_eq!(missing, ResolveOutcome::NotFound);
        assert_eq!(state.alarm(&"al-1".into()).unwrap().resolved_at, Some(at));
    }

    #[test]
    fn positive_signals_never_count_as_active() {
        let (state, _) = synced(vec![]).apply_alarm_snapshot(vec![
            alarm("al-1", "dev-1", "POSTURE_COMPLETE"),
            alarm("al-2", "dev-1", "LOW_VOLTAGE"),
        ]);
        assert_eq!(state.active_alarms().len(), 1);
    }

    #[test]
    fn alarm_snapshot_keeps_alarms_it_does_not_name() {
        let (state, _) = synced(vec![]).apply_alarm_created(alarm("al-push", "dev-1", "ROLLOVER"));

        let (state, retained) = state.apply_alarm_snapshot(vec![alarm("al-1", "dev-2", "OBSTACLE")]);

        assert_eq!(retained, 1);
        let ids: Vec<String> = state.alarms().map(|a| a.id.to_string()).collect();
        assert_eq!(ids, vec!["al-1", "al-push"]);

        let (_, again) = state.apply_alarm_created(alarm("al-push", "dev-1", "ROLLOVER"));
        assert_eq!(again, AlarmOutcome::Duplicate);
    }

    #[test]
    fn alarm_snapshot_does_not_reopen_a_local_resolution() {
        let at = Utc::now();
        let (state, _) = synced(vec![]).apply_alarm_snapshot(vec![alarm("al-1", "dev-1", "FALL")]);
        let (state, _) = state.resolve_alarm(&"al-1".into(), at);

        // A fetch that started before the acknowledgment landed.
        let (state, retained) = state.apply_alarm_snapshot(vec![alarm("al-1", "dev-1", "FALL")]);

        assert_eq!(retained, 0);
        let kept = state.alarm(&"al-1".into()).unwrap();
        assert!(kept.resolved);
        assert_eq!(kept.resolved_at, Some(at));
    }

    #[test]
    fn reduce_reports_change_only_when_visible() {
        let state = FleetState::new();
        let r = reduce(
            state,
            FleetEvent::StatusDelta(delta("dev-1", DeviceStatus::default())),
        );
        assert!(!r.outcome.changed());

        let r = reduce(
            r.state,
            FleetEvent::DeviceSnapshot {
                devices: vec![device("dev-1", DeviceStatus::default())],
                at: Utc::now(),
            },
        );
        assert_eq!(
            r.outcome,
            Outcome::DevicesReplaced {
                count: 1,
                replayed: 1
            }
        );
        assert!(r.outcome.changed());

        let r = reduce(
            r.state,
            FleetEvent::AllAlarmsResolved {
                device_id: None,
                at: Utc::now(),
            },
        );
        assert_eq!(r.outcome, Outcome::ResolvedAll { count: 0 });
        assert!(!r.outcome.changed());
    }
}
