// ── Alarm classification ──
//
// Severity is derived from the alarm type string by keyword match. An
// unrecognized type is not an error: it falls back to `Warning`.

use std::sync::Mutex;

use crate::model::{Alarm, AlarmSeverity};

/// Keywords that mark an alarm type as critical (matched case-insensitively).
pub const CRITICAL_KEYWORDS: &[&str] = &[
    "FALL",
    "ROLLOVER",
    "OBSTACLE",
    "EMERGENCY",
    "CRITICAL",
    "WARNING",
    "FATAL",
];

/// Keywords that mark an alarm as a completion notice rather than a fault.
pub const POSITIVE_KEYWORDS: &[&str] = &["COMPLETE", "SUCCESS"];

fn contains_any(alarm_type: &str, keywords: &[&str]) -> bool {
    let upper = alarm_type.to_ascii_uppercase();
    keywords.iter().any(|k| upper.contains(k))
}

/// Map an alarm type to its severity. Total: every input gets a severity.
pub fn classify(alarm_type: &str) -> AlarmSeverity {
    if contains_any(alarm_type, CRITICAL_KEYWORDS) {
        AlarmSeverity::Critical
    } else {
        AlarmSeverity::Warning
    }
}

/// Whether the type reports a completed action (e.g. `POSTURE_COMPLETE`).
///
/// Positive signals are excluded from active counts and lists whatever
/// other keywords they contain.
pub fn is_positive_signal(alarm_type: &str) -> bool {
    contains_any(alarm_type, POSITIVE_KEYWORDS)
}

/// Unresolved and not a positive signal.
pub fn is_active(alarm: &Alarm) -> bool {
    !alarm.resolved && !is_positive_signal(&alarm.alarm_type)
}

/// Whether a newly arrived alarm should raise a user-facing notification.
pub fn should_notify(alarm: &Alarm) -> bool {
    is_active(alarm) && classify(&alarm.alarm_type) == AlarmSeverity::Critical
}

// ── Notification hook ───────────────────────────────────────────────

/// Receives one call per newly arrived critical alarm.
///
/// The session drives this from the reducer's insert outcome, so a
/// re-delivered alarm never notifies twice.
pub trait Notifier: Send + Sync {
    fn notify(&self, alarm: &Alarm, severity: AlarmSeverity);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _alarm: &Alarm, _severity: AlarmSeverity) {}
}

/// Records notifications in memory. Useful for tests and for consumers
/// that poll instead of reacting.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Alarm>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alarms notified so far, in arrival order.
    pub fn alarms(&self) -> Vec<Alarm> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alarm: &Alarm, _severity: AlarmSeverity) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(alarm.clone());
        }
    }
}
