// ── Alarm domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::{AlarmId, DeviceId};
use crate::classify;

/// Derived urgency of an alarm. Never transported; see [`classify::classify`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AlarmSeverity {
    Critical,
    Warning,
}

/// A discrete alarm raised by a chair.
///
/// Created externally, moved from unresolved to resolved by explicit
/// acknowledgment, never deleted client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub device_id: DeviceId,
    pub alarm_type: String,
    /// Free text or structured payload, passed through untouched.
    #[serde(default)]
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alarm {
    pub fn severity(&self) -> AlarmSeverity {
        classify::classify(&self.alarm_type)
    }

    /// Completion or success notices dressed up as alarms.
    pub fn is_positive_signal(&self) -> bool {
        classify::is_positive_signal(&self.alarm_type)
    }

    /// Unresolved and not a positive signal.
    pub fn is_active(&self) -> bool {
        classify::is_active(self)
    }

    /// Human-readable detail: the string itself, or compact JSON.
    pub fn detail_text(&self) -> String {
        match &self.detail {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
