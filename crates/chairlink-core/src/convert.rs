// ── Raw-JSON-to-domain normalization ──
//
// The backend and the broker disagree on field naming (snake_case,
// camelCase, and a few legacy spellings) and on value encoding (numbers
// as strings, timestamps as RFC 3339 or epoch milliseconds). Every payload
// passes through this module exactly once; nothing downstream ever sees
// a raw key.
//
// Lookups take the first alias whose value parses. Explicit `null` is
// treated the same as an absent key.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use chairlink_api::BrokerEvent;

use crate::model::{Alarm, Device, DeviceId, DeviceStatus, EntityId, StatusDelta};
use crate::store::FleetEvent;

// ── Alias tables ────────────────────────────────────────────────────

const DEVICE_ID: &[&str] = &["id", "_id", "deviceId", "device_id"];
const DELTA_DEVICE_ID: &[&str] = &["deviceId", "device_id", "id", "_id"];
const SERIAL: &[&str] = &["serial", "serialNumber", "serial_number", "serial_no"];
const MODEL: &[&str] = &["model", "modelName", "model_name"];
const NAME: &[&str] = &["name", "deviceName", "device_name", "nickname"];
const ASSIGNED_TO: &[&str] = &[
    "assigned_to",
    "assignedTo",
    "owner",
    "ownerName",
    "owner_name",
    "userName",
    "user_name",
];
const REGISTERED_AT: &[&str] = &["registered_at", "registeredAt", "created_at", "createdAt"];
const STATUS_NESTS: &[&str] = &["status", "deviceStatus", "device_status"];

const BATTERY: &[&str] = &[
    "battery",
    "batteryPercent",
    "battery_percent",
    "current_battery",
    "batteryLevel",
    "battery_level",
];
const SPEED: &[&str] = &["speed", "current_speed", "currentSpeed"];
const CURRENT: &[&str] = &["current", "current_a", "electric_current", "currentAmp"];
const VOLTAGE: &[&str] = &["voltage", "voltage_v", "batteryVoltage", "battery_voltage"];
const LATITUDE: &[&str] = &["latitude", "lat", "gps_lat"];
const LONGITUDE: &[&str] = &["longitude", "lng", "lon", "gps_lng", "gps_lon"];
const SEAT_ANGLE: &[&str] = &["seat_angle", "seatAngle"];
const BACK_ANGLE: &[&str] = &["back_angle", "backAngle"];
const LEG_ANGLE: &[&str] = &["leg_angle", "legAngle"];
const TILT_ANGLE: &[&str] = &["tilt_angle", "tiltAngle"];
const INCLINATION: &[&str] = &["inclination", "incline_angle", "inclineAngle"];
const TEMPERATURE: &[&str] = &["temperature", "temp"];
const HUMIDITY: &[&str] = &["humidity"];
const CONNECTED: &[&str] = &["is_connected", "isConnected", "connected", "online"];
const LAST_SEEN: &[&str] = &["last_seen", "lastSeen"];
/// Report-time aliases for status objects and deltas. On a device record
/// itself these name record metadata, not telemetry.
const REPORT_TIME: &[&str] = &["last_seen", "lastSeen", "updated_at", "updatedAt", "timestamp"];
const MODE: &[&str] = &["mode", "operating_mode", "operatingMode", "drive_mode", "driveMode"];

const ALARM_ID: &[&str] = &["id", "_id", "alarmId", "alarm_id"];
const ALARM_DEVICE: &[&str] = &["device_id", "deviceId"];
const ALARM_TYPE: &[&str] = &["alarm_type", "alarmType", "type"];
const ALARM_DETAIL: &[&str] = &["detail", "details", "message", "description", "data"];
const ALARM_TIME: &[&str] = &[
    "created_at",
    "createdAt",
    "timestamp",
    "time",
    "occurred_at",
    "occurredAt",
];
const RESOLVED: &[&str] = &["is_resolved", "isResolved", "resolved"];
const RESOLVED_AT: &[&str] = &["resolved_at", "resolvedAt"];

// ── Broker event names ──────────────────────────────────────────────

const STATUS_EVENTS: &[&str] = &[
    "status_update",
    "statusUpdate",
    "device_status",
    "deviceStatus",
    "telemetry",
];
const ALARM_CREATED_EVENTS: &[&str] = &[
    "alarm_created",
    "alarmCreated",
    "new_alarm",
    "newAlarm",
    "alarm",
];
const ALARM_RESOLVED_EVENTS: &[&str] = &["alarm_resolved", "alarmResolved"];

// ── Value helpers ───────────────────────────────────────────────────

fn pick<'a, T>(
    obj: &'a Map<String, Value>,
    keys: &[&str],
    parse: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    keys.iter().find_map(|k| obj.get(*k).and_then(&parse))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "online" | "connected" => Some(true),
            "false" | "0" | "no" | "offline" | "disconnected" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_id(value: &Value) -> Option<EntityId> {
    as_text(value).map(EntityId::from)
}

/// Epoch values at or above this are milliseconds; below, seconds.
const EPOCH_MILLIS_FLOOR: i64 = 100_000_000_000;

fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() >= EPOCH_MILLIS_FLOOR {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(epoch_to_datetime),
        Value::String(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

/// RFC 3339, then naive `YYYY-MM-DD HH:MM:SS` (assumed UTC), then an
/// integer epoch encoded as a string.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>().ok().and_then(epoch_to_datetime)
}

/// Payloads are occasionally double-encoded as a JSON string.
fn unwrap_encoded(payload: &Value) -> Option<Value> {
    match payload {
        Value::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Read telemetry fields off a flat object.
fn status_fields(obj: &Map<String, Value>, last_seen: &[&str]) -> DeviceStatus {
    DeviceStatus {
        battery_pct: pick(obj, BATTERY, as_number),
        speed_kmh: pick(obj, SPEED, as_number),
        current_a: pick(obj, CURRENT, as_number),
        voltage_v: pick(obj, VOLTAGE, as_number),
        latitude: pick(obj, LATITUDE, as_number),
        longitude: pick(obj, LONGITUDE, as_number),
        seat_angle: pick(obj, SEAT_ANGLE, as_number),
        back_angle: pick(obj, BACK_ANGLE, as_number),
        leg_angle: pick(obj, LEG_ANGLE, as_number),
        tilt_angle: pick(obj, TILT_ANGLE, as_number),
        inclination: pick(obj, INCLINATION, as_number),
        temperature_c: pick(obj, TEMPERATURE, as_number),
        humidity_pct: pick(obj, HUMIDITY, as_number),
        connected: pick(obj, CONNECTED, as_flag),
        last_seen: pick(obj, last_seen, as_timestamp),
        mode: pick(obj, MODE, as_text),
    }
}

/// Status from an object that may carry it flat, nested, or both.
///
/// Nested values win over flat ones. A string under `status` (e.g.
/// `"online"`) is read as the connectivity flag.
pub fn status_from_json(obj: &Map<String, Value>) -> DeviceStatus {
    status_with_flat_time(obj, REPORT_TIME)
}

fn status_with_flat_time(obj: &Map<String, Value>, flat_last_seen: &[&str]) -> DeviceStatus {
    let mut status = status_fields(obj, flat_last_seen);
    if let Some(nested) = pick(obj, STATUS_NESTS, Value::as_object) {
        status.merge(&status_fields(nested, REPORT_TIME));
    }
    if status.connected.is_none() {
        status.connected = pick(obj, &["status"], |v| v.as_str().and_then(|_| as_flag(v)));
    }
    status
}

// ── Device ──────────────────────────────────────────────────────────

/// Normalize one device record. Records without an identity are dropped.
pub fn device_from_json(raw: &Value) -> Option<Device> {
    let Some(obj) = raw.as_object() else {
        debug!("device record is not an object");
        return None;
    };
    let Some(id) = pick(obj, DEVICE_ID, as_id) else {
        debug!("device record without an id");
        return None;
    };

    Some(Device {
        id,
        serial: pick(obj, SERIAL, as_text),
        model: pick(obj, MODEL, as_text),
        name: pick(obj, NAME, as_text),
        assigned_to: pick(obj, ASSIGNED_TO, as_text),
        registered_at: pick(obj, REGISTERED_AT, as_timestamp),
        status: status_with_flat_time(obj, LAST_SEEN),
    })
}

/// Normalize a device snapshot, skipping unusable records.
pub fn devices_from_json(raw: &[Value]) -> Vec<Device> {
    let devices: Vec<Device> = raw.iter().filter_map(device_from_json).collect();
    if devices.len() < raw.len() {
        debug!(
            dropped = raw.len() - devices.len(),
            "skipped device records without identity"
        );
    }
    devices
}

/// Normalize a `status_update` payload.
///
/// Accepts `{deviceId, ...fields}`, `{deviceId, status: {...}}`, or the
/// two-argument form `["deviceId", {...fields}]`. When the payload carries
/// no report time, `received_at` stands in as `last_seen`.
pub fn delta_from_json(payload: &Value, received_at: DateTime<Utc>) -> Option<StatusDelta> {
    let payload = unwrap_encoded(payload)?;
    let (device_id, mut status) = match &payload {
        Value::Object(obj) => (pick(obj, DELTA_DEVICE_ID, as_id)?, status_from_json(obj)),
        Value::Array(items) => match items.as_slice() {
            [id, Value::Object(obj)] => (as_id(id)?, status_from_json(obj)),
            _ => return None,
        },
        _ => return None,
    };
    if status.last_seen.is_none() {
        status.last_seen = Some(received_at);
    }
    Some(StatusDelta { device_id, status })
}

// ── Alarm ───────────────────────────────────────────────────────────

fn alarm_device_id(obj: &Map<String, Value>) -> Option<DeviceId> {
    pick(obj, ALARM_DEVICE, as_id).or_else(|| {
        obj.get("device")
            .and_then(Value::as_object)
            .and_then(|d| pick(d, DEVICE_ID, as_id))
    })
}

/// Normalize one alarm record. Records missing an id or an owning device
/// are dropped; a missing timestamp falls back to `fallback_time`.
pub fn alarm_from_json(raw: &Value, fallback_time: DateTime<Utc>) -> Option<Alarm> {
    let obj = raw.as_object()?;
    // Broker alarm events sometimes wrap the record.
    if let Some(inner) = obj.get("alarm").filter(|v| v.is_object()) {
        return alarm_from_json(inner, fallback_time);
    }

    let Some(id) = pick(obj, ALARM_ID, as_id) else {
        debug!("alarm record without an id");
        return None;
    };
    let Some(device_id) = alarm_device_id(obj) else {
        debug!(alarm_id = %id, "alarm record without a device");
        return None;
    };

    Some(Alarm {
        id,
        device_id,
        alarm_type: pick(obj, ALARM_TYPE, as_text).unwrap_or_else(|| "UNKNOWN".into()),
        detail: pick(obj, ALARM_DETAIL, |v| (!v.is_null()).then(|| v.clone()))
            .unwrap_or(Value::Null),
        timestamp: pick(obj, ALARM_TIME, as_timestamp).unwrap_or(fallback_time),
        resolved: pick(obj, RESOLVED, as_flag).unwrap_or(false),
        resolved_at: pick(obj, RESOLVED_AT, as_timestamp),
    })
}

/// Normalize an alarm snapshot, skipping unusable records.
pub fn alarms_from_json(raw: &[Value]) -> Vec<Alarm> {
    let now = Utc::now();
    let alarms: Vec<Alarm> = raw
        .iter()
        .filter_map(|v| alarm_from_json(v, now))
        .collect();
    if alarms.len() < raw.len() {
        debug!(
            dropped = raw.len() - alarms.len(),
            "skipped unusable alarm records"
        );
    }
    alarms
}

fn resolution_from_json(payload: &Value, received_at: DateTime<Utc>) -> Option<FleetEvent> {
    let obj = payload.as_object()?;
    let at = pick(obj, RESOLVED_AT, as_timestamp).unwrap_or(received_at);
    if pick(obj, &["resolveAll", "resolve_all"], as_flag).unwrap_or(false) {
        return Some(FleetEvent::AllAlarmsResolved {
            device_id: pick(obj, ALARM_DEVICE, as_id),
            at,
        });
    }
    let id = pick(obj, &["alarmId", "alarm_id", "id", "_id"], as_id)?;
    Some(FleetEvent::AlarmResolved { id, at })
}

// ── Broker events ───────────────────────────────────────────────────

/// Translate a broker event into a reducer event.
///
/// Unknown event names and unusable payloads yield `None` and are logged
/// at debug.
pub fn event_from_broker(event: &BrokerEvent) -> Option<FleetEvent> {
    let name = event.name.as_str();
    let translated = if STATUS_EVENTS.contains(&name) {
        delta_from_json(&event.payload, event.received_at).map(FleetEvent::StatusDelta)
    } else if ALARM_CREATED_EVENTS.contains(&name) {
        unwrap_encoded(&event.payload)
            .and_then(|p| alarm_from_json(&p, event.received_at))
            .map(FleetEvent::AlarmCreated)
    } else if ALARM_RESOLVED_EVENTS.contains(&name) {
        unwrap_encoded(&event.payload).and_then(|p| resolution_from_json(&p, event.received_at))
    } else {
        debug!(event = name, "ignoring unhandled broker event");
        return None;
    };

    if translated.is_none() {
        debug!(event = name, payload = %event.payload, "dropping malformed broker payload");
    }
    translated
}
