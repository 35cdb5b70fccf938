// Integration tests for `FleetSession` against a mocked backend.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chairlink_core::{
    AlarmFilter, Command, CommandResult, ConnectionState, CoreError, DeviceFilter, FleetConfig,
    FleetSession,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn config_for(server: &MockServer) -> FleetConfig {
    let mut config = FleetConfig::new(
        server.uri().parse().unwrap(),
        "ws://127.0.0.1:9/socket.io/".parse().unwrap(),
    );
    config.websocket_enabled = false;
    config.timeout = Duration::from_secs(5);
    config
}

async fn mount_snapshot(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices": [
                { "_id": "dev-1", "serialNumber": "WC-0001", "status": { "battery": "64", "isConnected": true } },
                { "id": "dev-2", "battery_level": 12, "online": false },
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/alarms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "al-1", "deviceId": "dev-1", "alarmType": "FALL_DETECTED", "isResolved": false },
            { "id": "al-2", "device_id": "dev-2", "alarm_type": "LOW_VOLTAGE", "is_resolved": false },
            { "id": "al-3", "device_id": "dev-2", "type": "OBSTACLE", "resolved": true },
        ])))
        .mount(server)
        .await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_applies_normalized_snapshot() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;

    let session = FleetSession::new(config_for(&server));
    session.open().await.unwrap();

    let snap = session.snapshot();
    assert!(snap.is_synced());
    assert_eq!(snap.device_count(), 2);
    assert_eq!(snap.alarm_count(), 3);

    let dev1 = snap.device(&"dev-1".into()).unwrap();
    assert_eq!(dev1.serial.as_deref(), Some("WC-0001"));
    assert_eq!(dev1.status.battery_pct, Some(64.0));
    assert_eq!(session.devices(&DeviceFilter::Connected).len(), 1);
    assert_eq!(session.alarms(&AlarmFilter::Active).len(), 2);
    assert!(session.store().last_error().is_none());

    session.close().await;
    assert_eq!(
        *session.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_resolve_flow_against_backend() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;

    Mock::given(method("PATCH"))
        .and(path("/api/alarms"))
        .and(body_json(json!({ "alarmId": "al-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/alarms"))
        .and(body_json(json!({ "resolveAll": true })))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let session = FleetSession::new(config_for(&server));
    session.open().await.unwrap();

    let single = session
        .execute(Command::ResolveAlarm { id: "al-1".into() })
        .await
        .unwrap();
    assert_eq!(single, CommandResult::Resolved { count: 1 });

    let first = session
        .execute(Command::ResolveAllAlarms { device_id: None })
        .await
        .unwrap();
    assert_eq!(first, CommandResult::Resolved { count: 1 });

    // Nothing left to acknowledge; still a success.
    let second = session
        .execute(Command::ResolveAllAlarms { device_id: None })
        .await
        .unwrap();
    assert_eq!(second, CommandResult::Resolved { count: 0 });

    assert!(session.alarms(&AlarmFilter::Active).is_empty());
    let al1 = session.snapshot().alarm(&"al-1".into()).cloned().unwrap();
    assert!(al1.resolved);
    assert!(al1.resolved_at.is_some());

    session.close().await;
    assert!(matches!(
        session.execute(Command::Refresh).await,
        Err(CoreError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_refresh_command_reports_counts() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;

    let session = FleetSession::new(config_for(&server));
    session.open().await.unwrap();

    let result = session.execute(Command::Refresh).await.unwrap();
    assert_eq!(
        result,
        CommandResult::Refreshed {
            devices: 2,
            alarms: 3
        }
    );

    session.close().await;
}

#[tokio::test]
async fn test_backend_rejection_keeps_previous_state() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;

    let session = FleetSession::new(config_for(&server));
    session.open().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, CoreError::Fetch { .. }), "got {err:?}");
    assert_eq!(session.snapshot().device_count(), 2);
    assert!(session.store().last_error().is_some());

    session.close().await;
}

#[tokio::test]
async fn test_oneshot_opens_and_closes() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;

    let count = FleetSession::oneshot(config_for(&server), |session| async move {
        Ok(session.devices(&DeviceFilter::All).len())
    })
    .await
    .unwrap();

    assert_eq!(count, 2);
}
