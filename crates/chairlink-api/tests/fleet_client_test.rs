// Integration tests for `FleetClient` using wiremock.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chairlink_api::{AlarmQuery, Error, FleetClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, FleetClient) {
    let server = MockServer::start().await;
    let client = FleetClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices_bare_array() {
    let (server, client) = setup().await;

    let body = json!([
        { "id": "dev-1", "serial": "WC-0001", "status": { "battery": 80 } },
        { "id": "dev-2", "serialNumber": "WC-0002" },
    ]);

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["id"], "dev-1");
    assert_eq!(devices[1]["serialNumber"], "WC-0002");
}

#[tokio::test]
async fn test_list_devices_wrapped_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "devices": [{ "id": "dev-9" }], "total": 1 })),
        )
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    assert_eq!(devices, vec![json!({ "id": "dev-9" })]);
}

#[tokio::test]
async fn test_list_alarms_sends_query() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/alarms"))
        .and(query_param("deviceId", "dev-1"))
        .and(query_param("resolved", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "al-1", "alarm_type": "FALL_DETECTED", "is_resolved": false }]
        })))
        .mount(&server)
        .await;

    let query = AlarmQuery {
        device_id: Some("dev-1".into()),
        ..AlarmQuery::unresolved()
    };
    let alarms = client.list_alarms(&query).await.unwrap();

    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0]["alarm_type"], "FALL_DETECTED");
}

#[tokio::test]
async fn test_resolve_single_alarm() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/api/alarms"))
        .and(body_json(json!({ "alarmId": "al-7" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    client.resolve_alarm("al-7").await.unwrap();
}

#[tokio::test]
async fn test_resolve_all_alarms_for_device() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/api/alarms"))
        .and(body_json(json!({ "resolveAll": true, "deviceId": "dev-3" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    // Resolving twice is harmless at the transport level.
    client.resolve_all_alarms(Some("dev-3")).await.unwrap();
    client.resolve_all_alarms(Some("dev-3")).await.unwrap();
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    let transport = TransportConfig::default().with_token("s3cret".to_string().into());
    let client = FleetClient::new(server.uri().parse().unwrap(), &transport).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    assert!(devices.is_empty());
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_maps_to_authentication() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    assert!(err.is_auth_failure(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_server_error_carries_status_and_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/alarms"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client.list_alarms(&AlarmQuery::default()).await.unwrap_err();
    match err {
        Error::Http { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert!(body.contains("oops")),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}
