// Fleet backend REST client
//
// Wraps `reqwest::Client` with URL construction, status mapping, and
// list-envelope unwrapping. Payloads are returned as raw JSON: field
// naming is inconsistent upstream, so canonicalization belongs to the
// core crate's normalization boundary, not here.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Keys under which the backend may wrap a device list.
const DEVICE_LIST_KEYS: &[&str] = &["data", "devices", "items"];

/// Keys under which the backend may wrap an alarm list.
const ALARM_LIST_KEYS: &[&str] = &["data", "alarms", "items"];

/// Maximum number of response-body bytes kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Query parameters for the alarm list endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmQuery {
    /// Restrict to alarms owned by this device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// `Some(false)` asks for unresolved alarms only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    /// Upper bound on returned rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl AlarmQuery {
    /// Only alarms still awaiting acknowledgment.
    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Self::default()
        }
    }
}

/// HTTP client for the fleet backend.
///
/// Every call is scoped to whatever the bearer token's principal can see;
/// the backend decides visibility.
#[derive(Debug, Clone)]
pub struct FleetClient {
    http: reqwest::Client,
    base_url: Url,
}

impl FleetClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the backend root, e.g. `https://fleet.example.com`.
    /// Routes are appended under `/api/`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self { http, base_url })
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Snapshot endpoints ───────────────────────────────────────────

    /// List every device visible to the current principal.
    ///
    /// `GET /api/devices`
    pub async fn list_devices(&self) -> Result<Vec<Value>, Error> {
        let url = self.api_url("devices")?;
        debug!("listing devices");
        let body = self.get_json(url, None).await?;
        extract_list(body, DEVICE_LIST_KEYS)
    }

    /// List alarms visible to the current principal.
    ///
    /// `GET /api/alarms?deviceId=..&resolved=..&limit=..`
    pub async fn list_alarms(&self, query: &AlarmQuery) -> Result<Vec<Value>, Error> {
        let url = self.api_url("alarms")?;
        debug!(?query, "listing alarms");
        let body = self.get_json(url, Some(query)).await?;
        extract_list(body, ALARM_LIST_KEYS)
    }

    // ── Alarm resolution ─────────────────────────────────────────────

    /// Acknowledge a single alarm.
    ///
    /// `PATCH /api/alarms` with `{"alarmId": "..."}`
    pub async fn resolve_alarm(&self, alarm_id: &str) -> Result<(), Error> {
        let url = self.api_url("alarms")?;
        debug!(alarm_id, "resolving alarm");
        self.patch(url, &json!({ "alarmId": alarm_id })).await
    }

    /// Acknowledge every unresolved alarm, optionally scoped to one device.
    ///
    /// `PATCH /api/alarms` with `{"resolveAll": true, "deviceId": "..."}`
    pub async fn resolve_all_alarms(&self, device_id: Option<&str>) -> Result<(), Error> {
        let url = self.api_url("alarms")?;
        debug!(?device_id, "resolving all alarms");
        let body = match device_id {
            Some(id) => json!({ "resolveAll": true, "deviceId": id }),
            None => json!({ "resolveAll": true }),
        };
        self.patch(url, &body).await
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/{path}`, keeping any path prefix on the base URL.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/api/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        );
        Ok(Url::parse(&full)?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get_json(&self, url: Url, query: Option<&AlarmQuery>) -> Result<Value, Error> {
        debug!("GET {}", url);

        let mut request = self.http.get(url);
        if let Some(query) = query {
            request = request.query(query);
        }

        let resp = request
            .send()
            .await
            .map_err(Error::Transport)?;

        let resp = check_status(resp).await?;
        let body = resp.text().await.map_err(Error::Transport)?;

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    async fn patch(&self, url: Url, body: &Value) -> Result<(), Error> {
        debug!("PATCH {}", url);

        let resp = self
            .http
            .patch(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        check_status(resp).await?;
        Ok(())
    }
}

/// Map auth and non-2xx responses to errors, passing successes through.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("backend rejected credentials (HTTP {})", status.as_u16()),
        });
    }

    if status.is_success() {
        return Ok(resp);
    }

    let mut message = resp.text().await.unwrap_or_default();
    if message.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned();
    }

    Err(Error::Http {
        status: status.as_u16(),
        message,
    })
}

/// Pull the record array out of a bare array or a wrapping object.
fn extract_list(body: Value, keys: &[&str]) -> Result<Vec<Value>, Error> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in keys {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return Ok(items);
                }
            }
            Err(Error::Deserialization {
                message: format!("expected an array under one of {keys:?}"),
                body: Value::Object(map).to_string(),
            })
        }
        other => Err(Error::Deserialization {
            message: "expected a JSON array or object".into(),
            body: other.to_string(),
        }),
    }
}
