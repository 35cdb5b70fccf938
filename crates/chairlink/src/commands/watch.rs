//! Live follow mode: telemetry changes, alarm arrivals, and connection
//! transitions printed as they happen until Ctrl-C.

use std::io::{self, Write};
use std::sync::Arc;

use chrono::Utc;
use owo_colors::OwoColorize;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use chairlink_core::{
    Alarm, AlarmSeverity, ConnectionState, CoreError, Device, FleetConfig, FleetSession,
    FleetState, NoopNotifier, Notifier, OperatingState,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

// ── Bell ─────────────────────────────────────────────────────────────

/// Rings the terminal bell. The session calls it once per newly arrived
/// active critical alarm.
struct BellNotifier;

impl Notifier for BellNotifier {
    fn notify(&self, alarm: &Alarm, severity: AlarmSeverity) {
        info!(alarm_id = %alarm.id, %severity, "critical alarm");
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent<'a> {
    Telemetry {
        device: &'a Device,
        state: OperatingState,
    },
    Alarm {
        alarm: &'a Alarm,
        severity: AlarmSeverity,
    },
    Connection {
        state: String,
    },
}

struct Printer {
    json: bool,
    color: bool,
    quiet: bool,
}

impl Printer {
    fn new(global: &GlobalOpts) -> Self {
        Self {
            json: matches!(global.output, OutputFormat::Json | OutputFormat::JsonCompact),
            color: output::should_color(&global.color),
            quiet: global.quiet,
        }
    }

    fn emit(&self, event: &WatchEvent<'_>) {
        let line = if self.json {
            match output::render_json(event, true) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "could not encode watch event");
                    return;
                }
            }
        } else {
            self.text(event)
        };
        output::print_output(&line, self.quiet);
    }

    fn text(&self, event: &WatchEvent<'_>) -> String {
        let now = Utc::now().format("%H:%M:%S");
        match event {
            WatchEvent::Telemetry { device, state } => format!(
                "{now}  {:<20} {:<9} battery {:>5}  speed {:>9}  {}",
                device.label(),
                state,
                output::opt_num(device.status.battery_pct, 0, "%"),
                output::opt_num(device.status.speed_kmh, 1, " km/h"),
                if device.is_connected() { "online" } else { "offline" },
            ),
            WatchEvent::Alarm { alarm, severity } => {
                let detail = alarm.detail_text();
                format!(
                    "{now}  ALARM {} {} on {}{}",
                    output::severity_label(*severity, self.color),
                    if self.color {
                        alarm.alarm_type.bold().to_string()
                    } else {
                        alarm.alarm_type.clone()
                    },
                    alarm.device_id,
                    if detail.is_empty() {
                        String::new()
                    } else {
                        format!(": {detail}")
                    },
                )
            }
            WatchEvent::Connection { state } => format!("{now}  -- {state}"),
        }
    }
}

fn describe(state: ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".into(),
        ConnectionState::Connecting => "connecting".into(),
        ConnectionState::Connected => "connected".into(),
        ConnectionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
        ConnectionState::Failed => "connection failed".into(),
    }
}

/// Devices in `next` whose record differs from `prev`, in fleet order.
fn changed_devices<'a>(prev: &FleetState, next: &'a FleetState) -> Vec<&'a Device> {
    next.devices()
        .filter(|d| prev.device(&d.id) != Some(*d))
        .collect()
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    mut config: FleetConfig,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    config.websocket_enabled = true;
    if let Some(secs) = args.refresh {
        config.refresh_interval_secs = secs;
    }

    let notifier: Arc<dyn Notifier> = if args.no_bell {
        Arc::new(NoopNotifier)
    } else {
        Arc::new(BellNotifier)
    };
    let session = FleetSession::with_notifier(config, notifier);
    let printer = Printer::new(global);

    let mut arrivals = session.alarm_arrivals();
    let mut connection = session.connection_state();
    let mut fleet = session.subscribe();

    match session.open().await {
        Ok(()) => {}
        Err(e @ (CoreError::AuthenticationFailed { .. } | CoreError::Config { .. })) => {
            session.close().await;
            return Err(e.into());
        }
        // The stream may still deliver; keep following and let a later
        // refresh fill in the snapshot.
        Err(e) => warn!(error = %e, "initial snapshot failed"),
    }

    let mut previous = session.snapshot();
    if !global.quiet && !printer.json {
        let summary = session.summary();
        eprintln!(
            "Watching {} chairs ({} connected, {} active alarms). Ctrl-C to stop.",
            summary.total,
            summary.connected,
            summary.active_alarms()
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("interrupt received");
                break;
            }
            next = fleet.changed() => {
                let Some(next) = next else { break };
                for device in changed_devices(&previous, &next) {
                    printer.emit(&WatchEvent::Telemetry {
                        device,
                        state: device.operating_state(),
                    });
                }
                previous = next;
            }
            arrival = arrivals.recv() => match arrival {
                Ok(alarm) => printer.emit(&WatchEvent::Alarm {
                    alarm: &alarm,
                    severity: alarm.severity(),
                }),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "alarm output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                printer.emit(&WatchEvent::Connection { state: describe(state) });
            }
        }
    }

    session.close().await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chairlink_core::{DataStore, DeviceStatus, FleetEvent, StatusDelta};

    fn chair(id: &str, battery: f64) -> Device {
        let mut device = Device::new(id);
        device.status = DeviceStatus {
            battery_pct: Some(battery),
            ..DeviceStatus::default()
        };
        device
    }

    #[test]
    fn only_devices_that_changed_are_reported() {
        let store = DataStore::new();
        store.dispatch(FleetEvent::DeviceSnapshot {
            devices: vec![chair("a", 80.0), chair("b", 60.0)],
            at: Utc::now(),
        });
        let before = store.snapshot();

        store.dispatch(FleetEvent::StatusDelta(StatusDelta {
            device_id: "b".into(),
            status: DeviceStatus {
                battery_pct: Some(55.0),
                ..DeviceStatus::default()
            },
        }));
        let after = store.snapshot();

        let changed = changed_devices(&before, &after);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id.to_string(), "b");
    }

    #[test]
    fn text_lines_are_uncolored_when_disabled() {
        let printer = Printer {
            json: false,
            color: false,
            quiet: true,
        };
        let alarm = Alarm {
            id: "al-1".into(),
            device_id: "dev-1".into(),
            alarm_type: "FALL_DETECTED".into(),
            detail: serde_json::Value::String("rear sensor".into()),
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        let line = printer.text(&WatchEvent::Alarm {
            alarm: &alarm,
            severity: alarm.severity(),
        });
        assert!(line.ends_with("ALARM critical FALL_DETECTED on dev-1: rear sensor"));
    }

    #[test]
    fn connection_states_are_described() {
        assert_eq!(
            describe(ConnectionState::Reconnecting { attempt: 3 }),
            "reconnecting (attempt 3)"
        );
    }
}
