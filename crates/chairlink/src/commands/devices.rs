//! Device listing.

use chrono::{DateTime, Utc};
use tabled::Tabled;

use chairlink_core::{Device, DeviceFilter, FleetConfig, FleetSession, OperatingState};

use crate::cli::{DevicesArgs, GlobalOpts, StateArg};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Online")]
    online: String,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

impl DeviceRow {
    fn new(d: &Device, now: DateTime<Utc>) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.label(),
            model: d.model.clone().unwrap_or_default(),
            state: d.operating_state().to_string(),
            battery: output::opt_num(d.status.battery_pct, 0, "%"),
            speed: output::opt_num(d.status.speed_kmh, 1, " km/h"),
            online: if d.is_connected() { "yes" } else { "no" }.into(),
            last_seen: output::age(d.status.last_seen, now),
        }
    }
}

impl From<StateArg> for OperatingState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Operating => Self::Operating,
            StateArg::Charging => Self::Charging,
            StateArg::Idle => Self::Idle,
        }
    }
}

/// Every filter the flags ask for; a device must pass all of them.
fn filters(args: &DevicesArgs, config: &FleetConfig, now: DateTime<Utc>) -> Vec<DeviceFilter> {
    let thresholds = config.thresholds();
    let mut filters = Vec::new();
    if let Some(state) = args.state {
        filters.push(DeviceFilter::ByState(state.into()));
    }
    if args.low_battery {
        filters.push(DeviceFilter::LowBattery(thresholds.low_battery_pct));
    }
    if args.stale {
        filters.push(DeviceFilter::Stale {
            now,
            max_age: thresholds.stale_after,
        });
    }
    if args.online {
        filters.push(DeviceFilter::Connected);
    }
    if args.offline {
        filters.push(DeviceFilter::Disconnected);
    }
    filters
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: FleetConfig,
    args: &DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let now = Utc::now();
    let filters = filters(args, &config, now);

    let devices = FleetSession::oneshot(config, |session| async move {
        Ok(session.devices(&DeviceFilter::All))
    })
    .await?;

    let devices: Vec<Device> = devices
        .into_iter()
        .filter(|d| filters.iter().all(|f| f.matches(d)))
        .collect();

    let out = output::render_list(
        &global.output,
        &devices,
        |d| DeviceRow::new(d, now),
        |d| d.id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
