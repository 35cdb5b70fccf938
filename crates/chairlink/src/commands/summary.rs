//! Fleet summary.

use chairlink_core::{FleetConfig, FleetSession, FleetSummary};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

fn detail(s: &FleetSummary) -> String {
    let snapshot = s
        .last_snapshot
        .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    [
        format!("Devices:       {}", s.total),
        format!("  Connected:   {}", s.connected),
        format!("  Offline:     {}", s.disconnected),
        format!("  Operating:   {}", s.operating),
        format!("  Charging:    {}", s.charging),
        format!("  Idle:        {}", s.idle),
        format!("  Low battery: {}", s.low_battery),
        format!("  Stale:       {}", s.stale),
        format!("Active alarms: {}", s.active_alarms()),
        format!("  Critical:    {}", s.active_critical),
        format!("  Warning:     {}", s.active_warning),
        format!("Snapshot:      {snapshot}"),
    ]
    .join("\n")
}

pub async fn handle(config: FleetConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let summary =
        FleetSession::oneshot(config, |session| async move { Ok(session.summary()) }).await?;

    let out = output::render_single(&global.output, &summary, detail, |s| {
        s.active_alarms().to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_lists_every_count() {
        let summary = FleetSummary {
            total: 4,
            connected: 3,
            disconnected: 1,
            active_critical: 2,
            active_warning: 1,
            ..FleetSummary::default()
        };
        let text = detail(&summary);
        assert!(text.contains("Devices:       4"));
        assert!(text.contains("Active alarms: 3"));
        assert!(text.contains("Snapshot:      -"));
    }
}
