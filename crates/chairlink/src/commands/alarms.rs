//! Alarm command handlers.

use tabled::Tabled;

use chairlink_core::{
    Alarm, AlarmFilter, AlarmSeverity, Command as CoreCommand, CommandResult, EntityId,
    FleetConfig, FleetSession,
};

use crate::cli::{AlarmsArgs, AlarmsCommand, GlobalOpts, SeverityArg};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct AlarmRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Type")]
    alarm_type: String,
    #[tabled(rename = "Detail")]
    detail: String,
    #[tabled(rename = "Resolved")]
    resolved: String,
}

impl AlarmRow {
    fn new(a: &Alarm, color: bool) -> Self {
        Self {
            id: a.id.to_string(),
            time: a.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            device: a.device_id.to_string(),
            severity: output::severity_label(a.severity(), color),
            alarm_type: a.alarm_type.clone(),
            detail: util::truncate(&a.detail_text(), 48),
            resolved: if a.resolved { "yes" } else { "no" }.into(),
        }
    }
}

impl From<SeverityArg> for AlarmSeverity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Critical => Self::Critical,
            SeverityArg::Warning => Self::Warning,
        }
    }
}

/// Compose the list filter from the flags.
fn list_filter(all: bool, device: Option<String>, severity: Option<SeverityArg>) -> AlarmFilter {
    let mut filter = if all {
        AlarmFilter::All
    } else {
        AlarmFilter::Active
    };
    if let Some(id) = device {
        filter = filter.and(AlarmFilter::ByDevice(EntityId::from(id)));
    }
    if let Some(severity) = severity {
        filter = filter.and(AlarmFilter::BySeverity(severity.into()));
    }
    filter
}

fn report_resolved(result: &CommandResult, quiet: bool) {
    if quiet {
        return;
    }
    if let CommandResult::Resolved { count } = result {
        let noun = if *count == 1 { "alarm" } else { "alarms" };
        eprintln!("Resolved {count} {noun}");
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: FleetConfig,
    args: AlarmsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        AlarmsCommand::List {
            all,
            device,
            severity,
        } => {
            let filter = list_filter(all, device, severity);
            let alarms = FleetSession::oneshot(config, |session| async move {
                Ok(session.alarms(&filter))
            })
            .await?;

            let color = output::should_color(&global.color);
            let out = output::render_list(
                &global.output,
                &alarms,
                |a| AlarmRow::new(a, color),
                |a| a.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        AlarmsCommand::Resolve { id } => {
            let id = EntityId::from(id);
            let result = FleetSession::oneshot(config, |session| async move {
                session.execute(CoreCommand::ResolveAlarm { id }).await
            })
            .await?;
            report_resolved(&result, global.quiet);
            Ok(())
        }

        AlarmsCommand::ResolveAll { device } => {
            let prompt = match device {
                Some(ref id) => format!("Resolve every open alarm for device {id}?"),
                None => "Resolve every open alarm in the fleet?".to_owned(),
            };
            if !util::confirm(&prompt, global.yes)? {
                return Ok(());
            }

            let device_id = device.map(EntityId::from);
            let result = FleetSession::oneshot(config, |session| async move {
                session
                    .execute(CoreCommand::ResolveAllAlarms { device_id })
                    .await
            })
            .await?;
            report_resolved(&result, global.quiet);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    fn alarm(id: &str, device: &str, alarm_type: &str, resolved: bool) -> Alarm {
        Alarm {
            id: EntityId::from(id),
            device_id: EntityId::from(device),
            alarm_type: alarm_type.into(),
            detail: Value::Null,
            timestamp: Utc::now(),
            resolved,
            resolved_at: None,
        }
    }

    #[test]
    fn default_list_shows_only_active() {
        let filter = list_filter(false, None, None);
        assert!(filter.matches(&alarm("1", "d", "FALL_DETECTED", false)));
        assert!(!filter.matches(&alarm("2", "d", "FALL_DETECTED", true)));
        assert!(!filter.matches(&alarm("3", "d", "POSTURE_COMPLETE", false)));
    }

    #[test]
    fn all_flag_includes_resolved() {
        let filter = list_filter(true, None, None);
        assert!(filter.matches(&alarm("2", "d", "FALL_DETECTED", true)));
    }

    #[test]
    fn device_and_severity_narrow_the_list() {
        let filter = list_filter(false, Some("dev-7".into()), Some(SeverityArg::Critical));
        assert!(filter.matches(&alarm("1", "dev-7", "OBSTACLE_COLLISION", false)));
        assert!(!filter.matches(&alarm("2", "dev-8", "OBSTACLE_COLLISION", false)));
        assert!(!filter.matches(&alarm("3", "dev-7", "LOW_VOLTAGE", false)));
    }
}
