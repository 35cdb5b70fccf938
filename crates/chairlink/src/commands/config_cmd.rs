//! Config subcommand handlers.

use std::collections::BTreeMap;

use serde::Serialize;

use chairlink_config::{Config, KEYRING_SERVICE, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

/// A profile as displayed: credentials reduced to where they come from.
#[derive(Debug, Serialize)]
struct ProfileView<'a> {
    api_url: &'a str,
    broker_url: &'a str,
    token: Option<&'static str>,
    token_env: Option<&'a str>,
    ca_cert: Option<String>,
    insecure: Option<bool>,
    timeout: Option<u64>,
    refresh_interval: Option<u64>,
    alarm_limit: Option<u32>,
    low_battery_pct: Option<f64>,
    stale_after_secs: Option<u64>,
}

impl<'a> From<&'a Profile> for ProfileView<'a> {
    fn from(p: &'a Profile) -> Self {
        Self {
            api_url: &p.api_url,
            broker_url: config::effective_broker_url(p),
            token: p.token.as_ref().map(|_| REDACTED),
            token_env: p.token_env.as_deref(),
            ca_cert: p.ca_cert.as_ref().map(|c| c.display().to_string()),
            insecure: p.insecure,
            timeout: p.timeout,
            refresh_interval: p.refresh_interval,
            alarm_limit: p.alarm_limit,
            low_battery_pct: p.low_battery_pct,
            stale_after_secs: p.stale_after_secs,
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigView<'a> {
    path: String,
    active_profile: String,
    default_profile: Option<&'a str>,
    defaults: &'a chairlink_config::Defaults,
    profiles: BTreeMap<&'a str, ProfileView<'a>>,
}

fn view<'a>(cfg: &'a Config, global: &GlobalOpts) -> ConfigView<'a> {
    ConfigView {
        path: config::config_path(global).display().to_string(),
        active_profile: config::active_profile_name(global, cfg),
        default_profile: cfg.default_profile.as_deref(),
        defaults: &cfg.defaults,
        profiles: cfg
            .profiles
            .iter()
            .map(|(name, p)| (name.as_str(), ProfileView::from(p)))
            .collect(),
    }
}

/// Table view: the same shape as the file on disk.
fn toml_detail(view: &ConfigView<'_>) -> String {
    toml::to_string_pretty(view).unwrap_or_else(|e| format!("# could not render config: {e}"))
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let view = view(&cfg, global);
            let out = output::render_single(&global.output, &view, toml_detail, |v| v.path.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::SetToken => {
            let cfg = config::load(global)?;
            let profile = config::active_profile_name(global, &cfg);
            let token = dialoguer::Password::new()
                .with_prompt(format!("Bearer token for profile '{profile}'"))
                .interact()
                .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }

            keyring::Entry::new(KEYRING_SERVICE, &format!("{profile}/token"))
                .and_then(|entry| entry.set_password(&token))
                .map_err(|e| CliError::Validation {
                    field: "keyring".into(),
                    reason: format!("failed to store token: {e}"),
                })?;
            if !global.quiet {
                eprintln!("Token stored in the system keyring for profile '{profile}'");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_token_is_redacted() {
        let profile = Profile {
            api_url: "https://fleet.example.com".into(),
            token: Some("s3cret".into()),
            ..Profile::default()
        };
        let rendered = toml::to_string(&ProfileView::from(&profile)).unwrap();
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains(REDACTED));
        assert!(rendered.contains("socket.io"));
    }
}
