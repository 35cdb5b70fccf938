//! Translate the config file, active profile, and global flags into a
//! `chairlink_core::FleetConfig`.
//!
//! Precedence, lowest first: profile values, environment, CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use chairlink_config::{Config, Profile};
use chairlink_core::{DEFAULT_BROKER_URL, FleetConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(chairlink_config::config_path)
}

/// Load the config file named by `--config`, or the platform default.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(chairlink_config::load_config_from(&config_path(global))?)
}

/// Determine which profile name to use.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the session config for this invocation.
///
/// With a matching profile, flags override individual fields. Without
/// one, `--api-url` alone is enough to run against an open backend.
pub fn build_fleet_config(global: &GlobalOpts) -> Result<FleetConfig, CliError> {
    let cfg = load(global)?;
    let profile_name = active_profile_name(global, &cfg);

    let mut config = match cfg.profiles.get(&profile_name) {
        Some(profile) => {
            chairlink_config::profile_to_fleet_config(profile, &profile_name, &cfg.defaults)?
        }
        None if global.profile.is_some() => {
            let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if names.is_empty() {
                    "(none)".into()
                } else {
                    names.join(", ")
                },
            });
        }
        None => {
            let url_str = global.api_url.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config_path(global).display().to_string(),
            })?;
            let fallback = Profile {
                api_url: url_str.to_owned(),
                ..Profile::default()
            };
            chairlink_config::profile_to_fleet_config(&fallback, &profile_name, &cfg.defaults)?
        }
    };

    apply_overrides(&mut config, global)?;
    Ok(config)
}

/// Layer global flags on top of a profile-derived config.
fn apply_overrides(config: &mut FleetConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref raw) = global.api_url {
        config.api_url = parse_url("api-url", raw)?;
    }
    if let Some(ref raw) = global.broker_url {
        config.broker_url = parse_url("broker-url", raw)?;
    }
    if let Some(ref token) = global.token {
        config.token = Some(SecretString::from(token.clone()));
    }
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    Ok(())
}

fn parse_url(field: &str, raw: &str) -> Result<Url, CliError> {
    raw.parse().map_err(|e| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Broker URL a profile resolves to, for display.
pub fn effective_broker_url(profile: &Profile) -> &str {
    profile.broker_url.as_deref().unwrap_or(DEFAULT_BROKER_URL)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::Cli;

    fn global_for(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["chairlink"];
        argv.extend_from_slice(args);
        argv.push("summary");
        Cli::try_parse_from(argv).unwrap().global
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        let path = path.display().to_string();
        (dir, path)
    }

    #[test]
    fn api_url_flag_works_without_profile() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml").display().to_string();
        let global = global_for(&[
            "--config",
            &missing,
            "--api-url",
            "https://fleet.example.com",
            "--token",
            "abc",
        ]);

        let config = build_fleet_config(&global).unwrap();
        assert_eq!(config.api_url.as_str(), "https://fleet.example.com/");
        assert_eq!(config.broker_url.as_str(), DEFAULT_BROKER_URL);
        assert!(config.token.is_some());
    }

    #[test]
    fn missing_profile_and_url_is_no_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml").display().to_string();
        let global = global_for(&["--config", &missing]);

        let err = build_fleet_config(&global).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn named_profile_that_does_not_exist_lists_available() {
        let (_dir, path) = write_config(
            r#"
            [profiles.staging]
            api_url = "https://staging.example.com"
            "#,
        );
        let global = global_for(&["--config", &path, "--profile", "prod"]);

        match build_fleet_config(&global).unwrap_err() {
            CliError::ProfileNotFound { name, available } => {
                assert_eq!(name, "prod");
                assert_eq!(available, "staging");
            }
            other => panic!("expected ProfileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn flags_override_profile_values() {
        let (_dir, path) = write_config(
            r#"
            [profiles.default]
            api_url = "https://fleet.example.com"
            timeout = 10
            "#,
        );
        let global = global_for(&[
            "--config",
            &path,
            "--timeout",
            "3",
            "--insecure",
            "--broker-url",
            "ws://localhost:8080/socket.io/?EIO=4&transport=websocket",
        ]);

        let config = build_fleet_config(&global).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(config.broker_url.host_str(), Some("localhost"));
    }

    #[test]
    fn bad_url_flag_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml").display().to_string();
        let global = global_for(&["--config", &missing, "--api-url", "not a url"]);

        let err = build_fleet_config(&global).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }
}
