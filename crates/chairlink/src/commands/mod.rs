//! Command dispatch: bridges CLI args -> core session -> output formatting.

pub mod alarms;
pub mod config_cmd;
pub mod devices;
pub mod summary;
pub mod util;
pub mod watch;

use chairlink_core::FleetConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: FleetConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(config, &args, global).await,
        Command::Alarms(args) => alarms::handle(config, args, global).await,
        Command::Summary => summary::handle(config, global).await,
        Command::Watch(args) => watch::handle(config, &args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
