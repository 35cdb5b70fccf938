//! Clap derive structures for the `chairlink` CLI.
//!
//! Defines the command tree, global flags, and shared value enums. Kept
//! free of crate imports so `build.rs` can include it for man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// chairlink -- watch and triage a wheelchair fleet from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "chairlink",
    version,
    about = "Monitor a wheelchair fleet from the command line",
    long_about = "Fetches device and alarm snapshots from the fleet backend and\n\
        follows live telemetry over the broker stream.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "CHAIRLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "CHAIRLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides profile)
    #[arg(long, short = 'u', env = "CHAIRLINK_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Broker WebSocket URL (overrides profile)
    #[arg(long, env = "CHAIRLINK_BROKER_URL", global = true)]
    pub broker_url: Option<String>,

    /// Bearer token
    #[arg(long, env = "CHAIRLINK_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CHAIRLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "CHAIRLINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "CHAIRLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List wheelchairs and their latest telemetry
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// List and acknowledge alarms
    #[command(alias = "al")]
    Alarms(AlarmsArgs),

    /// Fleet-wide counts: connectivity, activity, battery, alarms
    Summary,

    /// Follow live telemetry and alarms until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Inspect configuration and store credentials
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct DevicesArgs {
    /// Only chairs in this operating state
    #[arg(long, value_enum)]
    pub state: Option<StateArg>,

    /// Only chairs below the low-battery threshold
    #[arg(long)]
    pub low_battery: bool,

    /// Only chairs with no recent report
    #[arg(long)]
    pub stale: bool,

    /// Only chairs currently connected
    #[arg(long, conflicts_with = "offline")]
    pub online: bool,

    /// Only chairs currently disconnected
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StateArg {
    /// Moving
    Operating,
    /// Drawing charge current while stationary
    Charging,
    /// Neither moving nor charging
    Idle,
}

// ── Alarms ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AlarmsArgs {
    #[command(subcommand)]
    pub command: AlarmsCommand,
}

#[derive(Debug, Subcommand)]
pub enum AlarmsCommand {
    /// List alarms (active only unless --all)
    #[command(alias = "ls")]
    List {
        /// Include resolved alarms and positive signals
        #[arg(long, short = 'a')]
        all: bool,

        /// Only alarms raised by this device
        #[arg(long, short = 'd')]
        device: Option<String>,

        /// Only alarms of this severity
        #[arg(long, value_enum)]
        severity: Option<SeverityArg>,
    },

    /// Acknowledge one alarm
    Resolve {
        /// Alarm ID
        id: String,
    },

    /// Acknowledge every unresolved alarm
    ResolveAll {
        /// Limit to alarms raised by this device
        #[arg(long, short = 'd')]
        device: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SeverityArg {
    Critical,
    Warning,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Do not ring the terminal bell on critical alarms
    #[arg(long)]
    pub no_bell: bool,

    /// Re-fetch the full snapshot every N seconds (overrides profile)
    #[arg(long, value_name = "SECS")]
    pub refresh: Option<u64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the effective configuration (tokens redacted)
    Show,

    /// Store a bearer token for the active profile in the system keyring
    SetToken,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
