//! Clap derive structures for the `duskswitch` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// duskswitch -- switch the display between light and dark from ambient light
#[derive(Debug, Parser)]
#[command(
    name = "duskswitch",
    version,
    about = "Adaptive light/dark display switching driven by the ambient light sensor",
    long_about = "Switches the system display mode between light and dark based on the\n\
        ambient light and proximity sensors.\n\n\
        Changing the display mode needs a protected permission; `duskswitch setup`\n\
        walks through acquiring it, through a companion service or superuser.",
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
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, env = "DUSKSWITCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DUSKSWITCH_OUTPUT",
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
    /// Walk through acquiring the display permission
    Setup(SetupArgs),

    /// Grant the display permission with one strategy
    Grant(GrantArgs),

    /// Show the environment, permission and preference state
    #[command(alias = "st")]
    Status,

    /// Run or manage the privileged companion service
    Companion(CompanionArgs),

    /// Run the adaptive theme service (SIGUSR1 = screen on)
    Daemon(DaemonArgs),

    /// Decide the display mode for given sensor readings
    Decide(DecideArgs),

    /// Manage the switching threshold
    #[command(alias = "th")]
    Threshold(ThresholdArgs),

    /// Turn adaptive switching on
    Enable,

    /// Turn adaptive switching off
    Disable,

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Setup / Grant ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Print the command to run by hand
    Manual,
    /// Ask the companion elevation service
    Service,
    /// Run the command through the superuser binary
    Superuser,
}

#[derive(Debug, Args)]
pub struct SetupArgs {
    /// Grant automatically once the flow reaches the last step
    #[arg(long, value_enum)]
    pub via: Option<Strategy>,

    /// Do not start the theme daemon when setup completes
    #[arg(long)]
    pub no_daemon: bool,
}

#[derive(Debug, Args)]
pub struct GrantArgs {
    /// How to obtain the permission
    #[arg(long, value_enum, default_value = "service")]
    pub via: Strategy,
}

// ── Companion ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompanionArgs {
    #[command(subcommand)]
    pub command: CompanionCommand,
}

#[derive(Debug, Subcommand)]
pub enum CompanionCommand {
    /// Serve grant requests on the companion socket
    Serve {
        /// Handle one connection, then exit
        #[arg(long)]
        once: bool,

        /// Write logs to daily files in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Authorize duskswitch to use the companion service
    Authorize,

    /// Withdraw the authorization
    Revoke,
}

// ── Daemon ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Write logs to daily files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Evaluate once at startup, as if the screen had just turned on
    #[arg(long)]
    pub evaluate_now: bool,
}

// ── Decide ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DecideArgs {
    /// Ambient light reading in lux
    #[arg(long)]
    pub lux: f32,

    /// Proximity reading (omit for a device without the sensor)
    #[arg(long)]
    pub proximity: Option<f32>,

    /// The display is currently dark
    #[arg(long)]
    pub dark: bool,

    /// Threshold in lux (defaults to the stored preference)
    #[arg(long)]
    pub threshold: Option<f32>,
}

// ── Threshold ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ThresholdArgs {
    #[command(subcommand)]
    pub command: ThresholdCommand,
}

#[derive(Debug, Subcommand)]
pub enum ThresholdCommand {
    /// List the presets, marking the active one
    #[command(alias = "ls")]
    List,

    /// Select a preset by index (0-5) or name
    Set {
        /// Preset index or name (dark, dim, soft, bright, daylight, sunlight)
        #[arg(allow_negative_numbers = true)]
        preset: String,
    },

    /// Use a custom threshold in lux
    Custom {
        /// Threshold in lux (negative values are clamped to 0)
        #[arg(allow_negative_numbers = true)]
        lux: f32,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive configuration wizard
    Init,

    /// Display the effective configuration
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
