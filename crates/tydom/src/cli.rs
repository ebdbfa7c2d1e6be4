//! Clap derive structures for the `tydom` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tydom: command-line client for Delta Dore Tydom gateways
#[derive(Debug, Parser)]
#[command(
    name = "tydom",
    version,
    about = "Control a Delta Dore Tydom home automation gateway",
    long_about = "Talks to a Tydom gateway over its HTTP-over-WebSocket protocol,\n\
        either on the local network or through the Delta Dore cloud relay.",
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
    /// Gateway profile to use
    #[arg(long, short = 'p', env = "TYDOM_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Connection mode (overrides profile)
    #[arg(long, short = 'm', env = "TYDOM_MODE", global = true)]
    pub mode: Option<ModeArg>,

    /// Gateway LAN address (overrides profile)
    #[arg(long, short = 'H', env = "TYDOM_HOST", global = true)]
    pub host: Option<String>,

    /// Gateway port (overrides profile)
    #[arg(long, env = "TYDOM_PORT", global = true)]
    pub port: Option<u16>,

    /// Gateway MAC address (overrides profile)
    #[arg(long, env = "TYDOM_MAC", global = true)]
    pub mac: Option<String>,

    /// Gateway password
    #[arg(long, env = "TYDOM_PASSWORD", global = true, hide_env = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TYDOM_OUTPUT",
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

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "TYDOM_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "TYDOM_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Shared Enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// LAN first, cloud relay as fallback
    Auto,
    /// LAN only
    Local,
    /// Cloud relay only
    Remote,
}

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

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show gateway information
    Info,

    /// List and control device endpoints
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// List and run scenarios
    #[command(alias = "sc")]
    Scenarios(ScenariosArgs),

    /// Stream decoded gateway messages
    Watch(WatchArgs),

    /// Send a raw request to the gateway
    Send(SendArgs),

    /// Resolve and test the connection to the gateway
    Probe,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List device endpoints with their latest readings
    #[command(alias = "ls")]
    List,

    /// Show one endpoint's readings
    Get {
        /// Endpoint unique id ("{endpoint}_{device}") or name
        device: String,
    },

    /// Write a value to an endpoint
    Set {
        /// Endpoint unique id ("{endpoint}_{device}") or name
        device: String,

        /// Data point name (e.g. "position", "level")
        name: String,

        /// Value; parsed as JSON, otherwise sent as a string
        value: String,
    },

    /// Send an alarm command and wait for the acknowledgement
    Alarm {
        /// Alarm endpoint unique id or name
        device: String,

        /// Alarm action (ON, OFF, PANIC, ACK, ...)
        action: String,

        /// Alarm PIN code
        #[arg(long, env = "TYDOM_ALARM_PIN", hide_env = true)]
        pin: Option<String>,

        /// Zones to act on (comma separated)
        #[arg(long, value_delimiter = ',')]
        zones: Vec<u32>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SCENARIOS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ScenariosArgs {
    #[command(subcommand)]
    pub command: ScenariosCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScenariosCommand {
    /// List scenarios
    #[command(alias = "ls")]
    List,

    /// Activate a scenario
    Run {
        /// Scenario id or name
        scenario: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH / SEND
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many seconds
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,

    /// Include raw (undecoded) frames
    #[arg(long)]
    pub raw: bool,

    /// Disable periodic cdata polling
    #[arg(long)]
    pub no_polling: bool,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// HTTP method
    #[arg(value_enum)]
    pub method: HttpMethod,

    /// Request path (e.g. "/devices/data")
    pub path: String,

    /// JSON request body
    #[arg(long, short = 'b')]
    pub body: Option<String>,

    /// Do not wait for the reply
    #[arg(long)]
    pub no_wait: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Set a configuration value on the active profile
    Set {
        /// Profile key (e.g. "host", "mac", "mode")
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a password in the system keyring
    SetPassword {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,

        /// Store the cloud account password instead of the gateway's
        #[arg(long)]
        cloud: bool,
    },

    /// Forget the remembered gateway address and MAC
    Forget {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
