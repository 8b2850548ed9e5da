//! Command-line definition.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "dahua",
    version,
    about = "Watch alarm events from Dahua cameras and DVRs"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device hostname or IP address.
    #[arg(long, short = 'H', env = "DAHUA_HOST", global = true)]
    pub host: Option<String>,

    /// Device HTTP port.
    #[arg(long, short = 'P', env = "DAHUA_PORT", default_value_t = 80, global = true)]
    pub port: u16,

    /// Connect over HTTPS.
    #[arg(long, env = "DAHUA_TLS", global = true)]
    pub tls: bool,

    /// Verify the device certificate against the system store instead
    /// of accepting self-signed certificates.
    #[arg(long, global = true)]
    pub verify_tls: bool,

    /// Username for device authentication.
    #[arg(long, short = 'u', env = "DAHUA_USERNAME", default_value = "admin", global = true)]
    pub username: String,

    /// Password for device authentication.
    #[arg(long, short = 'p', env = "DAHUA_PASSWORD", global = true)]
    pub password: Option<String>,

    /// Authentication method (basic or digest).
    #[arg(long, env = "DAHUA_AUTH", default_value = "basic", global = true)]
    pub auth: String,

    /// Offset added to device-reported channel indices to obtain
    /// user-facing channel numbers. Most firmware reports zero-based
    /// indices, making 1 the usual value.
    #[arg(long, env = "DAHUA_CHANNEL_OFFSET", default_value_t = 1, global = true)]
    pub channel_offset: i64,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Attach to the event stream and print alarm events as they arrive.
    Watch(WatchArgs),

    /// Query device identity (serial, type, software, network, channels).
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Event codes to subscribe to.
    #[arg(long, value_delimiter = ',', default_values_t = default_codes())]
    pub codes: Vec<String>,

    /// Channel the attach request is issued against.
    #[arg(long, default_value_t = 1)]
    pub alarm_channel: i64,

    /// Only print events from these user-facing channel numbers.
    #[arg(long, value_delimiter = ',')]
    pub channels: Vec<i64>,

    /// Seconds to wait between reconnect attempts.
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Wait out the retry delay after an idle read timeout instead of
    /// reconnecting immediately.
    #[arg(long)]
    pub idle_backoff: bool,

    /// Fetch channel titles before streaming so events carry names.
    #[arg(long)]
    pub resolve_names: bool,

    /// Print events as JSON lines instead of formatted text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Pretty-print the JSON output.
    #[arg(long)]
    pub pretty: bool,
}

fn default_codes() -> Vec<String> {
    dahua_api::config::DEFAULT_EVENT_CODES
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
