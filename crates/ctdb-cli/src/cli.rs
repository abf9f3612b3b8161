//! Argument definitions for `ctdbc`.

use std::num::ParseIntError;

use clap::{Parser, Subcommand};

const CONFIG_HELP: &str = "\
Configuration flags must precede the command:
  --config-path <PATH>      TOML file with daemon_socket, log_filter, log_format
  --daemon-socket <PATH>    socket the local ctdbd listens on
  --log-filter <FILTER>     tracing filter directive (default: warn)
  --log-format <FORMAT>     json or compact";

/// Command-line interface for `ctdbc`.
#[derive(Parser, Debug)]
#[command(
    name = "ctdbc",
    about = "Query and message a ctdb cluster through the local daemon",
    disable_help_subcommand = true,
    after_help = CONFIG_HELP
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations `ctdbc` can perform.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Prints this node's cluster number.
    Pnn,
    /// Lists public addresses and the nodes serving them.
    Ips {
        /// Node to ask instead of the local daemon.
        #[arg(long, value_name = "PNN")]
        node: Option<u32>,
    },
    /// Prints messages published on a channel.
    Listen {
        /// Channel to subscribe to, decimal or `0x` hexadecimal.
        #[arg(value_name = "SRVID", value_parser = parse_srvid)]
        srvid: u64,
        /// Exit after this many messages.
        #[arg(long, value_name = "N")]
        count: Option<usize>,
    },
    /// Sends a text message to a node.
    Send {
        /// Destination node.
        #[arg(value_name = "PNN")]
        pnn: u32,
        /// Destination channel, decimal or `0x` hexadecimal.
        #[arg(value_name = "SRVID", value_parser = parse_srvid)]
        srvid: u64,
        /// Message body.
        #[arg(value_name = "TEXT")]
        text: String,
    },
}

fn parse_srvid(text: &str) -> Result<u64, ParseIntError> {
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}
