//! CLI argument parsing

use clap::{Parser, Subcommand};

/// Send commands to a surfacelink bridge
#[derive(Parser, Debug)]
#[command(name = "surfacelink")]
#[command(version)]
pub struct Cli {
    /// Bridge address (host:port)
    #[arg(long, env = "SURFACELINK_ADDR", default_value = "127.0.0.1:9877")]
    pub addr: String,

    /// Seconds to wait for the connection and for each response
    #[arg(long, default_value_t = 15)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a command and print the response JSON
    Send {
        /// Command type, e.g. get_browser_tree
        command_type: String,

        /// Parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },

    /// Check that the bridge is alive
    Ping,
}
