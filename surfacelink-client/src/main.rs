//! surfacelink: command-line client for the bridge

mod cli;

use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use cli::{Cli, Command};
use surfacelink_client::{Client, ConnectRetry};
use surfacelink_protocol::Response;
use surfacelink_utils::{BridgeError, LogConfig, Result};

/// Parse `--params`; absent means `{}`
fn parse_params(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Object(Default::default())),
        Some(raw) => match serde_json::from_str::<Value>(raw)
            .map_err(|e| BridgeError::invalid_params("params", e.to_string()))?
        {
            Value::Object(map) => Ok(Value::Object(map)),
            _ => Err(BridgeError::invalid_params("params", "must be a JSON object")),
        },
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    let timeout = Duration::from_secs(cli.timeout_secs);
    let retry = ConnectRetry {
        connect_timeout: timeout,
        ..ConnectRetry::default()
    };
    let mut client = Client::connect_with_retry(&cli.addr, &retry)
        .await?
        .with_response_timeout(timeout);

    match cli.command {
        Command::Ping => {
            let elapsed = client.ping().await?;
            println!("pong from {} in {}ms", client.addr(), elapsed.as_millis());
            Ok(0)
        }
        Command::Send {
            command_type,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            let response = client.request(&command_type, params).await?;
            let rendered = serde_json::to_string_pretty(&response)
                .map_err(|e| BridgeError::internal(e.to_string()))?;
            println!("{}", rendered);
            Ok(match response {
                Response::Success { .. } => 0,
                Response::Error { .. } => 1,
            })
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = surfacelink_utils::init_logging_with_config(LogConfig::client()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    let exit_code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}
