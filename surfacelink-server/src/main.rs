//! surfacelink server - bridge daemon with the reference catalog host

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use surfacelink_server::{BridgeServer, ConfigLoader, StaticCatalogHost};
use surfacelink_utils::{LogConfig, Result};

/// Command bridge between socket clients and a single-threaded host
#[derive(Parser, Debug)]
#[command(name = "surfacelink-server")]
#[command(version)]
struct Args {
    /// Config file (defaults to the XDG config location)
    #[arg(short, long, env = "SURFACELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// TCP port, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON catalog tree served by the reference host
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Extra outbound peer to dial (host:port), repeatable
    #[arg(long = "connect")]
    connect: Vec<String>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

async fn run(args: Args) -> Result<()> {
    let mut config = ConfigLoader::load_and_validate(args.config.as_deref())?;

    if let Some(host) = args.host {
        config.transport.host = host;
    }
    if let Some(port) = args.port {
        config.transport.port = port;
    }
    if let Some(catalog) = args.catalog {
        config.catalog.file = Some(catalog);
    }
    config.transport.outbound.extend(args.connect);
    ConfigLoader::validate(&config)?;

    let host = match &config.catalog.file {
        Some(path) => StaticCatalogHost::from_file(path)?,
        None => StaticCatalogHost::builtin(),
    };

    let server = BridgeServer::start(config, host).await?;
    info!("Listening on {}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt");
    server.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", surfacelink_server::config::DEFAULT_CONFIG_TOML);
        return;
    }

    if let Err(e) = surfacelink_utils::init_logging_with_config(LogConfig::server()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        eprintln!("surfacelink-server: {}", e);
        std::process::exit(1);
    }
}
