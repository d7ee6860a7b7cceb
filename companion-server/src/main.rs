//! Companion server entry point.
//!
//! ```text
//! companion-server                  Run in the foreground
//! companion-server --config <path>  Load a custom config TOML
//! companion-server --port <port>    Override the listen port
//! companion-server --gen-config     Write default config to stdout
//! companion-server --init           Write default config to the --config path
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use companion_server::config::CompanionConfig;
use companion_server::service::CompanionService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "companion-server", about = "Device companion RPC front-end")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "companion.toml")]
    config: PathBuf,

    /// Listen port, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    init: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CompanionConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    if cli.init {
        CompanionConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = CompanionConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("companion-server v{}", env!("CARGO_PKG_VERSION"));
    info!("target: {}", config.target.udid);
    info!("handoff sockets: {}", config.handoff.socket_dir.display());

    let service = CompanionService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;
    Ok(())
}
