// src/main.rs

//! The main entry point for the PakMirror proxy.

use anyhow::Result;
use pakmirror::config::Config;
use pakmirror::server;
use std::env;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("PakMirror version {VERSION}");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    // The configuration path can be provided via --config; otherwise the
    // built-in defaults apply and a missing default file is not an error.
    let config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => {
            let Some(path) = args.get(i + 1) else {
                eprintln!("--config flag requires a value");
                std::process::exit(1);
            };
            match Config::from_file(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Failed to load configuration from \"{path}\": {e}");
                    std::process::exit(1);
                }
            }
        }
        None => Config::default(),
    };

    // Override port if provided as a command-line argument.
    let mut config = config;
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).and_then(|s| s.parse::<u16>().ok()) {
            Some(port) => config.port = port,
            None => {
                eprintln!("--port flag requires a valid port number");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}
