//! cinder server entry point.
//!
//! Loads configuration (JSON file, overridable by flags), sets up logging,
//! and runs the reactor until the process is killed.

use anyhow::Context;
use cinder::config::Config;
use cinder::server::Server;
use std::path::Path;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Config file consulted when no `--config` flag is given.
const DEFAULT_CONFIG_PATH: &str = "config.json";

struct Args {
    config_path: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

impl Args {
    /// Parse command-line arguments
    fn from_env() -> Self {
        let mut parsed = Args {
            config_path: None,
            host: None,
            port: None,
        };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    if i + 1 < args.len() {
                        parsed.config_path = Some(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --config requires a value");
                        std::process::exit(1);
                    }
                }
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        parsed.host = Some(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        let port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        parsed.port = Some(port);
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("cinder version {}", cinder::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }
}

fn print_help() {
    println!(
        r#"
cinder - a reactor-driven in-memory key-value server

USAGE:
    cinder [OPTIONS]

OPTIONS:
    -c, --config <PATH>  Config file to load (default: ./config.json if present)
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>    Port to listen on (default: 6379)
    -v, --version        Print version information
        --help           Print this help message

CONNECTING:
    Inline and multi-bulk RESP requests are accepted:
    $ printf 'set greeting hello\r\nget greeting\r\n' | nc 127.0.0.1 6379
"#
    );
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config_path {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading config from {path}"))?
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            match Config::from_file(DEFAULT_CONFIG_PATH) {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable {DEFAULT_CONFIG_PATH}");
                    Config::default()
                }
            }
        }
        None => Config::default(),
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::from_env();

    // Set up logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    info!(address = %config.bind_address(), "starting cinder {}", cinder::VERSION);

    let mut server = Server::new(&config).context("starting server")?;
    server.run();
    Ok(())
}
