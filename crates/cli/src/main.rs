//! Requestify CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: command-line flags, with environment fallbacks
//!    for the request timeout and log format.
//! 2. **Wire observability**: install a `tracing-subscriber` fmt layer (text or
//!    JSON) filtered by `RUST_LOG`. Every span and event emitted by the
//!    workspace crates flows through it.
//! 3. **Construct infrastructure**: open or accept TCP connections, wrap each
//!    in a [`transport::StreamTransport`] and a [`requestify::Correlator`].
//! 4. **Select mode**:
//!    - `serve` accepts connections and answers requests with the built-in
//!      ping/echo service.
//!    - `request` sends one JSON payload, prints the response, and exits
//!      non-zero on any failure.

mod observability;
mod service;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use requestify::{Correlator, CorrelatorConfig, NoRequestHandler, DEFAULT_REQUEST_TIMEOUT};
use serde_json::Value;
use tracing::{debug, info};
use transport::StreamTransport;

use crate::observability::LogFormat;

#[derive(Parser)]
#[command(name = "requestify")]
#[command(about = "Request/response correlation over line-delimited JSON sockets", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Request timeout in milliseconds
    #[arg(long, global = true, env = "REQUESTIFY_TIMEOUT_MS", default_value_t = default_timeout_ms())]
    timeout_ms: u64,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "REQUESTIFY_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections and answer requests
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: SocketAddr,
    },

    /// Send one request and print the response
    Request {
        /// Address of the serving peer
        #[arg(long, default_value = "127.0.0.1:7878")]
        connect: String,

        /// Request payload, as JSON
        payload: String,
    },
}

fn default_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_REQUEST_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

impl Cli {
    fn correlator_config(&self) -> Result<CorrelatorConfig> {
        let config =
            CorrelatorConfig::default().with_request_timeout(Duration::from_millis(self.timeout_ms));
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init(cli.log_format)?;
    let config = cli.correlator_config()?;

    match cli.command {
        Commands::Serve { listen } => service::serve(listen, config).await,
        Commands::Request { connect, payload } => request(&connect, &payload, config).await,
    }
}

async fn request(addr: &str, payload: &str, config: CorrelatorConfig) -> Result<()> {
    let message: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;

    let transport = StreamTransport::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let correlator = Correlator::new(transport, NoRequestHandler, config)?;

    debug!(peer = addr, "Sending request");
    let reply = correlator.request(message).await?;
    info!(stats = ?correlator.stats(), "Request completed");

    println!("{}", serde_json::to_string_pretty(&reply)?);
    correlator.close();
    Ok(())
}
