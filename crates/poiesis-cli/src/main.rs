//! Poiesis CLI - command-line client for Poiesis services.
//!
//! Connects over the TCP transport, then either performs a single request
//! (`call`) or streams push events (`watch`).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use poiesis_core::ClientConfig;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "poiesis")]
#[command(about = "Command-line client for Poiesis services")]
struct Args {
    /// Service endpoint (tcp://host:port)
    #[arg(short, long, default_value = "tcp://127.0.0.1:7400")]
    endpoint: String,

    /// API key sent in the auth frame
    #[arg(long)]
    api_key: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "5")]
    max_reconnect_attempts: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one request and print the result
    Call {
        /// Method name
        method: String,

        /// Params as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },
    /// Print push events of the given types as JSON lines
    Watch {
        /// Event types to subscribe to
        #[arg(required = true)]
        event_types: Vec<String>,

        /// Exit after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.endpoint.clone())
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_reconnect_attempts(self.max_reconnect_attempts);
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable
    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = args.client_config();
    debug!("Using endpoint {}", config.endpoint);

    match args.command {
        Command::Call { method, params } => {
            let params = commands::parse_params(params.as_deref())?;
            let result = commands::call(config, &method, params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Watch { event_types, count } => {
            commands::watch(config, &event_types, count).await?;
        }
    }

    Ok(())
}
