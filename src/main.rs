//! modulr-broker binary entry point.
//!
//! Wires configuration, the key-value store, the frame sink, and the
//! embedded WebSocket transport together. See the `modulr_broker` library
//! for the broker itself.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use modulr_broker::server::LocalSink;
use modulr_broker::{Broker, Config, FrameSink, HttpSink, MemoryStore};

#[derive(Parser)]
#[command(name = "modulr-broker", about = "WebRTC signaling broker for robot fleets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker.
    Serve {
        /// Listen address, overriding `LISTEN_ADDR`.
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    if config.allow_no_token {
        log::warn!(
            "ALLOW_NO_TOKEN is set: every connection gets synthetic developer \
             claims. Never enable this in production."
        );
    }
    if config.sessions_table.is_none() {
        log::warn!("no sessions table configured: session locks and billing are disabled");
    }

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            let store = Arc::new(MemoryStore::new());
            let local_sink = Arc::new(LocalSink::new());

            // Split deployments post frames to a remote socket tier; the
            // default is the embedded sink.
            let sink: Arc<dyn FrameSink> = match &config.sink_endpoint {
                Some(endpoint) => {
                    log::info!("using remote sink at {endpoint}");
                    Arc::new(HttpSink::new(endpoint))
                }
                None => Arc::clone(&local_sink) as Arc<dyn FrameSink>,
            };

            let broker = Arc::new(Broker::new(&config, store, sink));
            modulr_broker::server::run(&addr, broker, local_sink).await
        }
    }
}
