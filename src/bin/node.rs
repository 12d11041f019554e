//! Node binary

use chunkmesh::{Config, NodeServer};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chunkmesh-node")]
#[command(about = "chunkmesh storage node with Bully election")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID (`<label>-<number>`), generated if omitted
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// URL other nodes use to reach this one
        #[arg(long)]
        advertise: Option<String>,

        /// Seed peers (comma-separated URLs)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Data directory
        #[arg(long)]
        data: Option<PathBuf>,

        /// Node hosting the cluster cache (this node if omitted)
        #[arg(long)]
        cache_url: Option<String>,

        /// Logical service name
        #[arg(long)]
        service: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            advertise,
            peers,
            data,
            cache_url,
            service,
        } => {
            // file and environment first, CLI flags win
            let mut node_config = Config::load(config.as_deref())?;
            if id.is_some() {
                node_config.node_id = id;
            }
            if let Some(bind) = bind {
                node_config.bind_addr = bind;
            }
            if let Some(advertise) = advertise {
                node_config.advertise_addr = advertise;
            }
            if !peers.is_empty() {
                node_config.peers = peers;
            }
            if let Some(data) = data {
                node_config.data_dir = data;
            }
            if cache_url.is_some() {
                node_config.cache_url = cache_url;
            }
            if let Some(service) = service {
                node_config.service_name = service;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| node_config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            tracing::info!("chunkmesh-node {}", chunkmesh::BUILD_INFO);

            let server = match NodeServer::new(node_config) {
                Ok(server) => server,
                Err(e) if e.is_config() => {
                    tracing::error!("Invalid configuration: {}", e);
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            };
            server.serve().await?;
        }
    }

    Ok(())
}
