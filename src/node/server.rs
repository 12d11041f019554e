//! Node server

use crate::cluster::{DistributedCache, HttpCache, MemoryCache, NodeId};
use crate::common::{retry_with_backoff, Config, Result};
use crate::node::http::{create_router, AppState};
use crate::node::{MembershipMonitor, Node, NodeParts};
use crate::rpc::http::{AddressBook, Announcement, HttpDiscovery, HttpTransport};
use crate::store::RocksMetadataStore;
use std::sync::Arc;
use std::time::Duration;

pub struct NodeServer {
    config: Config,
    node_id: NodeId,
}

impl NodeServer {
    /// Validate `config` and settle the node id, generating one if unset
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let node_id = match &config.node_id {
            Some(id) => NodeId::parse(id)?,
            None => NodeId::generate(),
        };
        Ok(Self { config, node_id })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub async fn serve(self) -> Result<()> {
        let config = self.config;
        let timeout = config.rpc_timeout();
        let address = config.advertise_addr.trim_end_matches('/').to_string();

        tracing::info!("Starting node: {}", self.node_id);
        tracing::info!("  Service: {}", config.service_name);
        tracing::info!("  HTTP API: {}", config.bind_addr);
        tracing::info!("  Advertised as: {}", address);
        tracing::info!("  Data dir: {}", config.data_dir.display());
        tracing::info!("  Seeds: {:?}", config.peers);

        let book = Arc::new(AddressBook::new(config.peers.clone()));
        let discovery = Arc::new(HttpDiscovery::new(
            Announcement {
                node_id: self.node_id.clone(),
                services: vec![config.service_name.clone()],
                address: address.clone(),
            },
            book.clone(),
            timeout,
        )?);
        let transport = Arc::new(HttpTransport::new(book.clone(), timeout)?);

        let hosted_cache = Arc::new(MemoryCache::new());
        let cache: Arc<dyn DistributedCache> = match &config.cache_url {
            Some(url) => {
                tracing::info!("  Cluster cache: {}", url);
                Arc::new(HttpCache::new(url.clone(), timeout)?)
            }
            None => {
                tracing::info!("  Cluster cache: hosted here");
                hosted_cache.clone()
            }
        };

        let local_metadata = Arc::new(RocksMetadataStore::open(config.data_dir.join("metadata"))?);

        let node = Node::build(NodeParts {
            node_id: self.node_id.clone(),
            service_name: config.service_name.clone(),
            data_dir: config.data_dir.clone(),
            discovery,
            transport,
            cache,
            hosted_cache,
            local_metadata,
        })
        .await?;

        let router = create_router(
            AppState {
                node: node.clone(),
                book,
                address,
            },
            config.max_upload_bytes,
        );
        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        let http_server = tokio::spawn(async move { axum::serve(listener, router).await });

        // the cache may live on a node that is still starting
        retry_with_backoff(|| node.initialize(), 5, Duration::from_millis(200)).await?;

        let monitor = Arc::new(MembershipMonitor::new(node.membership().clone()));
        let _watcher = node.watch_membership(monitor.subscribe());
        let _poller = monitor.spawn(config.membership_interval());

        tracing::info!(
            "✓ Node ready (coordinator: {})",
            node.coordinator()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".into())
        );

        tokio::select! {
            res = http_server => {
                match res {
                    Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                    Err(e) => tracing::error!("HTTP server task failed: {}", e),
                    Ok(Ok(())) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down node {}", self.node_id);
            }
        }

        Ok(())
    }
}
