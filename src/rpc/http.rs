//! HTTP transport and seed discovery
//!
//! Requests and replies travel as bincode bodies on `POST /internal/rpc`,
//! events on `POST /internal/event`. Discovery probes every address it has
//! heard of (`GET /internal/announce`) and keeps an id → address book that
//! the transport uses to reach peers.

use crate::cluster::{Discovery, NodeId, PeerRecord};
use crate::common::{encode_name, Error, Result};
use crate::rpc::{Event, Reply, Request, Transport};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a node says about itself when probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub node_id: NodeId,
    pub services: Vec<String>,
    pub address: String,
}

/// Known addresses and the node ids behind them
#[derive(Default)]
pub struct AddressBook {
    addresses: DashSet<String>,
    nodes: DashMap<NodeId, String>,
}

impl AddressBook {
    pub fn new(seeds: impl IntoIterator<Item = String>) -> Self {
        let book = Self::default();
        for seed in seeds {
            book.add_address(seed);
        }
        book
    }

    pub fn add_address(&self, address: impl Into<String>) {
        let address = address.into().trim_end_matches('/').to_string();
        if !address.is_empty() {
            self.addresses.insert(address);
        }
    }

    pub fn record(&self, node_id: NodeId, address: impl Into<String>) {
        let address = address.into();
        self.add_address(address.clone());
        self.nodes.insert(node_id, address);
    }

    pub fn address_of(&self, node_id: &NodeId) -> Option<String> {
        self.nodes.get(node_id).map(|a| a.value().clone())
    }

    pub fn node_at(&self, address: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|entry| entry.value() == address)
            .map(|entry| entry.key().clone())
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut all: Vec<String> = self.addresses.iter().map(|a| a.key().clone()).collect();
        all.sort();
        all
    }
}

fn client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub struct HttpDiscovery {
    me: Announcement,
    book: Arc<AddressBook>,
    client: reqwest::Client,
}

impl HttpDiscovery {
    pub fn new(mut me: Announcement, book: Arc<AddressBook>, timeout: Duration) -> Result<Self> {
        me.address = me.address.trim_end_matches('/').to_string();
        book.record(me.node_id.clone(), me.address.clone());
        Ok(Self {
            me,
            book,
            client: client(timeout)?,
        })
    }

    async fn probe(&self, address: &str) -> Result<Announcement> {
        let url = format!(
            "{}/internal/announce?from={}",
            address,
            encode_name(&self.me.address)
        );
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Http(format!("announce at {} returned {}", address, resp.status())));
        }
        Ok(resp.json::<Announcement>().await?)
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn nodes(&self) -> Result<Vec<PeerRecord>> {
        let targets: Vec<String> = self
            .book
            .addresses()
            .into_iter()
            .filter(|a| *a != self.me.address)
            .collect();

        let probes = join_all(targets.iter().map(|a| self.probe(a))).await;

        let mut records = vec![PeerRecord {
            node_id: self.me.node_id.clone(),
            services: self.me.services.clone(),
            available: true,
        }];
        for (address, probe) in targets.iter().zip(probes) {
            match probe {
                Ok(ann) => {
                    self.book.record(ann.node_id.clone(), address.clone());
                    records.push(PeerRecord {
                        node_id: ann.node_id,
                        services: ann.services,
                        available: true,
                    });
                }
                Err(e) => {
                    debug!("Probe of {} failed: {}", address, e);
                    if let Some(node_id) = self.book.node_at(address) {
                        records.push(PeerRecord {
                            node_id,
                            services: self.me.services.clone(),
                            available: false,
                        });
                    }
                }
            }
        }
        Ok(records)
    }
}

pub struct HttpTransport {
    book: Arc<AddressBook>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(book: Arc<AddressBook>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            book,
            client: client(timeout)?,
        })
    }

    fn address(&self, target: &NodeId) -> Result<String> {
        self.book
            .address_of(target)
            .ok_or_else(|| Error::PeerUnavailable(format!("no address for {}", target)))
    }
}

/// Map a non-success reply back onto the error it came from
fn remote_error(node: &NodeId, status: reqwest::StatusCode, message: String) -> Error {
    match status {
        reqwest::StatusCode::NOT_FOUND => Error::NotFound(message),
        reqwest::StatusCode::MISDIRECTED_REQUEST => Error::NotCoordinator(message),
        reqwest::StatusCode::SERVICE_UNAVAILABLE => Error::PeerUnavailable(message),
        _ => Error::Remote {
            node: node.to_string(),
            message,
        },
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, target: &NodeId, request: Request) -> Result<Reply> {
        let address = self.address(target)?;
        let body = bincode::serialize(&request)?;
        let resp = self
            .client
            .post(format!("{}/internal/rpc", address))
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(remote_error(target, status, message));
        }
        let bytes = resp.bytes().await?;
        Ok(bincode::deserialize(&bytes)?)
    }

    async fn emit(&self, target: &NodeId, event: Event) -> Result<()> {
        let address = self.address(target)?;
        let body = bincode::serialize(&event)?;
        let resp = self
            .client
            .post(format!("{}/internal/event", address))
            .body(body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            Err(remote_error(target, status, resp.text().await.unwrap_or_default()))
        }
    }
}
