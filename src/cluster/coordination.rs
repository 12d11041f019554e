//! Coordination store
//!
//! One cluster-shared slot per logical service holding the current
//! coordinator's node id. Reads and writes go straight to the distributed
//! cache; there is no compare-and-swap, the last writer wins.

use crate::cluster::NodeId;
use crate::common::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Generic distributed cache capability
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Logical keys held per service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationKey {
    CurrentMaster,
}

impl CoordinationKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationKey::CurrentMaster => "SERVICE_CURRENT_MASTER",
        }
    }
}

impl fmt::Display for CoordinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SERVICE_CURRENT_MASTER" => Ok(CoordinationKey::CurrentMaster),
            other => Err(Error::InvalidConfig(format!(
                "undefined coordination key: {}",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct CoordinationStore {
    service_name: String,
    cache: Arc<dyn DistributedCache>,
}

impl CoordinationStore {
    pub fn new(service_name: impl Into<String>, cache: Arc<dyn DistributedCache>) -> Self {
        Self {
            service_name: service_name.into(),
            cache,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// `<SERVICE>_SERVICE.<KEY>`
    pub fn cache_key(&self, key: CoordinationKey) -> String {
        format!("{}_SERVICE.{}", self.service_name.to_uppercase(), key)
    }

    pub async fn get(&self, key: CoordinationKey) -> Result<Option<String>> {
        self.cache.get(&self.cache_key(key)).await
    }

    pub async fn set(&self, key: CoordinationKey, value: &str) -> Result<()> {
        self.cache.set(&self.cache_key(key), value).await
    }

    /// Current coordinator pointer, parsed
    pub async fn current_master(&self) -> Result<Option<NodeId>> {
        match self.get(CoordinationKey::CurrentMaster).await? {
            Some(raw) if !raw.is_empty() => Ok(Some(NodeId::parse(&raw)?)),
            _ => Ok(None),
        }
    }

    pub async fn set_master(&self, node: &NodeId) -> Result<()> {
        self.set(CoordinationKey::CurrentMaster, node.as_str()).await
    }
}

/// In-process cache; also what a node serves to the cluster over HTTP
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Cache hosted by another node (`GET|PUT {base}/internal/cache/{key}`)
pub struct HttpCache {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCache {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, key: &str) -> String {
        format!(
            "{}/internal/cache/{}",
            self.base_url,
            crate::common::encode_name(key)
        )
    }
}

#[async_trait]
impl DistributedCache for HttpCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let resp = self.client.get(self.url(key)).send().await?;
        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.text().await?)),
            s => Err(Error::Cache(format!("GET {} returned {}", key, s))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let resp = self
            .client
            .put(self.url(key))
            .body(value.to_string())
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Cache(format!("PUT {} returned {}", key, resp.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        let store = CoordinationStore::new("file", Arc::new(MemoryCache::new()));
        assert_eq!(
            store.cache_key(CoordinationKey::CurrentMaster),
            "FILE_SERVICE.SERVICE_CURRENT_MASTER"
        );
    }

    #[test]
    fn test_undefined_key() {
        assert_eq!(
            "SERVICE_CURRENT_MASTER".parse::<CoordinationKey>().unwrap(),
            CoordinationKey::CurrentMaster
        );
        assert!(matches!(
            "NODE_AM_I_MASTER".parse::<CoordinationKey>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_are_stable() {
        let store = CoordinationStore::new("file", Arc::new(MemoryCache::new()));
        assert!(store.current_master().await.unwrap().is_none());

        let node = NodeId::parse("node-12").unwrap();
        store.set_master(&node).await.unwrap();
        let first = store.current_master().await.unwrap();
        let second = store.current_master().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Some(node));
    }

    #[tokio::test]
    async fn test_services_do_not_collide() {
        let cache = Arc::new(MemoryCache::new());
        let files = CoordinationStore::new("file", cache.clone());
        let other = CoordinationStore::new("thumbs", cache);
        files.set_master(&NodeId::parse("a-1").unwrap()).await.unwrap();
        assert!(other.current_master().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_pointer_is_config_error() {
        let cache = Arc::new(MemoryCache::new());
        let store = CoordinationStore::new("file", cache.clone());
        cache
            .set("FILE_SERVICE.SERVICE_CURRENT_MASTER", "not-a-node")
            .await
            .unwrap();
        assert!(matches!(
            store.current_master().await,
            Err(Error::InvalidNodeId(_))
        ));
    }
}
