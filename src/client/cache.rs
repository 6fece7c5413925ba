//! Upstream client cache, keyed by group name. A [`ClientCache`] lives
//! on the forwarder's service struct, not behind a process-global
//! `static`.

use crate::client::pool::UdpSocketPool;
use crate::client::UpstreamClient;
use crate::config::UpstreamGroup;
use crate::errors::TransportError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lazily builds and caches one [`UpstreamClient`] per upstream group.
/// Construction (DNS resolution of the group's endpoints, connection
/// setup) happens at most once per group; the cache never evicts, since
/// the group set is fixed for the life of the process.
pub struct ClientCache {
    pool: Arc<UdpSocketPool>,
    clients: Mutex<HashMap<String, Arc<UpstreamClient>>>,
}

impl ClientCache {
    pub fn new(pool: Arc<UdpSocketPool>) -> ClientCache {
        ClientCache {
            pool,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for `group`, building it on first use.
    /// The lock is held only to check and to insert, never across the
    /// async client construction, so a cache hit never waits behind
    /// another group's (possibly slow) first build.
    pub async fn get(&self, group: &UpstreamGroup) -> Result<Arc<UpstreamClient>, TransportError> {
        if let Some(client) = self.clients.lock().await.get(&group.name) {
            return Ok(client.clone());
        }

        let client = Arc::new(UpstreamClient::new(group, self.pool.clone()).await?);

        let mut clients = self.clients.lock().await;
        let client = clients.entry(group.name.clone()).or_insert(client).clone();
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Transport;
    use std::collections::HashSet;

    fn udp_group(name: &str) -> UpstreamGroup {
        UpstreamGroup {
            name: name.to_string(),
            transport: Transport::Udp,
            addresses: vec!["93.184.216.34:53".to_string()],
            dnssec_validation: false,
            proxy: None,
        }
    }

    #[tokio::test]
    async fn a_second_lookup_for_the_same_group_reuses_the_built_client() {
        let pool = Arc::new(UdpSocketPool::new(1, &HashSet::new()).await.unwrap());
        let cache = ClientCache::new(pool);
        let group = udp_group("one");

        let first = cache.get(&group).await.unwrap();
        let second = cache.get(&group).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn different_groups_get_different_clients() {
        let pool = Arc::new(UdpSocketPool::new(1, &HashSet::new()).await.unwrap());
        let cache = ClientCache::new(pool);

        let a = cache.get(&udp_group("a")).await.unwrap();
        let b = cache.get(&udp_group("b")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
    }
}
