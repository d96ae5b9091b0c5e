//! Connectivity probing.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use loantrack_common::{Error, Result};

use crate::store::SyncStore;

/// Answers whether the network is reachable. Never fails.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe issuing a HEAD request against a fixed URL.
///
/// Any HTTP response counts as reachable; transport errors and timeouts
/// count as unreachable.
pub struct HttpProbe {
    http: Client,
    url: url::Url,
}

impl HttpProbe {
    /// Create a probe for `url` giving up after `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("Invalid probe URL {}: {}", url, e)))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.http.head(self.url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Reachability check against {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Probe with a manually controlled answer.
#[derive(Debug)]
pub struct FixedProbe(AtomicBool);

impl FixedProbe {
    pub fn new(reachable: bool) -> Self {
        Self(AtomicBool::new(reachable))
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.0.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn is_reachable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs reachability checks and records the result on the sync state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    store: SyncStore,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, store: SyncStore) -> Self {
        Self { probe, store }
    }

    /// Probe the network and store the result as the online flag.
    pub async fn check_reachability(&self) -> bool {
        let online = self.probe.is_reachable().await;
        let previous = self.store.set_online_status(online).await;
        if previous != online {
            if online {
                info!("Network reachable again");
            } else {
                info!("Network unreachable, uploads deferred");
            }
        }
        online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::QueuePersistence;
    use loantrack_storage::MemoryStore;

    #[tokio::test]
    async fn test_monitor_updates_online_flag() {
        let store = SyncStore::new(QueuePersistence::new(Arc::new(MemoryStore::new())));
        let probe = Arc::new(FixedProbe::new(false));
        let monitor = ConnectivityMonitor::new(probe.clone(), store.clone());

        assert!(!monitor.check_reachability().await);
        assert!(!store.summary().await.is_online);

        probe.set_reachable(true);
        assert!(monitor.check_reachability().await);
        assert!(store.summary().await.is_online);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_offline() {
        // Port 9 on loopback is the discard port and is normally closed.
        let probe = HttpProbe::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(!probe.is_reachable().await);
    }

    #[test]
    fn test_invalid_probe_url() {
        assert!(HttpProbe::new("not a url", Duration::from_secs(1)).is_err());
    }
}
