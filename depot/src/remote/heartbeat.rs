use std::time::Duration;

use moka::future::Cache;
use tracing::{info, warn};

/// Liveness oracle for remote repositories, fed by whatever monitors them.
#[async_trait::async_trait]
pub trait RemoteHeartbeat: Send + Sync {
    /// A remote nobody has reported on counts as alive.
    async fn is_alive(&self, remote: &str) -> bool;

    async fn record(&self, remote: &str, alive: bool);
}

/// Heartbeat results kept for a fixed time to live. Once a report expires
/// the remote is considered alive again until somebody says otherwise.
#[derive(Clone)]
pub struct HeartbeatCache {
    entries: Cache<String, bool>,
}

impl HeartbeatCache {
    pub fn new(ttl: Duration) -> Self {
        HeartbeatCache {
            entries: Cache::builder().max_capacity(10_000).time_to_live(ttl).build(),
        }
    }
}

#[async_trait::async_trait]
impl RemoteHeartbeat for HeartbeatCache {
    async fn is_alive(&self, remote: &str) -> bool {
        self.entries.get(remote).await.unwrap_or(true)
    }

    async fn record(&self, remote: &str, alive: bool) {
        let previous = self.entries.get(remote).await;
        if previous != Some(alive) {
            if alive {
                info!("remote {remote} is alive");
            } else {
                warn!("remote {remote} is not responding");
            }
        }
        self.entries.insert(remote.to_string(), alive).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_remote_is_alive() {
        let cache = HeartbeatCache::new(Duration::from_secs(60));
        assert!(cache.is_alive("central").await);
    }

    #[tokio::test]
    async fn recorded_state_wins_until_expiry() {
        let cache = HeartbeatCache::new(Duration::from_millis(200));
        cache.record("central", false).await;
        assert!(!cache.is_alive("central").await);
        assert!(cache.is_alive("other").await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.is_alive("central").await);
    }
}
