//! Connection Pool
//!
//! Idle connections are keyed by (instance id, backend name). Acquire takes
//! an idle connection out of the map (or creates one through the factory) and
//! wraps it in a [`Lease`]; the lease puts it back when released or dropped.
//! Nothing is inserted until a connection is fully established.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use mcproxy_core::ServerConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::connection::ConnectedClient;
use super::factory::{ConnectFailure, ConnectionFactory};
use crate::config::backend_fingerprint;

/// Pool key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub instance_id: String,
    pub backend_name: String,
}

impl PoolKey {
    pub fn new(instance_id: impl Into<String>, backend_name: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            backend_name: backend_name.into(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.backend_name)
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub instances: usize,
    pub max_idle: usize,
    pub shut_down: bool,
}

pub struct ConnectionPool {
    factory: Arc<ConnectionFactory>,
    idle: DashMap<PoolKey, Arc<ConnectedClient>>,
    max_idle: usize,
    shutdown: AtomicBool,
}

impl ConnectionPool {
    pub fn new(factory: Arc<ConnectionFactory>, max_idle: usize) -> Self {
        Self {
            factory,
            idle: DashMap::new(),
            max_idle,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn factory(&self) -> &Arc<ConnectionFactory> {
        &self.factory
    }

    /// Get a connection to `config` for `instance_id`, reusing an idle one if
    /// it is healthy and was built from the same configuration.
    pub async fn acquire(
        self: &Arc<Self>,
        instance_id: &str,
        config: &ServerConfig,
        user_id: &str,
    ) -> Result<Lease, ConnectFailure> {
        if self.is_shutdown() {
            return Err(ConnectFailure::Transient(
                "Connection pool is shut down".to_string(),
            ));
        }

        let key = PoolKey::new(instance_id, config.name.clone());

        if let Some((_, client)) = self.idle.remove(&key) {
            if client.is_healthy() && client.fingerprint() == backend_fingerprint(config) {
                debug!(key = %key, "[ConnectionPool] Reusing idle connection");
                return Ok(Lease::new(self.clone(), key, client));
            }
            debug!(key = %key, "[ConnectionPool] Discarding stale idle connection");
            client.close().await;
        }

        let client = Arc::new(self.factory.connect(config, user_id).await?);
        debug!(key = %key, "[ConnectionPool] Created connection");
        Ok(Lease::new(self.clone(), key, client))
    }

    /// Park `client` in the idle set, or hand it back if it must be closed
    fn park(&self, key: PoolKey, client: Arc<ConnectedClient>) -> Option<Arc<ConnectedClient>> {
        if self.is_shutdown() || !client.is_healthy() {
            return Some(client);
        }
        if self.idle.len() >= self.max_idle {
            debug!(key = %key, max_idle = self.max_idle, "[ConnectionPool] Idle set full");
            return Some(client);
        }

        match self.idle.entry(key.clone()) {
            Entry::Occupied(_) => return Some(client),
            Entry::Vacant(slot) => {
                slot.insert(client);
            }
        }

        // Shutdown may have drained the map between the check and the insert
        if self.is_shutdown() {
            return self.idle.remove(&key).map(|(_, c)| c);
        }
        None
    }

    /// Close every idle connection for an instance
    pub async fn evict_instance(&self, instance_id: &str) -> usize {
        let keys: Vec<PoolKey> = self
            .idle
            .iter()
            .filter(|entry| entry.key().instance_id == instance_id)
            .map(|entry| entry.key().clone())
            .collect();

        let evicted: Vec<_> = keys
            .iter()
            .filter_map(|k| self.idle.remove(k).map(|(_, c)| c))
            .collect();
        join_all(evicted.iter().map(|c| c.close())).await;

        if !evicted.is_empty() {
            info!(
                instance_id = %instance_id,
                count = evicted.len(),
                "[ConnectionPool] Evicted idle connections"
            );
        }
        evicted.len()
    }

    /// Close every pooled connection. Later releases close instead of parking.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let keys: Vec<PoolKey> = self.idle.iter().map(|e| e.key().clone()).collect();
        let drained: Vec<_> = keys
            .iter()
            .filter_map(|k| self.idle.remove(k).map(|(_, c)| c))
            .collect();

        let closed = join_all(drained.iter().map(|c| c.close()))
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count();
        info!(closed, "[ConnectionPool] Shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let mut instances: Vec<String> = self
            .idle
            .iter()
            .map(|e| e.key().instance_id.clone())
            .collect();
        instances.sort();
        instances.dedup();

        PoolStats {
            idle: self.idle.len(),
            instances: instances.len(),
            max_idle: self.max_idle,
            shut_down: self.is_shutdown(),
        }
    }
}

/// Exclusive use of one pooled connection
///
/// Dropping the lease returns the connection to the pool, so a cancelled
/// request still releases what it acquired.
pub struct Lease {
    pool: Arc<ConnectionPool>,
    key: PoolKey,
    client: Arc<ConnectedClient>,
    settled: bool,
}

impl Lease {
    fn new(pool: Arc<ConnectionPool>, key: PoolKey, client: Arc<ConnectedClient>) -> Self {
        Self {
            pool,
            key,
            client,
            settled: false,
        }
    }

    pub fn client(&self) -> &ConnectedClient {
        &self.client
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Return the connection to the pool, closing it if it cannot be parked
    pub async fn release(mut self) {
        self.settled = true;
        if let Some(client) = self.pool.park(self.key.clone(), self.client.clone()) {
            client.close().await;
        }
    }

    /// Close the connection instead of returning it
    pub async fn discard(mut self) {
        self.settled = true;
        debug!(key = %self.key, "[ConnectionPool] Discarding connection");
        self.client.close().await;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(client) = self.pool.park(self.key.clone(), self.client.clone()) {
            close_detached(client);
        }
    }
}

fn close_detached(client: Arc<ConnectedClient>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                client.close().await;
            });
        }
        Err(_) => warn!(
            backend = %client.backend_name(),
            "[ConnectionPool] No runtime to close connection; dropping"
        ),
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("client", &self.client)
            .finish()
    }
}
