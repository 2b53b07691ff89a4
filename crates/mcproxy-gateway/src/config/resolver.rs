//! Config Resolver
//!
//! Loads an instance's backends from the repository, hashes them, and caches
//! the result for a short TTL. Concurrent misses for the same instance are
//! collapsed into a single repository load.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mcproxy_core::{InstanceRepository, ResolvedInstance};
use tracing::{debug, info};

use super::content_hash;
use crate::cache::TtlCache;
use crate::error::{GatewayError, GatewayResult};

pub struct ConfigResolver {
    instances: Arc<dyn InstanceRepository>,
    cache: TtlCache<Arc<ResolvedInstance>>,
}

impl ConfigResolver {
    pub fn new(instances: Arc<dyn InstanceRepository>, ttl: Duration) -> Self {
        Self {
            instances,
            cache: TtlCache::new("config", ttl),
        }
    }

    /// Resolve the current backend list for `instance_id`.
    pub async fn resolve(&self, instance_id: &str) -> GatewayResult<Arc<ResolvedInstance>> {
        if let Some(entry) = self.cache.get_fresh(instance_id) {
            return Ok(entry.value);
        }

        let _guard = self.cache.lock(instance_id).await;
        if let Some(entry) = self.cache.get_fresh(instance_id) {
            return Ok(entry.value);
        }

        let instance = self
            .instances
            .get(instance_id)
            .await?
            .ok_or_else(|| GatewayError::InstanceNotFound(instance_id.to_string()))?;
        let backends = self.instances.list_backends(instance_id).await?;
        let hash = content_hash(&backends);

        debug!(
            instance_id = %instance_id,
            backends = backends.len(),
            hash = %&hash[..12],
            "[ConfigResolver] Resolved instance"
        );

        let resolved = Arc::new(ResolvedInstance {
            instance_id: instance.id,
            organization_id: instance.organization_id,
            owner_id: instance.owner_id,
            backends,
            content_hash: hash.clone(),
            resolved_at: Utc::now(),
        });
        self.cache.insert(instance_id, &hash, resolved.clone());
        Ok(resolved)
    }

    /// Instances with a load in progress
    pub fn loads_in_flight(&self) -> usize {
        self.cache.locked_keys()
    }

    /// Drop the cached resolution so the next request reloads.
    pub fn invalidate(&self, instance_id: &str) {
        info!(instance_id = %instance_id, "[ConfigResolver] Invalidated");
        self.cache.invalidate(instance_id);
    }
}
