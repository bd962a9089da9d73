//! Live plugin registry
//!
//! Process-global map from unique identifier to plugin handle. Local and
//! debug plugins are registered when they come alive; serverless handles
//! are materialized lazily from their runtime rows. A semaphore caps how
//! many local plugins launch at once.

use crate::core::config::Platform;
use crate::core::error::{HarborError, Result};
use crate::db::repository::ServerlessRuntimeRepository;
use crate::plugin::types::{PluginHandle, PluginLifetime, PluginUniqueIdentifier, ServerlessPluginHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::info;

type RegisterCallback = Box<dyn Fn(&PluginHandle) + Send + Sync>;

/// Registry of live plugin handles
pub struct PluginRegistry {
    platform: Platform,
    plugins: RwLock<HashMap<String, Arc<PluginHandle>>>,
    callbacks: RwLock<Vec<RegisterCallback>>,
    serverless_runtimes: Arc<ServerlessRuntimeRepository>,
    launch_permits: Arc<Semaphore>,
}

impl PluginRegistry {
    pub fn new(
        platform: Platform,
        serverless_runtimes: Arc<ServerlessRuntimeRepository>,
        launching_concurrency: usize,
    ) -> Self {
        Self {
            platform,
            plugins: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
            serverless_runtimes,
            launch_permits: Arc::new(Semaphore::new(launching_concurrency)),
        }
    }

    /// Register a callback fired whenever a local or debug plugin comes alive
    pub async fn on_register(&self, callback: RegisterCallback) {
        self.callbacks.write().await.push(callback);
    }

    /// Insert a live handle and fire registration callbacks
    pub async fn register(&self, handle: PluginHandle) {
        let identifier = handle.identity().to_string();
        let handle = Arc::new(handle);

        for callback in self.callbacks.read().await.iter() {
            callback(&handle);
        }

        self.plugins.write().await.insert(identifier.clone(), handle);
        info!(identifier = %identifier, "plugin registered");
    }

    /// Remove a handle, stopping it first
    pub async fn remove(&self, identifier: &PluginUniqueIdentifier) {
        if let Some(handle) = self.plugins.write().await.remove(identifier.as_str()) {
            handle.stop();
            info!(identifier = %identifier, "plugin removed");
        }
    }

    /// Look up the handle for an identifier.
    ///
    /// Debug plugins and local-platform plugins are served from the in-memory
    /// map; anything else materializes a lazy serverless handle from its
    /// runtime row.
    pub async fn get(&self, identifier: &PluginUniqueIdentifier) -> Result<Arc<PluginHandle>> {
        if identifier.remote_like() || self.platform == Platform::Local {
            return self
                .plugins
                .read()
                .await
                .get(identifier.as_str())
                .cloned()
                .ok_or_else(|| HarborError::NotFound(identifier.to_string()));
        }

        let runtime = self
            .serverless_runtimes
            .find_by_identifier(identifier.as_str())
            .await?
            .ok_or_else(|| HarborError::NotFound(identifier.to_string()))?;

        Ok(Arc::new(PluginHandle::Serverless(ServerlessPluginHandle::new(
            identifier.clone(),
            runtime.function_url,
            runtime.function_name,
        ))))
    }

    /// Acquire a slot in the bounded local-launch pool
    pub async fn acquire_launch_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.launch_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| HarborError::TaskError(format!("launch pool is shut down: {}", e)))
    }
}
