//! Harbor daemon entrypoint

use anyhow::Context;
use harbor::cache::InMemoryCache;
use harbor::core::error::Result as HarborResult;
use harbor::core::storage::LocalObjectStore;
use harbor::core::{Config, HarborError, Logger};
use harbor::decoder::manifest::PluginDeclaration;
use harbor::plugin::serverless::{FunctionEntry, LaunchFunctionResponse, ServerlessConnector};
use harbor::service::{InstallService, ManageService};
use harbor::{DatabaseManager, PluginManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Placeholder connector for deployments that have not wired a cloud host.
/// Installs on the serverless platform fail fast with a clear error.
struct UnconfiguredConnector;

#[async_trait::async_trait]
impl ServerlessConnector for UnconfiguredConnector {
    async fn fetch_function(
        &self,
        _manifest: &PluginDeclaration,
        _checksum: &str,
    ) -> HarborResult<Option<FunctionEntry>> {
        Err(HarborError::LaunchError(
            "serverless connector is not configured".into(),
        ))
    }

    async fn setup_function(
        &self,
        _manifest: &PluginDeclaration,
        _checksum: &str,
        _package: Vec<u8>,
        _timeout: Duration,
    ) -> HarborResult<tokio::sync::mpsc::Receiver<LaunchFunctionResponse>> {
        Err(HarborError::LaunchError(
            "serverless connector is not configured".into(),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let _logger = Logger::init(&config.logging).context("failed to initialize logging")?;

    info!(
        version = harbor::VERSION,
        platform = %config.platform,
        "starting harbor daemon"
    );

    let db = Arc::new(
        DatabaseManager::new(
            &config.database.path,
            config.database.connection_pool_size,
            Duration::from_millis(config.database.busy_timeout),
        )
        .context("failed to open database")?,
    );

    let media_store = Arc::new(LocalObjectStore::new(config.storage.media_root.clone())?);
    let package_store = Arc::new(LocalObjectStore::new(config.storage.package_root.clone())?);
    let installed_store = Arc::new(LocalObjectStore::new(config.storage.installed_root.clone())?);

    let platform = config.platform;
    let manager = Arc::new(PluginManager::new(
        Arc::new(config),
        db.clone(),
        media_store,
        package_store,
        installed_store,
        Arc::new(InMemoryCache::new()),
        Arc::new(UnconfiguredConnector),
    ));

    let _install_service = Arc::new(InstallService::new(manager.clone(), db.clone(), platform));
    let _manage_service = ManageService::new(manager, db);

    info!("harbor daemon ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutting down");

    Ok(())
}
