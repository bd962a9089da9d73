//! Plugin manager
//!
//! Owns the storage buckets, the live registry, and the runtime builders.
//! Initialized once at daemon startup; every collaborator is injected so
//! tests can swap in doubles.

use crate::cache::CacheService;
use crate::core::config::Config;
use crate::core::error::{HarborError, Result};
use crate::core::storage::{InstalledBucket, MediaBucket, ObjectStore, PackageBucket};
use crate::db::repository::{DeclarationRepository, ServerlessRuntimeRepository};
use crate::db::DatabaseManager;
use crate::decoder::manifest::PluginDeclaration;
use crate::decoder::{PluginDecoder, ThirdPartyVerificationConfig, ZipPluginDecoder};
use crate::plugin::local::{EnvironmentBuilder, LocalRuntimeState};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::serverless::ServerlessConnector;
use crate::plugin::types::{
    LocalPluginHandle, PluginHandle, PluginInstallResponse, PluginUniqueIdentifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

const DECLARATION_CACHE_PREFIX: &str = "plugin_declaration:";
const SERVERLESS_CACHE_PREFIX: &str = "serverless_runtime:";

/// Process-wide plugin manager
pub struct PluginManager {
    pub(crate) config: Arc<Config>,
    pub(crate) media: MediaBucket,
    pub(crate) packages: PackageBucket,
    pub(crate) installed: InstalledBucket,
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) declarations: Arc<DeclarationRepository>,
    pub(crate) serverless_runtimes: Arc<ServerlessRuntimeRepository>,
    pub(crate) cache: Arc<dyn CacheService>,
    pub(crate) connector: Arc<dyn ServerlessConnector>,
    pub(crate) env_builder: Arc<EnvironmentBuilder>,
}

impl PluginManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        db: Arc<DatabaseManager>,
        media_store: Arc<dyn ObjectStore>,
        package_store: Arc<dyn ObjectStore>,
        installed_store: Arc<dyn ObjectStore>,
        cache: Arc<dyn CacheService>,
        connector: Arc<dyn ServerlessConnector>,
    ) -> Self {
        let serverless_runtimes = Arc::new(ServerlessRuntimeRepository::new(db.clone()));
        let registry = Arc::new(PluginRegistry::new(
            config.platform,
            serverless_runtimes.clone(),
            config.local_runtime.launching_concurrency,
        ));

        Self {
            media: MediaBucket::new(media_store),
            packages: PackageBucket::new(package_store),
            installed: InstalledBucket::new(installed_store),
            registry,
            declarations: Arc::new(DeclarationRepository::new(db)),
            serverless_runtimes,
            cache,
            connector,
            env_builder: Arc::new(EnvironmentBuilder::new(config.local_runtime.clone())),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Verification settings for decoding uploaded packages
    pub fn third_party_verification_config(&self) -> Option<ThirdPartyVerificationConfig> {
        if !self.config.signature.third_party_enabled {
            return None;
        }
        Some(ThirdPartyVerificationConfig {
            enabled: true,
            public_key_paths: self.config.signature.public_key_paths.clone(),
        })
    }

    fn working_path_of(&self, identifier: &PluginUniqueIdentifier) -> PathBuf {
        self.config
            .storage
            .plugin_working_root
            .join(identifier.as_str())
    }

    /// Decode, validate, and persist an uploaded package.
    ///
    /// Remaps the assets into the media bucket, stores the package blob, and
    /// caches the declaration row.
    pub async fn save_package(
        &self,
        package: Vec<u8>,
    ) -> Result<(PluginUniqueIdentifier, PluginDeclaration)> {
        let decoder = match self.third_party_verification_config() {
            Some(config) => ZipPluginDecoder::new_with_verification_config(package.clone(), config)?,
            None => ZipPluginDecoder::new(package.clone())?,
        };

        let declaration = decoder.manifest()?;
        decoder.check_assets_valid()?;

        let assets = decoder.assets()?;
        self.media.remap_assets(&assets).await?;

        let identifier = decoder.unique_identifier()?;
        self.packages.save(identifier.as_str(), &package).await?;

        let declaration_json = serde_json::to_string(&declaration)
            .map_err(|e| HarborError::SerializationError(e.to_string()))?;
        self.declarations
            .create_if_absent(identifier.as_str(), identifier.plugin_id(), &declaration_json)
            .await?;

        info!(identifier = %identifier, "plugin package saved");
        Ok((identifier, declaration))
    }

    /// Fetch a previously uploaded package blob
    pub async fn get_package(&self, identifier: &PluginUniqueIdentifier) -> Result<Vec<u8>> {
        self.packages.get(identifier.as_str()).await
    }

    /// Fetch the cached declaration for an identifier.
    ///
    /// Declarations are immutable, so the cache entry never needs
    /// invalidation, only population.
    pub async fn get_declaration(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<PluginDeclaration> {
        let cache_key = format!("{}{}", DECLARATION_CACHE_PREFIX, identifier);
        if let Some(cached) = self.cache.get(&cache_key).await? {
            if let Ok(declaration) = serde_json::from_str(&cached) {
                return Ok(declaration);
            }
        }

        let record = self
            .declarations
            .find_by_identifier(identifier.as_str())
            .await?
            .ok_or_else(|| {
                HarborError::NotFound(format!("plugin declaration not found: {}", identifier))
            })?;

        let declaration: PluginDeclaration = serde_json::from_str(&record.declaration)
            .map_err(|e| HarborError::SerializationError(e.to_string()))?;

        self.cache
            .set(&cache_key, record.declaration, None)
            .await?;

        Ok(declaration)
    }

    /// Drop the cached serverless runtime entry for an identifier
    pub async fn clear_serverless_runtime_cache(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<()> {
        self.cache
            .delete(&format!("{}{}", SERVERLESS_CACHE_PREFIX, identifier))
            .await
    }

    /// Install a plugin onto the local platform, returning its event stream.
    ///
    /// Extracts the stored package into the working directory, builds the
    /// runtime environment, and registers the live handle.
    pub fn install_to_local(
        self: &Arc<Self>,
        identifier: PluginUniqueIdentifier,
        source: String,
        _meta: serde_json::Value,
    ) -> Result<mpsc::Receiver<PluginInstallResponse>> {
        let (tx, rx) = mpsc::channel(128);
        let manager = self.clone();

        tokio::spawn(async move {
            let _ = tx.send(PluginInstallResponse::info("Installing...")).await;

            match manager.launch_local_runtime(&identifier).await {
                Ok(()) => {
                    info!(identifier = %identifier, source, "local plugin installed");
                    let _ = tx.send(PluginInstallResponse::done("Installed")).await;
                }
                Err(e) => {
                    error!(identifier = %identifier, "local install failed: {}", e);
                    let _ = tx.send(PluginInstallResponse::error(e.to_string())).await;
                }
            }
        });

        Ok(rx)
    }

    async fn launch_local_runtime(&self, identifier: &PluginUniqueIdentifier) -> Result<()> {
        let package = self.get_package(identifier).await?;
        let decoder = ZipPluginDecoder::new(package.clone())?;

        let working_path = self.working_path_of(identifier);
        decoder.extract_to(&working_path)?;
        self.installed.save(identifier.as_str(), &package).await?;

        let _permit = self.registry.acquire_launch_permit().await?;

        let mut state = LocalRuntimeState::new(working_path);
        self.env_builder
            .init_environment(identifier.as_str(), &mut state)
            .await?;

        self.registry
            .register(PluginHandle::Local(LocalPluginHandle::new(identifier.clone())))
            .await;

        Ok(())
    }

    /// Remove a local plugin's artifacts after its last installation is gone
    pub async fn uninstall_from_local(&self, identifier: &PluginUniqueIdentifier) -> Result<()> {
        self.registry.remove(identifier).await;

        let working_path = self.working_path_of(identifier);
        if working_path.exists() {
            tokio::fs::remove_dir_all(&working_path).await?;
        }

        self.installed.delete(identifier.as_str()).await?;
        info!(identifier = %identifier, "local plugin uninstalled");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::core::config::Platform;
    use crate::plugin::types::PluginInstallEvent;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn test_package() -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in [
            (
                "manifest.yaml",
                "author: alice\nname: calc\nversion: 1.0.0\nicon: icon.svg\n",
            ),
            ("README.md", "# calc"),
            ("_assets/icon.svg", "<svg/>"),
            ("requirements.txt", "dify_plugin==0.2.0\n"),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_save_and_get_package() {
        let root = TempDir::new().unwrap();
        let (manager, _db) = test_manager(&root, Platform::Serverless);

        let (identifier, declaration) = manager.save_package(test_package()).await.unwrap();
        assert_eq!(declaration.name, "calc");
        assert!(identifier.as_str().starts_with("alice/calc:1.0.0@"));

        let stored = manager.get_package(&identifier).await.unwrap();
        assert_eq!(stored, test_package());
    }

    #[tokio::test]
    async fn test_get_declaration_uses_cache_after_first_read() {
        let root = TempDir::new().unwrap();
        let (manager, _db) = test_manager(&root, Platform::Serverless);

        let (identifier, _) = manager.save_package(test_package()).await.unwrap();

        let first = manager.get_declaration(&identifier).await.unwrap();
        let second = manager.get_declaration(&identifier).await.unwrap();
        assert_eq!(first.name, second.name);
    }

    #[tokio::test]
    async fn test_get_declaration_missing() {
        let root = TempDir::new().unwrap();
        let (manager, _db) = test_manager(&root, Platform::Serverless);

        let identifier = PluginUniqueIdentifier::new("ghost/none:1.0.0@abc").unwrap();
        let err = manager.get_declaration(&identifier).await.unwrap_err();
        assert!(matches!(err, HarborError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_to_local_emits_done_and_builds_env() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let interpreter = root.path().join("python3");
        std::fs::write(
            &interpreter,
            "#!/bin/sh\n\
             if [ \"$1\" = \"-m\" ] && [ \"$2\" = \"venv\" ]; then\n\
                 mkdir -p \"$3/bin\"\n\
                 cp \"$0\" \"$3/bin/python\"\n\
                 cp \"$0\" \"$3/bin/pip\"\n\
                 exit 0\n\
             fi\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = test_config_with_interpreter(
            &root,
            Platform::Local,
            &interpreter.to_string_lossy(),
        );
        let (manager, _db) = test_manager_with(
            &root,
            config,
            Arc::new(crate::plugin::serverless::test_support::MockConnector::new(None, vec![])),
        );

        let (identifier, _) = manager.save_package(test_package()).await.unwrap();

        let mut rx = manager
            .install_to_local(identifier.clone(), "marketplace".into(), serde_json::json!({}))
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(events.first().unwrap().event, PluginInstallEvent::Info);
        assert_eq!(events.last().unwrap().event, PluginInstallEvent::Done);
        assert_eq!(events.last().unwrap().data, "Installed");

        // extraction and ready marker exist, handle is registered
        let working = root.path().join("working").join(identifier.as_str());
        assert!(working.join("manifest.yaml").is_file());
        assert!(working.join(crate::plugin::local::READY_MARKER).is_file());
        assert!(manager.registry().get(&identifier).await.is_ok());
    }

    #[tokio::test]
    async fn test_uninstall_from_local_removes_artifacts() {
        let root = TempDir::new().unwrap();
        let (manager, _db) = test_manager(&root, Platform::Local);

        let (identifier, _) = manager.save_package(test_package()).await.unwrap();

        // simulate an extraction without building the environment
        let working = root.path().join("working").join(identifier.as_str());
        std::fs::create_dir_all(&working).unwrap();
        manager
            .installed
            .save(identifier.as_str(), &test_package())
            .await
            .unwrap();

        manager.uninstall_from_local(&identifier).await.unwrap();
        assert!(!working.exists());
        assert!(!manager.installed.exists(identifier.as_str()).await.unwrap());
    }
}
