//! Installation orchestrator and write-side use cases
//!
//! Drives each plugin of an install request through decode, launch/build,
//! and registration, tracking progress in a per-tenant install task row.
//! Workers fan out with bounded concurrency and serialize their task
//! updates through the row write lock.

use crate::core::config::Platform;
use crate::core::error::{HarborError, Result};
use crate::db::models::{InstallTask, InstallTaskPluginStatus, InstallTaskStatus, RuntimeType};
use crate::db::repository::{CapabilityKind, CapabilityRepository, InstallTaskRepository, InstallationRepository};
use crate::db::DatabaseManager;
use crate::decoder::manifest::PluginDeclaration;
use crate::decoder::verify::Verification;
use crate::decoder::{PluginDecoder, ZipPluginDecoder};
use crate::plugin::manager::PluginManager;
use crate::plugin::types::{PluginInstallEvent, PluginInstallResponse, PluginUniqueIdentifier};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

/// At most this many per-plugin workers run concurrently for one task
const INSTALL_WORKER_POOL: usize = 5;

/// Successful task rows self-delete after this long
const TASK_DELETE_DELAY: Duration = Duration::from_secs(120);

/// Response of an install request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallResponse {
    pub all_installed: bool,
    pub task_id: String,
}

/// Called once per plugin when its runtime is ready; binds the installation
pub type OnDoneHandler = Arc<
    dyn Fn(PluginUniqueIdentifier, PluginDeclaration, serde_json::Value) -> BoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;

/// How one worker transitions its task slot
enum SlotTransition {
    Running(String),
    Failed(String),
    Success(String),
}

/// Apply a slot transition and re-establish the aggregate invariant:
/// `completed_plugins` equals the number of successful slots, and the task
/// is successful only when every slot is.
fn apply_transition(task: &mut InstallTask, identifier: &str, transition: SlotTransition) {
    if let Some(slot) = task
        .plugins
        .iter_mut()
        .find(|slot| slot.plugin_unique_identifier == identifier)
    {
        match transition {
            SlotTransition::Running(message) => {
                slot.status = InstallTaskStatus::Running;
                slot.message = message;
            }
            SlotTransition::Failed(message) => {
                slot.status = InstallTaskStatus::Failed;
                slot.message = message;
                task.status = InstallTaskStatus::Failed;
            }
            SlotTransition::Success(message) => {
                slot.status = InstallTaskStatus::Success;
                slot.message = message;
            }
        }
    }

    let successes = task
        .plugins
        .iter()
        .filter(|slot| slot.status == InstallTaskStatus::Success)
        .count();
    task.completed_plugins = successes as i64;
    if successes == task.plugins.len() && task.status != InstallTaskStatus::Failed {
        task.status = InstallTaskStatus::Success;
    }
}

/// Write-side installation service
pub struct InstallService {
    manager: Arc<PluginManager>,
    installations: Arc<InstallationRepository>,
    tasks: Arc<InstallTaskRepository>,
    tools: Arc<CapabilityRepository>,
    models: Arc<CapabilityRepository>,
    agent_strategies: Arc<CapabilityRepository>,
    platform: Platform,
    task_delete_delay: Duration,
}

impl InstallService {
    pub fn new(manager: Arc<PluginManager>, db: Arc<DatabaseManager>, platform: Platform) -> Self {
        Self {
            manager,
            installations: Arc::new(InstallationRepository::new(db.clone())),
            tasks: Arc::new(InstallTaskRepository::new(db.clone())),
            tools: Arc::new(CapabilityRepository::new(db.clone(), CapabilityKind::Tool)),
            models: Arc::new(CapabilityRepository::new(db.clone(), CapabilityKind::AIModel)),
            agent_strategies: Arc::new(CapabilityRepository::new(db, CapabilityKind::AgentStrategy)),
            platform,
            task_delete_delay: TASK_DELETE_DELAY,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_task_delete_delay(&mut self, delay: Duration) {
        self.task_delete_delay = delay;
    }

    fn runtime_type(&self) -> RuntimeType {
        match self.platform {
            Platform::Local => RuntimeType::Local,
            Platform::Serverless => RuntimeType::Serverless,
        }
    }

    /// Install a set of identifiers for a tenant.
    ///
    /// Preflight marks identifiers the tenant already owns as successes; if
    /// nothing is left to do, no task row is created and `all_installed` is
    /// set. Otherwise one worker per remaining plugin is submitted into a
    /// bounded pool.
    pub async fn install_plugin_runtime_to_tenant(
        self: &Arc<Self>,
        tenant_id: &str,
        identifiers: &[PluginUniqueIdentifier],
        source: &str,
        metas: &[serde_json::Value],
        on_done: OnDoneHandler,
    ) -> Result<InstallResponse> {
        if identifiers.len() != metas.len() {
            return Err(HarborError::InvalidRequest(
                "identifiers and metas must have the same length".into(),
            ));
        }

        let mut task = InstallTask {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            status: InstallTaskStatus::Running,
            total_plugins: identifiers.len() as i64,
            completed_plugins: 0,
            plugins: Vec::with_capacity(identifiers.len()),
            created_at: String::new(),
            updated_at: String::new(),
        };

        let mut pending: Vec<(PluginUniqueIdentifier, PluginDeclaration, serde_json::Value)> =
            Vec::new();

        for (identifier, meta) in identifiers.iter().zip(metas) {
            // the package must be uploaded before it can be installed
            let declaration = self.manager.get_declaration(identifier).await?;

            let mut slot = InstallTaskPluginStatus {
                plugin_unique_identifier: identifier.to_string(),
                plugin_id: identifier.plugin_id().to_string(),
                status: InstallTaskStatus::Pending,
                icon: declaration.icon.clone(),
                icon_dark: declaration.icon_dark.clone(),
                labels: declaration.label.clone(),
                message: String::new(),
            };

            if self.installations.tenant_owns(tenant_id, identifier.as_str()).await? {
                // already owned: bind immediately and count the slot done
                match on_done(identifier.clone(), declaration, meta.clone()).await {
                    Ok(()) | Err(HarborError::AlreadyInstalled(_)) => {
                        slot.status = InstallTaskStatus::Success;
                        slot.message = "Installed".into();
                        task.completed_plugins += 1;
                    }
                    Err(e) => {
                        return Err(HarborError::TaskError(format!(
                            "failed on plugin installation: {}",
                            e
                        )))
                    }
                }
                task.plugins.push(slot);
                continue;
            }

            task.plugins.push(slot);
            pending.push((identifier.clone(), declaration, meta.clone()));
        }

        if pending.is_empty() {
            return Ok(InstallResponse {
                all_installed: true,
                task_id: String::new(),
            });
        }

        self.tasks.create(&task).await?;
        let task_id = task.id.clone();

        let pool = Arc::new(Semaphore::new(INSTALL_WORKER_POOL));
        for (identifier, declaration, meta) in pending {
            let service = self.clone();
            let pool = pool.clone();
            let task_id = task_id.clone();
            let source = source.to_string();
            let on_done = on_done.clone();

            tokio::spawn(async move {
                let Ok(_permit) = pool.acquire().await else {
                    return;
                };
                service
                    .run_install_worker(task_id, identifier, declaration, source, meta, on_done)
                    .await;
            });
        }

        Ok(InstallResponse {
            all_installed: false,
            task_id,
        })
    }

    /// Transition one slot under the task write lock; schedules the task
    /// row deletion once the whole task reaches success
    async fn update_slot(&self, task_id: &str, identifier: &str, transition: SlotTransition) {
        let identifier = identifier.to_string();
        let updated = self
            .tasks
            .update_with_write_lock(task_id, move |task| {
                apply_transition(task, &identifier, transition)
            })
            .await;

        match updated {
            Ok(Some(task)) if task.status == InstallTaskStatus::Success => {
                let tasks = self.tasks.clone();
                let delay = self.task_delete_delay;
                let task_id = task.id;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = tasks.delete(&task_id).await {
                        error!(task_id = %task_id, "failed to delete finished install task: {}", e);
                    }
                });
            }
            Ok(_) => {}
            Err(e) => error!(task_id, "failed to update install task status: {}", e),
        }
    }

    async fn run_install_worker(
        self: Arc<Self>,
        task_id: String,
        identifier: PluginUniqueIdentifier,
        declaration: PluginDeclaration,
        source: String,
        meta: serde_json::Value,
        on_done: OnDoneHandler,
    ) {
        self.update_slot(
            &task_id,
            identifier.as_str(),
            SlotTransition::Running("Installing".into()),
        )
        .await;

        let stream = match self.platform {
            Platform::Serverless => self.start_serverless_install(&task_id, &identifier, &source, &meta).await,
            Platform::Local => self
                .manager
                .install_to_local(identifier.clone(), source.clone(), meta.clone())
                .map_err(|e| e.to_string()),
        };

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(message) => {
                self.update_slot(&task_id, identifier.as_str(), SlotTransition::Failed(message))
                    .await;
                return;
            }
        };

        while let Some(message) = stream.recv().await {
            match message.event {
                PluginInstallEvent::Error => {
                    self.update_slot(
                        &task_id,
                        identifier.as_str(),
                        SlotTransition::Failed(message.data),
                    )
                    .await;
                    return;
                }
                PluginInstallEvent::Done => {
                    if on_done(identifier.clone(), declaration.clone(), meta.clone())
                        .await
                        .is_err()
                    {
                        self.update_slot(
                            &task_id,
                            identifier.as_str(),
                            SlotTransition::Failed(
                                "Failed to create plugin, perhaps it's already installed".into(),
                            ),
                        )
                        .await;
                        return;
                    }
                }
                PluginInstallEvent::Info => {}
            }
        }

        self.update_slot(
            &task_id,
            identifier.as_str(),
            SlotTransition::Success("Installed".into()),
        )
        .await;
        info!(identifier = %identifier, task_id = %task_id, "plugin installed");
    }

    async fn start_serverless_install(
        &self,
        _task_id: &str,
        identifier: &PluginUniqueIdentifier,
        source: &str,
        meta: &serde_json::Value,
    ) -> std::result::Result<mpsc::Receiver<PluginInstallResponse>, String> {
        let package = self
            .manager
            .get_package(identifier)
            .await
            .map_err(|_| "Failed to read plugin package".to_string())?;

        let decoder = ZipPluginDecoder::new(package.clone()).map_err(|e| e.to_string())?;

        self.manager
            .install_to_serverless(package, Arc::new(decoder), source.to_string(), meta.clone())
            .await
            .map_err(|e| e.to_string())
    }

    /// Default `on_done`: bind the installation and capability rows
    pub fn binding_handler(self: &Arc<Self>, tenant_id: String, source: String) -> OnDoneHandler {
        let service = self.clone();
        Arc::new(move |identifier, declaration, meta| {
            let service = service.clone();
            let tenant_id = tenant_id.clone();
            let source = source.clone();
            Box::pin(async move {
                service
                    .bind_installation(&tenant_id, &identifier, &declaration, &source, &meta)
                    .await
            })
        })
    }

    /// Install from identifiers with the standard binding handler
    pub async fn install_from_identifiers(
        self: &Arc<Self>,
        tenant_id: &str,
        identifiers: &[PluginUniqueIdentifier],
        source: &str,
        metas: &[serde_json::Value],
    ) -> Result<InstallResponse> {
        let on_done = self.binding_handler(tenant_id.to_string(), source.to_string());
        self.install_plugin_runtime_to_tenant(tenant_id, identifiers, source, metas, on_done)
            .await
    }

    /// Create the installation row plus one capability row per declared kind
    pub async fn bind_installation(
        &self,
        tenant_id: &str,
        identifier: &PluginUniqueIdentifier,
        declaration: &PluginDeclaration,
        source: &str,
        meta: &serde_json::Value,
    ) -> Result<()> {
        self.installations
            .create(
                tenant_id,
                identifier.as_str(),
                identifier.plugin_id(),
                self.runtime_type(),
                source,
                meta,
            )
            .await?;

        if let Some(tool) = &declaration.tool {
            self.tools
                .create(tenant_id, identifier.plugin_id(), identifier.as_str(), &tool.identity.name)
                .await?;
        }
        if let Some(model) = &declaration.model {
            self.models
                .create(tenant_id, identifier.plugin_id(), identifier.as_str(), &model.provider)
                .await?;
        }
        if let Some(strategy) = &declaration.agent_strategy {
            self.agent_strategies
                .create(
                    tenant_id,
                    identifier.plugin_id(),
                    identifier.as_str(),
                    &strategy.identity.name,
                )
                .await?;
        }

        Ok(())
    }

    /// Drop the installation row and capability rows; removes the backing
    /// artifact when the last installation across all tenants is gone.
    /// Returns whether the artifact was removed.
    pub async fn unbind_installation(
        &self,
        tenant_id: &str,
        installation_id: &str,
        identifier: &PluginUniqueIdentifier,
        declaration: &PluginDeclaration,
        runtime_type: RuntimeType,
    ) -> Result<bool> {
        self.installations.delete(installation_id).await?;

        if declaration.tool.is_some() {
            self.tools.delete(tenant_id, identifier.plugin_id()).await?;
        }
        if declaration.model.is_some() {
            self.models.delete(tenant_id, identifier.plugin_id()).await?;
        }
        if declaration.agent_strategy.is_some() {
            self.agent_strategies
                .delete(tenant_id, identifier.plugin_id())
                .await?;
        }

        let remaining = self.installations.count_by_identifier(identifier.as_str()).await?;
        if remaining > 0 {
            return Ok(false);
        }

        match runtime_type {
            RuntimeType::Local => self.manager.uninstall_from_local(identifier).await?,
            RuntimeType::Serverless => {
                self.manager
                    .serverless_runtimes
                    .delete_by_identifier(identifier.as_str())
                    .await?;
                self.manager.clear_serverless_runtime_cache(identifier).await?;
            }
            RuntimeType::Remote => {}
        }

        Ok(true)
    }

    /// Uninstall one installation for a tenant
    pub async fn uninstall_plugin(
        &self,
        tenant_id: &str,
        plugin_installation_id: &str,
    ) -> Result<bool> {
        let installation = self
            .installations
            .find_by_tenant_and_id(tenant_id, plugin_installation_id)
            .await?
            .ok_or_else(|| {
                HarborError::NotFound(format!(
                    "plugin installation not found: {}",
                    plugin_installation_id
                ))
            })?;

        let identifier = PluginUniqueIdentifier::new(installation.plugin_unique_identifier.clone())?;
        let declaration = self.manager.get_declaration(&identifier).await?;

        self.unbind_installation(
            tenant_id,
            &installation.id,
            &identifier,
            &declaration,
            installation.runtime_type,
        )
        .await
    }

    /// Upgrade `(old, new)` where both share the same plugin id.
    ///
    /// Installs the new identifier; once its runtime is ready, binds the new
    /// installation, unbinds the old one, and removes the old artifact when
    /// no installation references it anymore.
    pub async fn upgrade_plugin(
        self: &Arc<Self>,
        tenant_id: &str,
        source: &str,
        meta: &serde_json::Value,
        original_identifier: &PluginUniqueIdentifier,
        new_identifier: &PluginUniqueIdentifier,
    ) -> Result<InstallResponse> {
        if original_identifier == new_identifier {
            return Err(HarborError::InvalidRequest(
                "original and new plugin unique identifier are the same".into(),
            ));
        }
        if original_identifier.plugin_id() != new_identifier.plugin_id() {
            return Err(HarborError::InvalidRequest(
                "original and new plugin id are different".into(),
            ));
        }

        let installation = self
            .installations
            .find_by_tenant_and_identifier(tenant_id, original_identifier.as_str(), source)
            .await?
            .ok_or_else(|| {
                HarborError::NotFound("plugin installation not found for this tenant".into())
            })?;

        let service = self.clone();
        let tenant = tenant_id.to_string();
        let source_owned = source.to_string();
        let original = original_identifier.clone();
        let old_runtime_type = installation.runtime_type;
        let old_installation_id = installation.id.clone();

        let on_done: OnDoneHandler = Arc::new(move |identifier, declaration, meta| {
            let service = service.clone();
            let tenant = tenant.clone();
            let source = source_owned.clone();
            let original = original.clone();
            let old_installation_id = old_installation_id.clone();
            Box::pin(async move {
                let original_declaration = service.manager.get_declaration(&original).await?;

                service
                    .bind_installation(&tenant, &identifier, &declaration, &source, &meta)
                    .await?;

                let deleted = service
                    .unbind_installation(
                        &tenant,
                        &old_installation_id,
                        &original,
                        &original_declaration,
                        old_runtime_type,
                    )
                    .await?;
                if deleted {
                    info!(identifier = %original, "upgraded plugin artifact removed");
                }

                Ok(())
            })
        });

        self.install_plugin_runtime_to_tenant(
            tenant_id,
            std::slice::from_ref(new_identifier),
            source,
            std::slice::from_ref(meta),
            on_done,
        )
        .await
    }

    /// Reinstall is only meaningful on the serverless platform
    pub async fn reinstall_from_identifier(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<mpsc::Receiver<PluginInstallResponse>> {
        if self.platform != Platform::Serverless {
            return Err(HarborError::InvalidRequest(
                "reinstall is only supported on serverless platform".into(),
            ));
        }

        let package = self.manager.get_package(identifier).await?;
        let decoder = ZipPluginDecoder::new(package.clone())?;
        self.manager
            .reinstall_to_serverless(package, Arc::new(decoder))
            .await
    }

    /// Re-decode a stored package so callers can inspect manifest and
    /// verification before binding it anywhere
    pub async fn decode_plugin_from_identifier(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<(PluginDeclaration, Option<Verification>)> {
        let package = self.manager.get_package(identifier).await?;

        let decoder = match self.manager.third_party_verification_config() {
            Some(config) => ZipPluginDecoder::new_with_verification_config(package, config)?,
            None => ZipPluginDecoder::new(package)?,
        };

        let verification = match decoder.verification() {
            Ok(Some(verification)) => Some(verification),
            // verified under the built-in root without an in-tree file
            Ok(None) => None,
            Err(_) => None,
        };

        let declaration = decoder.manifest()?;
        Ok((declaration, verification))
    }

    /// Whether a package with this identifier has been uploaded
    pub async fn fetch_plugin_from_identifier(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<bool> {
        Ok(self
            .manager
            .declarations
            .find_by_identifier(identifier.as_str())
            .await?
            .is_some())
    }

    // Task row use cases

    pub async fn fetch_tasks(&self, tenant_id: &str, page: u32, page_size: u32) -> Result<Vec<InstallTask>> {
        self.tasks.list(tenant_id, page, page_size).await
    }

    pub async fn fetch_task(&self, tenant_id: &str, task_id: &str) -> Result<InstallTask> {
        self.tasks
            .find(tenant_id, task_id)
            .await?
            .ok_or_else(|| HarborError::NotFound(format!("install task not found: {}", task_id)))
    }

    pub async fn delete_task(&self, tenant_id: &str, task_id: &str) -> Result<()> {
        self.tasks.delete_for_tenant(tenant_id, task_id).await
    }

    pub async fn delete_all_tasks(&self, tenant_id: &str) -> Result<()> {
        self.tasks.delete_all_for_tenant(tenant_id).await
    }

    /// Remove one slot from a task; the task row is deleted once every
    /// remaining slot is successful
    pub async fn delete_task_item(
        &self,
        tenant_id: &str,
        task_id: &str,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<()> {
        self.fetch_task(tenant_id, task_id).await?;

        let identifier = identifier.to_string();
        let updated = self
            .tasks
            .update_with_write_lock(task_id, move |task| {
                task.plugins
                    .retain(|slot| slot.plugin_unique_identifier != identifier);
                let successes = task
                    .plugins
                    .iter()
                    .filter(|slot| slot.status == InstallTaskStatus::Success)
                    .count();
                task.completed_plugins = successes as i64;
            })
            .await?;

        if let Some(task) = updated {
            let successes = task
                .plugins
                .iter()
                .filter(|slot| slot.status == InstallTaskStatus::Success)
                .count();
            if successes == task.plugins.len() {
                self.tasks.delete(&task.id).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manager::test_support::{test_config, test_manager_with};
    use crate::plugin::serverless::test_support::MockConnector;
    use crate::plugin::serverless::{LaunchFunctionEvent, LaunchFunctionResponse};
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn test_package(name: &str) -> Vec<u8> {
        let manifest = format!("author: alice\nname: {}\nversion: 1.0.0\n", name);
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (file, content) in [("manifest.yaml", manifest.as_str()), ("README.md", "# p")] {
            writer.start_file(file, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn launch_script() -> Vec<LaunchFunctionResponse> {
        vec![
            LaunchFunctionResponse::new(LaunchFunctionEvent::Info, "building"),
            LaunchFunctionResponse::new(LaunchFunctionEvent::FunctionUrl, "https://fn.example/x"),
            LaunchFunctionResponse::new(LaunchFunctionEvent::Function, "fn-x"),
            LaunchFunctionResponse::new(LaunchFunctionEvent::Done, ""),
        ]
    }

    struct Harness {
        service: Arc<InstallService>,
        manager: Arc<PluginManager>,
        _root: TempDir,
    }

    async fn harness(events: Vec<LaunchFunctionResponse>) -> Harness {
        // long delete delay keeps successful task rows visible to assertions
        harness_with_delete_delay(events, Duration::from_secs(60)).await
    }

    async fn harness_with_delete_delay(
        events: Vec<LaunchFunctionResponse>,
        delete_delay: Duration,
    ) -> Harness {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, Platform::Serverless);
        let connector = Arc::new(MockConnector::new(None, events));
        let (manager, db) = test_manager_with(&root, config, connector);

        let mut service = InstallService::new(manager.clone(), db, Platform::Serverless);
        service.set_task_delete_delay(delete_delay);

        Harness {
            service: Arc::new(service),
            manager,
            _root: root,
        }
    }

    async fn wait_for_task<F>(service: &InstallService, tenant: &str, task_id: &str, predicate: F) -> InstallTask
    where
        F: Fn(&InstallTask) -> bool,
    {
        for _ in 0..200 {
            if let Ok(task) = service.fetch_task(tenant, task_id).await {
                if predicate(&task) {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached the expected state");
    }

    #[tokio::test]
    async fn test_install_single_plugin_end_to_end() {
        let h = harness(launch_script()).await;
        let (identifier, _) = h.manager.save_package(test_package("calc")).await.unwrap();

        let response = h
            .service
            .install_from_identifiers("T1", &[identifier.clone()], "marketplace", &[serde_json::json!({})])
            .await
            .unwrap();

        assert!(!response.all_installed);
        assert!(!response.task_id.is_empty());

        let task = wait_for_task(&h.service, "T1", &response.task_id, |task| {
            task.status == InstallTaskStatus::Success
        })
        .await;

        assert_eq!(task.completed_plugins, 1);
        assert_eq!(task.plugins[0].status, InstallTaskStatus::Success);
        assert_eq!(task.plugins[0].message, "Installed");

        // installation and serverless runtime rows exist
        assert!(h
            .service
            .installations
            .tenant_owns("T1", identifier.as_str())
            .await
            .unwrap());
        assert!(h
            .manager
            .serverless_runtimes
            .find_by_checksum(identifier.checksum())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_successful_task_row_self_deletes() {
        let h = harness_with_delete_delay(launch_script(), Duration::from_millis(100)).await;
        let (identifier, _) = h.manager.save_package(test_package("calc")).await.unwrap();

        let response = h
            .service
            .install_from_identifiers("T1", &[identifier], "marketplace", &[serde_json::json!({})])
            .await
            .unwrap();

        // deletion only fires after the task succeeds; once the shortened
        // delay elapses the row disappears
        for _ in 0..100 {
            if h.service.fetch_task("T1", &response.task_id).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task row was never deleted");
    }

    #[tokio::test]
    async fn test_install_already_owned_is_all_installed() {
        let h = harness(launch_script()).await;
        let (identifier, declaration) = h.manager.save_package(test_package("calc")).await.unwrap();

        h.service
            .bind_installation("T1", &identifier, &declaration, "marketplace", &serde_json::json!({}))
            .await
            .unwrap();

        let response = h
            .service
            .install_from_identifiers("T1", &[identifier], "marketplace", &[serde_json::json!({})])
            .await
            .unwrap();

        assert!(response.all_installed);
        assert!(response.task_id.is_empty());
        assert!(h.service.fetch_tasks("T1", 1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_two_with_one_preinstalled() {
        let h = harness(launch_script()).await;
        let (owned, owned_declaration) = h.manager.save_package(test_package("calc")).await.unwrap();
        let (fresh, _) = h.manager.save_package(test_package("fmt")).await.unwrap();

        h.service
            .bind_installation("T1", &owned, &owned_declaration, "marketplace", &serde_json::json!({}))
            .await
            .unwrap();

        let response = h
            .service
            .install_from_identifiers(
                "T1",
                &[owned.clone(), fresh.clone()],
                "marketplace",
                &[serde_json::json!({}), serde_json::json!({})],
            )
            .await
            .unwrap();

        assert!(!response.task_id.is_empty());

        let task = wait_for_task(&h.service, "T1", &response.task_id, |task| {
            task.status == InstallTaskStatus::Success
        })
        .await;

        // the owned slot was successful from the start
        assert_eq!(task.total_plugins, 2);
        assert_eq!(task.completed_plugins, 2);
        assert!(task
            .plugins
            .iter()
            .all(|slot| slot.status == InstallTaskStatus::Success));
    }

    #[tokio::test]
    async fn test_failed_launch_marks_slot_and_task() {
        let h = harness(vec![LaunchFunctionResponse::new(
            LaunchFunctionEvent::Error,
            "boom",
        )])
        .await;
        let (identifier, _) = h.manager.save_package(test_package("calc")).await.unwrap();

        let response = h
            .service
            .install_from_identifiers("T1", &[identifier], "marketplace", &[serde_json::json!({})])
            .await
            .unwrap();

        let task = wait_for_task(&h.service, "T1", &response.task_id, |task| {
            task.status == InstallTaskStatus::Failed
        })
        .await;

        assert_eq!(task.plugins[0].status, InstallTaskStatus::Failed);
        assert_eq!(task.completed_plugins, 0);
    }

    #[tokio::test]
    async fn test_task_aggregate_invariant_under_updates() {
        let mut task = InstallTask {
            id: "t".into(),
            tenant_id: "T1".into(),
            status: InstallTaskStatus::Running,
            total_plugins: 2,
            completed_plugins: 0,
            plugins: vec![
                InstallTaskPluginStatus {
                    plugin_unique_identifier: "alice/a:1.0.0@a1".into(),
                    plugin_id: "alice/a".into(),
                    status: InstallTaskStatus::Pending,
                    icon: String::new(),
                    icon_dark: String::new(),
                    labels: Default::default(),
                    message: String::new(),
                },
                InstallTaskPluginStatus {
                    plugin_unique_identifier: "alice/b:1.0.0@b1".into(),
                    plugin_id: "alice/b".into(),
                    status: InstallTaskStatus::Pending,
                    icon: String::new(),
                    icon_dark: String::new(),
                    labels: Default::default(),
                    message: String::new(),
                },
            ],
            created_at: String::new(),
            updated_at: String::new(),
        };

        apply_transition(&mut task, "alice/a:1.0.0@a1", SlotTransition::Success("Installed".into()));
        assert_eq!(task.completed_plugins, 1);
        assert_eq!(task.status, InstallTaskStatus::Running);

        apply_transition(&mut task, "alice/b:1.0.0@b1", SlotTransition::Success("Installed".into()));
        assert_eq!(task.completed_plugins, 2);
        assert_eq!(task.status, InstallTaskStatus::Success);
    }

    #[tokio::test]
    async fn test_failed_slot_keeps_task_failed() {
        let mut task = InstallTask {
            id: "t".into(),
            tenant_id: "T1".into(),
            status: InstallTaskStatus::Running,
            total_plugins: 2,
            completed_plugins: 0,
            plugins: vec![
                InstallTaskPluginStatus {
                    plugin_unique_identifier: "alice/a:1.0.0@a1".into(),
                    plugin_id: "alice/a".into(),
                    status: InstallTaskStatus::Pending,
                    icon: String::new(),
                    icon_dark: String::new(),
                    labels: Default::default(),
                    message: String::new(),
                },
                InstallTaskPluginStatus {
                    plugin_unique_identifier: "alice/b:1.0.0@b1".into(),
                    plugin_id: "alice/b".into(),
                    status: InstallTaskStatus::Pending,
                    icon: String::new(),
                    icon_dark: String::new(),
                    labels: Default::default(),
                    message: String::new(),
                },
            ],
            created_at: String::new(),
            updated_at: String::new(),
        };

        apply_transition(&mut task, "alice/a:1.0.0@a1", SlotTransition::Failed("boom".into()));
        apply_transition(&mut task, "alice/b:1.0.0@b1", SlotTransition::Success("Installed".into()));

        assert_eq!(task.status, InstallTaskStatus::Failed);
        assert_eq!(task.completed_plugins, 1);
    }

    #[tokio::test]
    async fn test_upgrade_replaces_installation_and_artifact() {
        let h = harness(launch_script()).await;

        let old_pkg = test_package("calc");
        let (old_identifier, old_declaration) = h.manager.save_package(old_pkg).await.unwrap();

        // same plugin id, different content -> different checksum
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (file, content) in [
            ("manifest.yaml", "author: alice\nname: calc\nversion: 1.1.0\n"),
            ("README.md", "# p v2"),
        ] {
            writer.start_file(file, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        let new_pkg = writer.finish().unwrap().into_inner();
        let (new_identifier, _) = h.manager.save_package(new_pkg).await.unwrap();

        h.service
            .bind_installation("T1", &old_identifier, &old_declaration, "marketplace", &serde_json::json!({}))
            .await
            .unwrap();
        h.manager
            .serverless_runtimes
            .create(
                old_identifier.checksum(),
                "https://fn.example/old",
                "fn-old",
                old_identifier.as_str(),
            )
            .await
            .unwrap();

        let response = h
            .service
            .upgrade_plugin(
                "T1",
                "marketplace",
                &serde_json::json!({}),
                &old_identifier,
                &new_identifier,
            )
            .await
            .unwrap();

        wait_for_task(&h.service, "T1", &response.task_id, |task| {
            task.status == InstallTaskStatus::Success
        })
        .await;

        // new binding exists, old binding and artifact are gone
        assert!(h
            .service
            .installations
            .tenant_owns("T1", new_identifier.as_str())
            .await
            .unwrap());
        assert!(!h
            .service
            .installations
            .tenant_owns("T1", old_identifier.as_str())
            .await
            .unwrap());
        assert!(h
            .manager
            .serverless_runtimes
            .find_by_identifier(old_identifier.as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upgrade_rejects_mismatched_plugin_ids() {
        let h = harness(vec![]).await;
        let a = PluginUniqueIdentifier::new("alice/calc:1.0.0@abc").unwrap();
        let b = PluginUniqueIdentifier::new("alice/other:1.1.0@def").unwrap();

        let err = h
            .service
            .upgrade_plugin("T1", "marketplace", &serde_json::json!({}), &a, &b)
            .await
            .unwrap_err();
        assert!(matches!(err, HarborError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_uninstall_removes_artifact_when_last_reference_drops() {
        let h = harness(vec![]).await;
        let (identifier, declaration) = h.manager.save_package(test_package("calc")).await.unwrap();

        h.service
            .bind_installation("T1", &identifier, &declaration, "marketplace", &serde_json::json!({}))
            .await
            .unwrap();
        h.manager
            .serverless_runtimes
            .create(
                identifier.checksum(),
                "https://fn.example/x",
                "fn-x",
                identifier.as_str(),
            )
            .await
            .unwrap();

        let installation = h
            .service
            .installations
            .find_by_tenant_and_identifier("T1", identifier.as_str(), "marketplace")
            .await
            .unwrap()
            .unwrap();

        let deleted = h
            .service
            .uninstall_plugin("T1", &installation.id)
            .await
            .unwrap();

        assert!(deleted);
        assert!(h
            .manager
            .serverless_runtimes
            .find_by_identifier(identifier.as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_uninstall_keeps_artifact_while_other_tenant_owns_it() {
        let h = harness(vec![]).await;
        let (identifier, declaration) = h.manager.save_package(test_package("calc")).await.unwrap();

        for tenant in ["T1", "T2"] {
            h.service
                .bind_installation(tenant, &identifier, &declaration, "marketplace", &serde_json::json!({}))
                .await
                .unwrap();
        }
        h.manager
            .serverless_runtimes
            .create(
                identifier.checksum(),
                "https://fn.example/x",
                "fn-x",
                identifier.as_str(),
            )
            .await
            .unwrap();

        let installation = h
            .service
            .installations
            .find_by_tenant_and_identifier("T1", identifier.as_str(), "marketplace")
            .await
            .unwrap()
            .unwrap();

        let deleted = h
            .service
            .uninstall_plugin("T1", &installation.id)
            .await
            .unwrap();

        assert!(!deleted);
        assert!(h
            .manager
            .serverless_runtimes
            .find_by_identifier(identifier.as_str())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_task_item_drops_slot_and_completed_task() {
        let h = harness(vec![]).await;

        let task = InstallTask {
            id: "task-1".into(),
            tenant_id: "T1".into(),
            status: InstallTaskStatus::Running,
            total_plugins: 2,
            completed_plugins: 1,
            plugins: vec![
                InstallTaskPluginStatus {
                    plugin_unique_identifier: "alice/a:1.0.0@a1".into(),
                    plugin_id: "alice/a".into(),
                    status: InstallTaskStatus::Success,
                    icon: String::new(),
                    icon_dark: String::new(),
                    labels: Default::default(),
                    message: "Installed".into(),
                },
                InstallTaskPluginStatus {
                    plugin_unique_identifier: "alice/b:1.0.0@b1".into(),
                    plugin_id: "alice/b".into(),
                    status: InstallTaskStatus::Failed,
                    icon: String::new(),
                    icon_dark: String::new(),
                    labels: Default::default(),
                    message: "boom".into(),
                },
            ],
            created_at: String::new(),
            updated_at: String::new(),
        };
        h.service.tasks.create(&task).await.unwrap();

        let failed = PluginUniqueIdentifier::new("alice/b:1.0.0@b1").unwrap();
        h.service.delete_task_item("T1", "task-1", &failed).await.unwrap();

        // only the successful slot remained, so the task row is gone
        assert!(h.service.fetch_task("T1", "task-1").await.is_err());
    }

    #[tokio::test]
    async fn test_reinstall_rejected_off_serverless_platform() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, Platform::Local);
        let (manager, db) = test_manager_with(&root, config, Arc::new(MockConnector::new(None, vec![])));
        let service = InstallService::new(manager, db, Platform::Local);

        let identifier = PluginUniqueIdentifier::new("alice/calc:1.0.0@abc").unwrap();
        let err = service.reinstall_from_identifier(&identifier).await.unwrap_err();
        assert!(matches!(err, HarborError::InvalidRequest(_)));
    }
}
