//! Repository pattern implementation for the installation data access layer

use crate::core::error::{HarborError, Result};
use crate::db::manager::DatabaseManager;
use crate::db::models::{
    AIModelInstallation, AgentStrategyInstallation, InstallTask, InstallTaskStatus,
    PluginDeclarationRecord, PluginInstallation, RuntimeType, ServerlessRuntime, ToolInstallation,
};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

fn map_installation(row: &Row<'_>) -> rusqlite::Result<PluginInstallation> {
    let runtime_type: String = row.get(4)?;
    let meta: String = row.get(6)?;
    Ok(PluginInstallation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        plugin_unique_identifier: row.get(2)?,
        plugin_id: row.get(3)?,
        runtime_type: runtime_type.parse().unwrap_or(RuntimeType::Local),
        source: row.get(5)?,
        meta: serde_json::from_str(&meta).unwrap_or_default(),
        endpoints_setups: row.get(7)?,
        endpoints_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const INSTALLATION_COLUMNS: &str = "id, tenant_id, plugin_unique_identifier, plugin_id, \
     runtime_type, source, meta, endpoints_setups, endpoints_active, created_at, updated_at";

/// Repository for per-tenant plugin installations
pub struct InstallationRepository {
    db: Arc<DatabaseManager>,
}

impl InstallationRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Create an installation row; fails if the tenant already has this binding
    pub async fn create(
        &self,
        tenant_id: &str,
        plugin_unique_identifier: &str,
        plugin_id: &str,
        runtime_type: RuntimeType,
        source: &str,
        meta: &serde_json::Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();
        let tenant_id = tenant_id.to_string();
        let identifier = plugin_unique_identifier.to_string();
        let plugin_id = plugin_id.to_string();
        let source = source.to_string();
        let meta = serde_json::to_string(meta)
            .map_err(|e| HarborError::SerializationError(e.to_string()))?;

        self.db
            .execute(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO plugin_installation \
                     (id, tenant_id, plugin_unique_identifier, plugin_id, runtime_type, source, meta) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![row_id, tenant_id, identifier, plugin_id, runtime_type.to_string(), source, meta],
                )
                .map_err(HarborError::DatabaseError)?;

                if inserted == 0 {
                    return Err(HarborError::AlreadyInstalled(identifier));
                }
                Ok(())
            })
            .await?;

        Ok(id)
    }

    pub async fn find_by_tenant_and_identifier(
        &self,
        tenant_id: &str,
        plugin_unique_identifier: &str,
        source: &str,
    ) -> Result<Option<PluginInstallation>> {
        let tenant_id = tenant_id.to_string();
        let identifier = plugin_unique_identifier.to_string();
        let source = source.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM plugin_installation \
                         WHERE tenant_id = ? AND plugin_unique_identifier = ? AND source = ?",
                        INSTALLATION_COLUMNS
                    ),
                    params![tenant_id, identifier, source],
                    map_installation,
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn find_by_tenant_and_id(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<PluginInstallation>> {
        let tenant_id = tenant_id.to_string();
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM plugin_installation WHERE tenant_id = ? AND id = ?",
                        INSTALLATION_COLUMNS
                    ),
                    params![tenant_id, id],
                    map_installation,
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    /// Does the tenant own this identifier under any source?
    pub async fn tenant_owns(&self, tenant_id: &str, plugin_unique_identifier: &str) -> Result<bool> {
        let tenant_id = tenant_id.to_string();
        let identifier = plugin_unique_identifier.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM plugin_installation \
                         WHERE tenant_id = ? AND plugin_unique_identifier = ?",
                        params![tenant_id, identifier],
                        |row| row.get(0),
                    )
                    .map_err(HarborError::DatabaseError)?;
                Ok(count > 0)
            })
            .await
    }

    /// Number of installation rows across all tenants pointing at the identifier.
    /// The backing artifact may be deleted when this drops to zero.
    pub async fn count_by_identifier(&self, plugin_unique_identifier: &str) -> Result<i64> {
        let identifier = plugin_unique_identifier.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM plugin_installation WHERE plugin_unique_identifier = ?",
                    params![identifier],
                    |row| row.get(0),
                )
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn list_by_tenant(
        &self,
        tenant_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<PluginInstallation>> {
        let tenant_id = tenant_id.to_string();
        let offset = page.saturating_sub(1) as i64 * page_size as i64;
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM plugin_installation WHERE tenant_id = ? \
                         ORDER BY created_at DESC LIMIT ? OFFSET ?",
                        INSTALLATION_COLUMNS
                    ))
                    .map_err(HarborError::DatabaseError)?;

                let rows = stmt
                    .query_map(params![tenant_id, page_size, offset], map_installation)
                    .map_err(HarborError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(HarborError::DatabaseError)?;

                Ok(rows)
            })
            .await
    }

    pub async fn count_by_tenant(&self, tenant_id: &str) -> Result<i64> {
        let tenant_id = tenant_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM plugin_installation WHERE tenant_id = ?",
                    params![tenant_id],
                    |row| row.get(0),
                )
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    /// Fetch installations for the given plugin ids (author/name) of a tenant
    pub async fn find_by_plugin_ids(
        &self,
        tenant_id: &str,
        plugin_ids: &[String],
    ) -> Result<Vec<PluginInstallation>> {
        if plugin_ids.is_empty() {
            return Ok(Vec::new());
        }

        let tenant_id = tenant_id.to_string();
        let plugin_ids = plugin_ids.to_vec();
        self.db
            .execute(move |conn| {
                let placeholders = vec!["?"; plugin_ids.len()].join(", ");
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM plugin_installation \
                         WHERE tenant_id = ? AND plugin_id IN ({})",
                        INSTALLATION_COLUMNS, placeholders
                    ))
                    .map_err(HarborError::DatabaseError)?;

                let mut args: Vec<&dyn rusqlite::ToSql> = vec![&tenant_id];
                for id in &plugin_ids {
                    args.push(id);
                }

                let rows = stmt
                    .query_map(args.as_slice(), map_installation)
                    .map_err(HarborError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(HarborError::DatabaseError)?;

                Ok(rows)
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM plugin_installation WHERE id = ?", params![id])
                    .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Update endpoint counters after endpoint registration changes
    pub async fn update_endpoints(&self, id: &str, setups: i64, active: i64) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE plugin_installation \
                     SET endpoints_setups = ?, endpoints_active = ?, updated_at = CURRENT_TIMESTAMP \
                     WHERE id = ?",
                    params![setups, active, id],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

/// Repository for cached plugin declarations
pub struct DeclarationRepository {
    db: Arc<DatabaseManager>,
}

impl DeclarationRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Insert the declaration row unless one already exists for the identifier
    pub async fn create_if_absent(
        &self,
        plugin_unique_identifier: &str,
        plugin_id: &str,
        declaration_json: &str,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let identifier = plugin_unique_identifier.to_string();
        let plugin_id = plugin_id.to_string();
        let declaration = declaration_json.to_string();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO plugin_declaration \
                     (id, plugin_unique_identifier, plugin_id, declaration) VALUES (?, ?, ?, ?)",
                    params![id, identifier, plugin_id, declaration],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn find_by_identifier(
        &self,
        plugin_unique_identifier: &str,
    ) -> Result<Option<PluginDeclarationRecord>> {
        let identifier = plugin_unique_identifier.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, plugin_unique_identifier, plugin_id, declaration \
                     FROM plugin_declaration WHERE plugin_unique_identifier = ?",
                    params![identifier],
                    |row| {
                        Ok(PluginDeclarationRecord {
                            id: row.get(0)?,
                            plugin_unique_identifier: row.get(1)?,
                            plugin_id: row.get(2)?,
                            declaration: row.get(3)?,
                        })
                    },
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn delete_by_identifier(&self, plugin_unique_identifier: &str) -> Result<()> {
        let identifier = plugin_unique_identifier.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM plugin_declaration WHERE plugin_unique_identifier = ?",
                    params![identifier],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<InstallTask> {
    let status: String = row.get(2)?;
    let plugins: String = row.get(5)?;
    Ok(InstallTask {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        status: status.parse().unwrap_or(InstallTaskStatus::Pending),
        total_plugins: row.get(3)?,
        completed_plugins: row.get(4)?,
        plugins: serde_json::from_str(&plugins).unwrap_or_default(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const TASK_COLUMNS: &str =
    "id, tenant_id, status, total_plugins, completed_plugins, plugins, created_at, updated_at";

/// Repository for install tasks
pub struct InstallTaskRepository {
    db: Arc<DatabaseManager>,
}

impl InstallTaskRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn create(&self, task: &InstallTask) -> Result<()> {
        let task = task.clone();
        let plugins = serde_json::to_string(&task.plugins)
            .map_err(|e| HarborError::SerializationError(e.to_string()))?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO install_task \
                     (id, tenant_id, status, total_plugins, completed_plugins, plugins) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        task.id,
                        task.tenant_id,
                        task.status.to_string(),
                        task.total_plugins,
                        task.completed_plugins,
                        plugins
                    ],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn find(&self, tenant_id: &str, task_id: &str) -> Result<Option<InstallTask>> {
        let tenant_id = tenant_id.to_string();
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM install_task WHERE id = ? AND tenant_id = ?",
                        TASK_COLUMNS
                    ),
                    params![task_id, tenant_id],
                    map_task,
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn list(&self, tenant_id: &str, page: u32, page_size: u32) -> Result<Vec<InstallTask>> {
        let tenant_id = tenant_id.to_string();
        let offset = page.saturating_sub(1) as i64 * page_size as i64;
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM install_task WHERE tenant_id = ? \
                         ORDER BY created_at DESC LIMIT ? OFFSET ?",
                        TASK_COLUMNS
                    ))
                    .map_err(HarborError::DatabaseError)?;

                let rows = stmt
                    .query_map(params![tenant_id, page_size, offset], map_task)
                    .map_err(HarborError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(HarborError::DatabaseError)?;

                Ok(rows)
            })
            .await
    }

    pub async fn delete(&self, task_id: &str) -> Result<()> {
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM install_task WHERE id = ?", params![task_id])
                    .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn delete_for_tenant(&self, tenant_id: &str, task_id: &str) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM install_task WHERE id = ? AND tenant_id = ?",
                    params![task_id, tenant_id],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn delete_all_for_tenant(&self, tenant_id: &str) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM install_task WHERE tenant_id = ?", params![tenant_id])
                    .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Read-modify-write a task under the row write lock.
    ///
    /// The row is re-read inside an immediate transaction, the modifier is
    /// applied, and the row is written back. Returns the updated task, or
    /// `None` when the row no longer exists (a deleted task is not an error:
    /// workers may race with the post-success cleanup).
    pub async fn update_with_write_lock<F>(&self, task_id: &str, modifier: F) -> Result<Option<InstallTask>>
    where
        F: FnOnce(&mut InstallTask) + Send + 'static,
    {
        let task_id = task_id.to_string();
        self.db
            .write_transaction(move |tx| {
                let task = tx
                    .query_row(
                        &format!("SELECT {} FROM install_task WHERE id = ?", TASK_COLUMNS),
                        params![task_id],
                        map_task,
                    )
                    .optional()
                    .map_err(HarborError::DatabaseError)?;

                let mut task = match task {
                    Some(task) => task,
                    None => return Ok(None),
                };

                modifier(&mut task);

                let plugins = serde_json::to_string(&task.plugins)
                    .map_err(|e| HarborError::SerializationError(e.to_string()))?;

                tx.execute(
                    "UPDATE install_task SET status = ?, total_plugins = ?, completed_plugins = ?, \
                     plugins = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    params![
                        task.status.to_string(),
                        task.total_plugins,
                        task.completed_plugins,
                        plugins,
                        task.id
                    ],
                )
                .map_err(HarborError::DatabaseError)?;

                Ok(Some(task))
            })
            .await
    }
}

/// Repository for serverless runtime records
pub struct ServerlessRuntimeRepository {
    db: Arc<DatabaseManager>,
}

const SERVERLESS_RUNTIME_TYPE: &str = "serverless";

impl ServerlessRuntimeRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_checksum(&self, checksum: &str) -> Result<Option<ServerlessRuntime>> {
        let checksum = checksum.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, checksum, type, function_url, function_name, plugin_unique_identifier \
                     FROM serverless_runtime WHERE checksum = ? AND type = ?",
                    params![checksum, SERVERLESS_RUNTIME_TYPE],
                    map_serverless,
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn find_by_identifier(
        &self,
        plugin_unique_identifier: &str,
    ) -> Result<Option<ServerlessRuntime>> {
        let identifier = plugin_unique_identifier.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, checksum, type, function_url, function_name, plugin_unique_identifier \
                     FROM serverless_runtime WHERE plugin_unique_identifier = ?",
                    params![identifier],
                    map_serverless,
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn create(
        &self,
        checksum: &str,
        function_url: &str,
        function_name: &str,
        plugin_unique_identifier: &str,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let checksum = checksum.to_string();
        let function_url = function_url.to_string();
        let function_name = function_name.to_string();
        let identifier = plugin_unique_identifier.to_string();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO serverless_runtime \
                     (id, checksum, type, function_url, function_name, plugin_unique_identifier) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![id, checksum, SERVERLESS_RUNTIME_TYPE, function_url, function_name, identifier],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn update_function(&self, id: &str, function_url: &str, function_name: &str) -> Result<()> {
        let id = id.to_string();
        let function_url = function_url.to_string();
        let function_name = function_name.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE serverless_runtime SET function_url = ?, function_name = ?, \
                     updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    params![function_url, function_name, id],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn delete_by_identifier(&self, plugin_unique_identifier: &str) -> Result<()> {
        let identifier = plugin_unique_identifier.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM serverless_runtime WHERE plugin_unique_identifier = ?",
                    params![identifier],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

fn map_serverless(row: &Row<'_>) -> rusqlite::Result<ServerlessRuntime> {
    Ok(ServerlessRuntime {
        id: row.get(0)?,
        checksum: row.get(1)?,
        runtime_type: row.get(2)?,
        function_url: row.get(3)?,
        function_name: row.get(4)?,
        plugin_unique_identifier: row.get(5)?,
    })
}

/// Which capability table a [`CapabilityRepository`] operates on
#[derive(Debug, Clone, Copy)]
pub enum CapabilityKind {
    Tool,
    AIModel,
    AgentStrategy,
}

impl CapabilityKind {
    fn table(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool_installation",
            CapabilityKind::AIModel => "ai_model_installation",
            CapabilityKind::AgentStrategy => "agent_strategy_installation",
        }
    }
}

/// Generic row for the three capability tables
#[derive(Debug, Clone)]
pub struct CapabilityInstallation {
    pub id: String,
    pub tenant_id: String,
    pub plugin_id: String,
    pub plugin_unique_identifier: String,
    pub provider: String,
}

impl From<CapabilityInstallation> for ToolInstallation {
    fn from(c: CapabilityInstallation) -> Self {
        ToolInstallation {
            id: c.id,
            tenant_id: c.tenant_id,
            plugin_id: c.plugin_id,
            plugin_unique_identifier: c.plugin_unique_identifier,
            provider: c.provider,
        }
    }
}

impl From<CapabilityInstallation> for AIModelInstallation {
    fn from(c: CapabilityInstallation) -> Self {
        AIModelInstallation {
            id: c.id,
            tenant_id: c.tenant_id,
            plugin_id: c.plugin_id,
            plugin_unique_identifier: c.plugin_unique_identifier,
            provider: c.provider,
        }
    }
}

impl From<CapabilityInstallation> for AgentStrategyInstallation {
    fn from(c: CapabilityInstallation) -> Self {
        AgentStrategyInstallation {
            id: c.id,
            tenant_id: c.tenant_id,
            plugin_id: c.plugin_id,
            plugin_unique_identifier: c.plugin_unique_identifier,
            provider: c.provider,
        }
    }
}

/// Repository over one of the capability binding tables
pub struct CapabilityRepository {
    db: Arc<DatabaseManager>,
    kind: CapabilityKind,
}

impl CapabilityRepository {
    pub fn new(db: Arc<DatabaseManager>, kind: CapabilityKind) -> Self {
        Self { db, kind }
    }

    pub async fn create(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        plugin_unique_identifier: &str,
        provider: &str,
    ) -> Result<()> {
        let table = self.kind.table();
        let id = Uuid::new_v4().to_string();
        let tenant_id = tenant_id.to_string();
        let plugin_id = plugin_id.to_string();
        let identifier = plugin_unique_identifier.to_string();
        let provider = provider.to_string();

        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {} \
                         (id, tenant_id, plugin_id, plugin_unique_identifier, provider) \
                         VALUES (?, ?, ?, ?, ?)",
                        table
                    ),
                    params![id, tenant_id, plugin_id, identifier, provider],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, tenant_id: &str, plugin_id: &str) -> Result<()> {
        let table = self.kind.table();
        let tenant_id = tenant_id.to_string();
        let plugin_id = plugin_id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!("DELETE FROM {} WHERE tenant_id = ? AND plugin_id = ?", table),
                    params![tenant_id, plugin_id],
                )
                .map_err(HarborError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, tenant_id: &str, plugin_id: &str) -> Result<Option<CapabilityInstallation>> {
        let table = self.kind.table();
        let tenant_id = tenant_id.to_string();
        let plugin_id = plugin_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT id, tenant_id, plugin_id, plugin_unique_identifier, provider \
                         FROM {} WHERE tenant_id = ? AND plugin_id = ?",
                        table
                    ),
                    params![tenant_id, plugin_id],
                    map_capability,
                )
                .optional()
                .map_err(HarborError::DatabaseError)
            })
            .await
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<CapabilityInstallation>> {
        let table = self.kind.table();
        let tenant_id = tenant_id.to_string();
        let offset = page.saturating_sub(1) as i64 * page_size as i64;
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id, tenant_id, plugin_id, plugin_unique_identifier, provider \
                         FROM {} WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                        table
                    ))
                    .map_err(HarborError::DatabaseError)?;

                let rows = stmt
                    .query_map(params![tenant_id, page_size, offset], map_capability)
                    .map_err(HarborError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(HarborError::DatabaseError)?;

                Ok(rows)
            })
            .await
    }

    pub async fn find_by_plugin_ids(
        &self,
        tenant_id: &str,
        plugin_ids: &[String],
    ) -> Result<Vec<CapabilityInstallation>> {
        if plugin_ids.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.kind.table();
        let tenant_id = tenant_id.to_string();
        let plugin_ids = plugin_ids.to_vec();
        self.db
            .execute(move |conn| {
                let placeholders = vec!["?"; plugin_ids.len()].join(", ");
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id, tenant_id, plugin_id, plugin_unique_identifier, provider \
                         FROM {} WHERE tenant_id = ? AND plugin_id IN ({})",
                        table, placeholders
                    ))
                    .map_err(HarborError::DatabaseError)?;

                let mut args: Vec<&dyn rusqlite::ToSql> = vec![&tenant_id];
                for id in &plugin_ids {
                    args.push(id);
                }

                let rows = stmt
                    .query_map(args.as_slice(), map_capability)
                    .map_err(HarborError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(HarborError::DatabaseError)?;

                Ok(rows)
            })
            .await
    }
}

fn map_capability(row: &Row<'_>) -> rusqlite::Result<CapabilityInstallation> {
    Ok(CapabilityInstallation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        plugin_id: row.get(2)?,
        plugin_unique_identifier: row.get(3)?,
        provider: row.get(4)?,
    })
}
