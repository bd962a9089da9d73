//! Read-side installation use cases
//!
//! Listings join installation rows with their cached declarations; the
//! missing-plugin check reports absent plugins and version mismatches.

use crate::core::error::{HarborError, Result};
use crate::db::models::{PluginInstallation, RuntimeType};
use crate::db::repository::{
    CapabilityInstallation, CapabilityKind, CapabilityRepository, InstallationRepository,
};
use crate::db::DatabaseManager;
use crate::decoder::manifest::{
    AgentStrategyProviderDeclaration, ModelProviderDeclaration, PluginDeclaration,
    ToolProviderDeclaration,
};
use crate::plugin::manager::PluginManager;
use crate::plugin::types::PluginUniqueIdentifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Installation row joined with its declaration
#[derive(Debug, Clone, Serialize)]
pub struct InstallationView {
    pub id: String,
    pub name: String,
    pub plugin_id: String,
    pub tenant_id: String,
    pub plugin_unique_identifier: String,
    pub endpoints_active: i64,
    pub endpoints_setups: i64,
    pub declaration: PluginDeclaration,
    pub runtime_type: RuntimeType,
    pub version: String,
    pub checksum: String,
    pub source: String,
    pub meta: std::collections::HashMap<String, serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// Capability row joined with the relevant provider declaration
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityView<D> {
    pub id: String,
    pub tenant_id: String,
    pub plugin_id: String,
    pub plugin_unique_identifier: String,
    pub provider: String,
    pub declaration: Option<D>,
}

/// A requested plugin the tenant does not have, or has at another version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissingPluginDependency {
    pub plugin_unique_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_identifier: Option<String>,
}

/// Tool existence probe
#[derive(Debug, Clone, Deserialize)]
pub struct ToolExistenceRequest {
    pub plugin_id: String,
    pub provider_name: String,
}

/// Read-side installation service
pub struct ManageService {
    manager: Arc<PluginManager>,
    installations: Arc<InstallationRepository>,
    tools: Arc<CapabilityRepository>,
    models: Arc<CapabilityRepository>,
    agent_strategies: Arc<CapabilityRepository>,
}

impl ManageService {
    pub fn new(manager: Arc<PluginManager>, db: Arc<DatabaseManager>) -> Self {
        Self {
            manager,
            installations: Arc::new(InstallationRepository::new(db.clone())),
            tools: Arc::new(CapabilityRepository::new(db.clone(), CapabilityKind::Tool)),
            models: Arc::new(CapabilityRepository::new(db.clone(), CapabilityKind::AIModel)),
            agent_strategies: Arc::new(CapabilityRepository::new(db, CapabilityKind::AgentStrategy)),
        }
    }

    async fn view_of(&self, installation: PluginInstallation) -> Result<InstallationView> {
        let identifier = PluginUniqueIdentifier::new(installation.plugin_unique_identifier.clone())?;
        let declaration = self.manager.get_declaration(&identifier).await?;

        Ok(InstallationView {
            id: installation.id.clone(),
            name: declaration.name.clone(),
            plugin_id: identifier.plugin_id().to_string(),
            tenant_id: installation.tenant_id,
            plugin_unique_identifier: installation.plugin_unique_identifier,
            endpoints_active: installation.endpoints_active,
            endpoints_setups: installation.endpoints_setups,
            version: declaration.version.clone(),
            checksum: identifier.checksum().to_string(),
            declaration,
            runtime_type: installation.runtime_type,
            source: installation.source,
            meta: installation.meta,
            created_at: installation.created_at,
            updated_at: installation.updated_at,
        })
    }

    /// List a tenant's installations with declarations and the total count
    pub async fn list_plugins(
        &self,
        tenant_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<InstallationView>, i64)> {
        let total = self.installations.count_by_tenant(tenant_id).await?;
        let rows = self.installations.list_by_tenant(tenant_id, page, page_size).await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(self.view_of(row).await?);
        }

        Ok((views, total))
    }

    /// Fetch installations for a set of plugin ids
    pub async fn batch_fetch_plugin_installations(
        &self,
        tenant_id: &str,
        plugin_ids: &[String],
    ) -> Result<Vec<InstallationView>> {
        let rows = self.installations.find_by_plugin_ids(tenant_id, plugin_ids).await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(self.view_of(row).await?);
        }

        Ok(views)
    }

    /// Which of the requested identifiers the tenant is missing.
    ///
    /// A plugin installed at a different version is reported with its
    /// currently installed identifier.
    pub async fn fetch_missing_installations(
        &self,
        tenant_id: &str,
        identifiers: &[PluginUniqueIdentifier],
    ) -> Result<Vec<MissingPluginDependency>> {
        let mut missing = Vec::new();
        if identifiers.is_empty() {
            return Ok(missing);
        }

        let plugin_ids: Vec<String> = identifiers
            .iter()
            .map(|identifier| identifier.plugin_id().to_string())
            .collect();
        let installed = self.installations.find_by_plugin_ids(tenant_id, &plugin_ids).await?;

        for identifier in identifiers {
            let current = installed
                .iter()
                .find(|row| row.plugin_id == identifier.plugin_id());

            match current {
                None => missing.push(MissingPluginDependency {
                    plugin_unique_identifier: identifier.to_string(),
                    current_identifier: None,
                }),
                Some(row) if row.plugin_unique_identifier != identifier.as_str() => {
                    missing.push(MissingPluginDependency {
                        plugin_unique_identifier: identifier.to_string(),
                        current_identifier: Some(row.plugin_unique_identifier.clone()),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(missing)
    }

    async fn tool_view(
        &self,
        row: CapabilityInstallation,
    ) -> Result<CapabilityView<ToolProviderDeclaration>> {
        let identifier = PluginUniqueIdentifier::new(row.plugin_unique_identifier.clone())?;
        let declaration = self.manager.get_declaration(&identifier).await?;
        Ok(CapabilityView {
            id: row.id,
            tenant_id: row.tenant_id,
            plugin_id: row.plugin_id,
            plugin_unique_identifier: row.plugin_unique_identifier,
            provider: row.provider,
            declaration: declaration.tool,
        })
    }

    /// List tool providers with their declarations
    pub async fn list_tools(
        &self,
        tenant_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<CapabilityView<ToolProviderDeclaration>>> {
        let rows = self.tools.list(tenant_id, page, page_size).await?;
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(self.tool_view(row).await?);
        }
        Ok(views)
    }

    /// Fetch one tool provider; the provider name must match
    pub async fn get_tool(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        provider: &str,
    ) -> Result<CapabilityView<ToolProviderDeclaration>> {
        let row = self
            .tools
            .get(tenant_id, plugin_id)
            .await?
            .filter(|row| row.provider == provider)
            .ok_or_else(|| HarborError::NotFound(format!("tool not found: {}", plugin_id)))?;

        self.tool_view(row).await
    }

    /// Existence flags for a batch of tool providers, in request order
    pub async fn check_tool_existence(
        &self,
        tenant_id: &str,
        providers: &[ToolExistenceRequest],
    ) -> Result<Vec<bool>> {
        let plugin_ids: Vec<String> = providers.iter().map(|p| p.plugin_id.clone()).collect();
        let rows = self.tools.find_by_plugin_ids(tenant_id, &plugin_ids).await?;

        Ok(providers
            .iter()
            .map(|request| {
                rows.iter().any(|row| {
                    row.plugin_id == request.plugin_id && row.provider == request.provider_name
                })
            })
            .collect())
    }

    /// List model providers with their declarations
    pub async fn list_models(
        &self,
        tenant_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<CapabilityView<ModelProviderDeclaration>>> {
        let rows = self.models.list(tenant_id, page, page_size).await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let identifier = PluginUniqueIdentifier::new(row.plugin_unique_identifier.clone())?;
            let declaration = self.manager.get_declaration(&identifier).await?;
            views.push(CapabilityView {
                id: row.id,
                tenant_id: row.tenant_id,
                plugin_id: row.plugin_id,
                plugin_unique_identifier: row.plugin_unique_identifier,
                provider: row.provider,
                declaration: declaration.model,
            });
        }

        Ok(views)
    }

    async fn agent_strategy_view(
        &self,
        row: CapabilityInstallation,
    ) -> Result<CapabilityView<AgentStrategyProviderDeclaration>> {
        let identifier = PluginUniqueIdentifier::new(row.plugin_unique_identifier.clone())?;
        let declaration = self.manager.get_declaration(&identifier).await?;
        Ok(CapabilityView {
            id: row.id,
            tenant_id: row.tenant_id,
            plugin_id: row.plugin_id,
            plugin_unique_identifier: row.plugin_unique_identifier,
            provider: row.provider,
            declaration: declaration.agent_strategy,
        })
    }

    /// List agent strategy providers with their declarations
    pub async fn list_agent_strategies(
        &self,
        tenant_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<CapabilityView<AgentStrategyProviderDeclaration>>> {
        let rows = self.agent_strategies.list(tenant_id, page, page_size).await?;
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(self.agent_strategy_view(row).await?);
        }
        Ok(views)
    }

    /// Fetch one agent strategy provider; the provider name must match
    pub async fn get_agent_strategy(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        provider: &str,
    ) -> Result<CapabilityView<AgentStrategyProviderDeclaration>> {
        let row = self
            .agent_strategies
            .get(tenant_id, plugin_id)
            .await?
            .filter(|row| row.provider == provider)
            .ok_or_else(|| {
                HarborError::NotFound(format!("agent strategy not found: {}", plugin_id))
            })?;

        self.agent_strategy_view(row).await
    }
}
