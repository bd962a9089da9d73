//! Database row types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime platform a plugin was installed onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Local,
    Remote,
    Serverless,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Local => write!(f, "local"),
            RuntimeType::Remote => write!(f, "remote"),
            RuntimeType::Serverless => write!(f, "serverless"),
        }
    }
}

impl std::str::FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(RuntimeType::Local),
            "remote" => Ok(RuntimeType::Remote),
            "serverless" => Ok(RuntimeType::Serverless),
            other => Err(format!("unknown runtime type: {}", other)),
        }
    }
}

/// Cached declaration row, one per unique package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDeclarationRecord {
    pub id: String,
    pub plugin_unique_identifier: String,
    pub plugin_id: String,
    /// JSON-encoded declaration
    pub declaration: String,
}

/// Per-tenant plugin binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstallation {
    pub id: String,
    pub tenant_id: String,
    pub plugin_unique_identifier: String,
    pub plugin_id: String,
    pub runtime_type: RuntimeType,
    pub source: String,
    pub meta: HashMap<String, serde_json::Value>,
    pub endpoints_setups: i64,
    pub endpoints_active: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Status of an install task or one of its plugin slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallTaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for InstallTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallTaskStatus::Pending => write!(f, "pending"),
            InstallTaskStatus::Running => write!(f, "running"),
            InstallTaskStatus::Success => write!(f, "success"),
            InstallTaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for InstallTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstallTaskStatus::Pending),
            "running" => Ok(InstallTaskStatus::Running),
            "success" => Ok(InstallTaskStatus::Success),
            "failed" => Ok(InstallTaskStatus::Failed),
            other => Err(format!("unknown install task status: {}", other)),
        }
    }
}

/// Per-plugin slot inside an install task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallTaskPluginStatus {
    pub plugin_unique_identifier: String,
    pub plugin_id: String,
    pub status: InstallTaskStatus,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub icon_dark: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub message: String,
}

/// Tenant-scoped aggregate tracking a multi-plugin install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallTask {
    pub id: String,
    pub tenant_id: String,
    pub status: InstallTaskStatus,
    pub total_plugins: i64,
    pub completed_plugins: i64,
    pub plugins: Vec<InstallTaskPluginStatus>,
    pub created_at: String,
    pub updated_at: String,
}

/// Launched serverless function record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerlessRuntime {
    pub id: String,
    pub checksum: String,
    pub runtime_type: String,
    pub function_url: String,
    pub function_name: String,
    pub plugin_unique_identifier: String,
}

/// Tool capability binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInstallation {
    pub id: String,
    pub tenant_id: String,
    pub plugin_id: String,
    pub plugin_unique_identifier: String,
    pub provider: String,
}

/// Model capability binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIModelInstallation {
    pub id: String,
    pub tenant_id: String,
    pub plugin_id: String,
    pub plugin_unique_identifier: String,
    pub provider: String,
}

/// Agent strategy capability binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStrategyInstallation {
    pub id: String,
    pub tenant_id: String,
    pub plugin_id: String,
    pub plugin_unique_identifier: String,
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            InstallTaskStatus::Pending,
            InstallTaskStatus::Running,
            InstallTaskStatus::Success,
            InstallTaskStatus::Failed,
        ] {
            let parsed: InstallTaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<InstallTaskStatus>().is_err());
    }

    #[test]
    fn test_plugin_status_json_shape() {
        let slot = InstallTaskPluginStatus {
            plugin_unique_identifier: "alice/calc:1.0.0@abc".into(),
            plugin_id: "alice/calc".into(),
            status: InstallTaskStatus::Running,
            icon: "icon.svg".into(),
            icon_dark: String::new(),
            labels: HashMap::new(),
            message: "Installing".into(),
        };

        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["plugin_id"], "alice/calc");
    }
}
