//! Plugin declaration entities
//!
//! The normalized manifest aggregate: plugin identity plus the resolved
//! tool / model / endpoint / agent-strategy sub-declarations. A declaration
//! is immutable after decoding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Locale -> text map used for labels and descriptions
pub type I18nString = HashMap<String, String>;

/// `plugins` section of the manifest: paths of sub-declaration files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginExtensions {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub agent_strategies: Vec<String>,
}

/// Runner metadata for the packaged plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginRunner {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub entrypoint: String,
}

/// Packaging metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMeta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: Vec<String>,
    #[serde(default)]
    pub runner: PluginRunner,
}

/// Fully resolved, defaults-filled manifest aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDeclaration {
    pub author: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub label: I18nString,
    #[serde(default)]
    pub description: I18nString,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub icon_dark: String,
    #[serde(default)]
    pub category: String,
    /// Declared resource permissions, kept as free-form structure
    #[serde(default)]
    pub resource: serde_json::Value,
    #[serde(default)]
    pub plugins: PluginExtensions,
    #[serde(default)]
    pub meta: PluginMeta,

    // Resolved sub-declarations, filled during manifest resolution
    #[serde(default)]
    pub tool: Option<ToolProviderDeclaration>,
    #[serde(default)]
    pub model: Option<ModelProviderDeclaration>,
    #[serde(default)]
    pub endpoint: Option<EndpointProviderDeclaration>,
    #[serde(default)]
    pub agent_strategy: Option<AgentStrategyProviderDeclaration>,

    /// Whether the package signature validated; memoized by the decoder
    #[serde(default)]
    pub verified: bool,
}

impl PluginDeclaration {
    /// `<author>/<name>:<version>`
    pub fn identity(&self) -> String {
        format!("{}/{}:{}", self.author, self.name, self.version)
    }

    /// `<author>/<name>`
    pub fn plugin_id(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }

    /// Fill in the defaults the manifest may omit
    pub fn fill_in_default_values(&mut self) {
        if self.label.is_empty() {
            self.label.insert("en_US".to_string(), self.name.clone());
        }
        if self.description.is_empty() {
            self.description.insert("en_US".to_string(), String::new());
        }
        if self.resource.is_null() {
            self.resource = serde_json::json!({});
        }
    }
}

/// Identity block shared by provider sub-declarations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderIdentity {
    #[serde(default)]
    pub author: String,
    pub name: String,
    #[serde(default)]
    pub label: I18nString,
    #[serde(default)]
    pub icon: String,
}

/// Tool provider: identity plus one declaration per tool file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolProviderDeclaration {
    pub identity: ProviderIdentity,
    /// Paths of the individual tool files, as listed in the provider file
    #[serde(rename = "tools", default, skip_serializing)]
    pub tool_files: Vec<String>,
    /// Resolved tool declarations
    #[serde(rename = "tools", default, skip_deserializing)]
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub identity: ProviderIdentity,
    #[serde(default)]
    pub description: I18nString,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Endpoint provider: settings plus one declaration per endpoint file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointProviderDeclaration {
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(rename = "endpoints", default, skip_serializing)]
    pub endpoint_files: Vec<String>,
    #[serde(rename = "endpoints", default, skip_deserializing)]
    pub endpoints: Vec<EndpointDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointDeclaration {
    pub path: String,
    pub method: String,
}

/// Known model position keys mapped to their position files
pub const MODEL_POSITION_KEYS: &[&str] = &[
    "llm",
    "text_embedding",
    "rerank",
    "tts",
    "speech2text",
    "moderation",
];

/// Ordering hints for the models a provider ships
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_embedding: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech2text: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<Vec<String>>,
}

impl ModelPosition {
    pub fn set(&mut self, key: &str, positions: Vec<String>) {
        match key {
            "llm" => self.llm = Some(positions),
            "text_embedding" => self.text_embedding = Some(positions),
            "rerank" => self.rerank = Some(positions),
            "tts" => self.tts = Some(positions),
            "speech2text" => self.speech2text = Some(positions),
            "moderation" => self.moderation = Some(positions),
            _ => {}
        }
    }
}

/// Model provider: icons per locale and size, position files, model globs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelProviderDeclaration {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub label: I18nString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_small: Option<I18nString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_large: Option<I18nString>,
    /// Position file per model type (`llm`, `text_embedding`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_files: Option<HashMap<String, String>>,
    /// Glob patterns matched against the package tree to find model files
    #[serde(rename = "models", default, skip_serializing)]
    pub model_files: Vec<String>,
    #[serde(rename = "models", default, skip_deserializing)]
    pub models: Vec<ModelDeclaration>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub position: Option<ModelPosition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDeclaration {
    pub model: String,
    #[serde(default)]
    pub label: I18nString,
    #[serde(default)]
    pub model_type: String,
    #[serde(default)]
    pub model_properties: serde_json::Value,
}

/// Agent strategy provider: identity plus one declaration per strategy file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStrategyProviderDeclaration {
    pub identity: ProviderIdentity,
    #[serde(rename = "strategies", default, skip_serializing)]
    pub strategy_files: Vec<String>,
    #[serde(rename = "strategies", default, skip_deserializing)]
    pub strategies: Vec<AgentStrategyDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStrategyDeclaration {
    pub identity: ProviderIdentity,
    #[serde(default)]
    pub description: I18nString,
    #[serde(default)]
    pub parameters: serde_json::Value,
}
