//! Plugin identity and lifetime types

use crate::core::error::{HarborError, Result};
use crate::db::models::RuntimeType;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

/// Content-addressed plugin name: `<author>/<name>:<version>@<checksum>`
///
/// Two packages with the same identifier are byte-equivalent modulo archive
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginUniqueIdentifier(String);

fn identifier_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"^[a-zA-Z0-9_-]{1,64}/[a-z0-9_-]{1,255}:[a-zA-Z0-9.\-]{1,128}@[a-f0-9]{1,64}$",
        )
        .expect("identifier regex is valid")
    })
}

impl PluginUniqueIdentifier {
    /// Parse and validate an identifier string
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !identifier_regex().is_match(&s) {
            return Err(HarborError::InvalidIdentifier(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Author segment
    pub fn author(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// `<author>/<name>` segment
    pub fn plugin_id(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Name segment
    pub fn name(&self) -> &str {
        self.plugin_id().split('/').nth(1).unwrap_or_default()
    }

    /// Version segment
    pub fn version(&self) -> &str {
        self.0
            .split(':')
            .nth(1)
            .and_then(|rest| rest.split('@').next())
            .unwrap_or_default()
    }

    /// Checksum segment
    pub fn checksum(&self) -> &str {
        self.0.split('@').nth(1).unwrap_or_default()
    }

    /// Debug runtimes register under a tenant-scoped uuid author
    pub fn remote_like(&self) -> bool {
        Uuid::parse_str(self.author()).is_ok()
    }
}

impl std::fmt::Display for PluginUniqueIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event emitted while a plugin install progresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginInstallEvent {
    Info,
    Done,
    Error,
}

/// One `{event, data}` pair on an install stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstallResponse {
    pub event: PluginInstallEvent,
    pub data: String,
}

impl PluginInstallResponse {
    pub fn info(data: impl Into<String>) -> Self {
        Self {
            event: PluginInstallEvent::Info,
            data: data.into(),
        }
    }

    pub fn done(data: impl Into<String>) -> Self {
        Self {
            event: PluginInstallEvent::Done,
            data: data.into(),
        }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self {
            event: PluginInstallEvent::Error,
            data: data.into(),
        }
    }
}

/// Identity, liveness, and shutdown for a hosted plugin
pub trait PluginLifetime: Send + Sync {
    fn identity(&self) -> &PluginUniqueIdentifier;

    fn runtime_type(&self) -> RuntimeType;

    fn is_alive(&self) -> bool;

    fn stop(&self);
}

/// A plugin hosted as a local subprocess inside a built environment
#[derive(Debug)]
pub struct LocalPluginHandle {
    identifier: PluginUniqueIdentifier,
    alive: AtomicBool,
}

impl LocalPluginHandle {
    pub fn new(identifier: PluginUniqueIdentifier) -> Self {
        Self {
            identifier,
            alive: AtomicBool::new(true),
        }
    }
}

/// A plugin connected over the debugging channel
#[derive(Debug)]
pub struct RemoteDebugHandle {
    identifier: PluginUniqueIdentifier,
    alive: AtomicBool,
}

impl RemoteDebugHandle {
    pub fn new(identifier: PluginUniqueIdentifier) -> Self {
        Self {
            identifier,
            alive: AtomicBool::new(true),
        }
    }
}

/// A plugin backed by a launched serverless function
#[derive(Debug)]
pub struct ServerlessPluginHandle {
    identifier: PluginUniqueIdentifier,
    pub function_url: String,
    pub function_name: String,
}

impl ServerlessPluginHandle {
    pub fn new(
        identifier: PluginUniqueIdentifier,
        function_url: String,
        function_name: String,
    ) -> Self {
        Self {
            identifier,
            function_url,
            function_name,
        }
    }
}

/// Tagged variant over the three hosting modes
#[derive(Debug)]
pub enum PluginHandle {
    Local(LocalPluginHandle),
    RemoteDebug(RemoteDebugHandle),
    Serverless(ServerlessPluginHandle),
}

impl PluginLifetime for PluginHandle {
    fn identity(&self) -> &PluginUniqueIdentifier {
        match self {
            PluginHandle::Local(handle) => &handle.identifier,
            PluginHandle::RemoteDebug(handle) => &handle.identifier,
            PluginHandle::Serverless(handle) => &handle.identifier,
        }
    }

    fn runtime_type(&self) -> RuntimeType {
        match self {
            PluginHandle::Local(_) => RuntimeType::Local,
            PluginHandle::RemoteDebug(_) => RuntimeType::Remote,
            PluginHandle::Serverless(_) => RuntimeType::Serverless,
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            PluginHandle::Local(handle) => handle.alive.load(Ordering::SeqCst),
            PluginHandle::RemoteDebug(handle) => handle.alive.load(Ordering::SeqCst),
            // a launched function is callable until its record is removed
            PluginHandle::Serverless(_) => true,
        }
    }

    fn stop(&self) {
        match self {
            PluginHandle::Local(handle) => handle.alive.store(false, Ordering::SeqCst),
            PluginHandle::RemoteDebug(handle) => handle.alive.store(false, Ordering::SeqCst),
            PluginHandle::Serverless(_) => {}
        }
    }
}
