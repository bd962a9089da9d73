//! Harbor plugin-hosting daemon
//!
//! Hosts third-party plugins for an upstream application: decodes and
//! verifies plugin packages, materializes local or serverless runtimes,
//! tracks per-tenant installations, and exposes streaming install progress.

pub mod cache;
pub mod core;
pub mod db;
pub mod decoder;
pub mod plugin;
pub mod service;

// Re-export commonly used types
pub use crate::core::{Config, HarborError, Platform};
pub use db::DatabaseManager;
pub use decoder::{DirPluginDecoder, PluginDecoder, ZipPluginDecoder};
pub use plugin::{PluginManager, PluginUniqueIdentifier};
pub use service::{InstallService, ManageService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = crate::core::error::Result<T>;
