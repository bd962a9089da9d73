//! Plugin hosting: identity types, live registry, runtime builders, and
//! install adaptors

pub mod install;
pub mod local;
pub mod manager;
pub mod registry;
pub mod serverless;
pub mod types;

pub use local::{EnvironmentBuilder, LocalRuntimeState};
pub use manager::PluginManager;
pub use registry::PluginRegistry;
pub use serverless::{LaunchFunctionEvent, LaunchFunctionResponse, ServerlessConnector};
pub use types::{PluginInstallEvent, PluginInstallResponse, PluginLifetime, PluginUniqueIdentifier};
