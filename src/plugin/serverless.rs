//! Serverless launcher
//!
//! Uploads a plugin package to the cloud function host and exposes the
//! connector's lifecycle event stream. The connector itself is a black box
//! behind [`ServerlessConnector`] so deployments and tests can inject their
//! own.

use crate::cache::{CacheLockGuard, CacheService};
use crate::core::error::Result;
use crate::decoder::manifest::PluginDeclaration;
use crate::decoder::PluginDecoder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Distributed-lock key prefix for launches, completed by the checksum
pub const LAUNCH_LOCK_PREFIX: &str = "aws_launch_lock_";

const LAUNCH_LOCK_TTL: Duration = Duration::from_secs(300);
const LAUNCH_LOCK_WAIT: Duration = Duration::from_secs(300);

/// Lifecycle event tags emitted while a function launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFunctionEvent {
    Info,
    FunctionUrl,
    Function,
    Done,
    Error,
    /// Tag the connector emitted but this daemon does not understand
    #[serde(other)]
    Unknown,
}

/// One event on the launch stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFunctionResponse {
    pub event: LaunchFunctionEvent,
    pub message: String,
}

impl LaunchFunctionResponse {
    pub fn new(event: LaunchFunctionEvent, message: impl Into<String>) -> Self {
        Self {
            event,
            message: message.into(),
        }
    }
}

/// An already-launched function known to the connector
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub function_name: String,
    pub function_url: String,
}

/// Black-box cloud connector hosting plugin functions
#[async_trait]
pub trait ServerlessConnector: Send + Sync {
    /// Look up an existing function for `(manifest, checksum)`
    async fn fetch_function(
        &self,
        manifest: &PluginDeclaration,
        checksum: &str,
    ) -> Result<Option<FunctionEntry>>;

    /// Upload the package and stream launch lifecycle events
    async fn setup_function(
        &self,
        manifest: &PluginDeclaration,
        checksum: &str,
        package: Vec<u8>,
        timeout: Duration,
    ) -> Result<mpsc::Receiver<LaunchFunctionResponse>>;
}

/// Upload the plugin to the serverless connector and return its event stream.
///
/// Unless `ignore_idempotent` is set, a function already known for this
/// checksum short-circuits the upload: the stream then yields exactly
/// `FunctionUrl, Function, Done`.
pub async fn launch_plugin(
    connector: &dyn ServerlessConnector,
    cache: &Arc<dyn CacheService>,
    package: Vec<u8>,
    decoder: &dyn PluginDecoder,
    timeout: Duration,
    ignore_idempotent: bool,
) -> Result<mpsc::Receiver<LaunchFunctionResponse>> {
    let checksum = decoder.checksum()?;

    let lock = CacheLockGuard::acquire(
        cache.as_ref(),
        format!("{}{}", LAUNCH_LOCK_PREFIX, checksum),
        LAUNCH_LOCK_TTL,
        LAUNCH_LOCK_WAIT,
    )
    .await?;

    let result = launch_locked(connector, package, decoder, &checksum, timeout, ignore_idempotent).await;
    lock.release().await?;
    result
}

async fn launch_locked(
    connector: &dyn ServerlessConnector,
    package: Vec<u8>,
    decoder: &dyn PluginDecoder,
    checksum: &str,
    timeout: Duration,
    ignore_idempotent: bool,
) -> Result<mpsc::Receiver<LaunchFunctionResponse>> {
    let manifest = decoder.manifest()?;

    if !ignore_idempotent {
        if let Some(function) = connector.fetch_function(&manifest, checksum).await? {
            debug!(checksum, function = %function.function_name, "function already launched");

            let (tx, rx) = mpsc::channel(3);
            let _ = tx
                .send(LaunchFunctionResponse::new(
                    LaunchFunctionEvent::FunctionUrl,
                    function.function_url,
                ))
                .await;
            let _ = tx
                .send(LaunchFunctionResponse::new(
                    LaunchFunctionEvent::Function,
                    function.function_name,
                ))
                .await;
            let _ = tx
                .send(LaunchFunctionResponse::new(LaunchFunctionEvent::Done, ""))
                .await;
            return Ok(rx);
        }
    }

    connector
        .setup_function(&manifest, checksum, package, timeout)
        .await
}
