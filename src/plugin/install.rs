//! Serverless install adaptors
//!
//! Consume a launch event stream and translate it into the daemon's
//! `{event, data}` install stream, creating or updating the serverless
//! runtime row when the launch completes.

use crate::core::error::Result;
use crate::decoder::PluginDecoder;
use crate::decoder::ZipPluginDecoder;
use crate::plugin::manager::PluginManager;
use crate::plugin::serverless::{launch_plugin, LaunchFunctionEvent, LaunchFunctionResponse};
use crate::plugin::types::{PluginInstallResponse, PluginUniqueIdentifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

enum ServerlessBinding {
    /// First install: create the runtime row unless one already exists
    Install { checksum: String },
    /// Reinstall: update the existing row and drop its cache entry
    Reinstall { runtime_id: String },
}

impl PluginManager {
    /// Install a package onto the serverless platform.
    ///
    /// Launch idempotency applies: an already-launched checksum resolves
    /// without another upload.
    pub async fn install_to_serverless(
        self: &Arc<Self>,
        package: Vec<u8>,
        decoder: Arc<ZipPluginDecoder>,
        _source: String,
        _meta: serde_json::Value,
    ) -> Result<mpsc::Receiver<PluginInstallResponse>> {
        let checksum = decoder.checksum()?;
        decoder.manifest()?;
        let identifier = decoder.unique_identifier()?;

        let launch_rx = launch_plugin(
            self.connector.as_ref(),
            &self.cache,
            package,
            decoder.as_ref(),
            Duration::from_secs(self.config.serverless.launch_timeout),
            false,
        )
        .await?;

        Ok(self.adapt_launch_stream(
            launch_rx,
            identifier,
            ServerlessBinding::Install { checksum },
        ))
    }

    /// Relaunch an already-installed package, updating its function binding
    pub async fn reinstall_to_serverless(
        self: &Arc<Self>,
        package: Vec<u8>,
        decoder: Arc<ZipPluginDecoder>,
    ) -> Result<mpsc::Receiver<PluginInstallResponse>> {
        decoder.checksum()?;
        decoder.manifest()?;
        let identifier = decoder.unique_identifier()?;

        let runtime = self
            .serverless_runtimes
            .find_by_identifier(identifier.as_str())
            .await?
            .ok_or_else(|| {
                crate::core::error::HarborError::NotFound(format!(
                    "serverless runtime not found for {}",
                    identifier
                ))
            })?;

        let launch_rx = launch_plugin(
            self.connector.as_ref(),
            &self.cache,
            package,
            decoder.as_ref(),
            Duration::from_secs(self.config.serverless.launch_timeout),
            true, // always relaunch
        )
        .await?;

        Ok(self.adapt_launch_stream(
            launch_rx,
            identifier,
            ServerlessBinding::Reinstall {
                runtime_id: runtime.id,
            },
        ))
    }

    fn adapt_launch_stream(
        self: &Arc<Self>,
        mut launch_rx: mpsc::Receiver<LaunchFunctionResponse>,
        identifier: PluginUniqueIdentifier,
        binding: ServerlessBinding,
    ) -> mpsc::Receiver<PluginInstallResponse> {
        let (tx, rx) = mpsc::channel(128);
        let manager = self.clone();

        tokio::spawn(async move {
            let mut function_url = String::new();
            let mut function_name = String::new();

            while let Some(event) = launch_rx.recv().await {
                match event.event {
                    LaunchFunctionEvent::Info => {
                        let _ = tx.send(PluginInstallResponse::info("Installing...")).await;
                    }
                    LaunchFunctionEvent::FunctionUrl => {
                        function_url = event.message;
                    }
                    LaunchFunctionEvent::Function => {
                        function_name = event.message;
                    }
                    LaunchFunctionEvent::Done => {
                        // defensive against out-of-order connector events:
                        // a completion without both bindings is a failure
                        if function_url.is_empty() || function_name.is_empty() {
                            let _ = tx
                                .send(PluginInstallResponse::error(
                                    "Internal server error, failed to get function url or name",
                                ))
                                .await;
                            return;
                        }

                        if let Err(e) = manager
                            .bind_serverless_runtime(&identifier, &binding, &function_url, &function_name)
                            .await
                        {
                            error!(identifier = %identifier, "failed to bind serverless runtime: {}", e);
                            let _ = tx.send(PluginInstallResponse::error(e.to_string())).await;
                            return;
                        }

                        let _ = tx.send(PluginInstallResponse::done("Installed")).await;
                    }
                    LaunchFunctionEvent::Error => {
                        let _ = tx
                            .send(PluginInstallResponse::error("Internal server error"))
                            .await;
                        return;
                    }
                    LaunchFunctionEvent::Unknown => {
                        let _ = tx
                            .send(PluginInstallResponse::error(format!(
                                "unknown launch event with message: {}",
                                event.message
                            )))
                            .await;
                        return;
                    }
                }
            }
        });

        rx
    }

    async fn bind_serverless_runtime(
        &self,
        identifier: &PluginUniqueIdentifier,
        binding: &ServerlessBinding,
        function_url: &str,
        function_name: &str,
    ) -> Result<()> {
        match binding {
            ServerlessBinding::Install { checksum } => {
                // another worker may have created the row between launch and now
                if self
                    .serverless_runtimes
                    .find_by_checksum(checksum)
                    .await?
                    .is_none()
                {
                    self.serverless_runtimes
                        .create(checksum, function_url, function_name, identifier.as_str())
                        .await?;
                }
                Ok(())
            }
            ServerlessBinding::Reinstall { runtime_id } => {
                self.serverless_runtimes
                    .update_function(runtime_id, function_url, function_name)
                    .await?;
                self.clear_serverless_runtime_cache(identifier).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Platform;
    use crate::plugin::manager::test_support::{test_config, test_manager_with};
    use crate::plugin::serverless::test_support::MockConnector;
    use crate::plugin::serverless::FunctionEntry;
    use crate::plugin::types::PluginInstallEvent;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn test_package() -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in [
            ("manifest.yaml", "author: alice\nname: calc\nversion: 1.0.0\n"),
            ("README.md", "# calc"),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    async fn drain(mut rx: mpsc::Receiver<PluginInstallResponse>) -> Vec<PluginInstallResponse> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_install_creates_runtime_row() {
        let root = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new(
            None,
            vec![
                LaunchFunctionResponse::new(LaunchFunctionEvent::Info, "building"),
                LaunchFunctionResponse::new(LaunchFunctionEvent::FunctionUrl, "https://fn.example/x"),
                LaunchFunctionResponse::new(LaunchFunctionEvent::Function, "fn-x"),
                LaunchFunctionResponse::new(LaunchFunctionEvent::Done, ""),
            ],
        ));
        let config = test_config(&root, Platform::Serverless);
        let (manager, _db) = test_manager_with(&root, config, connector);

        let package = test_package();
        let decoder = Arc::new(ZipPluginDecoder::new(package.clone()).unwrap());
        let checksum = decoder.checksum().unwrap();

        let rx = manager
            .install_to_serverless(package, decoder, "marketplace".into(), serde_json::json!({}))
            .await
            .unwrap();
        let events = drain(rx).await;

        assert_eq!(events.first().unwrap().event, PluginInstallEvent::Info);
        assert_eq!(events.last().unwrap().event, PluginInstallEvent::Done);
        assert_eq!(events.last().unwrap().data, "Installed");

        let runtime = manager
            .serverless_runtimes
            .find_by_checksum(&checksum)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runtime.function_name, "fn-x");
    }

    #[tokio::test]
    async fn test_existing_function_short_circuits() {
        let root = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new(
            Some(FunctionEntry {
                function_name: "fn-abc".into(),
                function_url: "https://fn.example/abc".into(),
            }),
            vec![],
        ));
        let config = test_config(&root, Platform::Serverless);
        let (manager, _db) = test_manager_with(&root, config, connector.clone());

        let package = test_package();
        let decoder = Arc::new(ZipPluginDecoder::new(package.clone()).unwrap());

        let rx = manager
            .install_to_serverless(package, decoder, "marketplace".into(), serde_json::json!({}))
            .await
            .unwrap();
        let events = drain(rx).await;

        // FunctionUrl and Function are buffered; only Done surfaces
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, PluginInstallEvent::Done);
        assert_eq!(connector.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_done_without_function_binding_is_error() {
        let root = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new(
            None,
            vec![
                LaunchFunctionResponse::new(LaunchFunctionEvent::Info, "building"),
                LaunchFunctionResponse::new(LaunchFunctionEvent::Done, ""),
            ],
        ));
        let config = test_config(&root, Platform::Serverless);
        let (manager, _db) = test_manager_with(&root, config, connector);

        let package = test_package();
        let decoder = Arc::new(ZipPluginDecoder::new(package.clone()).unwrap());

        let rx = manager
            .install_to_serverless(package, decoder, "marketplace".into(), serde_json::json!({}))
            .await
            .unwrap();
        let events = drain(rx).await;

        assert_eq!(events.last().unwrap().event, PluginInstallEvent::Error);
        assert!(events.last().unwrap().data.contains("function url or name"));
    }

    #[tokio::test]
    async fn test_connector_error_surfaces() {
        let root = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new(
            None,
            vec![LaunchFunctionResponse::new(LaunchFunctionEvent::Error, "boom")],
        ));
        let config = test_config(&root, Platform::Serverless);
        let (manager, _db) = test_manager_with(&root, config, connector);

        let package = test_package();
        let decoder = Arc::new(ZipPluginDecoder::new(package.clone()).unwrap());

        let rx = manager
            .install_to_serverless(package, decoder, "marketplace".into(), serde_json::json!({}))
            .await
            .unwrap();
        let events = drain(rx).await;

        assert_eq!(events.last().unwrap().event, PluginInstallEvent::Error);
    }

    #[tokio::test]
    async fn test_reinstall_updates_runtime_row() {
        let root = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new(
            None,
            vec![
                LaunchFunctionResponse::new(LaunchFunctionEvent::FunctionUrl, "https://fn.example/v2"),
                LaunchFunctionResponse::new(LaunchFunctionEvent::Function, "fn-v2"),
                LaunchFunctionResponse::new(LaunchFunctionEvent::Done, ""),
            ],
        ));
        let config = test_config(&root, Platform::Serverless);
        let (manager, _db) = test_manager_with(&root, config, connector);

        let package = test_package();
        let decoder = Arc::new(ZipPluginDecoder::new(package.clone()).unwrap());
        let identifier = decoder.unique_identifier().unwrap();
        let checksum = decoder.checksum().unwrap();

        manager
            .serverless_runtimes
            .create(&checksum, "https://fn.example/v1", "fn-v1", identifier.as_str())
            .await
            .unwrap();

        let rx = manager
            .reinstall_to_serverless(package, decoder)
            .await
            .unwrap();
        let events = drain(rx).await;
        assert_eq!(events.last().unwrap().event, PluginInstallEvent::Done);

        let runtime = manager
            .serverless_runtimes
            .find_by_checksum(&checksum)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runtime.function_name, "fn-v2");
    }

    #[tokio::test]
    async fn test_reinstall_without_runtime_row_fails() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, Platform::Serverless);
        let (manager, _db) =
            test_manager_with(&root, config, Arc::new(MockConnector::new(None, vec![])));

        let package = test_package();
        let decoder = Arc::new(ZipPluginDecoder::new(package.clone()).unwrap());

        let err = manager
            .reinstall_to_serverless(package, decoder)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::core::error::HarborError::NotFound(_)));
    }
}
