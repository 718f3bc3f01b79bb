//! Host-side registry of plugin connections
//!
//! Plugins are registered by name, either launched from configuration as
//! child processes or attached from an existing client. Pipelines are then
//! assembled from names, with every stage a call proxy over its connection.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, PipelineConfig, PluginSpec};
use crate::contract::Kind;
use crate::error::{BridgeError, Result};
use crate::pipeline::Pipeline;
use crate::plugin::{
    Broker, DecisionPlugin, DestinationPlugin, ExtractorPlugin, TransformationPlugin,
};
use crate::transport::{PluginProcess, RpcClient};

struct HostedPlugin {
    broker: Broker,
    process: Option<Arc<PluginProcess>>,
}

#[derive(Default)]
pub struct PluginHost {
    plugins: DashMap<String, HostedPlugin>,
    request_timeout: Option<Duration>,
}

impl PluginHost {
    pub fn new(request_timeout: Option<Duration>) -> Self {
        Self {
            plugins: DashMap::new(),
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.transport.request_timeout())
    }

    /// Spawns the plugin executable and registers its connection.
    /// An existing registration under the same name is shut down first.
    pub async fn launch(&self, name: &str, spec: &PluginSpec) -> Result<()> {
        let process = PluginProcess::spawn(&spec.command(), self.request_timeout).await?;
        info!(plugin = %name, kind = %spec.kind, pid = process.pid, "Plugin launched");

        let client: Arc<dyn RpcClient> = process.client();
        let previous = self.plugins.insert(
            name.to_string(),
            HostedPlugin {
                broker: Broker::new(spec.kind, client),
                process: Some(Arc::new(process)),
            },
        );
        if let Some(previous) = previous {
            warn!(plugin = %name, "Replacing running plugin");
            if let Some(process) = previous.process {
                process.shutdown().await;
            }
        }
        Ok(())
    }

    /// Launches every configured plugin. Stops at the first failure.
    pub async fn launch_all(&self, config: &Config) -> Result<usize> {
        let mut names: Vec<_> = config.plugins.keys().collect();
        names.sort();
        for name in &names {
            self.launch(name, &config.plugins[*name]).await?;
        }
        Ok(names.len())
    }

    /// Registers a connection the host does not own, such as an in-process
    /// plugin or an already-connected stream.
    pub fn attach(&self, name: impl Into<String>, kind: Kind, client: Arc<dyn RpcClient>) {
        let name = name.into();
        debug!(plugin = %name, %kind, "Plugin attached");
        self.plugins.insert(
            name,
            HostedPlugin {
                broker: Broker::new(kind, client),
                process: None,
            },
        );
    }

    pub fn broker(&self, name: &str) -> Result<Broker> {
        self.plugins
            .get(name)
            .map(|entry| entry.broker.clone())
            .ok_or_else(|| BridgeError::PluginNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.plugins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn pipeline(&self, config: &PipelineConfig) -> Result<Pipeline> {
        let extractor = ExtractorPlugin::client(&self.broker(&config.extractor)?)?;
        let destination = DestinationPlugin::client(&self.broker(&config.destination)?)?;

        let mut pipeline =
            Pipeline::new(config.name.clone(), Arc::new(extractor), Arc::new(destination));
        for name in &config.transformations {
            let transformation = TransformationPlugin::client(&self.broker(name)?)?;
            pipeline = pipeline.with_transformation(Arc::new(transformation));
        }
        if let Some(name) = &config.decision {
            let decision = DecisionPlugin::client(&self.broker(name)?)?;
            pipeline = pipeline.with_decision(Arc::new(decision));
        }
        Ok(pipeline)
    }

    /// Stops every owned process and forgets all registrations.
    pub async fn shutdown(&self) {
        let names = self.names();
        for name in names {
            if let Some((_, hosted)) = self.plugins.remove(&name) {
                if let Some(process) = hosted.process {
                    process.shutdown().await;
                }
            }
        }
        info!("All plugins stopped");
    }
}
