use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::contract::Kind;
use crate::envelope::StageConfig;
use crate::transport::PluginCommand;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub plugins: HashMap<String, PluginSpec>,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub transport: TransportSettings,
}

/// One plugin executable and the extension kind it serves.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    pub kind: Kind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

impl PluginSpec {
    pub fn command(&self) -> PluginCommand {
        let mut command = PluginCommand::new(self.command.clone())
            .with_args(self.args.clone())
            .with_env(self.env.clone());
        if let Some(dir) = &self.working_directory {
            command = command.with_working_dir(dir.clone());
        }
        command
    }
}

/// Stage wiring by plugin name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    pub extractor: String,
    #[serde(default)]
    pub transformations: Vec<String>,
    #[serde(default)]
    pub decision: Option<String>,
    pub destination: String,
    /// Handed to every stage on every call.
    #[serde(default)]
    pub config: StageConfig,
}

impl PipelineConfig {
    /// Every referenced plugin paired with the kind its stage requires.
    pub fn stages(&self) -> Vec<(&str, Kind)> {
        let mut stages = vec![(self.extractor.as_str(), Kind::Extractor)];
        stages.extend(
            self.transformations
                .iter()
                .map(|name| (name.as_str(), Kind::Transformation)),
        );
        if let Some(decision) = &self.decision {
            stages.push((decision.as_str(), Kind::Decision));
        }
        stages.push((self.destination.as_str(), Kind::Destination));
        stages
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSettings {
    /// Per-call deadline enforced by the transport. No deadline when unset.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl TransportSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn default_pipeline_name() -> String {
    "default".to_string()
}
