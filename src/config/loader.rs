use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::path::Path;

use super::schema::Config;
use crate::error::{ConfigError, Result};

const ENV_PREFIX: &str = "PLUGIN_BRIDGE_";

pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("plugin-bridge.toml"))
        .merge(Json::file("plugin-bridge.json"))
        .merge(Yaml::file("plugin-bridge.yaml"))
        .merge(Yaml::file("plugin-bridge.yml"))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub fn validate(config: &Config) -> Result<()> {
    for (name, plugin) in &config.plugins {
        if plugin.command.trim().is_empty() {
            return Err(ConfigError::Validation(format!("Plugin '{name}' has empty command")).into());
        }
    }

    if let Some(pipeline) = &config.pipeline {
        for (name, kind) in pipeline.stages() {
            let plugin = config.plugins.get(name).ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "plugins.{name} (referenced by pipeline '{}')",
                    pipeline.name
                ))
            })?;
            if plugin.kind != kind {
                return Err(ConfigError::Validation(format!(
                    "Plugin '{name}' is a {} but is used as a {kind} stage",
                    plugin.kind
                ))
                .into());
            }
        }
    }

    if config.transport.request_timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "Request timeout must be greater than 0".into(),
        )
        .into());
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    for plugin in config.plugins.values_mut() {
        plugin.command = substitute_env_vars(&plugin.command)?;
        for arg in &mut plugin.args {
            *arg = substitute_env_vars(arg)?;
        }
        for value in plugin.env.values_mut() {
            *value = substitute_env_vars(value)?;
        }
    }

    if let Some(pipeline) = &mut config.pipeline {
        for value in pipeline.config.values_mut() {
            *value = substitute_env_vars(value)?;
        }
    }

    Ok(config)
}

/// Expands `${VAR}` and `${VAR:-default}`.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                if let Some((name, default)) = var_name.split_once(":-") {
                    match std::env::var(name) {
                        Ok(value) => result = result.replace(&cap[0], &value),
                        Err(_) => result = result.replace(&cap[0], default),
                    }
                } else {
                    return Err(ConfigError::EnvVar(format!(
                        "Environment variable '{var_name}' not found"
                    ))
                    .into());
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Kind;
    use crate::error::BridgeError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(suffix: &str, body: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("PLUGIN_BRIDGE_TEST_VAR", "test_value");

        let result = substitute_env_vars("Hello ${PLUGIN_BRIDGE_TEST_VAR}!").unwrap();
        assert_eq!(result, "Hello test_value!");

        let result = substitute_env_vars("${PLUGIN_BRIDGE_MISSING:-default}").unwrap();
        assert_eq!(result, "default");

        assert!(substitute_env_vars("${PLUGIN_BRIDGE_MISSING}").is_err());

        std::env::remove_var("PLUGIN_BRIDGE_TEST_VAR");
    }

    #[test]
    fn loads_toml_pipeline() {
        let file = write_config(
            ".toml",
            r#"
[plugins.source]
kind = "extractor"
command = "./source-plugin"

[plugins.threshold]
kind = "transformation"
command = "./threshold-plugin"
args = ["transformation"]

[plugins.sink]
kind = "destination"
command = "./sink-plugin"
env = { SINK_DIR = "${PLUGIN_BRIDGE_SINK_DIR:-/tmp/sink}" }

[pipeline]
extractor = "source"
transformations = ["threshold"]
destination = "sink"
config = { threshold = "5" }

[transport]
requestTimeoutMs = 1500
"#,
        );

        let config = load_from_path(file.path()).unwrap();
        assert_eq!(config.plugins["threshold"].kind, Kind::Transformation);
        assert_eq!(config.plugins["threshold"].args, vec!["transformation"]);
        assert_eq!(config.plugins["sink"].env["SINK_DIR"], "/tmp/sink");

        let pipeline = config.pipeline.unwrap();
        assert_eq!(pipeline.name, "default");
        assert_eq!(pipeline.config["threshold"], "5");
        assert_eq!(config.transport.request_timeout_ms, Some(1500));
    }

    #[test]
    fn rejects_stage_of_wrong_kind() {
        let file = write_config(
            ".json",
            r#"{
  "plugins": {
    "source": { "kind": "extractor", "command": "./source" },
    "sink": { "kind": "transformation", "command": "./sink" }
  },
  "pipeline": { "extractor": "source", "destination": "sink" }
}"#,
        );

        let err = load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_unknown_stage_and_bad_extension() {
        let file = write_config(
            ".yaml",
            "plugins: {}\npipeline:\n  extractor: source\n  destination: sink\n",
        );
        let err = load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ConfigError::MissingField(_))));

        let file = write_config(".ini", "");
        assert!(load_from_path(file.path()).is_err());
    }
}
