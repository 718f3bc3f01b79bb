use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BridgeError, ConfigError, Result};
use crate::host::PluginHost;
use crate::pipeline::PipelineReport;

/// Validates the configuration and, with `spawn`, starts every plugin once
/// to confirm its command launches.
pub async fn run_config_check(config: Config, spawn: bool) -> Result<()> {
    info!("Checking configuration...");

    crate::config::validate(&config)?;
    info!("Configuration is valid");

    let mut names: Vec<_> = config.plugins.keys().collect();
    names.sort();
    info!("Checking {} plugin(s)...", names.len());

    let mut all_ok = true;
    for name in names {
        let spec = &config.plugins[name];
        info!(
            plugin = %name,
            kind = %spec.kind,
            "Command: {} {}",
            spec.command,
            spec.args.join(" ")
        );

        if spawn {
            let host = PluginHost::from_config(&config);
            match host.launch(name, spec).await {
                Ok(()) => info!(plugin = %name, "Launch test passed"),
                Err(e) => {
                    error!(plugin = %name, error = %e, "Launch test failed");
                    all_ok = false;
                }
            }
            host.shutdown().await;
        }
    }

    match &config.pipeline {
        Some(pipeline) => info!(
            pipeline = %pipeline.name,
            stages = pipeline.stages().len(),
            "Pipeline wiring is valid"
        ),
        None => warn!("No pipeline configured; `run` will refuse to start"),
    }

    if all_ok {
        info!("All checks passed");
        Ok(())
    } else {
        Err(ConfigError::Validation("One or more plugins failed to launch".to_string()).into())
    }
}

/// Launches the configured plugins and runs one batch through the pipeline.
///
/// The destination is torn down and every process stopped even when setup
/// or the run fails; the first error wins.
pub async fn run_pipeline(config: Config) -> Result<PipelineReport> {
    let pipeline_config = config
        .pipeline
        .clone()
        .ok_or_else(|| ConfigError::MissingField("pipeline".to_string()))?;

    let host = PluginHost::from_config(&config);
    if let Err(e) = host.launch_all(&config).await {
        host.shutdown().await;
        return Err(e);
    }
    info!("Launched {} plugin(s)", host.len());

    let outcome = drive(&host, &pipeline_config).await;
    host.shutdown().await;
    outcome
}

async fn drive(
    host: &PluginHost,
    pipeline_config: &crate::config::PipelineConfig,
) -> Result<PipelineReport> {
    let pipeline = host.pipeline(pipeline_config)?;
    let stage_config = &pipeline_config.config;

    let outcome = match pipeline.start(stage_config).await {
        Ok(()) => pipeline.run(stage_config).await.map_err(BridgeError::from),
        Err(e) => Err(e.into()),
    };
    let teardown = pipeline.shutdown(stage_config).await;

    let report = outcome?;
    teardown?;
    info!(
        pipeline = %pipeline.name(),
        extracted = report.extracted,
        delivered = report.delivered,
        rejected = report.rejected,
        "Pipeline finished"
    );
    Ok(report)
}
