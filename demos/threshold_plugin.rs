//! Plugin process serving one of the demo stages over stdin/stdout.
//!
//! `threshold-plugin [extractor|transformation|decision|destination]`,
//! defaulting to `transformation`.

#[path = "stages.rs"]
mod stages;

use anyhow::bail;
use tracing::info;

use plugin_bridge::{
    logging, DecisionPlugin, DestinationPlugin, ExtractorPlugin, TransformationPlugin,
};
use stages::{AboveOnly, ListExtractor, LogSink, ThresholdTransformation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = std::env::var_os("PLUGIN_BRIDGE_DEBUG").is_some();
    logging::init(debug, false)?;

    let role = std::env::args().nth(1).unwrap_or_else(|| "transformation".into());
    info!(%role, "Serving plugin");

    match role.as_str() {
        "extractor" => ExtractorPlugin::new(ListExtractor).serve().await?,
        "transformation" => TransformationPlugin::new(ThresholdTransformation).serve().await?,
        "decision" => DecisionPlugin::new(AboveOnly).serve().await?,
        "destination" => DestinationPlugin::new(LogSink::default()).serve().await?,
        other => bail!("unknown role '{other}'"),
    }
    Ok(())
}
