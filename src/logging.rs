use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::error::{BridgeError, Result};

/// Installs the global subscriber. Output always goes to stderr: stdout of
/// a plugin process carries frames.
///
/// `RUST_LOG` is honoured; the crate's own level comes from `debug`.
pub fn init(debug: bool, json: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let directive: Directive = format!("plugin_bridge={level}")
        .parse()
        .map_err(|e| BridgeError::Logging(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| BridgeError::Logging(e.to_string()))
}
