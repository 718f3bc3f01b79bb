#![allow(dead_code)]

#[path = "../../demos/stages.rs"]
pub mod stages;

use std::sync::Arc;
use tokio::task::JoinHandle;

use plugin_bridge::transport::{serve, RpcClient, StreamClient};
use plugin_bridge::{Broker, CallAdapter, ExtensionKind, ExtensionPlugin, StageConfig};

/// Serves `plugin` on one end of an in-memory duplex pipe and returns a
/// broker bound to the other end, mirroring a plugin child process.
pub fn duplex_broker<K: ExtensionKind>(plugin: &ExtensionPlugin<K>) -> (Broker, JoinHandle<()>) {
    let adapter: Arc<CallAdapter<K>> = Arc::new(plugin.server());
    let (host_end, plugin_end) = tokio::io::duplex(64 * 1024);

    let (plugin_read, plugin_write) = tokio::io::split(plugin_end);
    let server = tokio::spawn(async move {
        serve(plugin_read, plugin_write, adapter).await.unwrap();
    });

    let (host_read, host_write) = tokio::io::split(host_end);
    let client: Arc<dyn RpcClient> = Arc::new(StreamClient::new(host_read, host_write));
    (Broker::new(K::KIND, client), server)
}

pub fn threshold_config(threshold: &str) -> StageConfig {
    StageConfig::from([("threshold".to_string(), threshold.to_string())])
}
