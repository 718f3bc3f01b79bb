use async_trait::async_trait;
use serde_json::Value;

use crate::contract::Kind;
use crate::error::CallResult;

pub mod frame;
pub mod local;
pub mod process;
pub mod stream;

pub use frame::{RpcRequest, RpcResponse};
pub use local::LocalClient;
pub use process::{PluginCommand, PluginProcess};
pub use stream::{serve, serve_stdio, StreamClient};

/// Host side of a plugin connection: sends one request, waits for its reply.
///
/// A successful reply is the encoded response envelope. Errors raised on the
/// plugin side come back as the same `CallError` value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    async fn call(&self, request: RpcRequest) -> CallResult<Value>;
}

/// Plugin side of a connection: routes one decoded request to an
/// implementation.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    fn kind(&self) -> Kind;

    async fn dispatch(&self, request: RpcRequest) -> CallResult<Value>;
}
