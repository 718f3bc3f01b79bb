use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::frame::{decode_frame, encode_frame, RpcRequest, RpcResponse};
use super::{Dispatch, RpcClient};
use crate::error::CallResult;

/// In-process loopback to a dispatcher.
///
/// Every request and reply still goes through the frame codec, so an
/// in-process plugin observes exactly what a remote one would: its own
/// copy of each envelope, and errors in their wire form.
pub struct LocalClient {
    dispatch: Arc<dyn Dispatch>,
    next_id: AtomicU64,
}

impl LocalClient {
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            dispatch,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RpcClient for LocalClient {
    async fn call(&self, mut request: RpcRequest) -> CallResult<Value> {
        request.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(&request)?;
        let delivered: RpcRequest = decode_frame(&frame)?;

        let id = delivered.id;
        let result = self.dispatch.dispatch(delivered).await;

        let frame = encode_frame(&RpcResponse::from_result(id, result))?;
        let reply: RpcResponse = decode_frame(&frame)?;
        reply.into_result()
    }
}
