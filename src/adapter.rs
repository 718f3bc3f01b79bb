//! Plugin-side call adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::contract::{unknown_method, ExtensionKind, Invoke, Kind, Method};
use crate::envelope::Response;
use crate::error::{CallResult, TransportError};
use crate::lifecycle::{LifecycleGuard, LifecycleState};
use crate::transport::{Dispatch, RpcRequest};

/// Exposes one implementation of kind `K` to remote callers.
///
/// The adapter owns no state besides the lifecycle gate of stateful kinds.
/// Concurrent calls go straight through to the implementation, which is
/// responsible for its own internal synchronization.
pub struct CallAdapter<K: ExtensionKind> {
    inner: Arc<dyn Invoke<K>>,
    lifecycle: Option<LifecycleGuard>,
}

impl<K: ExtensionKind> CallAdapter<K> {
    pub fn new(inner: Arc<dyn Invoke<K>>) -> Self {
        Self {
            inner,
            lifecycle: K::has_lifecycle().then(LifecycleGuard::new),
        }
    }

    /// `None` for kinds without a lifecycle.
    pub async fn lifecycle_state(&self) -> Option<LifecycleState> {
        match &self.lifecycle {
            Some(guard) => Some(guard.state().await),
            None => None,
        }
    }

    /// Runs one operation against the implementation, enforcing the
    /// lifecycle before the implementation is reached.
    pub async fn handle(&self, method: Method, args: K::Args) -> CallResult<K::Args> {
        if !K::supports(method) {
            return Err(unknown_method::<K>(method));
        }

        let inner: &dyn Invoke<K> = self.inner.as_ref();
        let Some(guard) = &self.lifecycle else {
            return inner.invoke(method, args).await;
        };
        match method {
            Method::Setup => guard.setup(|| inner.invoke(method, args)).await,
            Method::Execute => guard.execute(|| inner.invoke(method, args)).await,
            Method::Teardown => guard.teardown(|| inner.invoke(method, args)).await,
        }
    }
}

#[async_trait]
impl<K: ExtensionKind> Dispatch for CallAdapter<K> {
    fn kind(&self) -> Kind {
        K::KIND
    }

    async fn dispatch(&self, request: RpcRequest) -> CallResult<Value> {
        if request.kind != K::KIND.as_str() {
            return Err(TransportError::KindMismatch {
                expected: K::KIND.to_string(),
                actual: request.kind,
            }
            .into());
        }
        let method = Method::from_rpc_name(&request.method).ok_or_else(|| {
            TransportError::UnknownMethod {
                kind: K::KIND.to_string(),
                method: request.method.clone(),
            }
        })?;
        let args: K::Args = serde_json::from_value(request.params)?;

        debug!(id = request.id, kind = %K::KIND, %method, "Dispatching plugin call");
        let result = self.handle(method, args).await;
        if let Err(err) = &result {
            warn!(id = request.id, kind = %K::KIND, %method, error = %err, "Plugin call failed");
        }

        Ok(serde_json::to_value(Response::new(result?))?)
    }
}
