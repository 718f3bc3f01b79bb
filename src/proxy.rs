//! Host-side call proxy.
//!
//! `CallProxy<K>` implements the capability trait of kind `K` by forwarding
//! every call to a plugin. It never retries and never caches: a failed
//! call is returned to the caller as is.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error};

use crate::contract::{
    unknown_method, Decision, DecisionKind, Destination, DestinationKind, ExtensionKind,
    Extractor, ExtractorKind, Function, FunctionKind, Method, Transformation, TransformationKind,
};
use crate::envelope::{EventArgs, ExtractorArgs, FunctionArgs, Response};
use crate::error::CallResult;
use crate::transport::{RpcClient, RpcRequest};

/// Status a Function proxy reports when the plugin could not be reached.
pub const FUNCTION_UNAVAILABLE_STATUS: u16 = 502;

pub struct CallProxy<K: ExtensionKind> {
    client: Arc<dyn RpcClient>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ExtensionKind> Clone for CallProxy<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ExtensionKind> CallProxy<K> {
    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    /// Sends `args` to the plugin's `method` and unpacks the response
    /// envelope.
    pub async fn call(&self, method: Method, args: &K::Args) -> CallResult<K::Args> {
        if !K::supports(method) {
            return Err(unknown_method::<K>(method));
        }

        let params = serde_json::to_value(args)?;
        debug!(kind = %K::KIND, %method, "Forwarding call to plugin");
        let reply = self
            .client
            .call(RpcRequest::new(K::KIND, method, params))
            .await?;
        let response: Response<K::Args> = serde_json::from_value(reply)?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl Extractor for CallProxy<ExtractorKind> {
    async fn execute(&self, args: ExtractorArgs) -> CallResult<ExtractorArgs> {
        self.call(Method::Execute, &args).await
    }
}

#[async_trait]
impl Transformation for CallProxy<TransformationKind> {
    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs> {
        self.call(Method::Execute, &args).await
    }
}

#[async_trait]
impl Decision for CallProxy<DecisionKind> {
    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs> {
        self.call(Method::Execute, &args).await
    }
}

#[async_trait]
impl Destination for CallProxy<DestinationKind> {
    async fn setup(&self, args: EventArgs) -> CallResult<EventArgs> {
        self.call(Method::Setup, &args).await
    }

    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs> {
        self.call(Method::Execute, &args).await
    }

    async fn teardown(&self, args: EventArgs) -> CallResult<EventArgs> {
        self.call(Method::Teardown, &args).await
    }
}

/// Functions have no error channel, so a failed call is folded into the
/// returned args: the original request, a 502 status and the error text.
#[async_trait]
impl Function for CallProxy<FunctionKind> {
    async fn execute(&self, args: FunctionArgs) -> FunctionArgs {
        match self.call(Method::Execute, &args).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(uri = %args.request.uri, error = %err, "Function call failed");
                args.into_failure(FUNCTION_UNAVAILABLE_STATUS, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Kind;
    use crate::envelope::{FunctionBody, HttpRequest};
    use crate::error::{ApplicationError, CallError, TransportError};
    use crate::transport::MockRpcClient;
    use serde_json::json;

    #[tokio::test]
    async fn forwards_with_fixed_method_name_and_kind() {
        let mut client = MockRpcClient::new();
        client
            .expect_call()
            .withf(|request| {
                request.kind == "destination"
                    && request.method == "Plugin.Teardown"
                    && request.params["event"] == json!("bye")
            })
            .times(1)
            .returning(|request| Ok(json!({ "args": request.params })));

        let proxy = CallProxy::<DestinationKind>::new(Arc::new(client));
        let out = proxy.teardown(EventArgs::new("bye")).await.unwrap();
        assert_eq!(out, EventArgs::new("bye"));
    }

    #[tokio::test]
    async fn transport_errors_pass_through_verbatim() {
        let mut client = MockRpcClient::new();
        client
            .expect_call()
            .returning(|_| Err(TransportError::Closed.into()));

        let proxy = CallProxy::<TransformationKind>::new(Arc::new(client));
        let err = proxy.execute(EventArgs::new("x")).await.unwrap_err();
        assert_eq!(err, CallError::Transport(TransportError::Closed));
    }

    #[tokio::test]
    async fn application_errors_keep_their_shape() {
        let mut client = MockRpcClient::new();
        client
            .expect_call()
            .returning(|_| Err(ApplicationError::new("threshold missing").into()));

        let proxy = CallProxy::<DecisionKind>::new(Arc::new(client));
        let err = proxy.execute(EventArgs::new("x")).await.unwrap_err();
        assert_eq!(err, ApplicationError::new("threshold missing").into());
    }

    #[tokio::test]
    async fn malformed_reply_is_a_codec_error() {
        let mut client = MockRpcClient::new();
        client
            .expect_call()
            .returning(|_| Ok(json!({ "unexpected": true })));

        let proxy = CallProxy::<ExtractorKind>::new(Arc::new(client));
        let err = proxy.execute(ExtractorArgs::default()).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(TransportError::Codec(_))));
    }

    #[tokio::test]
    async fn unsupported_method_never_reaches_the_transport() {
        let mut client = MockRpcClient::new();
        client.expect_call().times(0);

        let proxy = CallProxy::<TransformationKind>::new(Arc::new(client));
        let err = proxy
            .call(Method::Setup, &EventArgs::new("x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CallError::Transport(TransportError::UnknownMethod {
                kind: Kind::Transformation.to_string(),
                method: "Plugin.Setup".into(),
            })
        );
    }

    #[tokio::test]
    async fn function_failure_is_encoded_in_the_payload() {
        let mut client = MockRpcClient::new();
        client
            .expect_call()
            .returning(|_| Err(TransportError::ConnectionFailed("refused".into()).into()));

        let request = HttpRequest {
            method: "POST".into(),
            uri: "/hooks/order".into(),
            ..HttpRequest::default()
        };
        let proxy = CallProxy::<FunctionKind>::new(Arc::new(client));
        let out = proxy.execute(FunctionArgs::new(request.clone())).await;

        assert_eq!(out.status_code, FUNCTION_UNAVAILABLE_STATUS);
        assert_eq!(out.request, request);
        let FunctionBody::Text(message) = out.response else {
            panic!("expected a text body");
        };
        assert!(message.contains("refused"));
    }
}
