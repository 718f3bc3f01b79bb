//! Plugin factory
//!
//! One `ExtensionPlugin<K>` per kind is the single place where either side
//! of a connection is built:
//!
//! - **Server role** (inside the plugin process): wrap an implementation
//!   and get the `CallAdapter` that answers remote calls.
//! - **Client role** (inside the host): take a `Broker` for a running
//!   plugin and get a `CallProxy` implementing the same capability trait.

use std::sync::Arc;

use crate::adapter::CallAdapter;
use crate::contract::{
    DecisionKind, DestinationKind, ExtensionKind, ExtractorKind, FunctionKind, Invoke, Kind,
    TransformationKind,
};
use crate::error::{CallResult, Result, TransportError};
use crate::proxy::CallProxy;
use crate::transport::{serve_stdio, LocalClient, RpcClient};

/// Host-side handle to one plugin connection and the kind it serves.
#[derive(Clone)]
pub struct Broker {
    kind: Kind,
    client: Arc<dyn RpcClient>,
}

impl Broker {
    pub fn new(kind: Kind, client: Arc<dyn RpcClient>) -> Self {
        Self { kind, client }
    }

    /// Broker for an implementation living in this process.
    pub fn local<K: ExtensionKind>(plugin: &ExtensionPlugin<K>) -> Self {
        Self::new(K::KIND, Arc::new(LocalClient::new(Arc::new(plugin.server()))))
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn client(&self) -> Arc<dyn RpcClient> {
        self.client.clone()
    }
}

pub struct ExtensionPlugin<K: ExtensionKind> {
    imp: Arc<dyn Invoke<K>>,
}

pub type ExtractorPlugin = ExtensionPlugin<ExtractorKind>;
pub type TransformationPlugin = ExtensionPlugin<TransformationKind>;
pub type DecisionPlugin = ExtensionPlugin<DecisionKind>;
pub type DestinationPlugin = ExtensionPlugin<DestinationKind>;
pub type FunctionPlugin = ExtensionPlugin<FunctionKind>;

impl<K: ExtensionKind> ExtensionPlugin<K> {
    pub fn new<T>(imp: T) -> Self
    where
        T: Invoke<K> + 'static,
    {
        Self { imp: Arc::new(imp) }
    }

    pub fn from_arc(imp: Arc<dyn Invoke<K>>) -> Self {
        Self { imp }
    }

    /// Server role. Each call yields a fresh adapter with its own lifecycle.
    pub fn server(&self) -> CallAdapter<K> {
        CallAdapter::new(self.imp.clone())
    }

    /// Client role. Fails when the broker's connection serves another kind.
    pub fn client(broker: &Broker) -> CallResult<CallProxy<K>> {
        if broker.kind() != K::KIND {
            return Err(TransportError::KindMismatch {
                expected: K::KIND.to_string(),
                actual: broker.kind().to_string(),
            }
            .into());
        }
        Ok(CallProxy::new(broker.client()))
    }

    /// Serves this plugin on stdin/stdout until the host closes the pipe.
    pub async fn serve(self) -> Result<()> {
        serve_stdio(Arc::new(self.server())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Decision;
    use crate::envelope::EventArgs;
    use crate::error::CallError;
    use async_trait::async_trait;

    struct Accept;

    #[async_trait]
    impl Decision for Accept {
        async fn execute(&self, mut args: EventArgs) -> CallResult<EventArgs> {
            args.decision = Some(true);
            Ok(args)
        }
    }

    #[tokio::test]
    async fn local_broker_round_trip() {
        let plugin = DecisionPlugin::new(Accept);
        let broker = Broker::local(&plugin);
        assert_eq!(broker.kind(), Kind::Decision);

        let proxy = DecisionPlugin::client(&broker).unwrap();
        let out = proxy.execute(EventArgs::new("e")).await.unwrap();
        assert_eq!(out.decision, Some(true));
    }

    #[test]
    fn client_refuses_a_broker_of_another_kind() {
        let broker = Broker::local(&DecisionPlugin::new(Accept));
        let Err(err) = TransformationPlugin::client(&broker) else {
            panic!("transformation proxy bound to a decision plugin");
        };
        assert_eq!(
            err,
            CallError::Transport(TransportError::KindMismatch {
                expected: "transformation".into(),
                actual: "decision".into(),
            })
        );
    }

    #[tokio::test]
    async fn proxies_can_be_rehosted() {
        // A proxy implements the capability trait, so it can itself be
        // wrapped as a plugin and forwarded again.
        let inner = Broker::local(&DecisionPlugin::new(Accept));
        let relay = DecisionPlugin::new(DecisionPlugin::client(&inner).unwrap());
        let outer = DecisionPlugin::client(&Broker::local(&relay)).unwrap();

        let out = Decision::execute(&outer, EventArgs::new("e")).await.unwrap();
        assert_eq!(out.decision, Some(true));
    }
}
