//! Extension contracts
//!
//! Each extension kind is described twice: once as the capability trait a
//! plugin author implements, and once as a zero-sized descriptor that tells
//! the generic adapter, proxy and factory which operations the kind exposes
//! and which envelope it carries.
//!
//! Adding a kind means adding a descriptor, its trait, and the two short
//! bridging impls (`Invoke` here, the trait impl on `CallProxy`); the
//! adapter, proxy, factory and transport are shared.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::{EventArgs, ExtractorArgs, FunctionArgs};
use crate::error::{CallError, CallResult, TransportError};

/// Remote operation names. These strings are the only entry points an
/// adapter answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "Plugin.Setup")]
    Setup,
    #[serde(rename = "Plugin.Execute")]
    Execute,
    #[serde(rename = "Plugin.Teardown")]
    Teardown,
}

impl Method {
    pub const fn rpc_name(self) -> &'static str {
        match self {
            Method::Setup => "Plugin.Setup",
            Method::Execute => "Plugin.Execute",
            Method::Teardown => "Plugin.Teardown",
        }
    }

    pub fn from_rpc_name(name: &str) -> Option<Self> {
        match name {
            "Plugin.Setup" => Some(Method::Setup),
            "Plugin.Execute" => Some(Method::Execute),
            "Plugin.Teardown" => Some(Method::Teardown),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rpc_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Extractor,
    Transformation,
    Decision,
    Destination,
    Function,
}

impl Kind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Extractor => "extractor",
            Kind::Transformation => "transformation",
            Kind::Decision => "decision",
            Kind::Destination => "destination",
            Kind::Function => "function",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time descriptor of one extension kind.
pub trait ExtensionKind: Send + Sync + 'static {
    const KIND: Kind;

    /// Operations in the order a caller is expected to use them.
    const METHODS: &'static [Method];

    /// Envelope carried in both directions.
    type Args: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn supports(method: Method) -> bool {
        Self::METHODS.contains(&method)
    }

    /// Kinds exposing `Setup` follow the setup/execute/teardown lifecycle.
    fn has_lifecycle() -> bool {
        Self::supports(Method::Setup)
    }
}

pub(crate) fn unknown_method<K: ExtensionKind>(method: Method) -> CallError {
    TransportError::UnknownMethod {
        kind: K::KIND.to_string(),
        method: method.to_string(),
    }
    .into()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractorKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformationKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct DestinationKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionKind;

impl ExtensionKind for ExtractorKind {
    const KIND: Kind = Kind::Extractor;
    const METHODS: &'static [Method] = &[Method::Execute];
    type Args = ExtractorArgs;
}

impl ExtensionKind for TransformationKind {
    const KIND: Kind = Kind::Transformation;
    const METHODS: &'static [Method] = &[Method::Execute];
    type Args = EventArgs;
}

impl ExtensionKind for DecisionKind {
    const KIND: Kind = Kind::Decision;
    const METHODS: &'static [Method] = &[Method::Execute];
    type Args = EventArgs;
}

impl ExtensionKind for DestinationKind {
    const KIND: Kind = Kind::Destination;
    const METHODS: &'static [Method] = &[Method::Setup, Method::Execute, Method::Teardown];
    type Args = EventArgs;
}

impl ExtensionKind for FunctionKind {
    const KIND: Kind = Kind::Function;
    const METHODS: &'static [Method] = &[Method::Execute];
    type Args = FunctionArgs;
}

/// Produces a batch of raw records.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn execute(&self, args: ExtractorArgs) -> CallResult<ExtractorArgs>;
}

/// Rewrites one event.
#[async_trait]
pub trait Transformation: Send + Sync {
    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs>;
}

/// Accepts or rejects one event by setting `EventArgs::decision`.
#[async_trait]
pub trait Decision: Send + Sync {
    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs>;
}

/// Delivers events to an external sink.
///
/// Calls arrive as `setup`, any number of `execute`, then `teardown`. The
/// adapter rejects out-of-order calls, but an implementation holding
/// resources should still guard its own state: a restarted plugin process
/// starts with a fresh adapter and no memory of earlier calls. `teardown`
/// may follow a failed `setup` and must release whatever was acquired.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn setup(&self, args: EventArgs) -> CallResult<EventArgs>;
    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs>;
    async fn teardown(&self, args: EventArgs) -> CallResult<EventArgs>;
}

/// Standalone request/response hook.
///
/// There is no error channel: report failure through
/// `FunctionArgs::status_code` and `FunctionArgs::response`.
#[async_trait]
pub trait Function: Send + Sync {
    async fn execute(&self, args: FunctionArgs) -> FunctionArgs;
}

/// Uniform entry point the adapter calls, implemented for every type that
/// implements the matching capability trait.
#[async_trait]
pub trait Invoke<K: ExtensionKind>: Send + Sync {
    async fn invoke(&self, method: Method, args: K::Args) -> CallResult<K::Args>;
}

#[async_trait]
impl<T: Extractor + ?Sized> Invoke<ExtractorKind> for T {
    async fn invoke(&self, method: Method, args: ExtractorArgs) -> CallResult<ExtractorArgs> {
        match method {
            Method::Execute => self.execute(args).await,
            other => Err(unknown_method::<ExtractorKind>(other)),
        }
    }
}

#[async_trait]
impl<T: Transformation + ?Sized> Invoke<TransformationKind> for T {
    async fn invoke(&self, method: Method, args: EventArgs) -> CallResult<EventArgs> {
        match method {
            Method::Execute => self.execute(args).await,
            other => Err(unknown_method::<TransformationKind>(other)),
        }
    }
}

#[async_trait]
impl<T: Decision + ?Sized> Invoke<DecisionKind> for T {
    async fn invoke(&self, method: Method, args: EventArgs) -> CallResult<EventArgs> {
        match method {
            Method::Execute => self.execute(args).await,
            other => Err(unknown_method::<DecisionKind>(other)),
        }
    }
}

#[async_trait]
impl<T: Destination + ?Sized> Invoke<DestinationKind> for T {
    async fn invoke(&self, method: Method, args: EventArgs) -> CallResult<EventArgs> {
        match method {
            Method::Setup => self.setup(args).await,
            Method::Execute => self.execute(args).await,
            Method::Teardown => self.teardown(args).await,
        }
    }
}

#[async_trait]
impl<T: Function + ?Sized> Invoke<FunctionKind> for T {
    async fn invoke(&self, method: Method, args: FunctionArgs) -> CallResult<FunctionArgs> {
        match method {
            Method::Execute => Ok(self.execute(args).await),
            other => Err(unknown_method::<FunctionKind>(other)),
        }
    }
}
