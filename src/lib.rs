pub mod adapter;
pub mod commands;
pub mod config;
pub mod contract;
pub mod envelope;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod plugin;
pub mod proxy;
pub mod transport;

pub use adapter::CallAdapter;
pub use contract::{
    Decision, DecisionKind, Destination, DestinationKind, ExtensionKind, Extractor, ExtractorKind,
    Function, FunctionKind, Invoke, Kind, Method, Transformation, TransformationKind,
};
pub use envelope::{
    EventArgs, ExtractorArgs, FunctionArgs, FunctionBody, HttpRequest, LogHandle, Response,
    StageConfig,
};
pub use error::{
    ApplicationError, BridgeError, CallError, CallResult, LifecycleError, Result, TransportError,
};
pub use host::PluginHost;
pub use lifecycle::{LifecycleGuard, LifecycleState};
pub use pipeline::{Pipeline, PipelineReport};
pub use plugin::{
    Broker, DecisionPlugin, DestinationPlugin, ExtensionPlugin, ExtractorPlugin, FunctionPlugin,
    TransformationPlugin,
};
pub use proxy::CallProxy;
