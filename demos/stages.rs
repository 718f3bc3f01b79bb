//! Stage implementations served by the `threshold-plugin` binary.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use plugin_bridge::{
    ApplicationError, CallResult, Decision, Destination, EventArgs, Extractor, ExtractorArgs,
    Transformation,
};

/// Emits the comma-separated `events` config entry as one record each.
pub struct ListExtractor;

#[async_trait]
impl Extractor for ListExtractor {
    async fn execute(&self, mut args: ExtractorArgs) -> CallResult<ExtractorArgs> {
        let events = args.config.get("events").cloned().unwrap_or_default();
        args.data = events
            .split(',')
            .map(str::trim)
            .filter(|event| !event.is_empty())
            .map(|event| Value::String(event.to_string()))
            .collect();
        Ok(args)
    }
}

/// Tags `name:value` events with `:above` or `:below` the configured
/// `threshold`.
pub struct ThresholdTransformation;

#[async_trait]
impl Transformation for ThresholdTransformation {
    async fn execute(&self, mut args: EventArgs) -> CallResult<EventArgs> {
        let threshold: f64 = args
            .config
            .get("threshold")
            .ok_or_else(|| ApplicationError::new("missing config key 'threshold'"))?
            .parse()
            .map_err(|_| ApplicationError::new("threshold is not a number"))?;

        let (_, raw) = args.event.rsplit_once(':').ok_or_else(|| {
            ApplicationError::new("malformed event").with_context(args.event.clone())
        })?;
        let value: f64 = raw.parse().map_err(|_| {
            ApplicationError::new("event value is not a number").with_context(args.event.clone())
        })?;

        let tag = if value > threshold { "above" } else { "below" };
        args.event = format!("{}:{tag}", args.event);
        Ok(args)
    }
}

/// Accepts only events tagged `:above`.
pub struct AboveOnly;

#[async_trait]
impl Decision for AboveOnly {
    async fn execute(&self, mut args: EventArgs) -> CallResult<EventArgs> {
        args.decision = Some(args.event.ends_with(":above"));
        Ok(args)
    }
}

/// Logs every delivered event and counts them.
#[derive(Default)]
pub struct LogSink {
    delivered: AtomicUsize,
}

impl LogSink {
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for LogSink {
    async fn setup(&self, args: EventArgs) -> CallResult<EventArgs> {
        info!("sink ready");
        Ok(args)
    }

    async fn execute(&self, args: EventArgs) -> CallResult<EventArgs> {
        let _span = args.log.span().entered();
        let count = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        info!(event = %args.event, count, "delivered");
        Ok(args)
    }

    async fn teardown(&self, args: EventArgs) -> CallResult<EventArgs> {
        info!(delivered = self.delivered(), "sink closed");
        Ok(args)
    }
}
