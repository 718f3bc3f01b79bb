//! Pipeline composition
//!
//! Chains Extractor -> Transformation(s) -> Decision -> Destination. Stages
//! are trait objects, so local implementations and call proxies mix freely.
//! Any stage error halts the run and is returned unchanged.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contract::{Decision, Destination, Extractor, Transformation};
use crate::envelope::{EventArgs, ExtractorArgs, LogHandle, StageConfig};
use crate::error::CallResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub extracted: usize,
    pub delivered: usize,
    pub rejected: usize,
}

pub struct Pipeline {
    name: String,
    extractor: Arc<dyn Extractor>,
    transformations: Vec<Arc<dyn Transformation>>,
    decision: Option<Arc<dyn Decision>>,
    destination: Arc<dyn Destination>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        extractor: Arc<dyn Extractor>,
        destination: Arc<dyn Destination>,
    ) -> Self {
        Self {
            name: name.into(),
            extractor,
            transformations: Vec::new(),
            decision: None,
            destination,
        }
    }

    /// Appends a transformation; transformations run in insertion order.
    pub fn with_transformation(mut self, transformation: Arc<dyn Transformation>) -> Self {
        self.transformations.push(transformation);
        self
    }

    pub fn with_decision(mut self, decision: Arc<dyn Decision>) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prepares the destination. Must succeed before `run`.
    pub async fn start(&self, config: &StageConfig) -> CallResult<()> {
        info!(pipeline = %self.name, "Setting up destination");
        let args = EventArgs::new("")
            .with_config(config.clone())
            .with_log(LogHandle::new("destination"));
        self.destination.setup(args).await?;
        Ok(())
    }

    /// Extracts one batch and pushes every record through the chain.
    pub async fn run(&self, config: &StageConfig) -> CallResult<PipelineReport> {
        let batch = self
            .extractor
            .execute(ExtractorArgs {
                data: Vec::new(),
                config: config.clone(),
                log: LogHandle::new("extractor"),
            })
            .await?;

        let mut report = PipelineReport {
            extracted: batch.data.len(),
            ..PipelineReport::default()
        };
        info!(pipeline = %self.name, records = report.extracted, "Extracted batch");

        for record in &batch.data {
            match self.process(record_to_event(record), config).await? {
                Some(_) => report.delivered += 1,
                None => report.rejected += 1,
            }
        }

        info!(
            pipeline = %self.name,
            delivered = report.delivered,
            rejected = report.rejected,
            "Batch complete"
        );
        Ok(report)
    }

    /// Runs one event through transformations, decision and destination.
    ///
    /// Returns `None` when the decision stage rejected the event. Every
    /// stage sees the same configuration snapshot, whatever an earlier
    /// stage did to its own copy.
    pub async fn process(
        &self,
        event: String,
        config: &StageConfig,
    ) -> CallResult<Option<EventArgs>> {
        let correlation_id = Uuid::new_v4().to_string();
        let stage_args = |event: String, decision: Option<bool>, stage: &str| EventArgs {
            event,
            config: config.clone(),
            log: LogHandle {
                plugin: stage.to_string(),
                correlation_id: correlation_id.clone(),
            },
            decision,
        };

        let mut current = stage_args(event, None, "transformation");
        for (index, transformation) in self.transformations.iter().enumerate() {
            debug!(
                pipeline = %self.name,
                stage = index + 1,
                of = self.transformations.len(),
                correlation_id = %correlation_id,
                "Applying transformation"
            );
            let out = transformation.execute(current).await?;
            current = stage_args(out.event, out.decision, "transformation");
        }

        if let Some(decision) = &self.decision {
            let out = decision.execute(stage_args(current.event, None, "decision")).await?;
            if !out.is_accepted() {
                debug!(pipeline = %self.name, correlation_id = %correlation_id, "Event rejected");
                return Ok(None);
            }
            current = stage_args(out.event, out.decision, "destination");
        } else {
            current.log.plugin = "destination".to_string();
        }

        let delivered = self.destination.execute(current).await?;
        Ok(Some(delivered))
    }

    /// Tears the destination down. Safe to call after a failed `start`.
    pub async fn shutdown(&self, config: &StageConfig) -> CallResult<()> {
        info!(pipeline = %self.name, "Tearing down destination");
        let args = EventArgs::new("")
            .with_config(config.clone())
            .with_log(LogHandle::new("destination"));
        if let Err(err) = self.destination.teardown(args).await {
            warn!(pipeline = %self.name, error = %err, "Destination teardown failed");
            return Err(err);
        }
        Ok(())
    }
}

/// Strings pass through verbatim; other records become compact JSON.
pub fn record_to_event(record: &Value) -> String {
    match record {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
