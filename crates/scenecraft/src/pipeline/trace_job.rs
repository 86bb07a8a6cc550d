//! Background trace upload for one finished invocation.
//!
//! Stage timings are captured on the critical path; the records are only
//! shipped after the render has been sent, from a detached task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TraceError;
use crate::image::{ImageInliner, ImageResult};
use crate::trace::{SpanContext, SpanOutcome, Tracer};

/// One finished stage, recorded as a child of the root span.
pub struct StageRecord {
    pub name: &'static str,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub inputs: Value,
    pub outcome: SpanOutcome,
    pub summary: Option<Value>,
}

pub enum RootOutcome {
    Rendered {
        prompt: String,
        image: ImageResult,
        summary: Option<Value>,
    },
    Failed(String),
}

pub struct TraceJob {
    pub tracer: Tracer,
    pub root: SpanContext,
    /// The root's `call/start`, already in flight.
    pub root_start: JoinHandle<Result<(), TraceError>>,
    pub stages: Vec<StageRecord>,
    pub outcome: RootOutcome,
}

impl TraceJob {
    /// Ships the children, then ends the root. Stops at the first transport
    /// error.
    pub async fn run(self, inliner: Arc<dyn ImageInliner>) -> Result<(), TraceError> {
        self.root_start
            .await
            .map_err(|e| TraceError::Task(e.to_string()))??;

        for stage in self.stages {
            let span = self
                .tracer
                .open_at(stage.name, Some(&self.root), stage.started_at);
            self.tracer.send_start(&span, &stage.inputs).await?;
            self.tracer
                .send_end(&span, stage.outcome, stage.summary, stage.ended_at)
                .await?;
        }

        let (outcome, summary) = match self.outcome {
            RootOutcome::Rendered {
                prompt,
                image,
                summary,
            } => {
                let image = match inliner.inline(&image).await {
                    Ok(inline) => inline,
                    Err(e) => {
                        warn!("Could not inline image for trace: {}", e);
                        image
                    }
                };
                let output = json!({
                    "prompt": prompt,
                    "image": image.inline_data_uri().unwrap_or_else(|| image.url.clone()),
                    "imageType": image.image_type,
                });
                (SpanOutcome::Output(output), summary)
            }
            RootOutcome::Failed(message) => (SpanOutcome::Exception(message), None),
        };
        self.tracer
            .send_end(&self.root, outcome, summary, Utc::now())
            .await?;
        debug!("Trace {} shipped", self.root.trace_id);
        Ok(())
    }

    /// Runs the job detached. Failures are logged at the task boundary.
    pub fn spawn(self, inliner: Arc<dyn ImageInliner>) -> JoinHandle<()> {
        let name = self.root.name.clone();
        tokio::spawn(async move {
            if let Err(e) = self.run(inliner).await {
                warn!("Trace for {} dropped: {}", name, e);
            }
        })
    }
}
