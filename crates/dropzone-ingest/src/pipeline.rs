//! Fetch-parse pipeline
//!
//! One claimed file in, one [`IngestResult`] out. Nothing escapes
//! [`FetchParsePipeline::process`] as an error: transport failures, bad XML,
//! timeouts, and panics all become failure results.

use dropzone_common::XmlDocument;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, Instrument};

use crate::error::{IngestError, Result};
use crate::listing::RemoteFileRef;
use crate::source::RemoteFileSource;
use crate::trace::{SpanFactory, SpanGuard, FILE_SPAN_NAME};
use crate::xml;

/// Outcome of processing one file: a document or an error, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    filename: String,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Document(XmlDocument),
    Error(String),
}

impl IngestResult {
    pub fn success(filename: impl Into<String>, document: XmlDocument) -> Self {
        Self {
            filename: filename.into(),
            outcome: Outcome::Document(document),
        }
    }

    pub fn failure(filename: impl Into<String>, error: &IngestError) -> Self {
        Self {
            filename: filename.into(),
            outcome: Outcome::Error(error.diagnostic()),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn document(&self) -> Option<&XmlDocument> {
        match &self.outcome {
            Outcome::Document(doc) => Some(doc),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Document(_) => None,
            Outcome::Error(msg) => Some(msg),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Document(_))
    }

    pub fn into_document(self) -> Option<XmlDocument> {
        match self.outcome {
            Outcome::Document(doc) => Some(doc),
            Outcome::Error(_) => None,
        }
    }
}

pub struct FetchParsePipeline {
    source: Arc<dyn RemoteFileSource>,
    spans: Arc<dyn SpanFactory>,
    timeout: Duration,
}

impl FetchParsePipeline {
    pub fn new(
        source: Arc<dyn RemoteFileSource>,
        spans: Arc<dyn SpanFactory>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            spans,
            timeout,
        }
    }

    /// Fetch, parse, and classify one file inside its own trace span
    pub async fn process(&self, file: &RemoteFileRef) -> IngestResult {
        let mut span = SpanGuard::new(self.spans.start(FILE_SPAN_NAME));
        span.tag("remote.file", &file.filename);
        span.tag("remote.path", &file.path);
        span.tag("poll.batch", &file.poll_batch_id.to_string());

        let attempt = AssertUnwindSafe(self.attempt(file))
            .catch_unwind()
            .instrument(span.current())
            .await;
        let outcome = attempt.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref()).to_string();
            error!(file = %file.filename, error = %message, "File worker panicked");
            Err(IngestError::WorkerPanic(message))
        });

        match outcome {
            Ok(document) => {
                span.tag("result", "parsed");
                span.tag("document.kind", document.kind().as_str());
                span.tag("document.records", &document.record_count().to_string());
                debug!(file = %file.filename, kind = %document.kind(), "Parsed");
                IngestResult::success(&file.filename, document)
            },
            Err(e) => {
                span.tag("result", "failed");
                span.tag("error", "true");
                span.tag("error.type", e.kind());
                span.tag("error.msg", &e.diagnostic());
                debug!(file = %file.filename, error = %e, "Failed");
                IngestResult::failure(&file.filename, &e)
            },
        }
    }

    /// Open, read, and parse under the time budget
    ///
    /// The stream lives inside the timed future, so it is dropped when that
    /// future completes, fails, or is abandoned on timeout.
    pub async fn attempt(&self, file: &RemoteFileRef) -> Result<XmlDocument> {
        let work = async {
            let stream = self.source.open(&file.path).await?;
            xml::parse_document(stream).await
        };

        tokio::time::timeout(self.timeout, work)
            .await
            .unwrap_or_else(|_elapsed| Err(IngestError::Timeout(self.timeout)))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
