//! Per-file trace spans
//!
//! Spans are opened through a [`SpanFactory`] so tests can record them.
//! [`SpanGuard`] ends its span when dropped, which is the only way a span is
//! ended: once, on every exit path, including cancellation.

use std::time::Instant;
use tracing::field::Empty;

/// Name of the span opened for each file-processing attempt
pub const FILE_SPAN_NAME: &str = "remote.file.process";

pub trait TraceSpan: Send {
    fn tag(&mut self, key: &str, value: &str);

    fn end(&mut self);

    /// The `tracing` span that log events inside the attempt should attach to
    fn current(&self) -> tracing::Span {
        tracing::Span::none()
    }
}

pub trait SpanFactory: Send + Sync {
    fn start(&self, name: &str) -> Box<dyn TraceSpan>;
}

/// Spans backed by the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSpanFactory;

impl SpanFactory for TracingSpanFactory {
    fn start(&self, name: &str) -> Box<dyn TraceSpan> {
        // tracing needs every recordable field declared up front
        let span = tracing::info_span!(
            "remote.file.process",
            span.name = %name,
            remote.file = Empty,
            remote.path = Empty,
            poll.batch = Empty,
            result = Empty,
            document.kind = Empty,
            document.records = Empty,
            error = Empty,
            "error.type" = Empty,
            error.msg = Empty,
        );

        Box::new(TracingSpan {
            span,
            started: Instant::now(),
        })
    }
}

struct TracingSpan {
    span: tracing::Span,
    started: Instant,
}

impl TraceSpan for TracingSpan {
    fn tag(&mut self, key: &str, value: &str) {
        if self.span.field(key).is_some() {
            self.span.record(key, value);
        } else {
            tracing::debug!(parent: &self.span, key, value, "Unregistered span tag");
        }
    }

    fn end(&mut self) {
        tracing::debug!(
            parent: &self.span,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Span closed"
        );
    }

    fn current(&self) -> tracing::Span {
        self.span.clone()
    }
}

/// Owns a span and ends it exactly once, on drop
pub struct SpanGuard {
    span: Box<dyn TraceSpan>,
}

impl SpanGuard {
    pub fn new(span: Box<dyn TraceSpan>) -> Self {
        Self { span }
    }

    pub fn tag(&mut self, key: &str, value: &str) {
        self.span.tag(key, value);
    }

    pub fn current(&self) -> tracing::Span {
        self.span.current()
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.span.end();
    }
}
