//! Shared fakes for dropzone-ingest integration tests
//!
//! - [`FakeSource`]: scripted remote directory that counts open streams
//! - [`RecordingSink`]: keeps every delivered result, can be told to refuse some
//! - [`RecordingSpanFactory`]: keeps every span with its tags and end count
//! - [`FlakyClaimStore`]: memory store that can be switched off or fail part-way

#![allow(dead_code)]

use async_trait::async_trait;
use dropzone_ingest::claims::{ClaimRecord, ClaimStore, MemoryClaimStore};
use dropzone_ingest::error::{IngestError, Result};
use dropzone_ingest::pipeline::IngestResult;
use dropzone_ingest::sink::DocumentSink;
use dropzone_ingest::source::{RemoteFileSource, RemoteStream};
use dropzone_ingest::trace::{SpanFactory, TraceSpan};
use dropzone_ingest::IngestConfig;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

// ============================================================================
// Fixtures
// ============================================================================

pub const INVOICES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<invoices>
  <invoice>
    <id>INV-5</id>
    <amount>999.00</amount>
    <currency>CHF</currency>
  </invoice>
</invoices>
"#;

pub const TRANSACTIONS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<transactions>
    <transaction>
        <id>TX-2001</id>
        <postingDate>2025-10-31</postingDate>
        <amount Ccy="EUR">1450.00</amount>
        <direction>CRDT</direction>
        <reference>INV-1001</reference>
        <counterparty>Acme Ltd</counterparty>
    </transaction>
    <transaction>
        <id>TX-2002</id>
        <postingDate>2025-11-01</postingDate>
        <amount Ccy="USD">-75.50</amount>
        <direction>DBIT</direction>
        <reference>SUBS-STREAM</reference>
        <counterparty>StreamCo</counterparty>
    </transaction>
</transactions>
"#;

pub const ORDERS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<orders>
  <order>
    <id>ORD-1</id>
  </order>
</orders>
"#;

pub const MALFORMED_XML: &str = "<invoices><invoice><id>INV-1</id></invoices>";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dropzone_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Configuration for fake-backed orchestrators: fast polling, small caps
pub fn test_config() -> IngestConfig {
    IngestConfig {
        remote_directory: "upload".to_string(),
        poll_interval: Duration::from_millis(100),
        max_backoff: Duration::from_millis(800),
        parse_timeout: Duration::from_secs(5),
        claim_store_url: "memory".to_string(),
        ..IngestConfig::default()
    }
}

// ============================================================================
// Remote source
// ============================================================================

#[derive(Debug, Clone)]
pub enum FakeFile {
    Bytes(Vec<u8>),
    /// Opens, then never yields a byte
    Hang,
    /// `open` fails with a transport error
    Unreadable(String),
    /// `open` panics
    Explode,
}

#[derive(Default)]
pub struct FakeSource {
    files: Mutex<BTreeMap<String, FakeFile>>,
    open_handles: Arc<AtomicUsize>,
    opens: AtomicUsize,
    listing_down: AtomicBool,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, file: FakeFile) {
        self.files.lock().unwrap().insert(path.to_string(), file);
    }

    pub fn put_xml(&self, path: &str, xml: &str) {
        self.put(path, FakeFile::Bytes(xml.as_bytes().to_vec()));
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    /// Streams opened and not yet dropped
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Total successful or attempted `open` calls
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn set_listing_down(&self, down: bool) {
        self.listing_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteFileSource for FakeSource {
    async fn list(&self, directory: &str) -> Result<Vec<String>> {
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(IngestError::transport("421 service not available"));
        }

        let prefix = format!("{}/", directory.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn open(&self, path: &str) -> Result<RemoteStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let file = self.files.lock().unwrap().get(path).cloned();

        match file {
            None => Err(IngestError::transport(format!("550 {}: no such file", path))),
            Some(FakeFile::Unreadable(reason)) => Err(IngestError::transport(reason)),
            Some(FakeFile::Explode) => panic!("source exploded opening {}", path),
            Some(FakeFile::Bytes(bytes)) => Ok(Box::new(TrackedStream::new(
                Some(Cursor::new(bytes)),
                self.open_handles.clone(),
            ))),
            Some(FakeFile::Hang) => Ok(Box::new(TrackedStream::new(None, self.open_handles.clone()))),
        }
    }
}

/// Byte stream that decrements the owning source's handle count on drop
struct TrackedStream {
    body: Option<Cursor<Vec<u8>>>,
    handles: Arc<AtomicUsize>,
}

impl TrackedStream {
    fn new(body: Option<Cursor<Vec<u8>>>, handles: Arc<AtomicUsize>) -> Self {
        handles.fetch_add(1, Ordering::SeqCst);
        Self { body, handles }
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.body.as_mut() {
            Some(body) => Pin::new(body).poll_read(cx, buf),
            None => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    results: Mutex<Vec<IngestResult>>,
    refuse: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `ingest` fail for results with this filename
    pub fn refuse(&self, filename: &str) {
        self.refuse.lock().unwrap().insert(filename.to_string());
    }

    pub fn results(&self) -> Vec<IngestResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn result_for(&self, filename: &str) -> Option<IngestResult> {
        self.results()
            .into_iter()
            .find(|r| r.filename() == filename)
    }

    pub fn count_for(&self, filename: &str) -> usize {
        self.results()
            .iter()
            .filter(|r| r.filename() == filename)
            .count()
    }
}

#[async_trait]
impl DocumentSink for RecordingSink {
    async fn ingest(&self, result: IngestResult) -> anyhow::Result<()> {
        if self.refuse.lock().unwrap().contains(result.filename()) {
            anyhow::bail!("downstream rejected {}", result.filename());
        }
        self.results.lock().unwrap().push(result);
        Ok(())
    }
}

// ============================================================================
// Spans
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecordedSpan {
    pub name: String,
    pub tags: Vec<(String, String)>,
    pub ends: usize,
}

impl RecordedSpan {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
pub struct RecordingSpanFactory {
    spans: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl RecordingSpanFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.spans.lock().unwrap().clone()
    }

    pub fn span_for(&self, filename: &str) -> Option<RecordedSpan> {
        self.spans()
            .into_iter()
            .find(|s| s.tag("remote.file") == Some(filename))
    }
}

impl SpanFactory for RecordingSpanFactory {
    fn start(&self, name: &str) -> Box<dyn TraceSpan> {
        let mut spans = self.spans.lock().unwrap();
        spans.push(RecordedSpan {
            name: name.to_string(),
            ..Default::default()
        });
        Box::new(RecordingSpan {
            index: spans.len() - 1,
            spans: self.spans.clone(),
        })
    }
}

struct RecordingSpan {
    index: usize,
    spans: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl TraceSpan for RecordingSpan {
    fn tag(&mut self, key: &str, value: &str) {
        if let Ok(mut spans) = self.spans.lock() {
            spans[self.index].tags.push((key.to_string(), value.to_string()));
        }
    }

    fn end(&mut self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans[self.index].ends += 1;
        }
    }
}

// ============================================================================
// Claim store
// ============================================================================

/// Memory claim store that can be taken offline, or set to fail after a
/// number of successful claim attempts
#[derive(Default)]
pub struct FlakyClaimStore {
    inner: MemoryClaimStore,
    down: AtomicBool,
    attempts: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl FlakyClaimStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Let `n` more claim attempts through, then fail every later one
    pub fn fail_after(&self, n: usize) {
        self.attempts.store(0, Ordering::SeqCst);
        *self.fail_after.lock().unwrap() = Some(n);
    }

    pub fn claimed(&self) -> usize {
        self.inner.len()
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(IngestError::claim_store("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for FlakyClaimStore {
    async fn try_claim(&self, path: &str) -> Result<bool> {
        self.check()?;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if attempt >= limit {
                return Err(IngestError::claim_store("connection reset mid-cycle"));
            }
        }
        self.inner.try_claim(path).await
    }

    async fn claim_record(&self, path: &str) -> Result<Option<ClaimRecord>> {
        self.check()?;
        self.inner.claim_record(path).await
    }

    async fn health_check(&self) -> Result<()> {
        self.check()
    }
}
