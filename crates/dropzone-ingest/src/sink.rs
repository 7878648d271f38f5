//! Downstream delivery of ingest results

use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::pipeline::IngestResult;

/// Receives every ingest result, success or failure, exactly once per
/// claimed file
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn ingest(&self, result: IngestResult) -> anyhow::Result<()>;
}

/// Logs each result; the default when no output directory is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl DocumentSink for LoggingSink {
    async fn ingest(&self, result: IngestResult) -> anyhow::Result<()> {
        match (result.document(), result.error()) {
            (Some(doc), _) => info!(
                file = %result.filename(),
                kind = %doc.kind(),
                records = doc.record_count(),
                "Document ingested"
            ),
            (None, Some(error)) => warn!(
                file = %result.filename(),
                error = %error,
                "Document rejected"
            ),
            (None, None) => {},
        }
        Ok(())
    }
}

/// Writes each result as `<output_dir>/<filename>.json`
///
/// Files are written to a temporary name first and renamed into place, so a
/// reader never sees a partial result.
#[derive(Debug, Clone)]
pub struct JsonDirectorySink {
    output_dir: PathBuf,
}

impl JsonDirectorySink {
    pub async fn create(output_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
        Ok(Self { output_dir })
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", filename))
    }
}

#[async_trait]
impl DocumentSink for JsonDirectorySink {
    async fn ingest(&self, result: IngestResult) -> anyhow::Result<()> {
        let target = self.path_for(result.filename());
        let staging = self.output_dir.join(format!(".{}.json.tmp", result.filename()));

        let body = serde_json::to_vec_pretty(&result).context("Failed to serialize result")?;
        tokio::fs::write(&staging, body)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, &target)
            .await
            .with_context(|| format!("Failed to move result into {}", target.display()))?;

        info!(file = %result.filename(), path = %target.display(), "Result written");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use dropzone_common::types::{parse_decimal, Invoice, Invoices};

    fn invoices() -> IngestResult {
        IngestResult::success(
            "invoices.xml",
            Invoices {
                invoices: vec![Invoice {
                    id: "INV-5".to_string(),
                    amount: parse_decimal("999.00").unwrap(),
                    currency: "CHF".to_string(),
                }],
            }
            .into(),
        )
    }

    #[tokio::test]
    async fn test_json_sink_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonDirectorySink::create(dir.path().join("out")).await.unwrap();

        sink.ingest(invoices()).await.unwrap();

        let raw = std::fs::read_to_string(sink.path_for("invoices.xml")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["filename"], "invoices.xml");
        assert_eq!(json["document"]["kind"], "invoices");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_json_sink_writes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonDirectorySink::create(dir.path()).await.unwrap();

        let failure = IngestResult::failure(
            "orders.xml",
            &IngestError::UnresolvedXmlType {
                root: "orders".to_string(),
            },
        );
        sink.ingest(failure).await.unwrap();

        let raw = std::fs::read_to_string(sink.path_for("orders.xml")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json["error"].as_str().unwrap().starts_with("Unsupported XML"));
        assert!(json.get("document").is_none());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_both_outcomes() {
        let sink = LoggingSink;
        sink.ingest(invoices()).await.unwrap();
        sink.ingest(IngestResult::failure("x.xml", &IngestError::transport("reset")))
            .await
            .unwrap();
    }
}
