//! Dropzone Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Polls a remote drop directory for XML files, claims each new file exactly
//! once, parses it into a typed [`XmlDocument`](dropzone_common::XmlDocument),
//! and hands every outcome to a downstream sink.
//!
//! # Components
//!
//! - **claims**: persistent accept-once store keyed by remote path
//! - **listing**: filename filtering, claiming, and the per-cycle cap
//! - **xml**: streamed XML tree and root-level document type resolution
//! - **pipeline**: fetch, parse, and time budget for one file
//! - **orchestrator**: poll timer, worker limit, and cycle backoff
//! - **source** / **sink**: transport and delivery seams
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dropzone_ingest::{claims, source, IngestConfig, IngestOrchestrator};
//! use dropzone_ingest::sink::LoggingSink;
//! use dropzone_ingest::trace::TracingSpanFactory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = claims::connect(&config.claim_store_url).await?;
//!     let orchestrator = IngestOrchestrator::new(
//!         &config,
//!         source::build(&config.source, config.parse_timeout),
//!         store,
//!         Arc::new(LoggingSink),
//!         Arc::new(TracingSpanFactory),
//!     )?;
//!
//!     let report = orchestrator.run_cycle().await?;
//!     println!("{} files claimed", report.claimed);
//!     Ok(())
//! }
//! ```

pub mod claims;
pub mod config;
pub mod error;
pub mod listing;
pub mod orchestrator;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod trace;
pub mod xml;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use orchestrator::{CycleReport, IngestOrchestrator};
pub use pipeline::{FetchParsePipeline, IngestResult};
