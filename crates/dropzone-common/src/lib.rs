//! Dropzone Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, value parsing, and logging setup for the Dropzone workspace.
//!
//! # Overview
//!
//! - **Types**: the typed XML document model (`XmlDocument` and its records)
//! - **Errors**: value-level parse errors raised while decoding fields
//! - **Logging**: `tracing` subscriber configuration shared by every binary
//!
//! # Example
//!
//! ```
//! use dropzone_common::types::{parse_decimal, Direction};
//!
//! let value = parse_decimal(" -75.50 ").unwrap();
//! assert_eq!(value.to_string(), "-75.50");
//! assert_eq!("CRDT".parse::<Direction>().unwrap(), Direction::Credit);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, ValueError};
pub use types::{DocumentKind, XmlDocument};
