//! Monument Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the monument workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Checksums**: SHA-256 content digests used for upload deduplication
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: file kinds and report message levels
//!
//! # Example
//!
//! ```no_run
//! use monument_common::checksum::sha256_bytes;
//! use monument_common::FileKind;
//!
//! let digest = sha256_bytes(b"     2.11           OBSERVATION DATA");
//! let kind = FileKind::infer("STA10690.25o");
//! assert_eq!(kind, Some(FileKind::Observation));
//! assert_eq!(digest.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
pub use types::{FileKind, MessageLevel, OutcomeMessage};
