//! # paperless-stamp
//!
//! Apply ink-style `PAID` / `RECEIVED` stamps to Paperless-ngx documents,
//! driven by tags.
//!
//! Tag a document `stamp:paid` and the worker picks it up on its next poll:
//! it downloads the archived PDF, draws a slightly tilted, jittered rubber
//! stamp in the top-right corner of page 1, uploads the result as a new
//! version and swaps the tag to `stamped:paid`. Failures swap the trigger
//! for `stamp:error` and leave a note on the document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! poll cycle
//!  │
//!  ├─ 1. Refresh   tag + custom field snapshots
//!  ├─ 2. Discover  documents tagged stamp:*
//!  └─ per document, in order
//!      ├─ 3. Resolve   stamp types, text, color, date
//!      ├─ 4. Download  archived PDF bytes
//!      ├─ 5. Stamp     layout → overlay → merge (CPU-bound, spawn_blocking)
//!      ├─ 6. Upload    new version labelled "stamped"
//!      └─ 7. Retag     stamp:<type> → stamped:<type>  (or stamp:error + note)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperless_stamp::{poll_once_with, PaperlessClient, WorkerConfig};
//! use paperless_stamp::client::uploader_for;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // PAPERLESS_URL / PAPERLESS_TOKEN / STAMP_* from the environment
//!     let config = WorkerConfig::from_env()?;
//!     let client = PaperlessClient::from_config(&config)?;
//!     let uploader = uploader_for(&config, &client);
//!     let results = poll_once_with(config, Arc::new(client), uploader).await?;
//!     eprintln!("{} stamp(s) processed", results.len());
//!     Ok(())
//! }
//! ```
//!
//! Stamping a local file needs no store at all:
//!
//! ```rust,no_run
//! use paperless_stamp::{stamp_pdf, StampSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let original = std::fs::read("invoice.pdf")?;
//! let stamps = [StampSpec::new("paid", 42).with_date("2024-03-15")];
//! std::fs::write("invoice-stamped.pdf", stamp_pdf(&original, &stamps)?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paperless-stamp` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{DocumentStore, HttpVersionUploader, PaperlessClient, UnavailableUploader, VersionUploader};
pub use config::{DateFallback, WorkerConfig, WorkerConfigBuilder};
pub use document::{CustomField, CustomFieldInstance, Document, Tag};
pub use error::{ErrorKind, MergeCause, StampError};
pub use output::{CycleSummary, StampResult};
pub use pipeline::layout::StampSpec;
pub use pipeline::render::PageSize;
pub use pipeline::stamp_pdf;
pub use resolver::{CustomFieldResolver, TagResolver};
pub use worker::{run_until, DocumentState, StampWorker};

use std::sync::Arc;

/// Run a single poll cycle with a fresh worker.
pub async fn poll_once_with(
    config: WorkerConfig,
    store: Arc<dyn DocumentStore>,
    uploader: Arc<dyn VersionUploader>,
) -> Result<Vec<StampResult>, StampError> {
    StampWorker::new(config, store, uploader).poll_once().await
}
