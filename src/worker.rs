//! Tag-driven document state machine and poll loop.
//!
//! ## Per-document states
//!
//! ```text
//! Idle ──(no stamp:<type> tags)──▶ done, no results
//! Triggered ──▶ Processing ──┬──▶ Stamped  (stamp:<type> → stamped:<type>)
//!                            └──▶ Errored  (stamp:<type> → stamp:error + note)
//! ```
//!
//! Documents are processed one after another in discovery order. Every
//! failure inside a document's pipeline is converted into the `Errored`
//! transition; only resolver refresh and discovery failures abort a cycle.

use crate::client::{DocumentStore, VersionUploader};
use crate::config::{DateFallback, WorkerConfig};
use crate::document::Document;
use crate::error::StampError;
use crate::output::{CycleSummary, StampResult};
use crate::pipeline::{self, layout::StampSpec};
use crate::resolver::{CustomFieldResolver, TagResolver};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Prefix of trigger tags: `stamp:<type>`.
pub const STAMP_TAG_PREFIX: &str = "stamp:";
/// Prefix of done tags: `stamped:<type>`.
pub const DONE_TAG_PREFIX: &str = "stamped:";
/// Shared error marker. Never treated as a trigger.
pub const ERROR_TAG: &str = "stamp:error";
/// Label of uploaded stamped versions.
pub const VERSION_LABEL: &str = "stamped";

const ERROR_SUFFIX: &str = "error";

/// Where a document is in its lifecycle for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Idle,
    Triggered,
    Processing,
    Stamped,
    Errored,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentState::Idle => "idle",
            DocumentState::Triggered => "triggered",
            DocumentState::Processing => "processing",
            DocumentState::Stamped => "stamped",
            DocumentState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Stamp types requested by a document's trigger tags, in tag order.
///
/// The `stamp:` prefix matches case-insensitively; types are lower-cased
/// and de-duplicated. `stamp:` with an empty suffix and `stamp:error` are
/// ignored. Tag ids unknown to `tags` are skipped.
pub fn extract_stamp_types(document: &Document, tags: &TagResolver) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for &tag_id in &document.tags {
        let Some(stamp_type) = tags.name_for(tag_id).and_then(trigger_suffix) else {
            continue;
        };
        if !types.contains(&stamp_type) {
            types.push(stamp_type);
        }
    }
    types
}

/// Lower-cased stamp type of a trigger tag name, if it is one.
fn trigger_suffix(name: &str) -> Option<String> {
    let prefix = name.get(..STAMP_TAG_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(STAMP_TAG_PREFIX) {
        return None;
    }
    let suffix = name[STAMP_TAG_PREFIX.len()..].trim().to_lowercase();
    if suffix.is_empty() || suffix == ERROR_SUFFIX {
        None
    } else {
        Some(suffix)
    }
}

/// Date printed under the stamp text for `stamp_type`.
///
/// The configured custom field wins. `received` stamps fall back to the
/// document's created date unless the fallback is disabled.
pub fn resolve_stamp_date(
    stamp_type: &str,
    document: &Document,
    config: &WorkerConfig,
    fields: &CustomFieldResolver,
) -> Option<String> {
    if let Some(value) = config
        .date_field(stamp_type)
        .and_then(|field| fields.value(document, field))
    {
        return Some(value);
    }

    if stamp_type == "received" && config.received_date_fallback == DateFallback::Created {
        return document.created_date();
    }
    None
}

/// One [`StampSpec`] per stamp type, all owned by `document`.
pub fn build_stamp_specs(
    document: &Document,
    stamp_types: &[String],
    config: &WorkerConfig,
    fields: &CustomFieldResolver,
) -> Vec<StampSpec> {
    stamp_types
        .iter()
        .map(|stamp_type| {
            StampSpec::new(config.stamp_text(stamp_type), document.id)
                .with_color(config.stamp_color(stamp_type))
                .with_optional_date(resolve_stamp_date(stamp_type, document, config, fields))
        })
        .collect()
}

/// Drives documents through the stamping state machine.
pub struct StampWorker {
    config: WorkerConfig,
    store: Arc<dyn DocumentStore>,
    uploader: Arc<dyn VersionUploader>,
    tags: TagResolver,
    fields: CustomFieldResolver,
}

impl StampWorker {
    pub fn new(config: WorkerConfig, store: Arc<dyn DocumentStore>, uploader: Arc<dyn VersionUploader>) -> Self {
        Self {
            config,
            store,
            uploader,
            tags: TagResolver::new(),
            fields: CustomFieldResolver::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn tag_resolver(&self) -> &TagResolver {
        &self.tags
    }

    pub fn field_resolver(&self) -> &CustomFieldResolver {
        &self.fields
    }

    /// Rebuild both resolver snapshots.
    pub async fn refresh(&mut self) -> Result<(), StampError> {
        self.tags.refresh(self.store.as_ref()).await?;
        self.fields.refresh(self.store.as_ref()).await
    }

    /// Run one poll cycle.
    ///
    /// # Errors
    /// Only resolver refresh and document discovery failures are returned.
    /// Per-document failures show up as failed [`StampResult`]s.
    pub async fn poll_once(&mut self) -> Result<Vec<StampResult>, StampError> {
        self.refresh().await?;

        let documents = self.store.stampable_documents().await?;
        info!("Found {} document(s) with stamp tags", documents.len());

        let mut results = Vec::new();
        for document in &documents {
            results.extend(self.process_document(document).await);
        }

        let summary = CycleSummary::from_results(&results);
        info!(
            documents = summary.documents,
            "Poll cycle complete: {} success, {} failed", summary.succeeded, summary.failed
        );
        Ok(results)
    }

    /// Stamp one document and move its tags to the matching end state.
    ///
    /// Returns one result per requested stamp type, or nothing for an
    /// idle document.
    pub async fn process_document(&mut self, document: &Document) -> Vec<StampResult> {
        let doc_id = document.id;
        let title = document.display_title();
        let stamp_types = extract_stamp_types(document, &self.tags);

        if stamp_types.is_empty() {
            debug!(doc_id, state = %DocumentState::Idle, "No actionable stamp tags");
            return Vec::new();
        }

        info!(
            doc_id,
            stamp_types = ?stamp_types,
            state = %DocumentState::Triggered,
            "Processing document {} ({})", doc_id, title
        );

        let start = Instant::now();
        let specs = build_stamp_specs(document, &stamp_types, &self.config, &self.fields);

        match self.run_pipeline(document, &stamp_types, &specs).await {
            Ok(()) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(
                    doc_id,
                    elapsed_ms,
                    state = %DocumentState::Stamped,
                    "Successfully stamped document {} ({})", doc_id, title
                );
                stamp_types
                    .iter()
                    .zip(&specs)
                    .map(|(stamp_type, spec)| StampResult {
                        document_id: doc_id,
                        document_title: title.clone(),
                        stamp_type: stamp_type.clone(),
                        stamp_text: spec.text().to_string(),
                        stamp_date: spec.date().map(str::to_string),
                        success: true,
                        error_message: None,
                        processing_ms: elapsed_ms,
                    })
                    .collect()
            }
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let message = e.to_string();
                error!(
                    doc_id,
                    kind = %e.kind(),
                    state = %DocumentState::Errored,
                    "Failed to stamp document {} ({}): {}", doc_id, title, message
                );
                self.handle_error(document, &stamp_types, &message).await;
                stamp_types
                    .iter()
                    .zip(&specs)
                    .map(|(stamp_type, spec)| StampResult {
                        document_id: doc_id,
                        document_title: title.clone(),
                        stamp_type: stamp_type.clone(),
                        stamp_text: spec.text().to_string(),
                        stamp_date: None,
                        success: false,
                        error_message: Some(message.clone()),
                        processing_ms: elapsed_ms,
                    })
                    .collect()
            }
        }
    }

    /// Download → stamp → upload → tag swap. Any error aborts the chain.
    async fn run_pipeline(
        &mut self,
        document: &Document,
        stamp_types: &[String],
        specs: &[StampSpec],
    ) -> Result<(), StampError> {
        let doc_id = document.id;
        debug!(doc_id, state = %DocumentState::Processing, "Downloading document");
        let original = self.store.download_document(doc_id).await?;
        debug!(doc_id, "Downloaded {} bytes", original.len());

        let owned_specs = specs.to_vec();
        let stamped = tokio::task::spawn_blocking(move || pipeline::stamp_pdf(&original, &owned_specs))
            .await
            .map_err(|e| StampError::Internal(format!("stamping task failed: {e}")))??;
        debug!(doc_id, "Stamped PDF is {} bytes", stamped.len());

        self.uploader.upload_version(doc_id, stamped, VERSION_LABEL).await?;

        let mut tag_ids = self.tags_without_triggers(document, stamp_types);
        for stamp_type in stamp_types {
            let done = format!("{DONE_TAG_PREFIX}{stamp_type}");
            tag_ids.insert(self.tags.ensure(self.store.as_ref(), &done).await?);
        }
        let tag_ids: Vec<u64> = tag_ids.into_iter().collect();
        self.store.update_document_tags(doc_id, &tag_ids).await
    }

    /// Mark the document `stamp:error` and attach a note. Never fails.
    async fn handle_error(&mut self, document: &Document, stamp_types: &[String], message: &str) {
        let doc_id = document.id;
        let mut tag_ids = self.tags_without_triggers(document, stamp_types);

        match self.tags.ensure(self.store.as_ref(), ERROR_TAG).await {
            Ok(id) => {
                tag_ids.insert(id);
            }
            Err(e) => warn!(doc_id, "Could not resolve {} tag: {}", ERROR_TAG, e),
        }

        let tag_ids: Vec<u64> = tag_ids.into_iter().collect();
        if let Err(e) = self.store.update_document_tags(doc_id, &tag_ids).await {
            error!(doc_id, "Failed to update tags on document {}: {}", doc_id, e);
        }

        let note = format!("[paperless-stamp] Stamping failed: {message}");
        if let Err(e) = self.store.add_note(doc_id, &note).await {
            error!(doc_id, "Failed to add error note to document {}: {}", doc_id, e);
        }
    }

    /// The document's tag set minus every trigger tag of `stamp_types`.
    fn tags_without_triggers(&self, document: &Document, stamp_types: &[String]) -> BTreeSet<u64> {
        document
            .tags
            .iter()
            .copied()
            .filter(|&id| {
                let is_processed_trigger = self
                    .tags
                    .name_for(id)
                    .and_then(trigger_suffix)
                    .is_some_and(|t| stamp_types.contains(&t));
                !is_processed_trigger
            })
            .collect()
    }
}

/// Run poll cycles until `shutdown` resolves.
///
/// `shutdown` is polled from the start of the first cycle, but a started
/// cycle always runs to completion; the loop exits once it is done.
/// Cycle-level failures are logged and the loop carries on after the next
/// sleep.
pub async fn run_until<F>(
    config: WorkerConfig,
    store: Arc<dyn DocumentStore>,
    uploader: Arc<dyn VersionUploader>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let interval = Duration::from_secs(config.poll_interval_secs);
    info!(
        url = %config.paperless_url,
        "Stamp worker started (poll interval {}s)", config.poll_interval_secs
    );
    let mut worker = StampWorker::new(config, store, uploader);
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        let cycle = worker.poll_once();
        tokio::pin!(cycle);
        let finished = tokio::select! {
            outcome = &mut cycle => Some(outcome),
            _ = &mut shutdown, if !stopping => None,
        };
        let outcome = match finished {
            Some(outcome) => outcome,
            None => {
                stopping = true;
                debug!("Shutdown requested during a poll cycle");
                cycle.await
            }
        };
        if let Err(e) = outcome {
            error!(kind = %e.kind(), "Poll cycle failed: {}", e);
        }
        if stopping {
            break;
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Stamp worker stopped");
}
