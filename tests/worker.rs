//! State machine tests against an in-memory document store.
//!
//! Run with:
//!   cargo test --test worker

use async_trait::async_trait;
use paperless_stamp::pipeline::render::sample_document;
use paperless_stamp::{
    run_until, CustomField, CustomFieldInstance, DateFallback, Document, DocumentStore, StampError, StampWorker,
    Tag, UnavailableUploader, VersionUploader, WorkerConfig,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    tags: Vec<Tag>,
    fields: Vec<CustomField>,
    documents: Vec<Document>,
    files: HashMap<u64, Vec<u8>>,
    notes: Vec<(u64, String)>,
    tag_updates: usize,
    downloads: usize,
    discoveries: usize,
    note_attempts: usize,
    /// Number of upcoming discovery calls that fail.
    discovery_failures: usize,
    fail_tag_update: bool,
    fail_create_tag: bool,
    fail_note: bool,
    note_delay: Option<Duration>,
}

/// Store keeping tags, documents and notes in memory.
#[derive(Default)]
struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    fn with_tags(names: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut s = store.state.lock().unwrap();
            s.tags = names
                .iter()
                .enumerate()
                .map(|(i, n)| Tag {
                    id: i as u64 + 1,
                    name: n.to_string(),
                })
                .collect();
            s.fields = vec![
                CustomField {
                    id: 10,
                    name: "Paid Date".into(),
                    data_type: Some("date".into()),
                },
                CustomField {
                    id: 11,
                    name: "Received Date".into(),
                    data_type: Some("date".into()),
                },
            ];
        }
        store
    }

    fn tag_id(&self, name: &str) -> Option<u64> {
        let s = self.state.lock().unwrap();
        s.tags.iter().find(|t| t.name == name).map(|t| t.id)
    }

    fn add_document(&self, document: Document, file: Vec<u8>) {
        let mut s = self.state.lock().unwrap();
        s.files.insert(document.id, file);
        s.documents.push(document);
    }

    /// A document whose file is missing from the store.
    fn add_document_without_file(&self, document: Document) {
        self.state.lock().unwrap().documents.push(document);
    }

    fn tag_names(&self, document_id: u64) -> Vec<String> {
        let s = self.state.lock().unwrap();
        let doc = s.documents.iter().find(|d| d.id == document_id).unwrap();
        let mut names: Vec<String> = doc
            .tags
            .iter()
            .map(|id| s.tags.iter().find(|t| t.id == *id).unwrap().name.clone())
            .collect();
        names.sort();
        names
    }

    fn notes(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().notes.clone()
    }

    fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }
}

fn not_found(document_id: u64) -> StampError {
    StampError::Api {
        status: 404,
        detail: format!("No document {document_id}"),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn stampable_documents(&self) -> Result<Vec<Document>, StampError> {
        let mut s = self.state.lock().unwrap();
        s.discoveries += 1;
        if s.discovery_failures > 0 {
            s.discovery_failures -= 1;
            return Err(StampError::Connection("Cannot connect to http://fake".into()));
        }
        let triggered = |doc: &Document| {
            doc.tags.iter().any(|id| {
                s.tags
                    .iter()
                    .any(|t| t.id == *id && t.name.to_lowercase().starts_with("stamp:"))
            })
        };
        Ok(s.documents.iter().filter(|d| triggered(d)).cloned().collect())
    }

    async fn document(&self, document_id: u64) -> Result<Document, StampError> {
        let s = self.state.lock().unwrap();
        s.documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| not_found(document_id))
    }

    async fn download_document(&self, document_id: u64) -> Result<Vec<u8>, StampError> {
        let mut s = self.state.lock().unwrap();
        s.downloads += 1;
        s.files.get(&document_id).cloned().ok_or_else(|| not_found(document_id))
    }

    async fn tags(&self) -> Result<Vec<Tag>, StampError> {
        Ok(self.state.lock().unwrap().tags.clone())
    }

    async fn custom_fields(&self) -> Result<Vec<CustomField>, StampError> {
        Ok(self.state.lock().unwrap().fields.clone())
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StampError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_create_tag {
            return Err(StampError::Api {
                status: 500,
                detail: "tag creation disabled".into(),
            });
        }
        let id = s.tags.iter().map(|t| t.id).max().unwrap_or(0) + 100;
        let tag = Tag {
            id,
            name: name.to_string(),
        };
        s.tags.push(tag.clone());
        Ok(tag)
    }

    async fn update_document_tags(&self, document_id: u64, tag_ids: &[u64]) -> Result<(), StampError> {
        let mut s = self.state.lock().unwrap();
        s.tag_updates += 1;
        if s.fail_tag_update {
            return Err(StampError::Api {
                status: 400,
                detail: "tags rejected".into(),
            });
        }
        let doc = s
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| not_found(document_id))?;
        doc.tags = tag_ids.to_vec();
        Ok(())
    }

    async fn add_note(&self, document_id: u64, note: &str) -> Result<(), StampError> {
        let delay = self.state.lock().unwrap().note_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut s = self.state.lock().unwrap();
        s.note_attempts += 1;
        if s.fail_note {
            return Err(StampError::Api {
                status: 403,
                detail: "notes are read-only".into(),
            });
        }
        s.notes.push((document_id, note.to_string()));
        Ok(())
    }
}

/// Uploader recording what it receives.
#[derive(Default)]
struct RecordingUploader {
    uploads: Mutex<Vec<(u64, Vec<u8>, String)>>,
}

#[async_trait]
impl VersionUploader for RecordingUploader {
    async fn upload_version(&self, document_id: u64, pdf: Vec<u8>, label: &str) -> Result<(), StampError> {
        self.uploads.lock().unwrap().push((document_id, pdf, label.to_string()));
        Ok(())
    }
}

/// Uploader that raises the shutdown signal while an upload is in flight.
#[derive(Default)]
struct InterruptingUploader {
    shutdown: Arc<Notify>,
    listening: Arc<AtomicBool>,
    listening_at_upload: Mutex<Vec<bool>>,
}

impl InterruptingUploader {
    fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> {
        let shutdown = self.shutdown.clone();
        let listening = self.listening.clone();
        async move {
            listening.store(true, Ordering::SeqCst);
            shutdown.notified().await;
        }
    }
}

#[async_trait]
impl VersionUploader for InterruptingUploader {
    async fn upload_version(&self, _document_id: u64, _pdf: Vec<u8>, _label: &str) -> Result<(), StampError> {
        self.listening_at_upload
            .lock()
            .unwrap()
            .push(self.listening.load(Ordering::SeqCst));
        self.shutdown.notify_one();
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> WorkerConfig {
    WorkerConfig::builder()
        .paperless_url("http://fake")
        .paperless_token("token")
        .build()
        .unwrap()
}

fn invoice(id: u64, tags: Vec<u64>, paid_date: Option<&str>) -> Document {
    Document {
        id,
        title: format!("Invoice {id}"),
        tags,
        custom_fields: paid_date
            .map(|d| {
                vec![CustomFieldInstance {
                    field: 10,
                    value: json!(d),
                }]
            })
            .unwrap_or_default(),
        created: Some("2024-01-10T08:30:00+01:00".into()),
    }
}

fn two_page_pdf() -> Vec<u8> {
    sample_document(595.28, 841.89, 2).unwrap()
}

fn worker(store: &Arc<MemoryStore>, uploader: Arc<dyn VersionUploader>) -> StampWorker {
    StampWorker::new(config(), store.clone(), uploader)
}

// ── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn paid_stamp_end_to_end() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid", "invoice"]));
    store.add_document(invoice(42, vec![1, 2], Some("2024-03-15")), two_page_pdf());
    let uploader = Arc::new(RecordingUploader::default());

    let results = tokio_test::assert_ok!(worker(&store, uploader.clone()).poll_once().await);

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.document_id, 42);
    assert_eq!(r.stamp_type, "paid");
    assert_eq!(r.stamp_text, "PAID");
    assert_eq!(r.stamp_date.as_deref(), Some("2024-03-15"));
    assert!(r.success);
    assert!(r.error_message.is_none());

    assert_eq!(store.tag_names(42), vec!["invoice", "stamped:paid"]);
    assert!(store.notes().is_empty());

    let uploads = uploader.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let (doc_id, pdf, label) = &uploads[0];
    assert_eq!(*doc_id, 42);
    assert_eq!(label, "stamped");
    let stamped = lopdf::Document::load_mem(pdf).unwrap();
    assert_eq!(stamped.get_pages().len(), 2);
}

#[tokio::test]
async fn multiple_types_share_one_tag_update() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid", "stamp:received", "stamped:paid"]));
    store.add_document(invoice(5, vec![1, 2], None), two_page_pdf());
    let uploader = Arc::new(RecordingUploader::default());

    let results = worker(&store, uploader.clone()).poll_once().await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    let received = results.iter().find(|r| r.stamp_type == "received").unwrap();
    assert_eq!(received.stamp_date.as_deref(), Some("2024-01-10"));
    let paid = results.iter().find(|r| r.stamp_type == "paid").unwrap();
    assert_eq!(paid.stamp_date, None);

    assert_eq!(store.tag_names(5), vec!["stamped:paid", "stamped:received"]);
    assert_eq!(store.state.lock().unwrap().tag_updates, 1);
    assert_eq!(uploader.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn received_fallback_can_be_disabled() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:received"]));
    store.add_document(invoice(6, vec![1], None), two_page_pdf());
    let config = WorkerConfig {
        received_date_fallback: DateFallback::Disabled,
        ..config()
    };
    let mut worker = StampWorker::new(config, store.clone(), Arc::new(RecordingUploader::default()));

    let results = worker.poll_once().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].stamp_date, None);
}

#[tokio::test]
async fn received_date_field_wins_over_created() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:received"]));
    let mut document = invoice(12, vec![1], None);
    document.custom_fields = vec![CustomFieldInstance {
        field: 11,
        value: json!("2024-02-01"),
    }];
    store.add_document(document, two_page_pdf());

    let results = worker(&store, Arc::new(RecordingUploader::default()))
        .poll_once()
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].stamp_text, "RECEIVED");
    assert_eq!(results[0].stamp_date.as_deref(), Some("2024-02-01"));
}

#[tokio::test]
async fn trigger_prefix_is_case_insensitive() {
    let store = Arc::new(MemoryStore::with_tags(&["Stamp:Paid"]));
    store.add_document(invoice(8, vec![1], None), two_page_pdf());

    let results = worker(&store, Arc::new(RecordingUploader::default()))
        .poll_once()
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].stamp_type, "paid");
    assert_eq!(store.tag_names(8), vec!["stamped:paid"]);
}

// ── Failure path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_failure_marks_error() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid", "invoice"]));
    store.add_document(invoice(42, vec![1, 2], Some("2024-03-15")), two_page_pdf());

    let results = worker(&store, Arc::new(UnavailableUploader)).poll_once().await.unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert!(!r.success);
    assert_eq!(r.stamp_date, None);
    let message = r.error_message.clone().unwrap();
    assert!(message.contains("501"), "got: {message}");

    assert_eq!(store.tag_names(42), vec!["invoice", "stamp:error"]);
    let notes = store.notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].0, 42);
    assert_eq!(notes[0].1, format!("[paperless-stamp] Stamping failed: {message}"));
}

#[tokio::test]
async fn unreadable_pdf_marks_error() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(9, vec![1], None), b"not a pdf".to_vec());
    let uploader = Arc::new(RecordingUploader::default());

    let results = worker(&store, uploader.clone()).poll_once().await.unwrap();

    assert!(!results[0].success);
    assert!(results[0].error_message.as_deref().unwrap().contains("Invalid PDF"));
    assert!(uploader.uploads.lock().unwrap().is_empty());
    assert_eq!(store.tag_names(9), vec!["stamp:error"]);
}

#[tokio::test]
async fn error_handling_failures_are_swallowed() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(3, vec![1], None), two_page_pdf());
    {
        let mut s = store.state.lock().unwrap();
        s.fail_tag_update = true;
        s.fail_create_tag = true;
    }

    let results = worker(&store, Arc::new(UnavailableUploader)).poll_once().await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    // Tag update was attempted and rejected; the note still goes out.
    assert_eq!(store.state.lock().unwrap().tag_updates, 1);
    assert_eq!(store.tag_names(3), vec!["stamp:paid"]);
    assert_eq!(store.notes().len(), 1);
}

#[tokio::test]
async fn note_failure_is_swallowed() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid", "invoice"]));
    store.add_document(invoice(13, vec![1, 2], None), two_page_pdf());
    store.state.lock().unwrap().fail_note = true;

    let results = worker(&store, Arc::new(UnavailableUploader)).poll_once().await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error_message.is_some());
    assert_eq!(store.tag_names(13), vec!["invoice", "stamp:error"]);
    assert_eq!(store.state.lock().unwrap().note_attempts, 1);
    assert!(store.notes().is_empty());
}

#[tokio::test]
async fn download_error_only_fails_that_document() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document_without_file(invoice(20, vec![1], None));
    store.add_document(invoice(21, vec![1], None), two_page_pdf());
    let uploader = Arc::new(RecordingUploader::default());

    let results = worker(&store, uploader.clone()).poll_once().await.unwrap();

    assert_eq!(results.len(), 2);
    let missing = results.iter().find(|r| r.document_id == 20).unwrap();
    assert!(!missing.success);
    let message = missing.error_message.as_deref().unwrap();
    assert!(message.contains("404"), "got: {message}");
    assert_eq!(store.tag_names(20), vec!["stamp:error"]);
    assert!(store.notes().iter().any(|(id, note)| *id == 20 && note.contains("404")));

    assert!(results.iter().find(|r| r.document_id == 21).unwrap().success);
    assert_eq!(store.tag_names(21), vec!["stamped:paid"]);
    assert_eq!(uploader.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failure_timing_excludes_error_handling() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(14, vec![1], None), b"not a pdf".to_vec());
    store.state.lock().unwrap().note_delay = Some(Duration::from_millis(400));

    let results = worker(&store, Arc::new(RecordingUploader::default()))
        .poll_once()
        .await
        .unwrap();

    assert!(!results[0].success);
    assert_eq!(store.notes().len(), 1);
    assert!(
        results[0].processing_ms < 400,
        "processing_ms includes note round trip: {}",
        results[0].processing_ms
    );
}

#[tokio::test]
async fn failing_document_does_not_stop_cycle() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(1, vec![1], None), b"%PDF-broken".to_vec());
    store.add_document(invoice(2, vec![1], None), two_page_pdf());

    let results = worker(&store, Arc::new(RecordingUploader::default()))
        .poll_once()
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document_id, 1);
    assert!(!results[0].success);
    assert_eq!(results[1].document_id, 2);
    assert!(results[1].success);
    assert_eq!(store.tag_names(1), vec!["stamp:error"]);
    assert_eq!(store.tag_names(2), vec!["stamped:paid"]);
}

// ── Idle and cycle-level behaviour ───────────────────────────────────────────

#[tokio::test]
async fn error_tag_alone_is_idle() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:error"]));
    store.add_document(invoice(4, vec![1], None), two_page_pdf());

    let results = worker(&store, Arc::new(RecordingUploader::default()))
        .poll_once()
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(store.downloads(), 0);
    assert_eq!(store.state.lock().unwrap().tag_updates, 0);
}

#[tokio::test]
async fn discovery_failure_aborts_cycle() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(1, vec![1], None), two_page_pdf());
    store.state.lock().unwrap().discovery_failures = 1;

    let err = tokio_test::assert_err!(worker(&store, Arc::new(RecordingUploader::default())).poll_once().await);
    assert!(matches!(err, StampError::Connection(_)));
    assert_eq!(store.downloads(), 0);
    assert!(store.notes().is_empty());
}

#[tokio::test]
async fn run_until_stops_after_shutdown() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(11, vec![1], None), two_page_pdf());
    let uploader = Arc::new(RecordingUploader::default());

    run_until(config(), store.clone(), uploader.clone(), async {}).await;

    assert_eq!(uploader.uploads.lock().unwrap().len(), 1);
    assert_eq!(store.tag_names(11), vec!["stamped:paid"]);
    assert!(store.tag_id("stamped:paid").is_some());
}

#[tokio::test]
async fn shutdown_during_first_cycle_lets_it_finish() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(15, vec![1], None), two_page_pdf());
    let uploader = Arc::new(InterruptingUploader::default());
    let shutdown = uploader.shutdown_signal();

    let finished = tokio::time::timeout(
        Duration::from_secs(10),
        run_until(config(), store.clone(), uploader.clone(), shutdown),
    )
    .await;

    assert!(finished.is_ok(), "worker kept running after shutdown");
    assert_eq!(*uploader.listening_at_upload.lock().unwrap(), vec![true]);
    assert_eq!(store.tag_names(15), vec!["stamped:paid"]);
    assert_eq!(store.state.lock().unwrap().discoveries, 1);
}

#[tokio::test]
async fn run_until_retries_after_failed_cycle() {
    let store = Arc::new(MemoryStore::with_tags(&["stamp:paid"]));
    store.add_document(invoice(16, vec![1], None), two_page_pdf());
    store.state.lock().unwrap().discovery_failures = 1;
    let uploader = Arc::new(InterruptingUploader::default());
    let shutdown = uploader.shutdown_signal();
    let config = WorkerConfig {
        poll_interval_secs: 1,
        ..config()
    };

    let finished = tokio::time::timeout(
        Duration::from_secs(10),
        run_until(config, store.clone(), uploader.clone(), shutdown),
    )
    .await;

    assert!(finished.is_ok(), "worker never reached a second cycle");
    assert_eq!(store.state.lock().unwrap().discoveries, 2);
    assert_eq!(store.tag_names(16), vec!["stamped:paid"]);
}
