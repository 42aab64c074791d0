//! Document store collaborator: the Paperless-ngx REST API.
//!
//! The worker only talks to the store through the [`DocumentStore`] and
//! [`VersionUploader`] traits, so tests drive it with in-memory fakes.
//! [`PaperlessClient`] is the production implementation over `reqwest`.
//!
//! Every call reports one of three failure classes:
//! [`StampError::Connection`], [`StampError::Auth`] or [`StampError::Api`].
//! Listings are paginated upstream; the client follows `next` links so
//! callers always get the complete set.

use crate::config::WorkerConfig;
use crate::document::{CustomField, Document, Page, Tag};
use crate::error::StampError;
use async_trait::async_trait;
use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Tag prefix used to discover documents that need stamping.
pub const TRIGGER_QUERY_PREFIX: &str = "stamp:";

/// Longest API error detail kept from a response body.
const MAX_DETAIL_CHARS: usize = 500;

/// Operations the worker needs from the document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents carrying at least one `stamp:*` tag.
    async fn stampable_documents(&self) -> Result<Vec<Document>, StampError>;

    /// Full detail of one document.
    async fn document(&self, document_id: u64) -> Result<Document, StampError>;

    /// Archived (rendered) PDF bytes of a document.
    async fn download_document(&self, document_id: u64) -> Result<Vec<u8>, StampError>;

    async fn tags(&self) -> Result<Vec<Tag>, StampError>;

    async fn custom_fields(&self) -> Result<Vec<CustomField>, StampError>;

    async fn create_tag(&self, name: &str) -> Result<Tag, StampError>;

    /// Replace the whole tag set of a document.
    async fn update_document_tags(&self, document_id: u64, tag_ids: &[u64]) -> Result<(), StampError>;

    async fn add_note(&self, document_id: u64, note: &str) -> Result<(), StampError>;
}

/// Uploads a stamped file as a new version of an existing document.
#[async_trait]
pub trait VersionUploader: Send + Sync {
    async fn upload_version(&self, document_id: u64, pdf: Vec<u8>, label: &str) -> Result<(), StampError>;
}

/// Uploader for stores without file versioning; every upload fails.
///
/// Released Paperless-ngx versions cannot replace a document's file
/// (tracked upstream as paperless-ngx PR #12061).
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableUploader;

#[async_trait]
impl VersionUploader for UnavailableUploader {
    async fn upload_version(&self, document_id: u64, _pdf: Vec<u8>, _label: &str) -> Result<(), StampError> {
        Err(StampError::Api {
            status: StatusCode::NOT_IMPLEMENTED.as_u16(),
            detail: format!(
                "upload_version is not available for document {document_id}: \
                 this Paperless-ngx instance does not support file versioning"
            ),
        })
    }
}

/// Uploader posting a multipart form to a configured endpoint.
///
/// The endpoint template contains `{id}`, e.g.
/// `/api/documents/{id}/update_version/`. The form carries the file as
/// `document` and the label as `version_label`.
#[derive(Debug, Clone)]
pub struct HttpVersionUploader {
    client: PaperlessClient,
    endpoint: String,
}

impl HttpVersionUploader {
    pub fn new(client: PaperlessClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl VersionUploader for HttpVersionUploader {
    async fn upload_version(&self, document_id: u64, pdf: Vec<u8>, label: &str) -> Result<(), StampError> {
        let path = self.endpoint.replace("{id}", &document_id.to_string());
        let file = reqwest::multipart::Part::bytes(pdf)
            .file_name(format!("document-{document_id}.pdf"))
            .mime_str("application/pdf")
            .map_err(|e| StampError::Internal(format!("multipart: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("document", file)
            .text("version_label", label.to_string());

        info!(document_id, label, "Uploading stamped version");
        self.client
            .send(self.client.http.post(self.client.url(&path)).multipart(form))
            .await?;
        Ok(())
    }
}

/// Pick the uploader matching the configuration.
pub fn uploader_for(config: &WorkerConfig, client: &PaperlessClient) -> Arc<dyn VersionUploader> {
    match config.version_endpoint {
        Some(ref endpoint) => Arc::new(HttpVersionUploader::new(client.clone(), endpoint.clone())),
        None => Arc::new(UnavailableUploader),
    }
}

/// `reqwest` client for the Paperless-ngx REST API.
#[derive(Debug, Clone)]
pub struct PaperlessClient {
    http: reqwest::Client,
    base_url: String,
}

impl PaperlessClient {
    /// Create a client sending `Authorization: Token <token>` on every request.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, StampError> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Token {token}"))
            .map_err(|_| StampError::InvalidConfig("API token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| StampError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, StampError> {
        Self::new(
            &config.paperless_url,
            &config.paperless_token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs (pagination `next` links) pass through unchanged.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Send a request and translate failures into [`StampError`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, StampError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StampError::Connection(format!("Request to {} timed out", self.base_url))
            } else {
                StampError::Connection(format!("Cannot connect to {}: {e}", self.base_url))
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => Err(StampError::Auth("Invalid or expired API token".into())),
            StatusCode::FORBIDDEN => Err(StampError::Auth("Insufficient permissions".into())),
            s if s.is_client_error() || s.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(StampError::Api {
                    status: s.as_u16(),
                    detail: body.chars().take(MAX_DETAIL_CHARS).collect(),
                })
            }
            _ => Ok(response),
        }
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T, StampError> {
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|e| StampError::Api {
            status,
            detail: format!("unexpected response body: {e}"),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, StampError> {
        let response = self.send(self.http.get(self.url(path)).query(query)).await?;
        self.json(response).await
    }

    /// Follow pagination and return every result.
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>, StampError> {
        let mut page: Page<T> = self.get_json(path, query).await?;
        let mut results = std::mem::take(&mut page.results);

        while let Some(next) = page.next.take() {
            debug!(next = %next, "Following pagination");
            page = self.get_json(&next, &[]).await?;
            results.append(&mut page.results);
        }
        Ok(results)
    }
}

#[async_trait]
impl DocumentStore for PaperlessClient {
    async fn stampable_documents(&self) -> Result<Vec<Document>, StampError> {
        self.get_all_pages("/api/documents/", &[("tags__name__istartswith", TRIGGER_QUERY_PREFIX)])
            .await
    }

    async fn document(&self, document_id: u64) -> Result<Document, StampError> {
        self.get_json(&format!("/api/documents/{document_id}/"), &[]).await
    }

    async fn download_document(&self, document_id: u64) -> Result<Vec<u8>, StampError> {
        let response = self
            .send(self.http.get(self.url(&format!("/api/documents/{document_id}/download/"))))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StampError::Connection(format!("Download of document {document_id} interrupted: {e}")))?;
        debug!(document_id, bytes = bytes.len(), "Downloaded document");
        Ok(bytes.to_vec())
    }

    async fn tags(&self) -> Result<Vec<Tag>, StampError> {
        self.get_all_pages("/api/tags/", &[]).await
    }

    async fn custom_fields(&self) -> Result<Vec<CustomField>, StampError> {
        self.get_all_pages("/api/custom_fields/", &[]).await
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StampError> {
        let response = self
            .send(self.http.post(self.url("/api/tags/")).json(&json!({ "name": name })))
            .await?;
        self.json(response).await
    }

    async fn update_document_tags(&self, document_id: u64, tag_ids: &[u64]) -> Result<(), StampError> {
        self.send(
            self.http
                .patch(self.url(&format!("/api/documents/{document_id}/")))
                .json(&json!({ "tags": tag_ids })),
        )
        .await?;
        Ok(())
    }

    async fn add_note(&self, document_id: u64, note: &str) -> Result<(), StampError> {
        self.send(
            self.http
                .post(self.url(&format!("/api/documents/{document_id}/notes/")))
                .json(&json!({ "note": note })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(server: &Server) -> PaperlessClient {
        PaperlessClient::new(&server.url(), "testtoken", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn trims_trailing_slash() {
        let client = PaperlessClient::new("http://localhost:8000/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/api/tags/"), "http://localhost:8000/api/tags/");
        assert_eq!(client.url("http://other/api/tags/?page=2"), "http://other/api/tags/?page=2");
    }

    #[tokio::test]
    async fn follows_pagination_with_token() {
        let mut server = Server::new_async().await;
        let page2_url = format!("{}/api/tags/?page=2", server.url());
        let first = server
            .mock("GET", "/api/tags/")
            .match_query(Matcher::Regex("^$".into()))
            .match_header("authorization", "Token testtoken")
            .with_header("content-type", "application/json")
            .with_body(json!({"count": 2, "next": page2_url, "results": [{"id": 1, "name": "stamp:paid"}]}).to_string())
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/tags/")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("content-type", "application/json")
            .with_body(json!({"count": 2, "next": null, "results": [{"id": 2, "name": "invoice"}]}).to_string())
            .create_async()
            .await;

        let tags = client_for(&server).tags().await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].name, "invoice");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn discovery_filters_on_trigger_prefix() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/documents/")
            .match_query(Matcher::UrlEncoded("tags__name__istartswith".into(), "stamp:".into()))
            .with_body(json!({"next": null, "results": [{"id": 42, "title": "Invoice", "tags": [1]}]}).to_string())
            .create_async()
            .await;

        let docs = client_for(&server).stampable_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, 42);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maps_auth_and_api_errors() {
        let mut server = Server::new_async().await;
        let _tags = server.mock("GET", "/api/tags/").with_status(401).create_async().await;
        let _fields = server.mock("GET", "/api/custom_fields/").with_status(403).create_async().await;
        let _doc = server
            .mock("GET", "/api/documents/7/")
            .with_status(404)
            .with_body("Not found")
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(matches!(client.tags().await, Err(StampError::Auth(_))));
        assert!(matches!(client.custom_fields().await, Err(StampError::Auth(_))));
        match client.document(7).await {
            Err(StampError::Api { status, detail }) => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Not found");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn long_error_detail_is_truncated() {
        let mut server = Server::new_async().await;
        let _download = server
            .mock("GET", "/api/documents/1/download/")
            .with_status(500)
            .with_body("x".repeat(2000))
            .create_async()
            .await;
        let err = client_for(&server).download_document(1).await.unwrap_err();
        match err {
            StampError::Api { detail, .. } => assert_eq!(detail.len(), MAX_DETAIL_CHARS),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_store_is_connection_error() {
        let client = PaperlessClient::new("http://127.0.0.1:1", "t", Duration::from_secs(2)).unwrap();
        assert!(matches!(client.tags().await, Err(StampError::Connection(_))));
    }

    #[tokio::test]
    async fn writes_send_json_bodies() {
        let mut server = Server::new_async().await;
        let patch = server
            .mock("PATCH", "/api/documents/42/")
            .match_body(Matcher::Json(json!({"tags": [3, 5]})))
            .with_body("{}")
            .create_async()
            .await;
        let note = server
            .mock("POST", "/api/documents/42/notes/")
            .match_body(Matcher::Json(json!({"note": "hello"})))
            .with_body("[]")
            .create_async()
            .await;
        let create = server
            .mock("POST", "/api/tags/")
            .match_body(Matcher::Json(json!({"name": "stamped:paid"})))
            .with_status(201)
            .with_body(json!({"id": 99, "name": "stamped:paid"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        client.update_document_tags(42, &[3, 5]).await.unwrap();
        client.add_note(42, "hello").await.unwrap();
        let tag = client.create_tag("stamped:paid").await.unwrap();
        assert_eq!(tag.id, 99);
        patch.assert_async().await;
        note.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn http_uploader_posts_to_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/documents/42/update_version/")
            .match_body(Matcher::Regex("version_label".into()))
            .with_body("{}")
            .create_async()
            .await;
        let uploader = HttpVersionUploader::new(client_for(&server), "/api/documents/{id}/update_version/");
        uploader.upload_version(42, b"%PDF-1.5".to_vec(), "stamped").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unavailable_uploader_is_api_error() {
        let err = UnavailableUploader
            .upload_version(42, Vec::new(), "stamped")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(501));
        assert!(err.to_string().contains("upload_version"));
    }
}
