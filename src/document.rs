//! Wire models for the Paperless-ngx REST API.
//!
//! Only the fields the worker reads are modelled; everything else in the
//! JSON payloads is ignored by serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document snapshot as returned by `/api/documents/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,

    #[serde(default)]
    pub title: String,

    /// Tag ids attached to the document.
    #[serde(default)]
    pub tags: Vec<u64>,

    #[serde(default)]
    pub custom_fields: Vec<CustomFieldInstance>,

    /// ISO-8601 creation date or timestamp, as sent by the store.
    #[serde(default)]
    pub created: Option<String>,
}

impl Document {
    /// Title for log lines and results; falls back to `Document <id>`.
    pub fn display_title(&self) -> String {
        if self.title.is_empty() {
            format!("Document {}", self.id)
        } else {
            self.title.clone()
        }
    }

    /// Date portion (first 10 characters) of the created timestamp.
    pub fn created_date(&self) -> Option<String> {
        let created = self.created.as_deref()?.trim();
        if created.is_empty() {
            return None;
        }
        Some(created.chars().take(10).collect())
    }
}

/// One custom field value attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldInstance {
    /// Id of the custom field definition.
    pub field: u64,
    #[serde(default)]
    pub value: Value,
}

impl CustomFieldInstance {
    /// Trimmed string form of the value; `None` when null or blank.
    pub fn text(&self) -> Option<String> {
        let raw = match &self.value {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// A tag definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

/// A custom field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_from_paperless_json() {
        let doc: Document = serde_json::from_value(json!({
            "id": 42,
            "title": "Invoice 2024-001",
            "tags": [1, 5],
            "custom_fields": [{"field": 10, "value": "2024-03-15"}],
            "created": "2024-01-10T08:30:00+01:00",
            "correspondent": 3,
            "content": "ignored"
        }))
        .unwrap();
        assert_eq!(doc.id, 42);
        assert_eq!(doc.tags, vec![1, 5]);
        assert_eq!(doc.created_date().as_deref(), Some("2024-01-10"));
        assert_eq!(doc.custom_fields[0].text().as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn document_minimal_json() {
        let doc: Document = serde_json::from_value(json!({"id": 7})).unwrap();
        assert!(doc.tags.is_empty());
        assert_eq!(doc.display_title(), "Document 7");
        assert_eq!(doc.created_date(), None);
    }

    #[test]
    fn field_text_blank_and_null() {
        let blank = CustomFieldInstance { field: 1, value: json!("   ") };
        let null = CustomFieldInstance { field: 1, value: Value::Null };
        let number = CustomFieldInstance { field: 1, value: json!(12.5) };
        assert_eq!(blank.text(), None);
        assert_eq!(null.text(), None);
        assert_eq!(number.text().as_deref(), Some("12.5"));
    }

    #[test]
    fn page_without_next() {
        let page: Page<Tag> =
            serde_json::from_value(json!({"count": 1, "next": null, "results": [{"id": 1, "name": "stamp:paid"}]}))
                .unwrap();
        assert!(page.next.is_none());
        assert_eq!(page.results[0].name, "stamp:paid");
    }
}
