//! Name ↔ id lookups for tags and custom fields.
//!
//! Both resolvers own a snapshot of the store's definitions, rebuilt
//! wholesale by `refresh` at the start of every poll cycle. Only
//! [`TagResolver::ensure`] writes to the store.

use crate::client::DocumentStore;
use crate::document::Document;
use crate::error::StampError;
use std::collections::HashMap;
use tracing::{debug, info};

/// Bidirectional tag index.
#[derive(Debug, Clone, Default)]
pub struct TagResolver {
    by_name: HashMap<String, u64>,
    by_id: HashMap<u64, String>,
}

impl TagResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with the store's current tag list.
    pub async fn refresh(&mut self, store: &dyn DocumentStore) -> Result<(), StampError> {
        let tags = store.tags().await?;
        self.by_name = tags.iter().map(|t| (t.name.clone(), t.id)).collect();
        self.by_id = tags.into_iter().map(|t| (t.id, t.name)).collect();
        debug!(tags = self.by_id.len(), "Tag cache refreshed");
        Ok(())
    }

    pub fn id_for(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    pub fn name_for(&self, id: u64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Id for `name`, creating the tag upstream when it does not exist yet.
    ///
    /// The cache only changes after the create call succeeds.
    pub async fn ensure(&mut self, store: &dyn DocumentStore, name: &str) -> Result<u64, StampError> {
        if let Some(id) = self.id_for(name) {
            return Ok(id);
        }

        info!(tag = name, "Creating tag");
        let tag = store.create_tag(name).await?;
        self.by_name.insert(tag.name.clone(), tag.id);
        if tag.name != name {
            self.by_name.insert(name.to_string(), tag.id);
        }
        self.by_id.insert(tag.id, tag.name);
        Ok(tag.id)
    }
}

/// Custom field name → id index.
#[derive(Debug, Clone, Default)]
pub struct CustomFieldResolver {
    by_name: HashMap<String, u64>,
}

impl CustomFieldResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh(&mut self, store: &dyn DocumentStore) -> Result<(), StampError> {
        let fields = store.custom_fields().await?;
        self.by_name = fields.into_iter().map(|f| (f.name, f.id)).collect();
        debug!(fields = self.by_name.len(), "Custom field cache refreshed");
        Ok(())
    }

    pub fn id_for(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    /// Trimmed value of `field_name` on `document`.
    ///
    /// `None` when the field is not defined, not set on the document, or blank.
    pub fn value(&self, document: &Document, field_name: &str) -> Option<String> {
        let field_id = self.id_for(field_name)?;
        document
            .custom_fields
            .iter()
            .filter(|cf| cf.field == field_id)
            .find_map(|cf| cf.text())
    }
}
