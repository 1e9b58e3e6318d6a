//! Taggings: the classifier's output records

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One tag-to-item assignment with its strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagging {
    /// Owner of the tag, as named by the training URL.
    pub user: String,
    /// Name of the tag, as named by the training URL.
    pub tag_name: String,
    /// The tag document's identity URI.
    pub tag_id: String,
    /// The classified item's id.
    pub item_id: String,
    /// Classifier confidence in [0, 1].
    pub strength: f64,
}

/// Where finished taggings go. The production store is an external
/// database; the classifier only needs to hand records over.
pub trait TaggingStore: Send + Sync {
    fn store(&self, tagging: Tagging) -> Result<()>;
}

/// In-memory tagging store.
#[derive(Debug, Default)]
pub struct MemoryTaggingStore {
    taggings: Mutex<Vec<Tagging>>,
}

impl MemoryTaggingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn taggings(&self) -> Vec<Tagging> {
        self.taggings.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.taggings.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaggingStore for MemoryTaggingStore {
    fn store(&self, tagging: Tagging) -> Result<()> {
        self.taggings.lock().unwrap().push(tagging);
        Ok(())
    }
}
