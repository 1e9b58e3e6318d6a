//! Items and the item cache seam
//!
//! The item cache proper is an external collaborator; the classifier only
//! needs to resolve example ids to tokenized items, enumerate candidates
//! for classification, and hand ids it cannot resolve back for feature
//! extraction. [`MemoryItemCache`] implements the seam in memory and backs
//! the server's default wiring and the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Token identifiers are opaque non-negative integers assigned by the
/// tokenizer's feature dictionary.
pub type TokenId = u32;

/// A tokenized content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    id: String,
    tokens: HashMap<TokenId, u32>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tokens: HashMap::new(),
        }
    }

    pub fn with_tokens(id: impl Into<String>, tokens: &[(TokenId, u32)]) -> Self {
        Self {
            id: id.into(),
            tokens: tokens.iter().copied().collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_token(&mut self, token: TokenId, count: u32) {
        *self.tokens.entry(token).or_insert(0) += count;
    }

    pub fn token_count(&self, token: TokenId) -> u32 {
        self.tokens.get(&token).copied().unwrap_or(0)
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&TokenId, u32)> {
        self.tokens.iter().map(|(t, c)| (t, *c))
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }
}

/// An entry scheduled for feature extraction. The document, when present,
/// is the entry's Atom source; entries scheduled from bare example ids
/// carry no document and wait for one to arrive from the collector.
#[derive(Debug, Clone)]
pub struct ItemEntry {
    pub id: String,
    pub document: Option<String>,
}

/// The classifier's view of the item cache.
pub trait ItemCache: Send + Sync {
    /// Resolve an item id to its tokenized form.
    fn fetch_item(&self, id: &str) -> Option<Arc<Item>>;

    /// Candidate items for a classification pass.
    fn items(&self) -> Vec<Arc<Item>>;

    /// Store a tokenized item.
    fn add_item(&self, item: Item);

    /// Schedule an entry for feature extraction.
    fn add_entry(&self, entry: ItemEntry);

    /// Ids currently waiting on feature extraction.
    fn pending_entry_ids(&self) -> Vec<String>;

    /// Blocking pop of the next entry waiting on extraction. Returns None
    /// if nothing arrives within the timeout.
    fn next_pending_entry(&self, timeout: Duration) -> Option<ItemEntry>;

    /// Map a tokenizer feature to its stable token id, allocating one the
    /// first time the feature is seen.
    fn feature_id(&self, feature: &str) -> TokenId;
}

#[derive(Default)]
struct MemoryInner {
    items: HashMap<String, Arc<Item>>,
    pending: VecDeque<ItemEntry>,
    dictionary: HashMap<String, TokenId>,
    next_token: TokenId,
}

/// In-memory item cache.
#[derive(Default)]
pub struct MemoryItemCache {
    inner: Mutex<MemoryInner>,
    pending_cond: Condvar,
}

impl MemoryItemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemCache for MemoryItemCache {
    fn fetch_item(&self, id: &str) -> Option<Arc<Item>> {
        self.inner.lock().unwrap().items.get(id).cloned()
    }

    fn items(&self) -> Vec<Arc<Item>> {
        self.inner.lock().unwrap().items.values().cloned().collect()
    }

    fn add_item(&self, item: Item) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.insert(item.id().to_string(), Arc::new(item));
    }

    fn add_entry(&self, entry: ItemEntry) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.push_back(entry);
        self.pending_cond.notify_one();
    }

    fn pending_entry_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .pending
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    fn next_pending_entry(&self, timeout: Duration) -> Option<ItemEntry> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending.is_empty() {
            let (guard, _timed_out) = self
                .pending_cond
                .wait_timeout(inner, timeout)
                .unwrap();
            inner = guard;
        }
        inner.pending.pop_front()
    }

    fn feature_id(&self, feature: &str) -> TokenId {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.dictionary.get(feature) {
            return *id;
        }
        inner.next_token += 1;
        let id = inner.next_token;
        inner.dictionary.insert(feature.to_string(), id);
        id
    }
}
