//! End-to-end classification scenarios driven through the public API.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tagsift::config::EngineConfig;
use tagsift::{
    ClassificationEngine, Credentials, FetchOutcome, Item, ItemCache, MemoryItemCache,
    MemoryTaggingStore, NaiveBayes, TagRetriever, Tagger, TaggerAcquisition, TaggerCache,
    TaggerCacheOptions, TaggerState,
};

const COMPLETE_TAG: &str = include_str!("fixtures/complete_tag.atom");
const INCOMPLETE_TAG: &str = include_str!("fixtures/incomplete_tag.atom");
const TRAINING_URL: &str = "http://example.org/mavis/tags/a-harvest/training.atom";

/// Serves one document, recording conditional-fetch headers, and answers
/// NotModified once the caller has a fresh copy.
struct RecordingRetriever {
    document: String,
    calls: AtomicUsize,
    if_modified_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl RecordingRetriever {
    fn new(document: &str) -> Self {
        Self {
            document: document.to_string(),
            calls: AtomicUsize::new(0),
            if_modified_since: Mutex::new(Vec::new()),
        }
    }
}

impl TagRetriever for RecordingRetriever {
    fn fetch(
        &self,
        _url: &str,
        if_modified_since: Option<DateTime<Utc>>,
        _credentials: Option<&Credentials>,
    ) -> FetchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.if_modified_since
            .lock()
            .unwrap()
            .push(if_modified_since);
        if if_modified_since.is_some() {
            FetchOutcome::NotModified
        } else {
            FetchOutcome::Ok(self.document.clone())
        }
    }
}

/// Thirteen items: the eight training examples plus five unlabeled
/// candidates. Token 1 marks harvest content, token 3 marks the rest.
fn thirteen_item_cache() -> Arc<MemoryItemCache> {
    let cache = Arc::new(MemoryItemCache::new());
    for i in 1..=4u32 {
        cache.add_item(Item::with_tokens(
            format!("urn:peerworks.org:entry#{i}"),
            &[(1, 3 + i), (2, 2)],
        ));
    }
    for i in 5..=8u32 {
        cache.add_item(Item::with_tokens(
            format!("urn:peerworks.org:entry#{i}"),
            &[(2, 1), (3, 2 + i)],
        ));
    }
    for i in 9..=13u32 {
        cache.add_item(Item::with_tokens(
            format!("urn:candidate#{i}"),
            &[(1, i % 4), (2, 1), (3, i % 3)],
        ));
    }
    cache
}

#[test]
fn a_complete_document_trains_and_classifies_every_item() {
    let item_cache = thirteen_item_cache();

    let mut tagger = Tagger::build(COMPLETE_TAG, TRAINING_URL, Arc::new(NaiveBayes)).unwrap();
    assert_eq!(tagger.state(), TaggerState::Loaded);
    assert_eq!(tagger.train(item_cache.as_ref()), TaggerState::Trained);
    assert_eq!(tagger.precompute(), TaggerState::Precomputed);
    assert!(!tagger.clues().is_empty());

    let items = item_cache.items();
    assert_eq!(items.len(), 13);
    for item in items {
        let tagging = tagger.classify(&item).unwrap();
        assert_eq!(tagging.tag_id, "http://example.org/tags/a-harvest");
        assert_eq!(tagging.user, "mavis");
        assert_eq!(tagging.tag_name, "a-harvest");
        assert!(
            (0.0..=1.0).contains(&tagging.strength),
            "strength {} out of bounds for {}",
            tagging.strength,
            tagging.item_id
        );
    }
}

#[test]
fn conditional_refresh_reuses_the_cached_tagger() {
    let retriever = Arc::new(RecordingRetriever::new(COMPLETE_TAG));
    let cache = TaggerCache::new(
        thirteen_item_cache(),
        retriever.clone(),
        Arc::new(NaiveBayes),
        TaggerCacheOptions::default(),
    );

    let first = match cache.get_tagger(TRAINING_URL) {
        TaggerAcquisition::Acquired(lease) => lease.tagger().clone(),
        _ => panic!("expected Acquired"),
    };

    let second = match cache.get_tagger(TRAINING_URL) {
        TaggerAcquisition::Acquired(lease) => lease.tagger().clone(),
        _ => panic!("expected Acquired"),
    };

    // Same instance, refreshed with the document's own timestamp.
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 2);
    let headers = retriever.if_modified_since.lock().unwrap();
    assert_eq!(headers[0], None);
    assert_eq!(headers[1], first.updated());
    assert!(headers[1].is_some());
}

#[test]
fn missing_examples_pend_until_their_items_arrive() {
    let retriever = Arc::new(RecordingRetriever::new(INCOMPLETE_TAG));
    let item_cache = Arc::new(MemoryItemCache::new());
    item_cache.add_item(Item::with_tokens("urn:peerworks.org:entry#1", &[(1, 4)]));

    let cache = TaggerCache::new(
        item_cache.clone(),
        retriever,
        Arc::new(NaiveBayes),
        TaggerCacheOptions::default(),
    );

    assert!(matches!(
        cache.get_tagger(TRAINING_URL),
        TaggerAcquisition::PendingItemAddition
    ));

    let mut pending = item_cache.pending_entry_ids();
    pending.sort();
    assert_eq!(
        pending,
        vec!["urn:peerworks.org:entry#901", "urn:peerworks.org:entry#902"]
    );

    item_cache.add_item(Item::with_tokens("urn:peerworks.org:entry#901", &[(1, 2)]));
    item_cache.add_item(Item::with_tokens("urn:peerworks.org:entry#902", &[(3, 5)]));

    match cache.get_tagger(TRAINING_URL) {
        TaggerAcquisition::Acquired(lease) => {
            assert_eq!(lease.state(), TaggerState::Precomputed)
        }
        _ => panic!("expected Acquired after items arrived"),
    }
}

#[test]
fn an_engine_run_stores_taggings_for_every_candidate() {
    let item_cache = thirteen_item_cache();
    let store = Arc::new(MemoryTaggingStore::new());
    let cache = TaggerCache::new(
        item_cache.clone(),
        Arc::new(RecordingRetriever::new(COMPLETE_TAG)),
        Arc::new(NaiveBayes),
        TaggerCacheOptions::default(),
    );
    let engine = ClassificationEngine::new(
        EngineConfig::default(),
        cache,
        item_cache,
        store.clone(),
        None,
    );

    engine.start();
    let job = engine.add_tag_job(TRAINING_URL);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !job.state().is_terminal() {
        assert!(Instant::now() < deadline, "job never finished");
        std::thread::sleep(Duration::from_millis(10));
    }
    engine.stop();

    assert_eq!(job.state(), tagsift::JobState::Complete);
    assert_eq!(job.progress(), 100.0);

    let taggings = store.taggings();
    assert_eq!(taggings.len(), 13);
    let distinct: HashMap<&str, &tagsift::Tagging> =
        taggings.iter().map(|t| (t.item_id.as_str(), t)).collect();
    assert_eq!(distinct.len(), 13);
    assert!(taggings.iter().all(|t| (0.0..=1.0).contains(&t.strength)));
}

#[test]
fn cancellation_releases_the_tagger() {
    let item_cache = thirteen_item_cache();
    let cache = TaggerCache::new(
        item_cache.clone(),
        Arc::new(RecordingRetriever::new(COMPLETE_TAG)),
        Arc::new(NaiveBayes),
        TaggerCacheOptions::default(),
    );
    let engine = ClassificationEngine::new(
        EngineConfig::default(),
        cache.clone(),
        item_cache,
        Arc::new(MemoryTaggingStore::new()),
        None,
    );

    engine.start();
    let job = engine.add_tag_job(TRAINING_URL);
    job.cancel();

    let deadline = Instant::now() + Duration::from_secs(5);
    while job.state() != tagsift::JobState::Cancelled
        && job.state() != tagsift::JobState::Complete
    {
        assert!(Instant::now() < deadline, "job never settled");
        std::thread::sleep(Duration::from_millis(10));
    }
    engine.stop();

    // Whether the cancel landed before or mid-run, the checkout is gone.
    match cache.get_tagger(TRAINING_URL) {
        TaggerAcquisition::Acquired(_) => {}
        _ => panic!("tagger was not released"),
    }
}
