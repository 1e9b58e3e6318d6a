//! The tagger cache and its checkout protocol
//!
//! Taggers are cached per training URL and handed out under an exclusive
//! checkout: at most one caller works with a given tagger at a time, and
//! every acquisition ends in exactly one release. A single mutex guards
//! the cached taggers, the checked-out set, the failed set, and the
//! cached tag index.

use crate::atom::parse_tag_index;
use crate::classifier::Classifier;
use crate::error::{Result, SiftError};
use crate::fetch::{Credentials, FetchOutcome, TagRetriever};
use crate::item::{ItemCache, ItemEntry};
use crate::tagger::{Tagger, TaggerState};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const BADLY_FORMED_MSG: &str = "The tag document was badly formed";

/// Cache construction options.
#[derive(Debug, Clone, Default)]
pub struct TaggerCacheOptions {
    /// URL of the tag index document.
    pub tag_index_url: Option<String>,
    /// Credentials forwarded to the fetcher.
    pub credentials: Option<Credentials>,
    /// Threads in the background prefetch pool.
    pub prefetch_threads: usize,
}

/// Outcome of asking the cache for a tagger.
pub enum TaggerAcquisition {
    /// A trained and precomputed tagger, held under checkout until the
    /// lease is dropped.
    Acquired(TaggerLease),
    /// Another caller holds the checkout; retry later.
    CheckedOut,
    /// The training document could not be fetched or parsed.
    NotFound(String),
    /// Training examples were missing; their extraction has been
    /// scheduled. Retry once the items have been added.
    PendingItemAddition,
}

/// An exclusively checked-out tagger. Dropping the lease releases the
/// checkout.
pub struct TaggerLease {
    cache: Arc<TaggerCache>,
    tagger: Arc<Tagger>,
}

impl TaggerLease {
    pub fn tagger(&self) -> &Arc<Tagger> {
        &self.tagger
    }
}

impl Deref for TaggerLease {
    type Target = Tagger;

    fn deref(&self) -> &Tagger {
        &self.tagger
    }
}

impl Drop for TaggerLease {
    fn drop(&mut self) {
        self.cache.release(self.tagger.training_url());
    }
}

enum Checkout {
    CheckedOut,
    Cached(Arc<Tagger>),
    NotCached,
}

enum Prepared {
    Ready { tagger: Arc<Tagger>, is_new: bool },
    Pending,
    NotFound(String),
}

struct CacheState {
    taggers: HashMap<String, Arc<Tagger>>,
    checked_out: HashSet<String>,
    failed: HashSet<String>,
    tag_urls: Option<Arc<Vec<String>>>,
    tag_urls_updated: Option<DateTime<Utc>>,
}

struct PrefetchPool {
    sender: Sender<String>,
    _workers: Vec<JoinHandle<()>>,
}

/// Concurrent cache of taggers keyed by training URL.
pub struct TaggerCache {
    item_cache: Arc<dyn ItemCache>,
    retriever: Arc<dyn TagRetriever>,
    classifier: Arc<dyn Classifier>,
    options: TaggerCacheOptions,
    state: Mutex<CacheState>,
    prefetch: Mutex<Option<PrefetchPool>>,
}

impl TaggerCache {
    pub fn new(
        item_cache: Arc<dyn ItemCache>,
        retriever: Arc<dyn TagRetriever>,
        classifier: Arc<dyn Classifier>,
        options: TaggerCacheOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            item_cache,
            retriever,
            classifier,
            options,
            state: Mutex::new(CacheState {
                taggers: HashMap::new(),
                checked_out: HashSet::new(),
                failed: HashSet::new(),
                tag_urls: None,
                tag_urls_updated: None,
            }),
            prefetch: Mutex::new(None),
        })
    }

    /// Get the tagger for a training URL, fetching, training, and
    /// precomputing it as needed. On success the tagger stays checked
    /// out until the returned lease is dropped.
    pub fn get_tagger(self: &Arc<Self>, url: &str) -> TaggerAcquisition {
        let cached = match self.checkout(url) {
            Checkout::CheckedOut => {
                debug!(url, "tagger is already checked out");
                return TaggerAcquisition::CheckedOut;
            }
            Checkout::Cached(tagger) => Some(tagger),
            Checkout::NotCached => None,
        };

        // Checked out from here on: every early return must release.
        match self.fetch_and_prepare(url, cached) {
            Prepared::Ready { tagger, is_new } => {
                if is_new {
                    self.insert(tagger.clone());
                }
                TaggerAcquisition::Acquired(TaggerLease {
                    cache: self.clone(),
                    tagger,
                })
            }
            Prepared::Pending => {
                self.release(url);
                TaggerAcquisition::PendingItemAddition
            }
            Prepared::NotFound(message) => {
                self.release(url);
                TaggerAcquisition::NotFound(message)
            }
        }
    }

    /// Fetch or refresh the document and drive the tagger through
    /// training and precomputation.
    fn fetch_and_prepare(&self, url: &str, cached: Option<Arc<Tagger>>) -> Prepared {
        let fetched = match &cached {
            None => self.fetch_tagger(url, None),
            Some(tagger) => self.fetch_tagger(url, tagger.updated()),
        };

        let mut tagger = match fetched {
            Ok(Some(tagger)) => tagger,
            Ok(None) => match cached {
                // Unchanged on the service; the cached copy stands.
                Some(tagger) => {
                    debug!(url, "tag not modified, using cached version");
                    return Prepared::Ready {
                        tagger,
                        is_new: false,
                    };
                }
                None => return Prepared::NotFound(format!("{url} could not be found")),
            },
            Err(e) => match cached {
                Some(tagger) => {
                    warn!(url, error = %e, "refresh failed, using cached version");
                    return Prepared::Ready {
                        tagger,
                        is_new: false,
                    };
                }
                None => return Prepared::NotFound(e.to_string()),
            },
        };

        match tagger.prepare(self.item_cache.as_ref()) {
            TaggerState::Precomputed => Prepared::Ready {
                tagger: Arc::new(tagger),
                is_new: true,
            },
            TaggerState::PartiallyTrained => {
                // Hand the missing ids to the item cache for feature
                // extraction; the tagger itself is not worth caching yet.
                for id in tagger.missing_example_ids() {
                    info!(tag = %tagger.tag_id(), item = %id, "scheduling item addition");
                    self.item_cache.add_entry(ItemEntry {
                        id: id.clone(),
                        document: None,
                    });
                }
                Prepared::Pending
            }
            state => {
                error!(url, ?state, "unaccounted for tagger state");
                Prepared::NotFound("Unaccounted for tagger state".to_string())
            }
        }
    }

    /// Conditional fetch of a training document. `Ok(None)` means the
    /// document has not changed since `if_modified_since`.
    fn fetch_tagger(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Tagger>> {
        match self
            .retriever
            .fetch(url, if_modified_since, self.options.credentials.as_ref())
        {
            FetchOutcome::Ok(document) => {
                match Tagger::build(&document, url, self.classifier.clone()) {
                    Ok(tagger) => Ok(Some(tagger)),
                    Err(e) => {
                        info!(url, error = %e, "tag document was badly formed");
                        Err(SiftError::parse(BADLY_FORMED_MSG))
                    }
                }
            }
            FetchOutcome::NotModified => Ok(None),
            FetchOutcome::NotFound(message) => Err(SiftError::NoSuchTag(message)),
            FetchOutcome::Fail(message) => Err(SiftError::Other(message)),
        }
    }

    /// Mark a URL as checked out. Reports whether it already was, and
    /// hands back the cached tagger when there is one.
    fn checkout(&self, url: &str) -> Checkout {
        let mut state = self.state.lock().unwrap();
        if state.checked_out.contains(url) {
            return Checkout::CheckedOut;
        }
        debug!(url, "checking out");
        state.checked_out.insert(url.to_string());
        match state.taggers.get(url) {
            Some(tagger) => Checkout::Cached(tagger.clone()),
            None => Checkout::NotCached,
        }
    }

    /// Release a checkout taken by [`Self::get_tagger`].
    pub fn release(&self, url: &str) {
        debug!(url, "releasing tagger");
        self.state.lock().unwrap().checked_out.remove(url);
    }

    fn insert(&self, tagger: Arc<Tagger>) {
        let mut state = self.state.lock().unwrap();
        let url = tagger.training_url().to_string();
        if state.taggers.insert(url.clone(), tagger).is_some() {
            debug!(url, "replacing tagger in cache");
        } else {
            debug!(url, "inserting tagger into cache for the first time");
        }
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.state.lock().unwrap().taggers.contains_key(url)
    }

    /// True when a background fetch of this tag failed.
    pub fn is_failed_tag(&self, url: &str) -> bool {
        self.state.lock().unwrap().failed.contains(url)
    }

    fn mark_failed(&self, url: &str) {
        self.state.lock().unwrap().failed.insert(url.to_string());
    }

    /// Fetch the tag index: the ordered list of training URLs the
    /// service knows about. A stale cached copy is served when the
    /// service is unreachable or returns garbage.
    pub fn fetch_tags(&self) -> Result<Arc<Vec<String>>> {
        let index_url = self
            .options
            .tag_index_url
            .as_ref()
            .ok_or_else(|| SiftError::TagIndex("no tag index defined".to_string()))?;

        let (cached, since) = {
            let state = self.state.lock().unwrap();
            (state.tag_urls.clone(), state.tag_urls_updated)
        };

        match self
            .retriever
            .fetch(index_url, since, self.options.credentials.as_ref())
        {
            FetchOutcome::Ok(document) => match parse_tag_index(&document) {
                Ok(index) => {
                    let urls = Arc::new(index.tag_urls);
                    let mut state = self.state.lock().unwrap();
                    state.tag_urls = Some(urls.clone());
                    state.tag_urls_updated = index.updated;
                    Ok(urls)
                }
                Err(e) => match cached {
                    Some(urls) => {
                        warn!(error = %e, "tag index unparseable, returning cached copy");
                        Ok(urls)
                    }
                    None => Err(SiftError::TagIndex("parser error in tag index".to_string())),
                },
            },
            FetchOutcome::NotModified => match cached {
                Some(urls) => {
                    debug!("returning cached version of tag index");
                    Ok(urls)
                }
                None => Err(SiftError::TagIndex(
                    "tag index not modified but nothing cached".to_string(),
                )),
            },
            FetchOutcome::NotFound(message) | FetchOutcome::Fail(message) => match cached {
                Some(urls) => {
                    debug!("returning cached version of tag index");
                    Ok(urls)
                }
                None => Err(SiftError::TagIndex(message)),
            },
        }
    }

    /// Warm the cache for a tag without blocking the caller. Work runs
    /// on a small fixed pool; a failed fetch marks the tag in the failed
    /// set, readable through [`Self::is_failed_tag`].
    pub fn prefetch(self: &Arc<Self>, url: &str) {
        let mut pool = self.prefetch.lock().unwrap();
        let pool = pool.get_or_insert_with(|| {
            PrefetchPool::start(self, self.options.prefetch_threads.max(1))
        });
        if pool.sender.send(url.to_string()).is_err() {
            warn!(url, "prefetch pool is gone, dropping request");
        }
    }

    fn background_fetch(self: &Arc<Self>, url: &str) {
        debug!(url, "background fetcher started");
        match self.get_tagger(url) {
            TaggerAcquisition::Acquired(lease) => drop(lease),
            _ => self.mark_failed(url),
        }
    }
}

impl PrefetchPool {
    fn start(cache: &Arc<TaggerCache>, threads: usize) -> Self {
        let (sender, receiver) = channel::<String>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..threads)
            .map(|i| {
                let receiver: Arc<Mutex<Receiver<String>>> = receiver.clone();
                let cache: Weak<TaggerCache> = Arc::downgrade(cache);
                thread::Builder::new()
                    .name(format!("tag-prefetch-{i}"))
                    .spawn(move || loop {
                        let url = {
                            let receiver = receiver.lock().unwrap();
                            receiver.recv()
                        };
                        match url {
                            Ok(url) => match cache.upgrade() {
                                Some(cache) => cache.background_fetch(&url),
                                None => break,
                            },
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn prefetch worker")
            })
            .collect();

        Self {
            sender,
            _workers: workers,
        }
    }
}
