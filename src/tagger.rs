//! Taggers: the trained artifact that classifies items against one tag

use crate::atom::parse_tag_document;
use crate::classifier::Classifier;
use crate::clue::ClueStore;
use crate::error::{Result, SiftError};
use crate::item::{Item, ItemCache};
use crate::pool::Pool;
use crate::tagging::Tagging;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Lifecycle of a tagger, from parsed document to classification-ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggerState {
    /// Built from a tag document; pools not yet trained.
    Loaded,
    /// Trained, but some example items were missing from the item cache.
    PartiallyTrained,
    /// Both pools trained from the full example lists.
    Trained,
    /// Clues computed; ready to classify.
    Precomputed,
}

/// One tag's classifier, built from its Atom training document.
pub struct Tagger {
    tag_id: String,
    training_url: String,
    taggings_url: Option<String>,
    user: String,
    tag_name: String,
    updated: Option<DateTime<Utc>>,
    last_classified: Option<DateTime<Utc>>,
    bias: f64,
    state: TaggerState,
    positive_examples: Vec<String>,
    negative_examples: Vec<String>,
    missing_positive_examples: Vec<String>,
    missing_negative_examples: Vec<String>,
    positive_pool: Pool,
    negative_pool: Pool,
    random_background: Pool,
    clues: ClueStore,
    classifier: Arc<dyn Classifier>,
    atom: String,
}

impl Tagger {
    /// Build a tagger from a tag training document.
    ///
    /// `training_url` is the URL the document was actually fetched from;
    /// it overrides whatever the document claims about itself.
    pub fn build(
        document: &str,
        training_url: &str,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Tagger> {
        let doc = parse_tag_document(document)?;
        let (user, tag_name) = owner_from_url(training_url);

        Ok(Tagger {
            tag_id: doc.tag_id.unwrap_or_else(|| training_url.to_string()),
            training_url: training_url.to_string(),
            taggings_url: doc.taggings_url,
            user,
            tag_name,
            updated: doc.updated,
            last_classified: doc.last_classified,
            bias: doc.bias,
            state: TaggerState::Loaded,
            positive_examples: doc.positive_examples,
            negative_examples: doc.negative_examples,
            missing_positive_examples: Vec::new(),
            missing_negative_examples: Vec::new(),
            positive_pool: Pool::new(),
            negative_pool: Pool::new(),
            random_background: Pool::new(),
            clues: ClueStore::new(),
            classifier,
            atom: document.to_string(),
        })
    }

    /// Train both pools from the example lists. Examples absent from the
    /// item cache are recorded as missing and leave the tagger partially
    /// trained.
    pub fn train(&mut self, item_cache: &dyn ItemCache) -> TaggerState {
        let mut positive_pool = Pool::new();
        let mut negative_pool = Pool::new();

        self.missing_positive_examples =
            train_pool(&mut positive_pool, item_cache, &self.positive_examples);
        self.missing_negative_examples =
            train_pool(&mut negative_pool, item_cache, &self.negative_examples);

        self.positive_pool = positive_pool;
        self.negative_pool = negative_pool;

        self.state = if self.missing_positive_examples.is_empty()
            && self.missing_negative_examples.is_empty()
        {
            TaggerState::Trained
        } else {
            debug!(
                tag = %self.tag_id,
                missing = self.missing_positive_examples.len()
                    + self.missing_negative_examples.len(),
                "tagger trained with missing examples"
            );
            TaggerState::PartiallyTrained
        };

        self.state
    }

    /// Compute a clue for every token seen in training. Tokens whose
    /// probability lands exactly on even odds carry no evidence and are
    /// not stored.
    pub fn precompute(&mut self) -> TaggerState {
        let mut tokens: Vec<_> = self
            .positive_pool
            .tokens()
            .chain(self.negative_pool.tokens())
            .collect();
        tokens.sort_unstable();
        tokens.dedup();

        let mut clues = ClueStore::new();
        for token in tokens {
            let probability = self.classifier.token_probability(
                &self.positive_pool,
                &self.negative_pool,
                &self.random_background,
                token,
                1.0,
            );
            if (probability - 0.5).abs() > f64::EPSILON {
                clues.add(token, probability);
            }
        }

        self.clues = clues;
        self.state = TaggerState::Precomputed;
        self.state
    }

    /// Train and precompute in one step, as the cache does after a fetch.
    /// Precomputation only happens when training resolved every example.
    pub fn prepare(&mut self, item_cache: &dyn ItemCache) -> TaggerState {
        if self.state == TaggerState::Loaded {
            self.train(item_cache);
        }
        if self.state == TaggerState::Trained {
            self.precompute();
        }
        self.state
    }

    /// Classify an item, producing a tagging with the combined strength
    /// of its clues under this tag's bias.
    pub fn classify(&self, item: &Item) -> Result<Tagging> {
        if self.state != TaggerState::Precomputed {
            return Err(SiftError::other(format!(
                "tagger for {} is not precomputed",
                self.tag_id
            )));
        }

        let clues = self.classifier.select_clues(&self.clues, item);
        let strength = self.classifier.combine(&clues, self.bias);

        Ok(Tagging {
            user: self.user.clone(),
            tag_name: self.tag_name.clone(),
            tag_id: self.tag_id.clone(),
            item_id: item.id().to_string(),
            strength,
        })
    }

    /// Example ids that were not in the item cache at training time.
    pub fn missing_example_ids(&self) -> impl Iterator<Item = &String> {
        self.missing_positive_examples
            .iter()
            .chain(self.missing_negative_examples.iter())
    }

    pub fn tag_id(&self) -> &str {
        &self.tag_id
    }

    pub fn training_url(&self) -> &str {
        &self.training_url
    }

    pub fn taggings_url(&self) -> Option<&str> {
        self.taggings_url.as_deref()
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn last_classified(&self) -> Option<DateTime<Utc>> {
        self.last_classified
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn state(&self) -> TaggerState {
        self.state
    }

    pub fn positive_examples(&self) -> &[String] {
        &self.positive_examples
    }

    pub fn negative_examples(&self) -> &[String] {
        &self.negative_examples
    }

    pub fn clues(&self) -> &ClueStore {
        &self.clues
    }

    /// The document this tagger was built from, for diagnostics.
    pub fn atom_source(&self) -> &str {
        &self.atom
    }
}

impl std::fmt::Debug for Tagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tagger")
            .field("tag_id", &self.tag_id)
            .field("training_url", &self.training_url)
            .field("state", &self.state)
            .field("bias", &self.bias)
            .field("positive_examples", &self.positive_examples.len())
            .field("negative_examples", &self.negative_examples.len())
            .field("clues", &self.clues.len())
            .finish()
    }
}

fn train_pool(pool: &mut Pool, item_cache: &dyn ItemCache, examples: &[String]) -> Vec<String> {
    let mut missing = Vec::new();
    for id in examples {
        match item_cache.fetch_item(id) {
            Some(item) => pool.add_item(&item),
            None => missing.push(id.clone()),
        }
    }
    missing
}

/// Training URLs name the tag's owner and name in their path, e.g.
/// `/mavis/tags/wheat/training.atom`.
fn owner_from_url(training_url: &str) -> (String, String) {
    if let Ok(url) = url::Url::parse(training_url) {
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        if let Some(pos) = segments.iter().position(|s| *s == "tags") {
            if pos > 0 && pos + 1 < segments.len() {
                return (segments[pos - 1].to_string(), segments[pos + 1].to_string());
            }
        }
    }
    (String::new(), String::new())
}
