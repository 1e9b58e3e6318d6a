//! # tagsift - Naive Bayes Tag Classification Server
//!
//! A long-running classification server. For each user-defined tag it
//! fetches an Atom training document from the tag service, trains a Naive
//! Bayes classifier over the tag's example items, precomputes per-token
//! clues, and classifies candidate items into taggings with a strength.
//!
//! ## Architecture
//!
//! - Classification math: Robinson per-token probabilities combined with
//!   Fisher's chi-squared method
//! - Tagger cache: per-URL taggers under an exclusive checkout protocol
//!   with conditional refresh and background prefetch
//! - Engine: a worker pool driving jobs through a waiting → training →
//!   calculating → classifying → complete state machine
//! - Control plane: a thin HTTP layer for queueing and inspecting jobs

pub mod atom;
pub mod classifier;
pub mod clue;
pub mod config;
pub mod engine;
pub mod error;
pub mod feature_extractor;
pub mod fetch;
pub mod item;
pub mod job;
pub mod job_queue;
pub mod pool;
pub mod server;
pub mod stats;
pub mod tagger;
pub mod tagger_cache;
pub mod tagging;
pub mod tokenizer;

pub use classifier::{Classifier, NaiveBayes};
pub use clue::{Clue, ClueStore};
pub use config::Config;
pub use engine::ClassificationEngine;
pub use error::{Result, SiftError};
pub use feature_extractor::FeatureExtractor;
pub use fetch::{Credentials, FetchOutcome, HttpTagRetriever, TagRetriever};
pub use item::{Item, ItemCache, ItemEntry, MemoryItemCache, TokenId};
pub use job::{ClassificationJob, JobErrorKind, JobKind, JobState};
pub use job_queue::JobQueue;
pub use pool::Pool;
pub use stats::PerformanceStats;
pub use tagger::{Tagger, TaggerState};
pub use tagger_cache::{TaggerAcquisition, TaggerCache, TaggerCacheOptions, TaggerLease};
pub use tagging::{MemoryTaggingStore, Tagging, TaggingStore};
