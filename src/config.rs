//! Configuration for the classification service

use crate::fetch::Credentials;
use serde::{Deserialize, Serialize};

/// Classification service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP control plane configuration
    pub server: ServerConfig,
    /// Classification engine configuration
    pub engine: EngineConfig,
    /// Tag service configuration
    pub tag_service: TagServiceConfig,
    /// Tokenizer service URL, if feature extraction is delegated
    pub tokenizer_url: Option<String>,
}

/// Bind address for the HTTP control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Worker pool sizing and job housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of classification workers
    pub classifier_workers: usize,
    /// Number of item insertion workers
    pub insertion_workers: usize,
    /// Seconds a completed job is kept before auto-deletion
    pub auto_delete_after: u64,
    /// Maximum re-enqueue attempts for transient failures
    pub max_retries: u32,
    /// Delay before a transiently failed job is re-enqueued, in milliseconds
    pub retry_backoff_ms: u64,
}

/// Where and how to reach the tag service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagServiceConfig {
    /// URL of the tag index document
    pub tag_index_url: Option<String>,
    /// Credentials forwarded to the fetcher
    pub credentials: Option<Credentials>,
    /// Threads in the background prefetch pool
    pub prefetch_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8008,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier_workers: 1,
            insertion_workers: 1,
            auto_delete_after: 900,
            max_retries: 5,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for TagServiceConfig {
    fn default() -> Self {
        Self {
            tag_index_url: None,
            credentials: None,
            prefetch_threads: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            tag_service: TagServiceConfig::default(),
            tokenizer_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let server = ServerConfig {
            host: std::env::var("TAGSIFT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("TAGSIFT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8008),
        };

        let engine = EngineConfig {
            classifier_workers: std::env::var("TAGSIFT_CLASSIFIER_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            insertion_workers: std::env::var("TAGSIFT_INSERTION_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            auto_delete_after: std::env::var("TAGSIFT_AUTO_DELETE_AFTER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
            max_retries: std::env::var("TAGSIFT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retry_backoff_ms: std::env::var("TAGSIFT_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
        };

        let credentials = match (
            std::env::var("TAGSIFT_ACCESS_ID").ok(),
            std::env::var("TAGSIFT_SECRET_KEY").ok(),
        ) {
            (Some(access_id), Some(secret_key)) => Some(Credentials {
                access_id,
                secret_key,
            }),
            _ => None,
        };

        let tag_service = TagServiceConfig {
            tag_index_url: std::env::var("TAGSIFT_TAG_INDEX_URL").ok(),
            credentials,
            prefetch_threads: std::env::var("TAGSIFT_PREFETCH_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        };

        Self {
            server,
            engine,
            tag_service,
            tokenizer_url: std::env::var("TAGSIFT_TOKENIZER_URL").ok(),
        }
    }
}
