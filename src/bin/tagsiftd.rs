//! Tagsift Server
//!
//! Wires the classification engine to the tag service and serves the
//! HTTP control plane until interrupted. The engine runs on plain
//! threads; only the control plane lives on the async runtime.

use clap::Parser;
use std::sync::Arc;
use tagsift::{
    ClassificationEngine, Config, FeatureExtractor, HttpTagRetriever, MemoryItemCache,
    MemoryTaggingStore, NaiveBayes, TaggerCache, TaggerCacheOptions,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tagsiftd", version, about = "Naive Bayes tag classification server")]
struct Args {
    /// Bind address for the control plane
    #[arg(long, env = "TAGSIFT_HOST")]
    host: Option<String>,

    /// Bind port for the control plane
    #[arg(long, env = "TAGSIFT_PORT")]
    port: Option<u16>,

    /// Number of classification workers
    #[arg(long)]
    classifier_workers: Option<usize>,

    /// Number of insertion workers
    #[arg(long)]
    insertion_workers: Option<usize>,

    /// URL of the tag index document
    #[arg(long, env = "TAGSIFT_TAG_INDEX_URL")]
    tag_index_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tagsift=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load();

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(workers) = args.classifier_workers {
        config.engine.classifier_workers = workers;
    }
    if let Some(workers) = args.insertion_workers {
        config.engine.insertion_workers = workers;
    }
    if args.tag_index_url.is_some() {
        config.tag_service.tag_index_url = args.tag_index_url;
    }

    let item_cache = Arc::new(MemoryItemCache::new());
    let tagging_store = Arc::new(MemoryTaggingStore::new());
    let retriever = Arc::new(HttpTagRetriever::new()?);
    let extractor = Arc::new(FeatureExtractor::new(config.tokenizer_url.clone())?);

    let tagger_cache = TaggerCache::new(
        item_cache.clone(),
        retriever,
        Arc::new(NaiveBayes),
        TaggerCacheOptions {
            tag_index_url: config.tag_service.tag_index_url.clone(),
            credentials: config.tag_service.credentials.clone(),
            prefetch_threads: config.tag_service.prefetch_threads,
        },
    );

    let engine = ClassificationEngine::new(
        config.engine.clone(),
        tagger_cache.clone(),
        item_cache,
        tagging_store,
        Some(extractor),
    );
    engine.start();

    // Warm the cache for every known tag before traffic arrives.
    if config.tag_service.tag_index_url.is_some() {
        match tagger_cache.fetch_tags() {
            Ok(urls) => {
                info!(tags = urls.len(), "prefetching tag index");
                for url in urls.iter() {
                    tagger_cache.prefetch(url);
                }
            }
            Err(e) => info!(error = %e, "tag index unavailable at startup"),
        }
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let server = {
            let engine = engine.clone();
            let host = config.server.host.clone();
            let port = config.server.port;
            tokio::spawn(async move { tagsift::server::serve(engine, &host, port).await })
        };

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        server.abort();
        Ok::<(), anyhow::Error>(())
    })?;

    engine.stop();
    Ok(())
}
