//! The classification engine: job management and the worker pool

use crate::config::EngineConfig;
use crate::feature_extractor::FeatureExtractor;
use crate::item::ItemCache;
use crate::job::{ClassificationJob, JobErrorKind, JobKind, JobState};
use crate::job_queue::JobQueue;
use crate::stats::PerformanceStats;
use crate::tagger_cache::{TaggerAcquisition, TaggerCache};
use crate::tagging::TaggingStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The engine owns the job map, the work queue, and the worker pool,
/// and wires them to the tagger cache, item cache, and tagging store.
pub struct ClassificationEngine {
    config: EngineConfig,
    queue: Arc<JobQueue<Arc<ClassificationJob>>>,
    jobs: Mutex<HashMap<String, Arc<ClassificationJob>>>,
    tagger_cache: Arc<TaggerCache>,
    item_cache: Arc<dyn ItemCache>,
    tagging_store: Arc<dyn TaggingStore>,
    extractor: Option<Arc<FeatureExtractor>>,
    stats: Mutex<PerformanceStats>,
    running: AtomicBool,
    killed: AtomicBool,
    suspended: Mutex<bool>,
    suspend_changed: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ClassificationEngine {
    pub fn new(
        config: EngineConfig,
        tagger_cache: Arc<TaggerCache>,
        item_cache: Arc<dyn ItemCache>,
        tagging_store: Arc<dyn TaggingStore>,
        extractor: Option<Arc<FeatureExtractor>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue: Arc::new(JobQueue::new()),
            jobs: Mutex::new(HashMap::new()),
            tagger_cache,
            item_cache,
            tagging_store,
            extractor,
            stats: Mutex::new(PerformanceStats::default()),
            running: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            suspended: Mutex::new(false),
            suspend_changed: Condvar::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the classification and insertion workers.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock().unwrap();
        for i in 0..self.config.classifier_workers.max(1) {
            let engine = self.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("classifier-{i}"))
                    .spawn(move || engine.classification_worker())
                    .expect("failed to spawn classification worker"),
            );
        }
        for i in 0..self.config.insertion_workers {
            let engine = self.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("inserter-{i}"))
                    .spawn(move || engine.insertion_worker())
                    .expect("failed to spawn insertion worker"),
            );
        }

        info!(
            classifier_workers = self.config.classifier_workers.max(1),
            insertion_workers = self.config.insertion_workers,
            "classification engine started"
        );
    }

    /// Stop accepting work, drain the queue, and join the workers.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue.close();
        self.resume();
        self.join_workers();
        info!("classification engine stopped");
    }

    /// Abandon all in-flight and queued work immediately.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.queue.clear();
        self.queue.close();
        self.resume();
        self.join_workers();
        info!("classification engine killed");
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    /// Park every worker at its next scheduling point, between jobs.
    pub fn suspend(&self) {
        *self.suspended.lock().unwrap() = true;
        info!("classification engine suspended");
    }

    /// Wake suspended workers.
    pub fn resume(&self) {
        *self.suspended.lock().unwrap() = false;
        self.suspend_changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.lock().unwrap()
    }

    /// Queue a classification job for one tag.
    pub fn add_tag_job(&self, tag_url: impl Into<String>) -> Arc<ClassificationJob> {
        self.add_job(Arc::new(ClassificationJob::for_tag(tag_url)))
    }

    /// Queue a classification job covering every tag a user subscribes to.
    pub fn add_user_job(&self, user_id: impl Into<String>) -> Arc<ClassificationJob> {
        self.add_job(Arc::new(ClassificationJob::for_user(user_id)))
    }

    fn add_job(&self, job: Arc<ClassificationJob>) -> Arc<ClassificationJob> {
        self.sweep_expired_jobs();
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id().to_string(), job.clone());
        self.queue.enqueue(job.clone());
        debug!(job = job.id(), "job enqueued");
        job
    }

    /// Drop terminal jobs that finished more than `auto_delete_after`
    /// seconds ago. Runs on every enqueue.
    fn sweep_expired_jobs(&self) {
        let ttl = Duration::from_secs(self.config.auto_delete_after);
        let mut jobs = self.jobs.lock().unwrap();
        jobs.retain(|id, job| match job.finished_since() {
            Some(elapsed) if elapsed > ttl => {
                debug!(job = id.as_str(), "auto-deleting finished job");
                false
            }
            _ => true,
        });
    }

    pub fn fetch_job(&self, id: &str) -> Option<Arc<ClassificationJob>> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    /// Remove a job from the system. Only terminal jobs can be removed.
    pub fn remove_job(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get(id) {
            Some(job) if job.state().is_terminal() => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn num_jobs_in_system(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn num_waiting_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        *self.stats.lock().unwrap()
    }

    pub fn tagger_cache(&self) -> &Arc<TaggerCache> {
        &self.tagger_cache
    }

    /// Block while the engine is suspended. Workers call this between
    /// jobs, never inside one.
    fn wait_while_suspended(&self) {
        let mut suspended = self.suspended.lock().unwrap();
        while *suspended && !self.killed.load(Ordering::SeqCst) {
            suspended = self.suspend_changed.wait(suspended).unwrap();
        }
    }

    fn classification_worker(self: Arc<Self>) {
        debug!("classification worker up");
        loop {
            self.wait_while_suspended();
            if self.killed.load(Ordering::SeqCst) {
                break;
            }
            let Some(job) = self.queue.dequeue_or_wait() else {
                break;
            };
            // A job handed over while the engine was suspending still
            // waits here; suspension parks workers between jobs.
            self.wait_while_suspended();
            if self.killed.load(Ordering::SeqCst) {
                break;
            }
            self.run_job(&job);
        }
        debug!("classification worker down");
    }

    fn run_job(&self, job: &Arc<ClassificationJob>) {
        if job.is_cancelled() {
            job.transition(JobState::Cancelled);
            return;
        }

        match job.kind().clone() {
            JobKind::Tag { tag_url } => self.classify_tags(job, &[tag_url]),
            JobKind::User { user_id } => match self.tags_for_user(&user_id) {
                Ok(tag_urls) if tag_urls.is_empty() => {
                    job.fail(
                        JobErrorKind::NoTagsForUser,
                        format!("no tags to classify for user {user_id}"),
                    );
                }
                Ok(tag_urls) => self.classify_tags(job, &tag_urls),
                Err(e) => job.fail(JobErrorKind::NoTagsForUser, e.to_string()),
            },
        }
    }

    /// A user's tags are the index entries under that user's path.
    fn tags_for_user(&self, user_id: &str) -> crate::error::Result<Vec<String>> {
        let urls = self.tagger_cache.fetch_tags()?;
        let needle = format!("/{user_id}/");
        Ok(urls
            .iter()
            .filter(|url| url.contains(&needle))
            .cloned()
            .collect())
    }

    /// Drive a job through training, calculating, and classifying for
    /// each of its tags. Transient cache outcomes re-enqueue the job
    /// with backoff instead of failing it.
    fn classify_tags(&self, job: &Arc<ClassificationJob>, tag_urls: &[String]) {
        job.transition(JobState::Training);

        let mut tags_classified = 0u32;
        let mut items_classified = 0u32;

        for (tag_index, tag_url) in tag_urls.iter().enumerate() {
            if job.is_cancelled() {
                job.transition(JobState::Cancelled);
                return;
            }

            let lease = match self.tagger_cache.get_tagger(tag_url) {
                TaggerAcquisition::Acquired(lease) => lease,
                TaggerAcquisition::CheckedOut => {
                    self.retry_or_fail(job, JobErrorKind::CheckedOut, tag_url);
                    return;
                }
                TaggerAcquisition::PendingItemAddition => {
                    self.retry_or_fail(job, JobErrorKind::PendingItemAddition, tag_url);
                    return;
                }
                TaggerAcquisition::NotFound(message) => {
                    if tag_urls.len() == 1 {
                        job.fail(JobErrorKind::NoSuchTag, message);
                        return;
                    }
                    // One bad tag does not sink a whole user job.
                    warn!(
                        tag_url = tag_url.as_str(),
                        error = message.as_str(),
                        "skipping missing tag"
                    );
                    continue;
                }
            };

            // Precomputation already happened inside the cache; the
            // calculating phase survives for its timestamp.
            job.transition(JobState::Calculating);
            job.transition(JobState::Classifying);

            let items = self.item_cache.items();
            let per_tag = 100.0 / tag_urls.len() as f32;

            for (i, item) in items.iter().enumerate() {
                if job.is_cancelled() {
                    job.transition(JobState::Cancelled);
                    return;
                }
                match lease.classify(item) {
                    Ok(tagging) => {
                        items_classified += 1;
                        if let Err(e) = self.tagging_store.store(tagging) {
                            warn!(error = %e, "failed to store tagging");
                        }
                    }
                    Err(e) => warn!(error = %e, item = item.id(), "classification failed"),
                }
                let done = (i + 1) as f32 / items.len().max(1) as f32;
                job.set_progress(per_tag * (tag_index as f32 + done));
            }

            tags_classified += 1;
            drop(lease);
        }

        job.transition(JobState::Complete);
        self.stats
            .lock()
            .unwrap()
            .record_classification(job.phase_times(), tags_classified, items_classified);
        debug!(job = job.id(), tags_classified, items_classified, "job complete");
    }

    /// Re-enqueue a transiently blocked job after a short backoff, until
    /// its attempts run out.
    fn retry_or_fail(&self, job: &Arc<ClassificationJob>, kind: JobErrorKind, tag_url: &str) {
        let attempts = job.record_attempt();
        if attempts > self.config.max_retries {
            job.fail(
                kind,
                format!("{tag_url} still unavailable after {attempts} attempts"),
            );
            return;
        }

        debug!(
            job = job.id(),
            tag_url, attempts, "tagger unavailable, re-enqueueing"
        );
        thread::sleep(Duration::from_millis(self.config.retry_backoff_ms));
        job.transition(JobState::Waiting);
        if !self.queue.enqueue(job.clone()) {
            job.fail(kind, "engine shut down while job was waiting to retry");
        }
    }

    fn insertion_worker(self: Arc<Self>) {
        debug!("insertion worker up");
        loop {
            self.wait_while_suspended();
            if self.killed.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
                break;
            }

            let waited = Instant::now();
            let Some(entry) = self
                .item_cache
                .next_pending_entry(Duration::from_millis(200))
            else {
                continue;
            };
            let waited = waited.elapsed();

            let started = Instant::now();
            match &self.extractor {
                Some(extractor) => match extractor.extract(&entry, self.item_cache.as_ref()) {
                    Ok(item) => {
                        debug!(item = item.id(), tokens = item.num_tokens(), "item extracted");
                        self.item_cache.add_item(item);
                    }
                    Err(e) => warn!(entry = entry.id.as_str(), error = %e, "extraction failed"),
                },
                None => warn!(
                    entry = entry.id.as_str(),
                    "no tokenizer configured, dropping entry"
                ),
            }

            self.stats
                .lock()
                .unwrap()
                .record_insertion(waited, started.elapsed());
        }
        debug!("insertion worker down");
    }
}
