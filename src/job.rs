//! Classification jobs and their state machine

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What a job classifies: one tag, or every tag a user subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Tag { tag_url: String },
    User { user_id: String },
}

/// Lifecycle states of a classification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Training,
    Calculating,
    Classifying,
    Complete,
    Cancelled,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Cancelled | JobState::Error)
    }

    pub fn message(self) -> &'static str {
        match self {
            JobState::Waiting => "Waiting In Queue",
            JobState::Training => "Training",
            JobState::Calculating => "Calculating",
            JobState::Classifying => "Classifying",
            JobState::Complete => "Complete",
            JobState::Cancelled => "Cancelled",
            JobState::Error => "Error",
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    NoSuchTag,
    NoTagsForUser,
    BadJobType,
    CheckedOut,
    PendingItemAddition,
    Unknown,
}

/// Durations a finished job spent in each phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimes {
    pub waiting: Duration,
    pub training: Duration,
    pub calculating: Duration,
    pub classifying: Duration,
}

#[derive(Debug)]
struct JobTimes {
    enqueued_at: Instant,
    started_at: Option<Instant>,
    calculating_at: Option<Instant>,
    classifying_at: Option<Instant>,
    finished_at: Option<Instant>,
}

#[derive(Debug)]
struct JobInner {
    state: JobState,
    progress: f32,
    error: Option<(JobErrorKind, String)>,
    times: JobTimes,
}

/// A queued unit of classification work. Shared between the enqueuing
/// thread, a worker, and HTTP readers; all mutation goes through the
/// interior lock, and cancellation is a separate atomic flag workers
/// poll at phase and item boundaries.
#[derive(Debug)]
pub struct ClassificationJob {
    id: String,
    kind: JobKind,
    created_at: DateTime<Utc>,
    cancelled: AtomicBool,
    attempts: AtomicU32,
    inner: Mutex<JobInner>,
}

impl ClassificationJob {
    fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            created_at: Utc::now(),
            cancelled: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            inner: Mutex::new(JobInner {
                state: JobState::Waiting,
                progress: 0.0,
                error: None,
                times: JobTimes {
                    enqueued_at: Instant::now(),
                    started_at: None,
                    calculating_at: None,
                    classifying_at: None,
                    finished_at: None,
                },
            }),
        }
    }

    pub fn for_tag(tag_url: impl Into<String>) -> Self {
        Self::new(JobKind::Tag {
            tag_url: tag_url.into(),
        })
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::new(JobKind::User {
            user_id: user_id.into(),
        })
    }

    /// Canonical 36-character UUID string.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().unwrap().state
    }

    /// Progress in [0, 100]; non-decreasing until the job terminates.
    pub fn progress(&self) -> f32 {
        self.inner.lock().unwrap().progress
    }

    pub fn error(&self) -> Option<(JobErrorKind, String)> {
        self.inner.lock().unwrap().error.clone()
    }

    /// Move to a new phase, stamping the phase clock. Terminal states are
    /// final; transitions after one are ignored.
    pub fn transition(&self, state: JobState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }

        let now = Instant::now();
        match state {
            JobState::Waiting => inner.times.enqueued_at = now,
            JobState::Training => {
                inner.times.started_at.get_or_insert(now);
            }
            JobState::Calculating => {
                inner.times.calculating_at.get_or_insert(now);
            }
            JobState::Classifying => {
                inner.times.classifying_at.get_or_insert(now);
            }
            JobState::Complete | JobState::Cancelled | JobState::Error => {
                inner.times.finished_at = Some(now);
                if state == JobState::Complete {
                    inner.progress = 100.0;
                }
            }
        }

        inner.state = state;
    }

    /// Raise progress; values below the current mark are ignored.
    pub fn set_progress(&self, progress: f32) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        if progress > inner.progress {
            inner.progress = progress.min(100.0);
        }
    }

    /// Fail the job with a structured error kind.
    pub fn fail(&self, kind: JobErrorKind, message: impl Into<String>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.error = Some((kind, message.into()));
        }
        self.transition(JobState::Error);
    }

    /// Request cancellation. Workers observe the flag at the next phase
    /// or item boundary and move the job to Cancelled themselves.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Count a transient-failure retry; returns the new attempt count.
    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Seconds from enqueue until the job finished, or until now for a
    /// live job.
    pub fn duration(&self) -> f32 {
        let inner = self.inner.lock().unwrap();
        let end = inner.times.finished_at.unwrap_or_else(Instant::now);
        end.duration_since(inner.times.enqueued_at).as_secs_f32()
    }

    /// How long ago the job reached a terminal state, if it has.
    pub fn finished_since(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        inner.times.finished_at.map(|at| at.elapsed())
    }

    /// Per-phase durations for the statistics collector.
    pub fn phase_times(&self) -> PhaseTimes {
        let inner = self.inner.lock().unwrap();
        let times = &inner.times;
        let end = times.finished_at.unwrap_or_else(Instant::now);

        let started = times.started_at.unwrap_or(end);
        let calculating = times.calculating_at.unwrap_or(end);
        let classifying = times.classifying_at.unwrap_or(end);

        PhaseTimes {
            waiting: started.duration_since(times.enqueued_at),
            training: calculating.saturating_duration_since(started),
            calculating: classifying.saturating_duration_since(calculating),
            classifying: end.saturating_duration_since(classifying),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_jobs_wait_with_canonical_ids() {
        let job = ClassificationJob::for_tag("http://example.org/t.atom");
        assert_eq!(job.state(), JobState::Waiting);
        assert_eq!(job.progress(), 0.0);
        assert_eq!(job.id().len(), 36);
        assert!(Uuid::parse_str(job.id()).is_ok());
    }

    #[test]
    fn progress_is_monotone() {
        let job = ClassificationJob::for_tag("t");
        job.set_progress(40.0);
        job.set_progress(20.0);
        assert_eq!(job.progress(), 40.0);
        job.set_progress(250.0);
        assert_eq!(job.progress(), 100.0);
    }

    #[test]
    fn completion_pins_progress_to_one_hundred() {
        let job = ClassificationJob::for_tag("t");
        job.set_progress(30.0);
        job.transition(JobState::Complete);
        assert_eq!(job.progress(), 100.0);
        assert!(job.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let job = ClassificationJob::for_tag("t");
        job.fail(JobErrorKind::NoSuchTag, "gone");
        assert_eq!(job.state(), JobState::Error);

        job.transition(JobState::Classifying);
        assert_eq!(job.state(), JobState::Error);

        job.set_progress(99.0);
        assert_eq!(job.progress(), 0.0);
    }

    #[test]
    fn cancellation_is_a_flag_until_a_worker_observes_it() {
        let job = ClassificationJob::for_tag("t");
        job.cancel();
        assert!(job.is_cancelled());
        assert_eq!(job.state(), JobState::Waiting);

        job.transition(JobState::Cancelled);
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn attempts_count_up() {
        let job = ClassificationJob::for_tag("t");
        assert_eq!(job.record_attempt(), 1);
        assert_eq!(job.record_attempt(), 2);
        assert_eq!(job.attempts(), 2);
    }

    #[test]
    fn phase_times_cover_the_whole_run() {
        let job = ClassificationJob::for_tag("t");
        job.transition(JobState::Training);
        job.transition(JobState::Calculating);
        job.transition(JobState::Classifying);
        job.transition(JobState::Complete);

        let times = job.phase_times();
        let total = times.waiting + times.training + times.calculating + times.classifying;
        assert!(total.as_secs_f32() <= job.duration() + 0.01);
        assert!(job.finished_since().is_some());
    }
}
