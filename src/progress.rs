//! Progress reporting for deck conversions.
//!
//! Two layers:
//!
//! * [`ConversionProgressCallback`]: the events the pipeline emits while it
//!   works (stage changes, pages stored, success, failure). The CLI renders
//!   them as a terminal progress bar.
//! * [`ProgressTracker`]: a process-wide `job id → JobProgress` map that
//!   turns those events into the `{current, total, status}` record HTTP
//!   clients poll. [`ProgressTracker::reporter`] hands out a callback bound
//!   to one job.
//!
//! # Example
//!
//! ```rust
//! use slidepull::progress::{ConversionProgressCallback, JobStatus, ProgressTracker, Stage};
//!
//! let tracker = ProgressTracker::new();
//! let job = tracker.register("alice");
//! let reporter = tracker.reporter(job);
//!
//! reporter.on_stage(Stage::Rendering);
//! reporter.on_conversion_start(3);
//! reporter.on_page_complete(1, 3);
//!
//! let snapshot = tracker.get(job).unwrap();
//! assert_eq!(snapshot.status, JobStatus::Rendering);
//! assert_eq!((snapshot.current, snapshot.total), (1, 3));
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Pipeline stage, reported before the stage starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Converting,
    Rendering,
    Saving,
}

/// Called by the conversion pipeline as it makes progress.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages complete in page order.
pub trait ConversionProgressCallback: Send + Sync {
    /// Entering a new stage.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Page count is known. Called once, after the PDF has been opened.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// A page's full image and thumbnail are both stored.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: total pages in the deck
    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Deck and pages are committed.
    fn on_conversion_complete(&self, deck_id: i64, total_pages: usize) {
        let _ = (deck_id, total_pages);
    }

    /// The conversion failed and has been rolled back.
    fn on_conversion_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias for a shared callback.
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

// ── Job tracking ─────────────────────────────────────────────────────────

/// Identifier handed to clients for polling.
pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Converting,
    Rendering,
    Saving,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl From<Stage> for JobStatus {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Queued => JobStatus::Queued,
            Stage::Converting => JobStatus::Converting,
            Stage::Rendering => JobStatus::Rendering,
            Stage::Saving => JobStatus::Saving,
        }
    }
}

/// Snapshot of one job, serialised as the polling response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    #[serde(skip)]
    pub owner: String,
    pub status: JobStatus,
    pub current: usize,
    pub total: usize,
    pub message: String,
    pub deck_id: Option<i64>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    fn new(job_id: JobId, owner: &str) -> Self {
        Self {
            job_id,
            owner: owner.to_string(),
            status: JobStatus::Queued,
            current: 0,
            total: 0,
            message: "Waiting to start".to_string(),
            deck_id: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Shared map of in-flight and recently finished jobs.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    jobs: Arc<Mutex<HashMap<JobId, JobProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queued job for `owner`.
    pub fn register(&self, owner: &str) -> JobId {
        let id = Uuid::new_v4();
        self.with_jobs(|jobs| {
            jobs.insert(id, JobProgress::new(id, owner));
        });
        id
    }

    pub fn get(&self, id: JobId) -> Option<JobProgress> {
        self.with_jobs(|jobs| jobs.get(&id).cloned())
    }

    /// Callback that writes into job `id`.
    pub fn reporter(&self, id: JobId) -> JobReporter {
        JobReporter {
            tracker: self.clone(),
            id,
        }
    }

    /// Drop finished jobs last updated before `now - retention`. Returns the
    /// number removed.
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        self.with_jobs(|jobs| {
            let before = jobs.len();
            jobs.retain(|_, j| !(j.status.is_finished() && j.updated_at < cutoff));
            before - jobs.len()
        })
    }

    pub fn len(&self) -> usize {
        self.with_jobs(|jobs| jobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, id: JobId, f: impl FnOnce(&mut JobProgress)) {
        self.with_jobs(|jobs| {
            if let Some(job) = jobs.get_mut(&id) {
                // Finished jobs are frozen.
                if job.status.is_finished() {
                    return;
                }
                f(job);
                job.updated_at = Utc::now();
            }
        })
    }

    fn with_jobs<T>(&self, f: impl FnOnce(&mut HashMap<JobId, JobProgress>) -> T) -> T {
        // A panic while holding the lock leaves the map itself consistent.
        let mut guard = match self.jobs.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

/// [`ConversionProgressCallback`] bound to one tracked job.
pub struct JobReporter {
    tracker: ProgressTracker,
    id: JobId,
}

impl JobReporter {
    pub fn job_id(&self) -> JobId {
        self.id
    }
}

impl ConversionProgressCallback for JobReporter {
    fn on_stage(&self, stage: Stage) {
        self.tracker.update(self.id, |job| {
            job.status = stage.into();
            job.message = match stage {
                Stage::Queued => "Waiting to start".to_string(),
                Stage::Converting => "Converting presentation to PDF".to_string(),
                Stage::Rendering => "Rendering slides".to_string(),
                Stage::Saving => "Saving slides".to_string(),
            };
        });
    }

    fn on_conversion_start(&self, total_pages: usize) {
        self.tracker.update(self.id, |job| {
            job.total = total_pages;
            job.current = job.current.min(total_pages);
        });
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        self.tracker.update(self.id, |job| {
            job.total = total_pages;
            job.current = job.current.max(page_num.min(total_pages));
            job.message = format!("Processed slide {} of {}", job.current, total_pages);
        });
    }

    fn on_conversion_complete(&self, deck_id: i64, total_pages: usize) {
        self.tracker.update(self.id, |job| {
            job.status = JobStatus::Completed;
            job.total = total_pages;
            job.current = total_pages;
            job.deck_id = Some(deck_id);
            job.message = "Conversion complete".to_string();
        });
    }

    fn on_conversion_failed(&self, error: &str) {
        self.tracker.update(self.id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.message = "Conversion failed".to_string();
        });
    }
}
