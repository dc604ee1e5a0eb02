//! Transcode job executor
//!
//! Runs transcodes in the background with concurrency limiting via semaphore
//! and rejects a second request for a file that is already queued or running.

use crate::concurrency::ConcurrencyPlan;
use crate::record::now_rfc3339;
use crate::ringlog::SharedLog;
use crate::transcode::{TranscodeError, TranscodeOutcome, Transcoder};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

/// Finished jobs kept for the status surface
const JOB_HISTORY: usize = 100;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The same file is already queued or transcoding
    #[error("A transcode for {0} is already in progress")]
    AlreadyRunning(PathBuf),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    /// Blocking task panicked or was cancelled
    #[error("Transcode task failed: {0}")]
    Join(String),
}

/// Job state representing the current stage in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a transcode slot
    Queued,
    Running,
    /// Finished; carries a short description of what was done
    Completed(String),
    Failed(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed(_) => "completed",
            JobState::Failed(_) => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed(_) | JobState::Failed(_))
    }
}

/// A transcode request and where it stands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub id: String,
    /// Local file being transcoded
    pub path: PathBuf,
    /// Video codec argument: `copy` for audio-only jobs, `none` when nothing
    /// needs doing. Updated to what actually ran once the job finishes.
    pub encoder: String,
    pub state: JobState,
    pub submitted_at: String,
    pub finished_at: Option<String>,
}

/// Answer to a transcode trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submitted {
    pub job_id: String,
    pub encoder: String,
}

fn describe_outcome(outcome: &TranscodeOutcome) -> String {
    match outcome {
        TranscodeOutcome::AlreadyCompliant => "already h264/aac".to_string(),
        TranscodeOutcome::Transcoded { strategy, retried } => {
            if *retried {
                format!("{} after hardware failure", strategy.describe())
            } else {
                strategy.describe()
            }
        }
    }
}

/// Background transcode executor
///
/// Uses a tokio Semaphore to limit the number of concurrent transcodes
/// according to the concurrency plan.
pub struct TranscodeExecutor {
    semaphore: Arc<Semaphore>,
    transcoder: Arc<Transcoder>,
    /// Files with a queued or running job
    active: Arc<Mutex<HashSet<PathBuf>>>,
    jobs: Arc<RwLock<VecDeque<TranscodeJob>>>,
    log: SharedLog,
}

impl TranscodeExecutor {
    pub fn new(plan: ConcurrencyPlan, transcoder: Arc<Transcoder>, log: SharedLog) -> Self {
        let permits = plan.max_concurrent_transcodes.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            transcoder,
            active: Arc::new(Mutex::new(HashSet::new())),
            jobs: Arc::new(RwLock::new(VecDeque::new())),
            log,
        }
    }

    /// Get the number of available transcode slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Try to take a transcode slot without waiting
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self, path: &Path) -> bool {
        self.active().contains(path)
    }

    /// Snapshot of recent jobs, oldest first
    pub async fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.read().await.iter().cloned().collect()
    }

    /// Resolve `path`, probe it, pick an encoder and start the transcode in the background.
    ///
    /// Returns as soon as the job is queued.
    pub async fn submit(&self, path: PathBuf) -> Result<Submitted, SubmitError> {
        let transcoder = self.transcoder.clone();
        let (resolved, encoder, label) = tokio::task::spawn_blocking(move || {
            transcoder.resolve(&path).map(|resolved| {
                let encoder = transcoder.select_encoder();
                let label = transcoder
                    .plan_strategy(&resolved, encoder)
                    .map(|s| s.video_codec())
                    .unwrap_or("none");
                (resolved, encoder, label)
            })
        })
        .await
        .map_err(|e| SubmitError::Join(e.to_string()))??;

        if !self.active().insert(resolved.clone()) {
            self.log.warn(format!(
                "Transcode already in progress for {}",
                resolved.display()
            ));
            return Err(SubmitError::AlreadyRunning(resolved));
        }

        let job = TranscodeJob {
            id: uuid::Uuid::new_v4().to_string(),
            path: resolved.clone(),
            encoder: label.to_string(),
            state: JobState::Queued,
            submitted_at: now_rfc3339(),
            finished_at: None,
        };
        let submitted = Submitted {
            job_id: job.id.clone(),
            encoder: job.encoder.clone(),
        };
        {
            let mut jobs = self.jobs.write().await;
            jobs.push_back(job);
            prune_finished(&mut jobs);
        }
        self.log.info(format!(
            "Queued transcode {} of {} with {}",
            submitted.job_id,
            resolved.display(),
            submitted.encoder
        ));

        let semaphore = self.semaphore.clone();
        let transcoder = self.transcoder.clone();
        let active = self.active.clone();
        let jobs = self.jobs.clone();
        let job_id = submitted.job_id.clone();

        tokio::spawn(async move {
            // Semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            set_state(&jobs, &job_id, JobState::Running).await;

            let file = resolved.clone();
            let result =
                tokio::task::spawn_blocking(move || transcoder.transcode_with(&file, encoder))
                    .await;

            let state = match result {
                Ok(Ok(outcome)) => {
                    if let TranscodeOutcome::Transcoded { strategy, .. } = &outcome {
                        set_encoder(&jobs, &job_id, strategy.video_codec()).await;
                    }
                    JobState::Completed(describe_outcome(&outcome))
                }
                Ok(Err(e)) => JobState::Failed(e.to_string()),
                Err(e) => JobState::Failed(format!("Transcode task panicked: {}", e)),
            };
            set_state(&jobs, &job_id, state).await;
            active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&resolved);
        });

        Ok(submitted)
    }
}

async fn set_state(jobs: &RwLock<VecDeque<TranscodeJob>>, id: &str, state: JobState) {
    let mut jobs = jobs.write().await;
    if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
        if state.is_finished() {
            job.finished_at = Some(now_rfc3339());
        }
        job.state = state;
    }
}

async fn set_encoder(jobs: &RwLock<VecDeque<TranscodeJob>>, id: &str, encoder: &str) {
    if let Some(job) = jobs.write().await.iter_mut().find(|j| j.id == id) {
        job.encoder = encoder.to_string();
    }
}

/// Drop the oldest finished jobs beyond the history limit
fn prune_finished(jobs: &mut VecDeque<TranscodeJob>) {
    while jobs.len() > JOB_HISTORY {
        match jobs.iter().position(|j| j.state.is_finished()) {
            Some(idx) => {
                jobs.remove(idx);
            }
            None => break,
        }
    }
}
