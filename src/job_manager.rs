use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EnrichConfig;
use crate::error::EngineError;
use crate::fetcher::{FetchPool, PageFetcher};
use crate::processor::RecordProcessor;
use crate::record::OwnerRecord;
use crate::search::{QueryBudget, SearchClient};
use crate::store::{self, JobStore};

/// Concurrency ceiling for page fetches within one job.
pub const FETCH_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Snapshot of one job, mirrored into `state.json` after every durable
/// write. `processed` never runs ahead of what is on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub config: EnrichConfig,
    pub status: JobStatus,
    pub processed: usize,
    pub total: usize,
    pub emails_found: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct JobHandle {
    state: JobState,
    cancel: Arc<AtomicBool>,
}

/// Owns every job's lifecycle. One worker thread per job; records are
/// processed sequentially inside it, which keeps the shared search quota
/// predictable. Status and log reads go through here (or straight to the
/// job directory once the process is gone).
pub struct JobManager {
    jobs_root: PathBuf,
    api_key: Option<String>,
    jobs: Arc<Mutex<HashMap<String, JobHandle>>>,
}

impl JobManager {
    pub fn new(jobs_root: impl Into<PathBuf>, api_key: Option<String>) -> Self {
        JobManager {
            jobs_root: jobs_root.into(),
            api_key,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate the config, lay down the job directory and kick off the
    /// worker thread. An unwritable jobs root fails the submission itself.
    pub fn submit(
        &self,
        records: Vec<OwnerRecord>,
        config: EnrichConfig,
    ) -> Result<String, EngineError> {
        config.validate()?;

        let job_id = Uuid::new_v4().to_string();
        let dir = self.jobs_root.join(&job_id);
        let store = JobStore::create(&dir)?;

        let state = JobState {
            job_id: job_id.clone(),
            config,
            status: JobStatus::Queued,
            processed: 0,
            total: records.len(),
            emails_found: 0,
            created_at: Utc::now(),
            finished_at: None,
        };
        store.write_state(&state)?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            JobHandle {
                state: state.clone(),
                cancel: Arc::clone(&cancel),
            },
        );

        info!("Job {} submitted with {} records", job_id, records.len());

        let jobs = Arc::clone(&self.jobs);
        let api_key = self.api_key.clone();
        thread::spawn(move || {
            Self::run_job(jobs, store, state, records, api_key, cancel);
        });

        Ok(job_id)
    }

    /// Cooperative: the flag is observed between records and before fetch
    /// batches, so worst-case latency is one fetch deadline.
    pub fn cancel(&self, job_id: &str) -> Result<(), EngineError> {
        let guard = self.jobs.lock().unwrap();
        let handle = guard
            .get(job_id)
            .ok_or_else(|| EngineError::UnknownJob(job_id.to_string()))?;
        handle.cancel.store(true, Ordering::Relaxed);
        info!("Cancellation requested for job {}", job_id);
        Ok(())
    }

    /// Current snapshot. Falls back to `state.json` for jobs from an
    /// earlier process life.
    pub fn status(&self, job_id: &str) -> Result<JobState, EngineError> {
        if let Some(handle) = self.jobs.lock().unwrap().get(job_id) {
            return Ok(handle.state.clone());
        }
        store::read_state(&self.jobs_root.join(job_id))
            .map_err(|_| EngineError::UnknownJob(job_id.to_string()))
    }

    /// Complete log lines past `offset`, plus the offset for the next poll.
    pub fn tail(&self, job_id: &str, offset: u64) -> Result<(Vec<String>, u64), EngineError> {
        let dir = self.jobs_root.join(job_id);
        if !dir.exists() {
            return Err(EngineError::UnknownJob(job_id.to_string()));
        }
        store::tail_log(&dir, offset)
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_root.join(job_id)
    }

    fn mirror(jobs: &Mutex<HashMap<String, JobHandle>>, state: &JobState) {
        if let Some(handle) = jobs.lock().unwrap().get_mut(&state.job_id) {
            handle.state = state.clone();
        }
    }

    fn finish(
        jobs: &Mutex<HashMap<String, JobHandle>>,
        store: &mut JobStore,
        state: &mut JobState,
        status: JobStatus,
        log_line: &str,
    ) {
        state.status = status;
        state.finished_at = Some(Utc::now());
        // state and log writes are best-effort here; the job is over either way
        if let Err(e) = store.append_log(log_line) {
            error!("Job {}: failed to write final log line: {}", state.job_id, e);
        }
        if let Err(e) = store.write_state(state) {
            error!("Job {}: failed to write final state: {}", state.job_id, e);
        }
        Self::mirror(jobs, state);
    }

    fn run_job(
        jobs: Arc<Mutex<HashMap<String, JobHandle>>>,
        mut store: JobStore,
        mut state: JobState,
        records: Vec<OwnerRecord>,
        api_key: Option<String>,
        cancel: Arc<AtomicBool>,
    ) {
        state.status = JobStatus::Running;
        let started = (|| {
            store.write_state(&state)?;
            store.append_log(&format!("job started: {} records", records.len()))
        })();
        if let Err(e) = started {
            error!("Job {}: storage failure at start: {}", state.job_id, e);
            Self::finish(
                &jobs,
                &mut store,
                &mut state,
                JobStatus::Failed,
                &format!("fatal: storage failure: {}", e),
            );
            return;
        }
        Self::mirror(&jobs, &state);

        let search = Arc::new(SearchClient::new(api_key));
        let budget = Arc::new(QueryBudget::new(state.config.max_queries as u64));
        let pool = if state.config.scrape_enabled {
            Some(Arc::new(FetchPool::with_fetcher(
                FETCH_WORKERS,
                PageFetcher::new(state.config.fetch_timeout()),
            )))
        } else {
            None
        };
        let processor = RecordProcessor::new(
            search,
            budget,
            pool,
            state.config.clone(),
            Arc::clone(&cancel),
        );

        for record in &records {
            if cancel.load(Ordering::Relaxed) {
                info!("Job {} cancelled by caller", state.job_id);
                Self::finish(
                    &jobs,
                    &mut store,
                    &mut state,
                    JobStatus::Cancelled,
                    "job cancelled",
                );
                return;
            }

            let outcome = processor.process(record);
            let log_line = format!(
                "record {}: {} ({} emails, {} queries, {} pages, {} errors)",
                outcome.record_id,
                outcome.status.as_str(),
                outcome.emails.len(),
                outcome.queries_issued,
                outcome.pages_fetched,
                outcome.errors,
            );

            state.emails_found += outcome.emails.len();
            // outcome row first, then the log line, then the bumped counter;
            // processed stays a lower bound on what is durably on disk
            let written = (|| {
                store.append_outcome(&outcome)?;
                store.append_log(&log_line)?;
                state.processed += 1;
                store.write_state(&state)
            })();
            if let Err(e) = written {
                error!("Job {}: storage failure: {}", state.job_id, e);
                Self::finish(
                    &jobs,
                    &mut store,
                    &mut state,
                    JobStatus::Failed,
                    &format!("fatal: storage failure: {}", e),
                );
                return;
            }
            Self::mirror(&jobs, &state);
        }

        let summary = format!(
            "job completed: {} of {} records processed, {} emails found",
            state.processed, state.total, state.emails_found
        );
        info!("Job {}: {}", state.job_id, summary);
        Self::finish(&jobs, &mut store, &mut state, JobStatus::Completed, &summary);
    }
}
