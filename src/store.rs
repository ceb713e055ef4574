use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;

use crate::error::EngineError;
use crate::job_manager::JobState;
use crate::processor::RecordOutcome;

pub const OUTCOMES_FILE: &str = "outcomes.csv";
pub const LOG_FILE: &str = "run.log";
pub const STATE_FILE: &str = "state.json";

/// The durable substrate for one job: a progressive outcome table, an
/// append-only log, and an atomically replaced state summary. A separate
/// process can read all three at any time, even after this one is gone.
pub struct JobStore {
    dir: PathBuf,
    outcomes: csv::Writer<File>,
    log: File,
    written: HashSet<String>,
}

impl JobStore {
    pub fn create(dir: &Path) -> Result<Self, EngineError> {
        fs::create_dir_all(dir)?;

        let outcomes_path = dir.join(OUTCOMES_FILE);
        let is_new = !outcomes_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&outcomes_path)?;
        let mut outcomes = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            outcomes.write_record([
                "input_id",
                "status",
                "emails",
                "sources",
                "queries_issued",
                "pages_fetched",
                "errors",
                "truncated",
                "note",
                "extra",
                "timestamp",
            ])?;
            outcomes.flush()?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;

        Ok(JobStore {
            dir: dir.to_path_buf(),
            outcomes,
            log,
            written: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one outcome row and flush it to disk. Each record id is
    /// written at most once; a duplicate is dropped and reported as false.
    pub fn append_outcome(&mut self, outcome: &RecordOutcome) -> Result<bool, EngineError> {
        if !self.written.insert(outcome.record_id.clone()) {
            return Ok(false);
        }

        let emails: Vec<&str> = outcome.emails.iter().map(|c| c.email.as_str()).collect();
        let mut sources: Vec<&str> = Vec::new();
        for candidate in &outcome.emails {
            if !sources.contains(&candidate.source.as_str()) {
                sources.push(candidate.source.as_str());
            }
        }
        let emails = emails.join("; ");
        let sources = sources.join("; ");
        let queries = outcome.queries_issued.to_string();
        let pages = outcome.pages_fetched.to_string();
        let errors = outcome.errors.to_string();
        let truncated = outcome.truncated.to_string();
        // pass-through input columns travel as one JSON cell
        let extra = if outcome.extra.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&outcome.extra)?
        };
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        self.outcomes.write_record([
            outcome.record_id.as_str(),
            outcome.status.as_str(),
            emails.as_str(),
            sources.as_str(),
            queries.as_str(),
            pages.as_str(),
            errors.as_str(),
            truncated.as_str(),
            outcome.note.as_str(),
            extra.as_str(),
            timestamp.as_str(),
        ])?;
        // flush after every record so a partial download is always usable
        self.outcomes.flush()?;
        Ok(true)
    }

    /// Append one timestamped line to the job log. Single writer per job;
    /// lines never interleave.
    pub fn append_log(&mut self, line: &str) -> Result<(), EngineError> {
        let stamped = format!(
            "{} {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            line.trim_end()
        );
        self.log.write_all(stamped.as_bytes())?;
        self.log.flush()?;
        Ok(())
    }

    pub fn write_state(&self, state: &JobState) -> Result<(), EngineError> {
        write_state(&self.dir, state)
    }
}

/// Replace `state.json` via write-new-then-rename, so a concurrent status
/// reader never observes a half-written document.
pub fn write_state(dir: &Path, state: &JobState) -> Result<(), EngineError> {
    let tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file(), state)?;
    tmp.persist(dir.join(STATE_FILE))
        .map_err(|e| EngineError::from(e.error))?;
    Ok(())
}

pub fn read_state(dir: &Path) -> Result<JobState, EngineError> {
    let file = File::open(dir.join(STATE_FILE))?;
    Ok(serde_json::from_reader(file)?)
}

/// Return the complete log lines past `offset` plus the offset to poll from
/// next. A torn final line (no trailing newline yet) is withheld until a
/// later call, so tail output is always whole lines and never regresses.
pub fn tail_log(dir: &Path, offset: u64) -> Result<(Vec<String>, u64), EngineError> {
    let path = dir.join(LOG_FILE);
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), offset));
        }
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    if offset >= len {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.take(len - offset).read_to_end(&mut buf)?;

    let mut end = buf.len();
    while end > 0 && buf[end - 1] != b'\n' {
        end -= 1;
    }

    let lines = String::from_utf8_lossy(&buf[..end])
        .lines()
        .map(str::to_string)
        .collect();
    Ok((lines, offset + end as u64))
}
