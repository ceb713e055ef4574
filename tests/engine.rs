use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use openweb_enricher::{store, EnrichConfig, EngineError, JobManager, JobStatus, OwnerRecord};

fn owner(id: &str, name: &str) -> OwnerRecord {
    OwnerRecord::new(id, vec![name.to_string()], false)
}

fn offline_config() -> EnrichConfig {
    EnrichConfig {
        scrape_enabled: false,
        ..EnrichConfig::default()
    }
}

fn wait_terminal(manager: &JobManager, job_id: &str) -> openweb_enricher::JobState {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let state = manager.status(job_id).expect("status should be readable");
        if state.status.is_terminal() {
            return state;
        }
        assert!(
            Instant::now() < deadline,
            "job {} did not reach a terminal state in time",
            job_id
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn offline_job_completes_with_failed_outcomes() {
    let root = tempfile::tempdir().unwrap();
    // no credential: every search degrades to a no-op
    let manager = JobManager::new(root.path(), None);

    let records = vec![
        owner("r1", "Jane Smith"),
        owner("r2", "Mark Jones"),
        owner("r3", "Ada Lovelace"),
    ];
    let job_id = manager.submit(records, offline_config()).unwrap();
    let state = wait_terminal(&manager, &job_id);

    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.processed, 3);
    assert_eq!(state.total, 3);
    assert_eq!(state.emails_found, 0);

    // every outcome is on disk exactly once, all failed, no emails
    let csv = std::fs::read_to_string(root.path().join(&job_id).join(store::OUTCOMES_FILE))
        .unwrap();
    let rows: Vec<&str> = csv.lines().skip(1).collect();
    assert_eq!(rows.len(), 3);
    let mut ids = HashSet::new();
    for row in &rows {
        let mut fields = row.split(',');
        let id = fields.next().unwrap();
        let status = fields.next().unwrap();
        let emails = fields.next().unwrap();
        assert!(ids.insert(id.to_string()), "record id {} written twice", id);
        assert_eq!(status, "failed");
        assert!(emails.is_empty());
    }
}

#[test]
fn state_survives_the_manager() {
    let root = tempfile::tempdir().unwrap();
    let job_id = {
        let manager = JobManager::new(root.path(), None);
        let job_id = manager
            .submit(vec![owner("r1", "Jane Smith")], offline_config())
            .unwrap();
        wait_terminal(&manager, &job_id);
        job_id
    };

    // a fresh manager (a new process, effectively) recovers status from disk
    let reborn = JobManager::new(root.path(), None);
    let state = reborn.status(&job_id).unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.processed, 1);

    let direct = store::read_state(&root.path().join(&job_id)).unwrap();
    assert_eq!(direct.job_id, job_id);
}

#[test]
fn invalid_configs_are_rejected_before_start() {
    let root = tempfile::tempdir().unwrap();
    let manager = JobManager::new(root.path(), None);

    let bad = EnrichConfig {
        max_queries: 0,
        scrape_enabled: true,
        ..EnrichConfig::default()
    };
    match manager.submit(vec![owner("r1", "Jane Smith")], bad) {
        Err(EngineError::InvalidConfig(_)) => {}
        other => panic!("expected InvalidConfig, got {:?}", other),
    }

    let bad = EnrichConfig {
        results_per_query: 0,
        ..EnrichConfig::default()
    };
    assert!(matches!(
        manager.submit(vec![owner("r1", "Jane Smith")], bad),
        Err(EngineError::InvalidConfig(_))
    ));

    // nothing should have been written for rejected submissions
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn unknown_jobs_are_reported_as_such() {
    let root = tempfile::tempdir().unwrap();
    let manager = JobManager::new(root.path(), None);
    assert!(matches!(
        manager.status("nope"),
        Err(EngineError::UnknownJob(_))
    ));
    assert!(matches!(
        manager.cancel("nope"),
        Err(EngineError::UnknownJob(_))
    ));
    assert!(matches!(
        manager.tail("nope", 0),
        Err(EngineError::UnknownJob(_))
    ));
}

#[test]
fn tail_is_monotonic_while_the_job_runs() {
    let root = tempfile::tempdir().unwrap();
    let manager = JobManager::new(root.path(), None);

    let records: Vec<OwnerRecord> = (0..40)
        .map(|i| owner(&format!("r{}", i), "Jane Smith"))
        .collect();
    let job_id = manager.submit(records, offline_config()).unwrap();

    let mut offset = 0u64;
    let mut collected: Vec<String> = Vec::new();
    loop {
        let (lines, next) = manager.tail(&job_id, offset).unwrap();
        assert!(next >= offset, "tail offset went backwards");
        collected.extend(lines);
        offset = next;
        let state = manager.status(&job_id).unwrap();
        if state.status.is_terminal() {
            let (lines, _) = manager.tail(&job_id, offset).unwrap();
            collected.extend(lines);
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    assert!(collected.iter().any(|l| l.contains("job started")));
    assert!(collected.iter().any(|l| l.contains("job completed")));
    // one line per record plus start and completion
    assert_eq!(
        collected.iter().filter(|l| l.contains("record r")).count(),
        40
    );
}

#[test]
fn cancellation_reaches_a_terminal_state_cleanly() {
    let root = tempfile::tempdir().unwrap();
    let manager = JobManager::new(root.path(), None);

    let records: Vec<OwnerRecord> = (0..500)
        .map(|i| owner(&format!("r{}", i), "Jane Smith"))
        .collect();
    let job_id = manager.submit(records, offline_config()).unwrap();
    manager.cancel(&job_id).unwrap();

    let state = wait_terminal(&manager, &job_id);
    // the flag may land after the last record on a fast machine; either
    // way the run must settle and the books must balance
    assert!(matches!(
        state.status,
        JobStatus::Cancelled | JobStatus::Completed
    ));
    assert!(state.processed <= state.total);

    let (lines, _) = manager.tail(&job_id, 0).unwrap();
    if state.status == JobStatus::Cancelled {
        let cancel_pos = lines
            .iter()
            .position(|l| l.contains("job cancelled"))
            .expect("cancelled job must log the cancellation");
        // no record outcome may be appended after the cancellation line
        assert!(lines[cancel_pos..].iter().all(|l| !l.contains("record r")));
        // outcome rows on disk match the processed counter
        let csv =
            std::fs::read_to_string(root.path().join(&job_id).join(store::OUTCOMES_FILE)).unwrap();
        assert_eq!(csv.lines().skip(1).count(), state.processed);
    }
}
