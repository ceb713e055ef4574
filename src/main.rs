use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use openweb_enricher::{ingest, logger, EnrichConfig, JobManager, JobStatus};

const JOBS_DIR: &str = "data/jobs";
const POLL_INTERVAL: Duration = Duration::from_millis(800);

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logger::init();

    let input_file = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/input/contacts.csv".to_string());

    let records = ingest::load_records(&input_file);
    if records.is_empty() {
        error!(
            "No records found in {}. Expected a CSV with at least an Owner 1 column.",
            input_file
        );
        return ExitCode::FAILURE;
    }

    let api_key = std::env::var("BRAVE_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if api_key.is_none() {
        warn!("BRAVE_API_KEY not set (check .env). Searches will be skipped.");
    }

    let manager = JobManager::new(JOBS_DIR, api_key);
    let job_id = match manager.submit(records, EnrichConfig::default()) {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to submit job: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Job {} started; results in {}", job_id, manager.job_dir(&job_id).display());

    // mirror the job's own log to the console until it finishes
    let mut offset = 0u64;
    loop {
        match manager.tail(&job_id, offset) {
            Ok((lines, next)) => {
                for line in lines {
                    println!("{}", line);
                }
                offset = next;
            }
            Err(e) => {
                error!("Failed to tail job log: {}", e);
                return ExitCode::FAILURE;
            }
        }

        let state = match manager.status(&job_id) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to read job status: {}", e);
                return ExitCode::FAILURE;
            }
        };
        if state.status.is_terminal() {
            // drain whatever landed after the last poll
            if let Ok((lines, _)) = manager.tail(&job_id, offset) {
                for line in lines {
                    println!("{}", line);
                }
            }
            info!(
                "Job {} finished: {:?}, {} of {} records, {} emails",
                job_id, state.status, state.processed, state.total, state.emails_found
            );
            return match state.status {
                JobStatus::Completed | JobStatus::Cancelled => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }

        thread::sleep(POLL_INTERVAL);
    }
}
