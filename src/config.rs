use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Batch deadline = fetch timeout x this factor, so one slow site cannot
/// stall a record longer than a couple of timeout intervals.
pub const FETCH_DEADLINE_FACTOR: u32 = 2;

/// Per-job settings, snapshotted into `state.json` at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Result URLs requested per search query.
    pub results_per_query: u32,
    /// Hard cap on external search calls across the whole job.
    pub max_queries: u32,
    /// Email candidates retained per record before truncation.
    pub max_emails_per_record: u32,
    /// Per-page fetch timeout in seconds.
    pub fetch_timeout_secs: f64,
    /// Whether result pages are fetched and scraped beyond their snippets.
    pub scrape_enabled: bool,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        EnrichConfig {
            results_per_query: 10,
            max_queries: 5,
            max_emails_per_record: 2,
            fetch_timeout_secs: 15.0,
            scrape_enabled: true,
        }
    }
}

impl EnrichConfig {
    /// Rejects nonsensical resource caps before a job is allowed to start.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.results_per_query == 0 {
            return Err(EngineError::InvalidConfig(
                "results_per_query must be at least 1".to_string(),
            ));
        }
        if self.max_emails_per_record == 0 {
            return Err(EngineError::InvalidConfig(
                "max_emails_per_record must be at least 1".to_string(),
            ));
        }
        if !self.fetch_timeout_secs.is_finite() || self.fetch_timeout_secs <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "fetch_timeout_secs must be positive, got {}",
                self.fetch_timeout_secs
            )));
        }
        // max_queries == 0 is a legal "search nothing" mode, but only when
        // scraping is off: scraping with no search hits can never run.
        if self.max_queries == 0 && self.scrape_enabled {
            return Err(EngineError::InvalidConfig(
                "scraping is enabled but max_queries is 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_timeout_secs)
    }

    /// Overall deadline for one record's fetch batch.
    pub fn fetch_batch_deadline(&self) -> Duration {
        self.fetch_timeout() * FETCH_DEADLINE_FACTOR
    }
}
