use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use log::{info, warn};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::Value;

use crate::error::SearchError;
use crate::pacing;

const SEARCH_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One search result: URL plus whatever title/snippet text came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Job-wide cap on external search calls. Shared across records and updated
/// atomically, since record processing may run concurrently.
pub struct QueryBudget {
    limit: u64,
    used: AtomicU64,
}

impl QueryBudget {
    pub fn new(limit: u64) -> Self {
        QueryBudget {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Claim one search call. Returns false once the budget is spent, in
    /// which case no external call may be made.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            if current >= self.limit {
                return false;
            }
            match self.used.compare_exchange(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    pub fn exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Seam between the record processor and the external search API, so
/// processing can be exercised without the network.
pub trait WebSearch: Send + Sync {
    /// False when no API credential is configured; searching is then a
    /// supported no-op, not an error.
    fn enabled(&self) -> bool;

    fn search(
        &self,
        query: &str,
        results_per_query: u32,
        budget: &QueryBudget,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Brave Web Search API client. Blocking, rate-paced, quota-aware.
pub struct SearchClient {
    client: Client,
    api_key: Option<String>,
    // Latched on the first quota rejection; later calls short-circuit so a
    // metered key is not hammered after a 429.
    quota_hit: AtomicBool,
    quota_status: AtomicU16,
}

impl SearchClient {
    pub fn new(api_key: Option<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .default_headers(headers)
            .build()
            .expect("Failed to build Search Client");

        SearchClient {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            quota_hit: AtomicBool::new(false),
            quota_status: AtomicU16::new(0),
        }
    }

    fn request(&self, key: &str, query: &str, count: u32) -> Result<Vec<SearchHit>, SearchError> {
        let count_param = count.to_string();
        let resp = self
            .client
            .get(SEARCH_ENDPOINT)
            .header("X-Subscription-Token", key)
            .query(&[
                ("q", query),
                ("count", count_param.as_str()),
                ("result_filter", "web"),
            ])
            .send()
            .map_err(|e| SearchError::Transient(e.to_string()))?;

        let status = resp.status().as_u16();
        match status {
            200..=299 => {}
            401 | 403 | 429 => return Err(SearchError::Quota(status)),
            500..=599 => return Err(SearchError::Transient(format!("status {}", status))),
            _ => return Err(SearchError::Malformed(format!("status {}", status))),
        }

        let body: Value = resp
            .json()
            .map_err(|e| SearchError::Malformed(e.to_string()))?;
        Ok(parse_hits(&body, count))
    }
}

impl WebSearch for SearchClient {
    fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn search(
        &self,
        query: &str,
        results_per_query: u32,
        budget: &QueryBudget,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let Some(key) = self.api_key.as_deref() else {
            // No credential configured: zero hits, no budget spent.
            return Ok(Vec::new());
        };
        if self.quota_hit.load(Ordering::Relaxed) {
            return Err(SearchError::Quota(self.quota_status.load(Ordering::Relaxed)));
        }
        if !budget.try_acquire() {
            return Err(SearchError::BudgetExhausted);
        }

        pacing::search_pause();
        info!("Searching for: '{}'", query);

        let result = match self.request(key, query, results_per_query) {
            Err(SearchError::Transient(reason)) => {
                warn!("Search for '{}' failed ({}), retrying once", query, reason);
                pacing::retry_backoff();
                self.request(key, query, results_per_query)
            }
            other => other,
        };

        if let Err(SearchError::Quota(status)) = &result {
            self.quota_status.store(*status, Ordering::Relaxed);
            self.quota_hit.store(true, Ordering::Relaxed);
        }
        result
    }
}

/// Pull `web.results` (or a top-level `results`) out of the response body.
/// Missing arrays mean an empty result set, not an error.
fn parse_hits(body: &Value, count: u32) -> Vec<SearchHit> {
    let results = body
        .pointer("/web/results")
        .or_else(|| body.get("results"))
        .and_then(Value::as_array);

    let Some(results) = results else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|r| {
            let url = r.get("url")?.as_str()?.to_string();
            let title = r.get("title").and_then(Value::as_str).unwrap_or("");
            let snippet = r
                .get("description")
                .or_else(|| r.get("snippet"))
                .and_then(Value::as_str)
                .unwrap_or("");
            Some(SearchHit {
                url,
                title: title.to_string(),
                snippet: snippet.to_string(),
            })
        })
        .take(count as usize)
        .collect()
}
