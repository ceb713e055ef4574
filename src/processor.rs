use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::config::EnrichConfig;
use crate::error::SearchError;
use crate::extractor::{EmailCandidate, EmailExtractor, EmailSink};
use crate::fetcher::FetchPool;
use crate::planner;
use crate::record::OwnerRecord;
use crate::search::{QueryBudget, SearchHit, WebSearch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Partial,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Ok => "ok",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// The one result a record ever produces. Written once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub record_id: String,
    pub status: OutcomeStatus,
    pub emails: Vec<EmailCandidate>,
    pub queries_issued: u32,
    pub pages_fetched: u32,
    pub errors: u32,
    pub truncated: bool,
    pub note: String,
    /// Input columns riding along untouched into the export.
    pub extra: BTreeMap<String, String>,
}

impl RecordOutcome {
    fn skipped(record: &OwnerRecord, note: &str) -> Self {
        RecordOutcome {
            record_id: record.id.clone(),
            status: OutcomeStatus::Failed,
            emails: Vec::new(),
            queries_issued: 0,
            pages_fetched: 0,
            errors: 0,
            truncated: false,
            note: note.to_string(),
            extra: record.extra.clone(),
        }
    }
}

/// Drives one record through querying, fetching and extracting. Every
/// failure mode resolves into the outcome; nothing here can abort the job.
pub struct RecordProcessor {
    search: Arc<dyn WebSearch>,
    budget: Arc<QueryBudget>,
    pool: Option<Arc<FetchPool>>,
    extractor: EmailExtractor,
    config: EnrichConfig,
    cancel: Arc<AtomicBool>,
}

impl RecordProcessor {
    pub fn new(
        search: Arc<dyn WebSearch>,
        budget: Arc<QueryBudget>,
        pool: Option<Arc<FetchPool>>,
        config: EnrichConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        RecordProcessor {
            search,
            budget,
            pool,
            extractor: EmailExtractor::new(),
            config,
            cancel,
        }
    }

    pub fn process(&self, record: &OwnerRecord) -> RecordOutcome {
        let queries = planner::plan(record);
        if queries.is_empty() {
            return RecordOutcome::skipped(record, "no usable owner name");
        }
        if self.config.max_queries == 0 {
            return RecordOutcome::skipped(record, "no queries attempted (query budget is 0)");
        }
        if !self.search.enabled() {
            return RecordOutcome::skipped(record, "search disabled (no API credential)");
        }

        let mut sink = EmailSink::new(self.config.max_emails_per_record as usize);
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut queries_issued = 0u32;
        let mut queries_succeeded = 0u32;
        let mut errors = 0u32;
        let mut notes: Vec<String> = Vec::new();

        // querying
        for query in &queries {
            match self
                .search
                .search(query, self.config.results_per_query, &self.budget)
            {
                Ok(batch) => {
                    queries_issued += 1;
                    queries_succeeded += 1;
                    for hit in batch {
                        if seen_urls.insert(hit.url.clone()) {
                            // snippets alone often carry an address
                            let combined =
                                format!("{} {} {}", hit.title, hit.snippet, hit.url);
                            self.extractor.scan(&combined, &hit.url, &mut sink);
                            hits.push(hit);
                        }
                    }
                }
                Err(SearchError::BudgetExhausted) => {
                    notes.push("query budget exhausted".to_string());
                    break;
                }
                Err(SearchError::Quota(status)) => {
                    queries_issued += 1;
                    errors += 1;
                    notes.push(format!("search quota rejected (status {})", status));
                    break;
                }
                Err(SearchError::Transient(reason)) => {
                    queries_issued += 1;
                    errors += 1;
                    warn!("Search failed for record {}: {}", record.id, reason);
                    notes.push(format!("search failed: {}", reason));
                }
                Err(SearchError::Malformed(reason)) => {
                    queries_issued += 1;
                    errors += 1;
                    warn!(
                        "Malformed search response for record {}: {}",
                        record.id, reason
                    );
                    notes.push("malformed search response".to_string());
                }
            }
        }

        // fetching
        let mut pages_fetched = 0u32;
        if self.config.scrape_enabled
            && !hits.is_empty()
            && !sink.is_full()
            && !self.cancel.load(Ordering::Relaxed)
        {
            if let Some(pool) = &self.pool {
                let url_cap =
                    (self.config.results_per_query as usize).saturating_mul(queries.len());
                let urls: Vec<String> =
                    hits.iter().map(|h| h.url.clone()).take(url_cap).collect();
                info!(
                    "Record {}: fetching {} result pages",
                    record.id,
                    urls.len()
                );

                let outcomes = pool.fetch_batch(&urls, self.config.fetch_batch_deadline());
                let settled = outcomes.len();

                // extracting
                for outcome in outcomes {
                    match outcome.result {
                        Ok(content) => {
                            pages_fetched += 1;
                            self.extractor.scan(&content, &outcome.url, &mut sink);
                        }
                        Err(e) => {
                            errors += 1;
                            info!("Fetch error for {}: {}", outcome.url, e);
                        }
                    }
                }
                if settled < urls.len() {
                    errors += (urls.len() - settled) as u32;
                    notes.push("fetch batch deadline expired".to_string());
                }
            }
        }

        let status = if queries_succeeded == 0 {
            OutcomeStatus::Failed
        } else if errors > 0 {
            OutcomeStatus::Partial
        } else {
            OutcomeStatus::Ok
        };

        let truncated = sink.truncated();
        let emails = sink.into_candidates();
        let note = if notes.is_empty() {
            format!("{} emails from {} queries", emails.len(), queries_succeeded)
        } else {
            notes.join("; ")
        };

        RecordOutcome {
            record_id: record.id.clone(),
            status,
            emails,
            queries_issued,
            pages_fetched,
            errors,
            truncated,
            note,
            extra: record.extra.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchClient;
    use std::sync::atomic::AtomicU32;

    fn record(names: &[&str]) -> OwnerRecord {
        OwnerRecord::new("rec-1", names.iter().map(|s| s.to_string()).collect(), false)
    }

    fn processor_with(search: Arc<dyn WebSearch>, config: EnrichConfig) -> RecordProcessor {
        let budget = Arc::new(QueryBudget::new(config.max_queries as u64));
        RecordProcessor::new(
            search,
            budget,
            None,
            config,
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// Canned search results, no network.
    struct StubSearch {
        hits: Vec<SearchHit>,
        calls: AtomicU32,
    }

    impl StubSearch {
        fn with_hits(hits: Vec<SearchHit>) -> Self {
            StubSearch {
                hits,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl WebSearch for StubSearch {
        fn enabled(&self) -> bool {
            true
        }

        fn search(
            &self,
            _query: &str,
            _results_per_query: u32,
            budget: &QueryBudget,
        ) -> Result<Vec<SearchHit>, SearchError> {
            if !budget.try_acquire() {
                return Err(SearchError::BudgetExhausted);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    #[test]
    fn unusable_record_fails_with_zero_counters() {
        let config = EnrichConfig {
            scrape_enabled: false,
            ..EnrichConfig::default()
        };
        let proc = processor_with(Arc::new(SearchClient::new(None)), config);
        let outcome = proc.process(&record(&[]));
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.queries_issued, 0);
        assert_eq!(outcome.pages_fetched, 0);
        assert!(outcome.emails.is_empty());
        assert_eq!(outcome.note, "no usable owner name");
    }

    #[test]
    fn missing_credential_fails_without_search_counters() {
        let config = EnrichConfig {
            scrape_enabled: false,
            ..EnrichConfig::default()
        };
        let proc = processor_with(Arc::new(SearchClient::new(None)), config);
        let outcome = proc.process(&record(&["Jane Smith"]));
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.queries_issued, 0);
        assert!(outcome.note.contains("search disabled"));
    }

    #[test]
    fn zero_max_queries_reports_no_queries_attempted() {
        let config = EnrichConfig {
            max_queries: 0,
            scrape_enabled: false,
            ..EnrichConfig::default()
        };
        let stub = Arc::new(StubSearch::with_hits(vec![]));
        let proc = processor_with(stub.clone(), config);
        let outcome = proc.process(&record(&["Jane Smith"]));
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.note.contains("no queries attempted"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snippet_emails_are_collected_without_scraping() {
        let hits = vec![SearchHit {
            url: "https://a.example".to_string(),
            title: "Jane Smith".to_string(),
            snippet: "contact jane@example.com".to_string(),
        }];
        let config = EnrichConfig {
            scrape_enabled: false,
            ..EnrichConfig::default()
        };
        let proc = processor_with(Arc::new(StubSearch::with_hits(hits)), config);
        let outcome = proc.process(&record(&["Jane Smith"]));
        assert_eq!(outcome.status, OutcomeStatus::Ok);
        assert_eq!(outcome.emails.len(), 1);
        assert_eq!(outcome.emails[0].email, "jane@example.com");
        assert_eq!(outcome.emails[0].source, "https://a.example");
    }

    #[test]
    fn fetched_pages_feed_extraction() {
        let hits = vec![
            SearchHit {
                url: "https://one.example".to_string(),
                title: String::new(),
                snippet: String::new(),
            },
            SearchHit {
                url: "https://two.example".to_string(),
                title: String::new(),
                snippet: String::new(),
            },
        ];
        let fetch: crate::fetcher::FetchFn = Arc::new(|url: &str| {
            if url.contains("one") {
                Ok("reach first@site.example".to_string())
            } else {
                Ok("reach second@site.example".to_string())
            }
        });
        let config = EnrichConfig::default();
        let budget = Arc::new(QueryBudget::new(config.max_queries as u64));
        let proc = RecordProcessor::new(
            Arc::new(StubSearch::with_hits(hits)),
            budget,
            Some(Arc::new(FetchPool::new(2, fetch))),
            config,
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = proc.process(&record(&["Jane Smith"]));
        assert_eq!(outcome.status, OutcomeStatus::Ok);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(outcome.emails.len(), 2);
        let found: Vec<_> = outcome.emails.iter().map(|e| e.email.as_str()).collect();
        assert!(found.contains(&"first@site.example"));
        assert!(found.contains(&"second@site.example"));
    }

    #[test]
    fn failed_fetches_make_outcome_partial() {
        let hits = vec![
            SearchHit {
                url: "https://good.example".to_string(),
                title: String::new(),
                snippet: String::new(),
            },
            SearchHit {
                url: "https://bad.example".to_string(),
                title: String::new(),
                snippet: String::new(),
            },
        ];
        let fetch: crate::fetcher::FetchFn = Arc::new(|url: &str| {
            if url.contains("bad") {
                Err(crate::error::FetchError::Status(503))
            } else {
                Ok("owner@site.example".to_string())
            }
        });
        let config = EnrichConfig::default();
        let budget = Arc::new(QueryBudget::new(config.max_queries as u64));
        let proc = RecordProcessor::new(
            Arc::new(StubSearch::with_hits(hits)),
            budget,
            Some(Arc::new(FetchPool::new(2, fetch))),
            config,
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = proc.process(&record(&["Jane Smith"]));
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(outcome.pages_fetched, 1);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.emails.len(), 1);
    }

    #[test]
    fn budget_spans_queries_within_a_record() {
        let hits = vec![SearchHit {
            url: "https://a.example".to_string(),
            title: String::new(),
            snippet: String::new(),
        }];
        let stub = Arc::new(StubSearch::with_hits(hits));
        let config = EnrichConfig {
            max_queries: 1,
            scrape_enabled: false,
            ..EnrichConfig::default()
        };
        let proc = processor_with(stub.clone(), config);
        // two owners -> two planned queries, but only one budget unit
        let outcome = proc.process(&record(&["Jane Smith", "Mark Smith"]));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.queries_issued, 1);
        assert!(outcome.note.contains("query budget exhausted"));
    }

    #[test]
    fn email_cap_truncates_across_hits() {
        let hits = vec![SearchHit {
            url: "https://a.example".to_string(),
            title: "a@x.com b@x.com c@x.com".to_string(),
            snippet: String::new(),
        }];
        let config = EnrichConfig {
            max_emails_per_record: 2,
            scrape_enabled: false,
            ..EnrichConfig::default()
        };
        let proc = processor_with(Arc::new(StubSearch::with_hits(hits)), config);
        let outcome = proc.process(&record(&["Jane Smith"]));
        assert_eq!(outcome.emails.len(), 2);
        assert!(outcome.truncated);
    }
}
