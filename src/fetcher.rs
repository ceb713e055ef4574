use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use url::Url;

use crate::error::FetchError;

const USER_AGENT_STR: &str = "openweb-enricher/0.1 (+https://example.local)";

/// Fetches one page at a time. Cheap to share behind an Arc; the worker
/// pool drives the concurrency.
pub struct PageFetcher {
    client: Client,
    host_like: Regex,
}

impl PageFetcher {
    pub fn new(timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .expect("Failed to build HTTP client");

        PageFetcher {
            client,
            host_like: Regex::new(r"\.[a-z]{2,}(/|$)").unwrap(),
        }
    }

    /// Result URLs arrive in every shape county sites and search indexes
    /// produce: scheme-relative, bare hostnames, full URLs. Anything that
    /// does not look like a host is rejected rather than guessed at.
    pub fn normalize_url(&self, raw: &str) -> Result<Url, FetchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FetchError::InvalidUrl(raw.to_string()));
        }
        let candidate = if trimmed.starts_with("//") {
            format!("https:{}", trimmed)
        } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else if self.host_like.is_match(&trimmed.to_lowercase()) {
            format!("https://{}", trimmed)
        } else {
            return Err(FetchError::InvalidUrl(trimmed.to_string()));
        };
        Url::parse(&candidate).map_err(|_| FetchError::InvalidUrl(trimmed.to_string()))
    }

    /// Fetch one URL and return its raw body. Non-2xx and binary content
    /// types are errors; the extractor copes with markup itself.
    pub fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let target = self.normalize_url(url)?;
        info!("Fetching page: {}", target);

        let resp = self
            .client
            .get(target.as_str())
            .header(USER_AGENT, USER_AGENT_STR)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let ctype = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if !ctype.is_empty()
            && !ctype.contains("html")
            && !ctype.contains("text")
            && !ctype.contains("json")
        {
            return Err(FetchError::ContentType(ctype));
        }

        resp.text().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Request(e.to_string())
            }
        })
    }
}

/// How one dispatched URL settled.
pub struct FetchOutcome {
    pub url: String,
    pub result: Result<String, FetchError>,
}

struct PoolJob {
    url: String,
    reply: Sender<FetchOutcome>,
}

pub type FetchFn = Arc<dyn Fn(&str) -> Result<String, FetchError> + Send + Sync>;

/// Fixed-size thread pool over a task queue. Total in-flight fetches never
/// exceed the worker count no matter how many URLs a batch dispatches, which
/// bounds outbound connection pressure on third-party sites.
pub struct FetchPool {
    tx: Option<Sender<PoolJob>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl FetchPool {
    pub fn new(workers: usize, fetch: FetchFn) -> Self {
        let (tx, rx) = mpsc::channel::<PoolJob>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                let fetch = Arc::clone(&fetch);
                thread::spawn(move || loop {
                    let job = rx.lock().unwrap().recv();
                    let Ok(job) = job else {
                        break; // queue closed, pool is shutting down
                    };
                    let result = fetch(&job.url);
                    // the batch may have given up on us; that is fine
                    let _ = job.reply.send(FetchOutcome {
                        url: job.url,
                        result,
                    });
                })
            })
            .collect();

        FetchPool {
            tx: Some(tx),
            workers: handles,
        }
    }

    pub fn with_fetcher(workers: usize, fetcher: PageFetcher) -> Self {
        let fetcher = Arc::new(fetcher);
        Self::new(workers, Arc::new(move |url: &str| fetcher.fetch(url)))
    }

    /// Dispatch a batch and block until every task settles or the deadline
    /// passes. Outcomes arrive in completion order; stragglers past the
    /// deadline are abandoned (their workers finish or time out on their
    /// own, bounding cancellation latency to one fetch timeout).
    pub fn fetch_batch(&self, urls: &[String], deadline: Duration) -> Vec<FetchOutcome> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let tx = self.tx.as_ref().expect("pool already shut down");

        let mut dispatched = 0;
        for url in urls {
            let job = PoolJob {
                url: url.clone(),
                reply: reply_tx.clone(),
            };
            if tx.send(job).is_ok() {
                dispatched += 1;
            }
        }
        drop(reply_tx);

        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(dispatched);
        while outcomes.len() < dispatched {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                break;
            };
            match reply_rx.recv_timeout(remaining) {
                Ok(outcome) => outcomes.push(outcome),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if outcomes.len() < dispatched {
            warn!(
                "Fetch batch deadline expired with {} of {} pages outstanding",
                dispatched - outcomes.len(),
                dispatched
            );
        }
        outcomes
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        // closing the queue lets every worker drain and exit
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
