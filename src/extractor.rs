use std::collections::HashSet;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;

/// Matches that end in one of these are image/font paths the email pattern
/// misreads as addresses ("logo@2x.png").
const ASSET_SUFFIXES: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".css", ".js", ".woff", ".woff2",
];

/// A normalized address plus the page or snippet it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailCandidate {
    pub email: String,
    pub source: String,
}

/// Record-scoped accumulator: dedupes, filters artifacts, and enforces the
/// per-record cap. Order of first sight is preserved.
pub struct EmailSink {
    cap: usize,
    seen: HashSet<String>,
    candidates: Vec<EmailCandidate>,
    truncated: bool,
}

impl EmailSink {
    pub fn new(cap: usize) -> Self {
        EmailSink {
            cap,
            seen: HashSet::new(),
            candidates: Vec::new(),
            truncated: false,
        }
    }

    /// Offer one raw match. Returns false once the cap is hit, telling the
    /// caller to stop scanning; the rejected offer itself proves more
    /// addresses remained, so the truncation flag is raised here.
    pub fn offer(&mut self, raw: &str, source: &str) -> bool {
        let email = normalize(raw);
        if ASSET_SUFFIXES.iter().any(|s| email.ends_with(s)) {
            return true;
        }
        if self.seen.contains(&email) {
            return true;
        }
        if self.candidates.len() >= self.cap {
            self.truncated = true;
            return false;
        }
        self.seen.insert(email.clone());
        self.candidates.push(EmailCandidate {
            email,
            source: source.to_string(),
        });
        true
    }

    pub fn is_full(&self) -> bool {
        self.candidates.len() >= self.cap
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn into_candidates(self) -> Vec<EmailCandidate> {
        self.candidates
    }
}

/// Mailboxes are case-insensitive only in their domain portion, so dedup
/// lowercases the domain and leaves the local part alone.
pub fn normalize(raw: &str) -> String {
    match raw.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => raw.to_string(),
    }
}

pub struct EmailExtractor {
    email_regex: Regex,
}

impl EmailExtractor {
    pub fn new() -> Self {
        EmailExtractor {
            email_regex: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
        }
    }

    /// Scan raw page content (HTML or plain text) into the sink. mailto:
    /// anchors are harvested first since they are the highest-precision
    /// source, then the pattern sweeps the full text. Stops early once the
    /// sink is capped.
    pub fn scan(&self, content: &str, source: &str, sink: &mut EmailSink) {
        if content.contains("mailto:") {
            let document = Html::parse_document(content);
            let selector = Selector::parse("a").unwrap();
            for element in document.select(&selector) {
                if let Some(href) = element.value().attr("href") {
                    if let Some(addr) = href.strip_prefix("mailto:") {
                        let addr = addr.split('?').next().unwrap_or(addr);
                        if self.email_regex.is_match(addr) && !sink.offer(addr, source) {
                            return;
                        }
                    }
                }
            }
        }

        for m in self.email_regex.find_iter(content) {
            if !sink.offer(m.as_str(), source) {
                return;
            }
        }
    }
}

impl Default for EmailExtractor {
    fn default() -> Self {
        Self::new()
    }
}
