use thiserror::Error;

/// Job-level failures. Everything else resolves into a `RecordOutcome`
/// and never aborts the job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// The job-wide query budget is spent. No request was made.
    #[error("search budget exhausted")]
    BudgetExhausted,

    /// 429/401-style rejection. Remaining searches for the job are pointless.
    #[error("search quota rejected (status {0})")]
    Quota(u16),

    /// Timeout, connect failure or 5xx. Retried once before surfacing.
    #[error("transient search failure: {0}")]
    Transient(String),

    /// Unexpected payload shape. Treated as zero hits by the caller.
    #[error("malformed search response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("unsupported content type: {0}")]
    ContentType(String),

    #[error("fetch timed out")]
    Timeout,
}
