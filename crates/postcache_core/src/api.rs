//! Remote post source contract and its canned stand-in.
//!
//! # Invariants
//! - `StubApi` never retries, paginates or authenticates.
//! - The simulated delay is awaited, never slept on a runtime thread.

use crate::model::post::{Post, RawRecord};
use async_trait::async_trait;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Delay of the stand-in client when none is configured.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// Fetch client failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The remote source could not be reached.
    Unavailable(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "post source unavailable: {reason}"),
        }
    }
}

impl Error for FetchError {}

/// Source of raw post records.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError>;
}

/// Client returning canned records after a simulated delay.
#[derive(Debug, Clone)]
pub struct StubApi {
    delay: Duration,
    records: Vec<RawRecord>,
    failure: Option<String>,
}

impl Default for StubApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StubApi {
    pub fn new() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            records: canned_records(),
            failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_records(mut self, records: Vec<RawRecord>) -> Self {
        self.records = records;
        self
    }

    /// Makes every fetch fail with `FetchError::Unavailable(reason)`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

#[async_trait]
impl FetchClient for StubApi {
    async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError> {
        tokio::time::sleep(self.delay).await;
        if let Some(reason) = &self.failure {
            warn!(
                "event=api_fetch module=api status=error reason={}",
                reason
            );
            return Err(FetchError::Unavailable(reason.clone()));
        }
        info!(
            "event=api_fetch module=api status=ok records={} delay_ms={}",
            self.records.len(),
            self.delay.as_millis()
        );
        Ok(self.records.clone())
    }
}

/// Records served by `StubApi::new`.
pub fn canned_records() -> Vec<RawRecord> {
    [
        Post::new(
            1,
            "sunt aut facere repellat provident",
            "quia et suscipit suscipit recusandae consequuntur expedita",
        ),
        Post::new(
            2,
            "qui est esse",
            "est rerum tempore vitae sequi sint nihil reprehenderit dolor",
        ),
        Post::new(
            3,
            "ea molestias quasi exercitationem",
            "et iusto sed quo iure voluptatem occaecati omnis eligendi",
        ),
        Post::new(
            4,
            "eum et est occaecati",
            "ullam et saepe reiciendis voluptatem adipisci sit amet",
        ),
        Post::new(
            5,
            "nesciunt quas odio",
            "repudiandae veniam quaerat sunt sed alias aut fugiat sit",
        ),
    ]
    .iter()
    .map(Post::to_raw)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::{canned_records, FetchClient, FetchError, StubApi};
    use std::time::Duration;

    #[tokio::test]
    async fn stub_returns_canned_records() {
        let api = StubApi::new().with_delay(Duration::ZERO);
        let records = api.fetch_records().await.unwrap();
        assert_eq!(records, canned_records());
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn failing_stub_reports_unavailable() {
        let api = StubApi::new().with_delay(Duration::ZERO).failing("offline");
        let err = api.fetch_records().await.unwrap_err();
        assert_eq!(err, FetchError::Unavailable("offline".into()));
    }
}
