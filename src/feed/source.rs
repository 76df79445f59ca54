use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::feed::alert::Alert;
use crate::feed::parse::parse_feed;
use crate::feed::policy::SeverityPolicy;
use crate::foundation::error::{AlertcastError, AlertcastResult};

/// Default public alert feed.
pub const DEFAULT_FEED_URL: &str = "https://api.weather.gov/alerts/active";

/// Capability: "fetch the current list, possibly failing".
///
/// Implementations never panic on bad input or unreachable endpoints; every failure is returned
/// as an error value and the caller keeps its previous data.
pub trait AlertSource: Send {
    /// Human-readable description including the active filter policy.
    fn describe(&self) -> String;

    /// Fetch, filter and order the current alerts.
    fn fetch(&mut self) -> AlertcastResult<Vec<Alert>>;
}

/// Options for [`HttpSource`].
#[derive(Clone, Debug)]
pub struct HttpSourceOpts {
    /// Feed URL.
    pub url: String,
    /// Upper bound for one request, connect through body.
    pub timeout: Duration,
    /// `User-Agent` header; the public feed rejects anonymous clients.
    pub user_agent: String,
}

impl HttpSourceOpts {
    /// Options for `url` with an 8 second timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(8),
            user_agent: format!("alertcast/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Fetches the feed over HTTP with a bounded timeout.
pub struct HttpSource {
    client: reqwest::blocking::Client,
    url: String,
    policy: Box<dyn SeverityPolicy>,
}

impl HttpSource {
    /// Build the HTTP client. Fails only on invalid client configuration.
    pub fn new(opts: HttpSourceOpts, policy: Box<dyn SeverityPolicy>) -> AlertcastResult<Self> {
        if opts.timeout.is_zero() {
            return Err(AlertcastError::validation("fetch timeout must be non-zero"));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(opts.timeout)
            .user_agent(opts.user_agent)
            .build()
            .map_err(|e| AlertcastError::config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: opts.url,
            policy,
        })
    }

    /// Active filter policy.
    pub fn policy(&self) -> &dyn SeverityPolicy {
        self.policy.as_ref()
    }
}

impl AlertSource for HttpSource {
    fn describe(&self) -> String {
        format!("http {} ({})", self.url, self.policy.name())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(url = %self.url))]
    fn fetch(&mut self) -> AlertcastResult<Vec<Alert>> {
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/geo+json")
            .send()
            .map_err(|e| AlertcastError::fetch(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AlertcastError::fetch(format!("feed returned error status: {e}")))?;
        let body = resp
            .bytes()
            .map_err(|e| AlertcastError::fetch(format!("failed to read feed body: {e}")))?;
        parse_feed(&body, self.policy.as_ref())
    }
}

/// Reads a saved feed document from disk on every fetch.
pub struct FileSource {
    path: PathBuf,
    policy: Box<dyn SeverityPolicy>,
}

impl FileSource {
    /// Source backed by the JSON document at `path`.
    pub fn new(path: impl Into<PathBuf>, policy: Box<dyn SeverityPolicy>) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }
}

impl AlertSource for FileSource {
    fn describe(&self) -> String {
        format!("file {} ({})", self.path.display(), self.policy.name())
    }

    fn fetch(&mut self) -> AlertcastResult<Vec<Alert>> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read alert feed '{}'", self.path.display()))
            .map_err(|e| AlertcastError::fetch(format!("{e:#}")))?;
        parse_feed(&bytes, self.policy.as_ref())
    }
}

/// Source returning a fixed list or a fixed failure. For tests and demos.
#[derive(Clone, Debug)]
pub struct StaticSource {
    outcome: Result<Vec<Alert>, String>,
    calls: usize,
}

impl StaticSource {
    /// Always succeed with `alerts`.
    pub fn ok(alerts: Vec<Alert>) -> Self {
        Self {
            outcome: Ok(alerts),
            calls: 0,
        }
    }

    /// Always fail with `msg`.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            outcome: Err(msg.into()),
            calls: 0,
        }
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl AlertSource for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    fn fetch(&mut self) -> AlertcastResult<Vec<Alert>> {
        self.calls += 1;
        self.outcome.clone().map_err(AlertcastError::fetch)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/feed/source.rs"]
mod tests;
