//! Query client for the Cloudera Manager timeseries endpoint.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use cmsight_common::ConnectionConfig;

use crate::timeseries::TimeSeriesResponse;

/// Default per-query request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reasons a single query produced no data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure or timeout reaching the upstream.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("Upstream returned HTTP {status}")]
    Upstream { status: u16 },

    /// The body did not match the timeseries response shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The scrape was cancelled while the query was in flight.
    #[error("Query cancelled")]
    Cancelled,

    /// The endpoint cannot be built from the connection settings.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl FetchError {
    /// Short, stable name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Upstream { .. } => "upstream",
            FetchError::MalformedResponse(_) => "malformed_response",
            FetchError::Cancelled => "cancelled",
            FetchError::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }

    /// Whether this failure prevents any query of the module from succeeding.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::InvalidEndpoint(_))
    }
}

/// A timeseries query expression with an optional cluster scope.
///
/// The scope is embedded in the expression as `expr[clusterName=X]`, which
/// is where the upstream expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSeriesQuery<'a> {
    expression: &'a str,
    scope: Option<&'a str>,
}

impl<'a> TimeSeriesQuery<'a> {
    /// Create an unscoped query.
    pub fn new(expression: &'a str) -> Self {
        Self {
            expression,
            scope: None,
        }
    }

    /// Restrict the query to one cluster. Empty scopes are ignored.
    pub fn with_scope(mut self, scope: Option<&'a str>) -> Self {
        self.scope = scope.filter(|s| !s.is_empty());
        self
    }

    /// The raw expression, without scope.
    pub fn raw(&self) -> &'a str {
        self.expression
    }

    /// The cluster scope, if any.
    pub fn scope(&self) -> Option<&'a str> {
        self.scope
    }

    /// The expression as sent upstream, scope included.
    pub fn expression(&self) -> Cow<'a, str> {
        match self.scope {
            Some(scope) => Cow::Owned(format!("{}[clusterName={}]", self.expression, scope)),
            None => Cow::Borrowed(self.expression),
        }
    }
}

/// Anything that can answer a timeseries query.
///
/// [`QueryClient`] is the production implementation.
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Run one query. Must return [`FetchError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        query: &TimeSeriesQuery<'_>,
    ) -> Result<TimeSeriesResponse, FetchError>;
}

/// Authenticated, timeout-bounded HTTP client for the timeseries endpoint.
#[derive(Debug, Clone)]
pub struct QueryClient {
    config: Arc<ConnectionConfig>,
    endpoint: Url,
    http: reqwest::Client,
}

impl QueryClient {
    /// Create a client for the given connection settings.
    pub fn new(config: Arc<ConnectionConfig>, request_timeout: Duration) -> Result<Self, FetchError> {
        config
            .validate()
            .map_err(|e| FetchError::InvalidEndpoint(e.to_string()))?;

        let endpoint = Url::parse(&config.timeseries_endpoint())
            .map_err(|e| FetchError::InvalidEndpoint(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            config,
            endpoint,
            http,
        })
    }

    /// Full request URL for a query, with the expression URL-encoded.
    pub fn request_url(&self, query: &TimeSeriesQuery<'_>) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("query", &query.expression());
        url
    }

    async fn execute(&self, url: Url) -> Result<TimeSeriesResponse, FetchError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl TimeSeriesSource for QueryClient {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        query: &TimeSeriesQuery<'_>,
    ) -> Result<TimeSeriesResponse, FetchError> {
        let url = self.request_url(query);
        trace!(url = %url, "Running timeseries query");

        // Dropping the request future aborts the underlying connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.execute(url) => result,
        }
    }
}
