use std::time::Duration;

use apkup_backend::{ApiConsumer, ResolveError};
use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GITHUB_API_PREFIX: &str = "https://api.github.com/";

/// Build the HTTP client shared by metadata lookups and downloads.
///
/// # Errors
/// Returns an error when the TLS backend cannot be initialised.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(format!("apkup/{}", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// [`ApiConsumer`] over plain HTTP(S) GET requests.
#[derive(Debug, Clone)]
pub struct HttpApiConsumer {
    client: reqwest::Client,
    github_token: Option<String>,
}

impl HttpApiConsumer {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            github_token: None,
        }
    }

    /// Authenticate GitHub API requests, which raises the rate limit.
    #[must_use]
    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token.filter(|token| !token.trim().is_empty());
        self
    }
}

#[async_trait]
impl ApiConsumer for HttpApiConsumer {
    async fn fetch_text(&self, url: &str) -> Result<String, ResolveError> {
        debug!("Fetching {url}");

        let mut request = self.client.get(url);
        if let Some(token) = &self.github_token
            && url.starts_with(GITHUB_API_PREFIX)
        {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ResolveError::unavailable_from(url, error))?;

        let status = response.status();
        if let Some(error) = rate_limit_error(url, status, response.headers()) {
            warn!("Rate limited by {url}");
            return Err(error);
        }

        if !status.is_success() {
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(ResolveError::unavailable(
                url,
                format!("HTTP {status}{body_snippet}"),
            ));
        }

        response
            .text()
            .await
            .map_err(|error| ResolveError::unavailable_from(url, error))
    }
}

/// Fetch `url` and decode the body as JSON.
///
/// # Errors
/// Propagates fetch failures; undecodable bodies become
/// [`ResolveError::InvalidResponse`].
pub async fn fetch_json<T: DeserializeOwned>(
    consumer: &dyn ApiConsumer,
    url: &str,
) -> Result<T, ResolveError> {
    let body = consumer.fetch_text(url).await?;
    serde_json::from_str(&body).map_err(|error| ResolveError::invalid_response(url, error.to_string()))
}

fn rate_limit_error(url: &str, status: StatusCode, headers: &HeaderMap) -> Option<ResolveError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };

    let quota_exhausted = header("x-ratelimit-remaining") == Some("0");
    if status != StatusCode::TOO_MANY_REQUESTS
        && !(status == StatusCode::FORBIDDEN && quota_exhausted)
    {
        return None;
    }

    let reset_at = header("x-ratelimit-reset")
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0));

    Some(ResolveError::UpstreamRateLimited {
        url: url.to_string(),
        reset_at,
    })
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", snippet.trim())
    }
}
