//! The HTTP client behind the gateway.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use figview_core::fetch::{BoxFuture, GatewayError, GatewayResult};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use url::Url;

/// An outbound GET, already past the allowlist.
#[derive(Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
}

impl fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| *name).collect();
        f.debug_struct("UpstreamRequest")
            .field("host", &self.url.host_str())
            .field("path", &self.url.path())
            .field("headers", &names)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Upstream: Send + Sync {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'_, GatewayResult<UpstreamResponse>>;
}

/// [`Upstream`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: Client,
}

impl ReqwestUpstream {
    /// Redirects are returned unfollowed, so credentials only reach
    /// allowlisted hosts.
    pub fn new(user_agent: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Upstream for ReqwestUpstream {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'_, GatewayResult<UpstreamResponse>> {
        Box::pin(async move {
            let mut builder = self.client.get(request.url);
            for (name, value) in request.headers {
                builder = builder.header(name, value);
            }
            let response = builder
                .send()
                .await
                .map_err(|err| GatewayError::Transport(err.without_url().to_string()))?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response
                .bytes()
                .await
                .map_err(|err| GatewayError::Transport(err.without_url().to_string()))?;
            Ok(UpstreamResponse {
                status,
                content_type,
                body,
            })
        })
    }
}

/// Canned responses keyed by URL. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StaticUpstream {
    responses: DashMap<String, UpstreamResponse>,
    calls: DashMap<String, usize>,
    headers: DashMap<String, Vec<(&'static str, String)>>,
}

impl StaticUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, url: impl Into<String>, response: UpstreamResponse) -> Self {
        self.responses.insert(url.into(), response);
        self
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.get(url).map(|count| *count).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Header names sent with the most recent request to `url`.
    pub fn last_headers(&self, url: &str) -> Vec<(&'static str, String)> {
        self.headers
            .get(url)
            .map(|headers| headers.clone())
            .unwrap_or_default()
    }
}

impl Upstream for StaticUpstream {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'_, GatewayResult<UpstreamResponse>> {
        let url = request.url.to_string();
        *self.calls.entry(url.clone()).or_insert(0) += 1;
        self.headers.insert(url.clone(), request.headers);
        let response = self
            .responses
            .get(&url)
            .map(|response| response.clone())
            .unwrap_or_else(|| UpstreamResponse::new(404, Some("text/plain"), "not found"));
        Box::pin(async move { Ok(response) })
    }
}
