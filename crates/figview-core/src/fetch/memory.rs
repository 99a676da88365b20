//! In-memory fetcher with canned responses.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use super::{AssetFetcher, BoxFuture, FetchRequest, Fetched, GatewayError, GatewayResult};

/// Serves canned responses by URL and records every request it sees.
///
/// Unknown URLs answer with an upstream 404.
#[derive(Default)]
pub struct MemoryFetcher {
    responses: RwLock<HashMap<String, GatewayResult<Fetched>>>,
    calls: Mutex<Vec<FetchRequest>>,
    delay: Option<Duration>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every response for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_response(self, url: impl Into<String>, response: GatewayResult<Fetched>) -> Self {
        self.respond(url, response);
        self
    }

    pub fn with_bytes(
        self,
        url: impl Into<String>,
        bytes: impl Into<Bytes>,
        content_type: &str,
    ) -> Self {
        self.with_response(url, Ok(Fetched::bytes(bytes, Some(content_type))))
    }

    pub fn with_json(self, url: impl Into<String>, value: Value) -> Self {
        self.with_response(url, Ok(Fetched::Json(value)))
    }

    pub fn with_failure(self, url: impl Into<String>, error: GatewayError) -> Self {
        self.with_response(url, Err(error))
    }

    /// Set or replace the response for `url`.
    pub fn respond(&self, url: impl Into<String>, response: GatewayResult<Fetched>) {
        let mut responses = self.responses.write().unwrap_or_else(PoisonError::into_inner);
        responses.insert(url.into(), response);
    }

    /// Every request seen so far, in arrival order.
    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.url == url)
            .count()
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, GatewayResult<Fetched>> {
        Box::pin(async move {
            let url = request.url.clone();
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let responses = self.responses.read().unwrap_or_else(PoisonError::into_inner);
            responses
                .get(&url)
                .cloned()
                .unwrap_or(Err(GatewayError::UpstreamError { status: 404 }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Credential;

    #[tokio::test]
    async fn test_canned_response() {
        let fetcher = MemoryFetcher::new().with_bytes("https://a/1.png", &b"png"[..], "image/png");
        let fetched = fetcher
            .fetch(FetchRequest::asset("https://a/1.png"))
            .await
            .unwrap();
        let (bytes, content_type) = fetched.into_bytes().unwrap();
        assert_eq!(&bytes[..], b"png");
        assert_eq!(content_type.as_deref(), Some("image/png"));
        assert_eq!(fetcher.call_count("https://a/1.png"), 1);
    }

    #[tokio::test]
    async fn test_unknown_url_is_404() {
        let fetcher = MemoryFetcher::new();
        let result = fetcher.fetch(FetchRequest::asset("https://a/missing")).await;
        assert_eq!(result, Err(GatewayError::UpstreamError { status: 404 }));
    }

    #[tokio::test]
    async fn test_records_credentials() {
        let fetcher = MemoryFetcher::new().with_json("https://api/x", serde_json::json!({}));
        fetcher
            .fetch(FetchRequest::api(
                "https://api/x",
                Credential::PersonalToken("figd_t".into()),
            ))
            .await
            .unwrap();
        let calls = fetcher.calls();
        assert_eq!(
            calls[0].credential,
            Some(Credential::PersonalToken("figd_t".into()))
        );
    }
}
