//! [`AssetFetcher`] that goes through a running gateway server.

use figview_core::fetch::{
    AssetFetcher, BoxFuture, Credential, FetchRequest, Fetched, GatewayError, GatewayResult,
};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::credentials;
use crate::session::SESSION_COOKIE;

const PROXY_ROUTE: &str = "/api/proxy";

#[derive(Debug, Clone)]
pub struct RemoteGateway {
    client: Client,
    base: Url,
    session: Option<String>,
}

impl RemoteGateway {
    /// `base` is the gateway's origin, e.g. `http://localhost:3030`.
    pub fn new(base: &str) -> GatewayResult<Self> {
        let base = Url::parse(base).map_err(|err| GatewayError::InvalidUrl(err.to_string()))?;
        Ok(Self {
            client: Client::new(),
            base,
            session: None,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Present this session id as the gateway's session cookie.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session = Some(session_id.into());
        self
    }

    fn proxy_url(&self, target: &str) -> GatewayResult<Url> {
        let mut url = self
            .base
            .join(PROXY_ROUTE)
            .map_err(|err| GatewayError::InvalidUrl(err.to_string()))?;
        url.query_pairs_mut().append_pair("url", target);
        Ok(url)
    }

    async fn get(&self, request: FetchRequest) -> GatewayResult<Fetched> {
        let mut builder = self.client.get(self.proxy_url(&request.url)?);
        match request.credential.as_ref() {
            Some(Credential::Session(_)) => {
                debug!("Session credentials travel as the gateway cookie");
            }
            Some(credential) => {
                if let Some((name, value)) = credentials::upstream_header(credential) {
                    builder = builder.header(name, value);
                }
            }
            None => {}
        }
        if let Some(session) = &self.session {
            builder = builder.header(COOKIE, format!("{SESSION_COOKIE}={session}"));
        }

        let transport = |err: reqwest::Error| GatewayError::Transport(err.without_url().to_string());
        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?;

        if (200..300).contains(&status) {
            return if request.kind.expects_json() {
                serde_json::from_slice(&body)
                    .map(Fetched::Json)
                    .map_err(|err| GatewayError::Decode(err.to_string()))
            } else {
                Ok(Fetched::Bytes {
                    bytes: body,
                    content_type,
                })
            };
        }
        Err(remote_error(&request.url, status, &body))
    }
}

impl AssetFetcher for RemoteGateway {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, GatewayResult<Fetched>> {
        Box::pin(self.get(request))
    }
}

/// Reconstruct the gateway's error from its status and `{error, status}` body.
fn remote_error(target: &str, status: u16, body: &[u8]) -> GatewayError {
    let body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    if let Some(upstream) = body.get("status").and_then(Value::as_u64) {
        return GatewayError::UpstreamError {
            status: u16::try_from(upstream).unwrap_or(status),
        };
    }
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("gateway error")
        .to_string();
    match status {
        400 => GatewayError::InvalidUrl(message),
        403 => {
            let (host, path) = Url::parse(target)
                .map(|url| (url.host_str().unwrap_or_default().to_string(), url.path().to_string()))
                .unwrap_or_default();
            GatewayError::Rejected { host, path }
        }
        500..=599 => GatewayError::Transport(message),
        _ => GatewayError::UpstreamError { status },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;
    use crate::policy::HostPolicy;
    use crate::routes::GatewayServer;
    use crate::upstream::{StaticUpstream, UpstreamResponse};
    use std::sync::Arc;

    const HERO: &str = "https://s3-alpha.figma.com/img/hero";

    async fn spawn_server() -> (String, Arc<StaticUpstream>) {
        let upstream = Arc::new(
            StaticUpstream::new()
                .with_response(HERO, UpstreamResponse::new(200, Some("image/png"), "PNG"))
                .with_response(
                    "https://api.figma.com/v1/me",
                    UpstreamResponse::new(200, Some("application/json"), r#"{"id":"1"}"#),
                ),
        );
        let server = GatewayServer::new(Gateway::new(HostPolicy::default(), upstream.clone()), false);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, server.router()).await.unwrap();
        });
        (format!("http://{addr}"), upstream)
    }

    #[test]
    fn test_proxy_url_encodes_target() {
        let remote = RemoteGateway::new("http://localhost:3030").unwrap();
        let url = remote.proxy_url("https://s3-alpha.figma.com/a?b=c&d=e").unwrap();
        assert_eq!(url.path(), "/api/proxy");
        let (_, target) = url.query_pairs().next().unwrap();
        assert_eq!(target, "https://s3-alpha.figma.com/a?b=c&d=e");
    }

    #[test]
    fn test_remote_error_mapping() {
        assert_eq!(
            remote_error(HERO, 502, br#"{"error":"upstream request failed","status":404}"#),
            GatewayError::UpstreamError { status: 404 }
        );
        assert_eq!(
            remote_error("https://evil.example.com/x", 403, br#"{"error":"host not allowed"}"#),
            GatewayError::Rejected {
                host: "evil.example.com".into(),
                path: "/x".into()
            }
        );
        assert!(matches!(
            remote_error(HERO, 400, b"{}"),
            GatewayError::InvalidUrl(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_through_running_gateway() {
        let (base, upstream) = spawn_server().await;
        let remote = RemoteGateway::new(&base).unwrap();

        let fetched = remote.fetch(FetchRequest::asset(HERO)).await.unwrap();
        assert_eq!(fetched, Fetched::bytes(&b"PNG"[..], Some("image/png")));

        let me = remote
            .fetch(FetchRequest::api(
                "https://api.figma.com/v1/me",
                Credential::Bearer("figu_oauth".into()),
            ))
            .await
            .unwrap();
        assert_eq!(me, Fetched::Json(serde_json::json!({"id": "1"})));

        let err = remote
            .fetch(FetchRequest::asset("https://evil.example.com/x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
        assert_eq!(upstream.total_calls(), 2);
    }
}
