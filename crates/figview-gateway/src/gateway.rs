//! In-process gateway: policy, credentials, then upstream.

use std::sync::Arc;

use figview_core::fetch::{
    AssetFetcher, BoxFuture, FetchRequest, Fetched, GatewayError, GatewayResult,
};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::credentials;
use crate::policy::HostPolicy;
use crate::upstream::{ReqwestUpstream, Upstream, UpstreamRequest};

/// The single egress point for outbound fetches.
#[derive(Clone)]
pub struct Gateway {
    policy: HostPolicy,
    upstream: Arc<dyn Upstream>,
}

impl Gateway {
    pub fn new(policy: HostPolicy, upstream: Arc<dyn Upstream>) -> Self {
        Self { policy, upstream }
    }

    /// A gateway with a real HTTP client, configured from `config`.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let upstream = ReqwestUpstream::new(&config.user_agent, config.timeout)?;
        Ok(Self::new(
            HostPolicy::new(&config.allowed_hosts),
            Arc::new(upstream),
        ))
    }

    pub fn policy(&self) -> &HostPolicy {
        &self.policy
    }

    /// Fetch `request.url` if the allowlist permits it.
    ///
    /// API requests come back as parsed JSON, everything else as raw bytes
    /// with the upstream content type.
    pub async fn get(&self, request: FetchRequest) -> GatewayResult<Fetched> {
        let url = self.policy.check(&request.url)?;
        let headers = credentials::upstream_headers(
            request.credential.as_ref(),
            self.policy.is_api_host(&url),
        );
        let host = url.host_str().unwrap_or_default().to_string();
        let path = url.path().to_string();

        let response = self.upstream.send(UpstreamRequest { url, headers }).await?;
        if !response.is_success() {
            warn!("Upstream {}{} answered {}", host, path, response.status);
            return Err(GatewayError::UpstreamError {
                status: response.status,
            });
        }
        debug!(
            "Fetched {}{} ({:?}, {} bytes)",
            host,
            path,
            request.kind,
            response.body.len()
        );

        if request.kind.expects_json() {
            let value = serde_json::from_slice(&response.body)
                .map_err(|err| GatewayError::Decode(err.to_string()))?;
            Ok(Fetched::Json(value))
        } else {
            Ok(Fetched::Bytes {
                bytes: response.body,
                content_type: response.content_type,
            })
        }
    }
}

impl AssetFetcher for Gateway {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, GatewayResult<Fetched>> {
        Box::pin(self.get(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{StaticUpstream, UpstreamResponse};
    use figview_core::fetch::Credential;
    use serde_json::json;

    const ME: &str = "https://api.figma.com/v1/me";
    const ASSET: &str = "https://s3-alpha.figma.com/img/hero";

    fn upstream() -> Arc<StaticUpstream> {
        Arc::new(
            StaticUpstream::new()
                .with_response(
                    ME,
                    UpstreamResponse::new(200, Some("application/json"), r#"{"handle":"ada"}"#),
                )
                .with_response(ASSET, UpstreamResponse::new(200, Some("image/png"), "PNGDATA")),
        )
    }

    #[tokio::test]
    async fn test_rejected_before_network() {
        let upstream = upstream();
        let gateway = Gateway::new(HostPolicy::default(), upstream.clone());
        let err = gateway
            .get(FetchRequest::asset("https://evil.example.com/x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
        assert_eq!(upstream.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_asset_bytes_keep_content_type() {
        let gateway = Gateway::new(HostPolicy::default(), upstream());
        let fetched = gateway.get(FetchRequest::asset(ASSET)).await.unwrap();
        assert_eq!(fetched, Fetched::bytes(&b"PNGDATA"[..], Some("image/png")));
    }

    #[tokio::test]
    async fn test_api_json_with_credential() {
        let upstream = upstream();
        let gateway = Gateway::new(HostPolicy::default(), upstream.clone());
        let fetched = gateway
            .get(FetchRequest::api(ME, Credential::PersonalToken("figd_x".into())))
            .await
            .unwrap();
        assert_eq!(fetched, Fetched::Json(json!({"handle": "ada"})));
        assert_eq!(
            upstream.last_headers(ME),
            vec![(credentials::FIGMA_TOKEN, "figd_x".to_string())]
        );
    }

    #[tokio::test]
    async fn test_asset_hosts_never_see_credentials() {
        let upstream = upstream();
        let gateway = Gateway::new(HostPolicy::default(), upstream.clone());
        gateway
            .get(FetchRequest::asset(ASSET).with_credential(Credential::Bearer("figu_x".into())))
            .await
            .unwrap();
        assert!(upstream.last_headers(ASSET).is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_carries_status() {
        let gateway = Gateway::new(HostPolicy::default(), upstream());
        let err = gateway
            .get(FetchRequest::asset("https://s3-alpha.figma.com/img/missing"))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::UpstreamError { status: 404 });
    }

    #[tokio::test]
    async fn test_usable_as_asset_fetcher() {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(Gateway::new(HostPolicy::default(), upstream()));
        let fetched = fetcher.fetch(FetchRequest::asset(ASSET)).await.unwrap();
        assert!(matches!(fetched, Fetched::Bytes { .. }));
    }
}
