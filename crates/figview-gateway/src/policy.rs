//! Host allowlist. Checked before any network call.

use std::collections::HashSet;

use figview_core::fetch::{GatewayError, GatewayResult};
use tracing::warn;
use url::Url;

pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "api.figma.com",
    "www.figma.com",
    "figma-alpha-api.s3.us-west-2.amazonaws.com",
    "s3-alpha-sig.figma.com",
    "s3-alpha.figma.com",
    "s3-figma-hubfile-images-production.figma.com",
    "figma-alpha.imgix.net",
    "static.figma.com",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
];

/// Hosts that may receive credentials.
pub const API_HOSTS: &[&str] = &["api.figma.com", "www.figma.com"];

const STORAGE_SUFFIX: &str = ".amazonaws.com";
const STORAGE_PATH_SEGMENTS: &[&str] = &["/figma-alpha-api/", "/images/"];

#[derive(Debug, Clone)]
pub struct HostPolicy {
    hosts: HashSet<String>,
    api_hosts: HashSet<String>,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_HOSTS.iter().copied())
    }
}

impl HostPolicy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .collect(),
            api_hosts: API_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Parse `target` and accept it only if it may be fetched.
    pub fn check(&self, target: &str) -> GatewayResult<Url> {
        let url = Url::parse(target.trim()).map_err(|err| GatewayError::InvalidUrl(err.to_string()))?;
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return Err(GatewayError::InvalidUrl(format!("no host in '{}'", url.scheme())));
        };
        let path = url.path().to_string();

        let allowed = url.scheme() == "https"
            && url.username().is_empty()
            && url.password().is_none()
            && (self.hosts.contains(&host) || is_storage_target(&host, &path));
        if !allowed {
            // Path only: queries on signed URLs carry signatures.
            warn!("Rejected outbound request to {}{} ({})", host, path, url.scheme());
            return Err(GatewayError::Rejected { host, path });
        }
        Ok(url)
    }

    pub fn is_allowed(&self, target: &str) -> bool {
        self.check(target).is_ok()
    }

    /// Whether credentials may be attached for this target.
    pub fn is_api_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.api_hosts.contains(&host.to_ascii_lowercase()))
    }
}

fn is_storage_target(host: &str, path: &str) -> bool {
    host.ends_with(STORAGE_SUFFIX)
        && STORAGE_PATH_SEGMENTS
            .iter()
            .any(|segment| path.contains(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_hosts_allowed() {
        let policy = HostPolicy::default();
        assert!(policy.is_allowed("https://api.figma.com/v1/files/abc"));
        assert!(policy.is_allowed("https://s3-alpha.figma.com/img/12/34"));
        assert!(policy.is_allowed("https://fonts.gstatic.com/s/inter/v1/a.woff2"));
        assert!(policy.is_allowed("https://API.FIGMA.COM/v1/me"));
    }

    #[test]
    fn test_foreign_host_rejected() {
        let policy = HostPolicy::default();
        let err = policy.check("https://evil.example.com/steal?token=x").unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                host: "evil.example.com".into(),
                path: "/steal".into()
            }
        );
    }

    #[test]
    fn test_only_https() {
        let policy = HostPolicy::default();
        assert!(matches!(
            policy.check("http://api.figma.com/v1/me"),
            Err(GatewayError::Rejected { .. })
        ));
        assert!(matches!(
            policy.check("not a url"),
            Err(GatewayError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_storage_wildcard_needs_path_segment() {
        let policy = HostPolicy::default();
        assert!(policy.is_allowed("https://bucket.s3.amazonaws.com/figma-alpha-api/img/1"));
        assert!(policy.is_allowed("https://other.s3.us-east-1.amazonaws.com/images/abc.png"));
        assert!(!policy.is_allowed("https://bucket.s3.amazonaws.com/private/abc.png"));
        assert!(!policy.is_allowed("https://amazonaws.com.evil.example/images/a.png"));
    }

    #[test]
    fn test_userinfo_rejected() {
        let policy = HostPolicy::default();
        assert!(!policy.is_allowed("https://user:pw@api.figma.com/v1/me"));
    }

    #[test]
    fn test_api_hosts() {
        let policy = HostPolicy::default();
        assert!(policy.is_api_host(&Url::parse("https://api.figma.com/v1/me").unwrap()));
        assert!(!policy.is_api_host(&Url::parse("https://s3-alpha.figma.com/x").unwrap()));
    }

    #[test]
    fn test_configured_hosts() {
        let policy = HostPolicy::new(["assets.internal.test"]);
        assert!(policy.is_allowed("https://assets.internal.test/a.png"));
        assert!(!policy.is_allowed("https://api.figma.com/v1/me"));
    }
}
