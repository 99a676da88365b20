//! Which credentials may travel upstream, and in which header.
//!
//! OAuth tokens go out as `Authorization: Bearer`, personal tokens as
//! `X-Figma-Token`. A token presented in the other kind's header is dropped,
//! never re-labelled.

use figview_core::fetch::{Credential, OAUTH_TOKEN_PREFIX, PERSONAL_TOKEN_PREFIX};
use tracing::warn;

pub const AUTHORIZATION: &str = "authorization";
pub const FIGMA_TOKEN: &str = "x-figma-token";

/// The upstream header for `credential`, or `None` if it may not be forwarded.
pub fn upstream_header(credential: &Credential) -> Option<(&'static str, String)> {
    match credential {
        Credential::Bearer(token) if token.starts_with(OAUTH_TOKEN_PREFIX) => {
            Some((AUTHORIZATION, format!("Bearer {token}")))
        }
        Credential::Session(token) => Some((AUTHORIZATION, format!("Bearer {token}"))),
        Credential::PersonalToken(token) if token.starts_with(PERSONAL_TOKEN_PREFIX) => {
            Some((FIGMA_TOKEN, token.clone()))
        }
        other => {
            warn!("Not forwarding {} credential without its token prefix", other.kind_name());
            None
        }
    }
}

/// Headers to attach for a request, empty unless the target is an API host.
pub fn upstream_headers(
    credential: Option<&Credential>,
    target_is_api: bool,
) -> Vec<(&'static str, String)> {
    if !target_is_api {
        return Vec::new();
    }
    credential.and_then(upstream_header).into_iter().collect()
}

/// Credential carried by an inbound request's headers.
///
/// `Authorization` wins over `X-Figma-Token`. Tokens without the prefix of
/// the header they arrived in are ignored.
pub fn from_request_headers(
    authorization: Option<&str>,
    figma_token: Option<&str>,
) -> Option<Credential> {
    if let Some(value) = authorization {
        let value = value.trim();
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        if token.starts_with(OAUTH_TOKEN_PREFIX) {
            return Some(Credential::Bearer(token.to_string()));
        }
        warn!("Ignoring Authorization header without an OAuth token");
    }
    if let Some(token) = figma_token.map(str::trim) {
        if token.starts_with(PERSONAL_TOKEN_PREFIX) {
            return Some(Credential::PersonalToken(token.to_string()));
        }
        warn!("Ignoring X-Figma-Token header without a personal token");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_forwarded_as_bearer() {
        let header = upstream_header(&Credential::Bearer("figu_abc".into()));
        assert_eq!(header, Some((AUTHORIZATION, "Bearer figu_abc".to_string())));
    }

    #[test]
    fn test_pat_forwarded_as_figma_token() {
        let header = upstream_header(&Credential::PersonalToken("figd_abc".into()));
        assert_eq!(header, Some((FIGMA_TOKEN, "figd_abc".to_string())));
    }

    #[test]
    fn test_unprefixed_tokens_dropped() {
        assert_eq!(upstream_header(&Credential::Bearer("plain".into())), None);
        assert_eq!(upstream_header(&Credential::PersonalToken("figu_x".into())), None);
    }

    #[test]
    fn test_session_token_forwarded() {
        let header = upstream_header(&Credential::Session("opaque".into()));
        assert_eq!(header, Some((AUTHORIZATION, "Bearer opaque".to_string())));
    }

    #[test]
    fn test_asset_hosts_get_nothing() {
        let credential = Credential::Bearer("figu_abc".into());
        assert!(upstream_headers(Some(&credential), false).is_empty());
        assert_eq!(upstream_headers(Some(&credential), true).len(), 1);
        assert!(upstream_headers(None, true).is_empty());
    }

    #[test]
    fn test_no_cross_forwarding_from_request() {
        assert_eq!(
            from_request_headers(Some("Bearer figd_pat"), None),
            None
        );
        assert_eq!(from_request_headers(None, Some("figu_oauth")), None);
        assert_eq!(
            from_request_headers(Some("Bearer figd_pat"), Some("figd_pat")),
            Some(Credential::PersonalToken("figd_pat".into()))
        );
        assert_eq!(
            from_request_headers(Some("Bearer figu_tok"), Some("figd_pat")),
            Some(Credential::Bearer("figu_tok".into()))
        );
    }
}
