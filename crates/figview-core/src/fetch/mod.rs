//! Outbound fetch seam used by the resolvers.
//!
//! Every network request the pipeline makes goes through an [`AssetFetcher`].
//! The gateway crate provides the real implementations; [`MemoryFetcher`]
//! serves canned responses for tests and offline use.

mod memory;

pub use memory::MemoryFetcher;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// Prefix of OAuth access tokens.
pub const OAUTH_TOKEN_PREFIX: &str = "figu_";

/// Prefix of personal access tokens.
pub const PERSONAL_TOKEN_PREFIX: &str = "figd_";

/// What a request is for. Drives credential and response handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    /// Raw image bytes from a storage host.
    Asset,
    /// JSON from the design-tool API.
    Api,
    /// A web font stylesheet.
    Stylesheet,
    /// A font binary referenced by a stylesheet.
    FontFile,
}

impl FetchKind {
    /// Whether the response body is JSON.
    pub fn expects_json(self) -> bool {
        matches!(self, FetchKind::Api)
    }
}

/// A credential to present upstream.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// OAuth access token, sent as `Authorization: Bearer`.
    Bearer(String),
    /// Personal access token, sent as `X-Figma-Token`.
    PersonalToken(String),
    /// OAuth token held server-side behind the session cookie.
    Session(String),
}

impl Credential {
    /// Classify a raw token by its prefix.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.starts_with(PERSONAL_TOKEN_PREFIX) {
            Credential::PersonalToken(token.to_string())
        } else {
            Credential::Bearer(token.to_string())
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            Credential::Bearer(token)
            | Credential::PersonalToken(token)
            | Credential::Session(token) => token,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Credential::Bearer(_) => "bearer",
            Credential::PersonalToken(_) => "personal-token",
            Credential::Session(_) => "session",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.kind_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub kind: FetchKind,
    pub credential: Option<Credential>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, kind: FetchKind) -> Self {
        Self {
            url: url.into(),
            kind,
            credential: None,
        }
    }

    pub fn asset(url: impl Into<String>) -> Self {
        Self::new(url, FetchKind::Asset)
    }

    pub fn api(url: impl Into<String>, credential: Credential) -> Self {
        Self::new(url, FetchKind::Api).with_credential(credential)
    }

    pub fn stylesheet(url: impl Into<String>) -> Self {
        Self::new(url, FetchKind::Stylesheet)
    }

    pub fn font_file(url: impl Into<String>) -> Self {
        Self::new(url, FetchKind::FontFile)
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// Response body of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Bytes {
        bytes: Bytes,
        content_type: Option<String>,
    },
    Json(Value),
}

impl Fetched {
    pub fn bytes(bytes: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Fetched::Bytes {
            bytes: bytes.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    pub fn into_bytes(self) -> GatewayResult<(Bytes, Option<String>)> {
        match self {
            Fetched::Bytes {
                bytes,
                content_type,
            } => Ok((bytes, content_type)),
            Fetched::Json(_) => Err(GatewayError::Decode(
                "expected a binary body, got JSON".to_string(),
            )),
        }
    }

    pub fn into_json(self) -> GatewayResult<Value> {
        match self {
            Fetched::Json(value) => Ok(value),
            Fetched::Bytes { bytes, .. } => serde_json::from_slice(&bytes)
                .map_err(|err| GatewayError::Decode(err.to_string())),
        }
    }
}

/// Failure of a single gateway request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Host not allowed: {host}{path}")]
    Rejected { host: String, path: String },

    #[error("Upstream returned status {status}")]
    UpstreamError { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GatewayError::UpstreamError { status } => Some(*status),
            _ => None,
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::UpstreamError { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future for fetch operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Performs outbound requests on behalf of the resolvers.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, GatewayResult<Fetched>>;
}

impl<T: AssetFetcher + ?Sized> AssetFetcher for Arc<T> {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, GatewayResult<Fetched>> {
        (**self).fetch(request)
    }
}
