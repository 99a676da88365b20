//! HTTP surface of the gateway.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use figview_core::fetch::{
    Credential, FetchKind, FetchRequest, Fetched, GatewayError, GatewayResult, OAUTH_TOKEN_PREFIX,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::credentials;
use crate::gateway::Gateway;
use crate::session::{
    SESSION_COOKIE, SessionStore, clear_session_cookie, cookie_value, session_cookie,
};

const NO_STORE: &str = "no-store";
const STYLESHEET_CACHE: &str = "public, max-age=3600";
const FONT_FILE_CACHE: &str = "public, max-age=31536000, immutable";

const FONT_STYLESHEET_ORIGIN: &str = "https://fonts.googleapis.com/css2";
const FONT_FILE_ORIGIN: &str = "https://fonts.gstatic.com/";
const FONT_FILE_ROUTE: &str = "/api/fonts/static/";
const WHOAMI_URL: &str = "https://api.figma.com/v1/me";

/// Shared application state
struct AppState {
    gateway: Gateway,
    sessions: SessionStore,
    production: bool,
}

impl AppState {
    /// Explicit headers first, then the session cookie.
    fn request_credential(&self, headers: &HeaderMap) -> Option<Credential> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let figma_token = headers
            .get(credentials::FIGMA_TOKEN)
            .and_then(|value| value.to_str().ok());
        credentials::from_request_headers(authorization, figma_token).or_else(|| {
            session_id(headers)
                .and_then(|id| self.sessions.token(id))
                .map(Credential::Session)
        })
    }
}

/// The gateway's axum application.
#[derive(Clone)]
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(gateway: Gateway, production: bool) -> Self {
        Self {
            state: Arc::new(AppState {
                gateway,
                sessions: SessionStore::new(),
                production,
            }),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        Ok(Self::new(Gateway::from_config(config)?, config.production))
    }

    pub fn gateway(&self) -> &Gateway {
        &self.state.gateway
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.state.sessions
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/proxy", get(proxy))
            .route("/api/fonts/css2", get(font_stylesheet))
            .route("/api/fonts/static/{*path}", get(font_file))
            .route("/api/auth/whoami", get(whoami))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/session", post(create_session))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ProxyParams {
    url: Option<String>,
}

async fn proxy(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> Response {
    let Some(target) = params.url.filter(|url| !url.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing url parameter", None);
    };
    let url = match state.gateway.policy().check(&target) {
        Ok(url) => url,
        Err(err) => return gateway_error(err, false),
    };

    let is_api = state.gateway.policy().is_api_host(&url);
    let request = if is_api {
        let request = FetchRequest::new(url.as_str(), FetchKind::Api);
        match state.request_credential(&headers) {
            Some(credential) => request.with_credential(credential),
            None => request,
        }
    } else {
        FetchRequest::asset(url.as_str())
    };

    match state.gateway.get(request).await {
        Ok(fetched) => fetched_response(fetched, NO_STORE),
        Err(err) => gateway_error(err, is_api),
    }
}

async fn font_stylesheet(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let Some(query) = query.filter(|query| !query.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing font query", None);
    };
    let target = format!("{FONT_STYLESHEET_ORIGIN}?{query}");
    let fetched = state
        .gateway
        .get(FetchRequest::stylesheet(target))
        .await
        .and_then(Fetched::into_bytes);
    match fetched {
        Ok((bytes, _)) => {
            let css = rewrite_font_urls(&String::from_utf8_lossy(&bytes));
            (
                [
                    (header::CONTENT_TYPE, "text/css; charset=utf-8"),
                    (header::CACHE_CONTROL, STYLESHEET_CACHE),
                ],
                css,
            )
                .into_response()
        }
        Err(err) => gateway_error(err, false),
    }
}

async fn font_file(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    let target = format!("{FONT_FILE_ORIGIN}{}", path.trim_start_matches('/'));
    match state.gateway.get(FetchRequest::font_file(target)).await {
        Ok(fetched) => fetched_response(fetched, FONT_FILE_CACHE),
        Err(err) => gateway_error(err, false),
    }
}

async fn whoami(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let signed_out = || no_store_json(json!({"authenticated": false}));
    let Some(id) = session_id(&headers) else {
        return signed_out();
    };
    let Some(token) = state.sessions.token(id) else {
        return signed_out();
    };

    let user = state
        .gateway
        .get(FetchRequest::api(WHOAMI_URL, Credential::Session(token)))
        .await
        .and_then(Fetched::into_json);
    match user {
        Ok(user) => no_store_json(json!({"authenticated": true, "user": user})),
        Err(GatewayError::UpstreamError { status: 401 | 403 }) => {
            state.sessions.remove(id);
            info!("Dropped session rejected by the identity provider");
            signed_out()
        }
        Err(err) => {
            warn!("whoami failed: {}", err);
            signed_out()
        }
    }
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id(&headers) {
        state.sessions.remove(id);
    }
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(state.production))],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionRequest>,
) -> Response {
    let token = body.access_token.trim();
    if !token.starts_with(OAUTH_TOKEN_PREFIX) {
        return error_response(StatusCode::BAD_REQUEST, "expected an OAuth access token", None);
    }
    let id = state.sessions.create(token, body.expires_in);
    info!("Session created ({} active)", state.sessions.len());
    (
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            session_cookie(&id, body.expires_in, state.production),
        )],
    )
        .into_response()
}

/// Point stylesheet font URLs at this gateway.
pub fn rewrite_font_urls(css: &str) -> String {
    css.replace(FONT_FILE_ORIGIN, FONT_FILE_ROUTE)
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookies| cookie_value(cookies, SESSION_COOKIE))
}

fn fetched_response(fetched: Fetched, cache_control: &'static str) -> Response {
    match fetched {
        Fetched::Json(value) => ([(header::CACHE_CONTROL, cache_control)], Json(value)).into_response(),
        Fetched::Bytes {
            bytes,
            content_type,
        } => {
            let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
            (
                [
                    (header::CONTENT_TYPE, content_type.as_str()),
                    (header::CACHE_CONTROL, cache_control),
                ],
                bytes,
            )
                .into_response()
        }
    }
}

/// Map a gateway failure to a status. API targets pass the upstream status
/// through; asset targets answer 502.
fn gateway_error(err: GatewayError, api: bool) -> Response {
    match err {
        GatewayError::InvalidUrl(reason) => error_response(StatusCode::BAD_REQUEST, &reason, None),
        GatewayError::Rejected { host, .. } => error_response(
            StatusCode::FORBIDDEN,
            &format!("host not allowed: {host}"),
            None,
        ),
        GatewayError::UpstreamError { status } => {
            let code = if api {
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
            } else {
                StatusCode::BAD_GATEWAY
            };
            error_response(code, "upstream request failed", Some(status))
        }
        other => {
            error!("Gateway request failed: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "gateway failure", None)
        }
    }
}

fn error_response(status: StatusCode, message: &str, upstream_status: Option<u16>) -> Response {
    let mut body = json!({ "error": message });
    if let Some(upstream_status) = upstream_status {
        body["status"] = json!(upstream_status);
    }
    (status, [(header::CACHE_CONTROL, NO_STORE)], Json(body)).into_response()
}

fn no_store_json(body: serde_json::Value) -> Response {
    ([(header::CACHE_CONTROL, NO_STORE)], Json(body)).into_response()
}
