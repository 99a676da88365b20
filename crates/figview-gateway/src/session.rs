//! Server-held OAuth sessions behind an opaque cookie.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "figview_session";

struct Session {
    token: String,
    expires_at: Option<Instant>,
}

/// Maps session ids to OAuth access tokens.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` and return the new session id.
    ///
    /// A lifetime too large to represent never expires. Sessions that have
    /// already expired are swept first.
    pub fn create(&self, token: impl Into<String>, expires_in: Option<u64>) -> String {
        self.purge_expired();
        let id = Uuid::new_v4().to_string();
        let expires_at =
            expires_in.and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)));
        self.sessions.insert(
            id.clone(),
            Session {
                token: token.into(),
                expires_at,
            },
        );
        id
    }

    /// The token for `id`, dropping it first if it has expired.
    pub fn token(&self, id: &str) -> Option<String> {
        let session = self.sessions.get(id)?;
        if session.expires_at.is_some_and(|at| at <= Instant::now()) {
            drop(session);
            self.sessions.remove(id);
            return None;
        }
        Some(session.token.clone())
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.expires_at.is_some_and(|at| at <= now));
        before.saturating_sub(self.sessions.len())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// `Set-Cookie` value for a session.
///
/// `Max-Age` mirrors the upstream token lifetime when one is known.
pub fn session_cookie(value: &str, expires_in: Option<u64>, production: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/");
    if production {
        cookie.push_str("; Secure");
    }
    if let Some(max_age) = expires_in {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    cookie
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie(production: bool) -> String {
    session_cookie("", Some(0), production)
}

/// Value of cookie `name` in a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })
}
