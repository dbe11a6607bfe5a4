//! Bearer-token gate placed in front of every share route.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default lifetime of an issued token
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const AUTH_REQUIRED_HTML: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\"><title>Authentication Required</title></head>\n<body><h1>Authentication Required</h1><p>This file share requires an access token.</p></body></html>\n";

#[derive(Debug, Clone)]
struct TokenInfo {
    expires: Instant,
    uses: u64,
}

/// Issued access tokens with their expiry
#[derive(Debug, Default)]
pub struct TokenGate {
    tokens: Mutex<HashMap<String, TokenInfo>>,
}

impl TokenGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenInfo>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a fresh 128-bit token valid for `ttl`
    pub fn issue(&self, ttl: Duration) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.lock().insert(
            token.clone(),
            TokenInfo {
                expires: Instant::now() + ttl,
                uses: 0,
            },
        );
        token
    }

    /// True for a known, unexpired token. Expired tokens are dropped on sight.
    pub fn validate(&self, token: &str) -> bool {
        let mut tokens = self.lock();
        match tokens.get_mut(token) {
            Some(info) if Instant::now() <= info.expires => {
                info.uses += 1;
                true
            }
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn uses(&self, token: &str) -> Option<u64> {
        self.lock().get(token).map(|info| info.uses)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    /// Drop expired tokens; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, info| now <= info.expires);
        before - tokens.len()
    }
}

/// Token from `Authorization: Bearer <t>` or the `token` query parameter
pub fn token_from_request(req: &Request) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if from_header.is_some() {
        return from_header;
    }

    req.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    })
}

/// Middleware rejecting requests without a valid token
pub async fn require_token(State(gate): State<Arc<TokenGate>>, req: Request, next: Next) -> Response {
    let authorized = token_from_request(&req).is_some_and(|t| gate.validate(&t));
    if !authorized {
        tracing::warn!("Rejected unauthenticated request for {}", req.uri().path());
        let mut response = (StatusCode::UNAUTHORIZED, Html(AUTH_REQUIRED_HTML)).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        return response;
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_issue_validate_revoke() {
        let gate = TokenGate::new();
        let token = gate.issue(DEFAULT_TOKEN_TTL);
        assert_eq!(token.len(), 32);

        assert!(gate.validate(&token));
        assert!(gate.validate(&token));
        assert_eq!(gate.uses(&token), Some(2));
        assert!(!gate.validate("nope"));

        assert!(gate.revoke(&token));
        assert!(!gate.validate(&token));
    }

    #[test]
    fn test_expired_tokens_are_rejected_and_cleaned() {
        let gate = TokenGate::new();
        let expired = gate.issue(Duration::ZERO);
        let other = gate.issue(Duration::ZERO);
        let live = gate.issue(DEFAULT_TOKEN_TTL);
        std::thread::sleep(Duration::from_millis(5));

        assert!(!gate.validate(&expired));
        assert_eq!(gate.uses(&expired), None);
        assert_eq!(gate.cleanup_expired(), 1);
        assert!(!gate.validate(&other));
        assert!(gate.validate(&live));
    }

    #[test]
    fn test_token_sources() {
        let req = Request::builder()
            .uri("/download/x")
            .header("Authorization", "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from_request(&req).as_deref(), Some("abc"));

        let req = Request::builder()
            .uri("/download/x?foo=1&token=q%20t")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from_request(&req).as_deref(), Some("q t"));

        let req = Request::builder()
            .uri("/")
            .header("Authorization", "Basic abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from_request(&req), None);
    }
}
