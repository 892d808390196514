use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::api::error::ApiError;

/// Shared secret for mutating endpoints. An empty token disables the check.
#[derive(Clone)]
pub struct ApiToken(pub Arc<str>);

impl ApiToken {
    pub fn new(token: &str) -> Self {
        Self(Arc::from(token))
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks an `Authorization` header value of the form `Bearer <token>`.
    pub fn accepts(&self, header: Option<&str>) -> bool {
        if self.is_disabled() {
            return true;
        }
        header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|presented| presented.trim() == &*self.0)
            .unwrap_or(false)
    }
}

/// Middleware rejecting requests without the configured bearer token
pub async fn require_bearer(
    State(token): State<ApiToken>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !token.accepts(header) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}
