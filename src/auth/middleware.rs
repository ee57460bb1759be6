//! Request authentication middleware
//!
//! Accepts `Authorization: Bearer <token>` or, for SSE consumers that
//! cannot set headers, a `?token=` query parameter.

use crate::auth::jwt::JwtHandler;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub async fn auth_middleware(
    State(jwt): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = token_from_request(&req).ok_or(AuthError::MissingToken)?;

    let claims = jwt
        .validate(&token)
        .map_err(|_| AuthError::InvalidToken)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn token_from_request(req: &Request) -> Option<String> {
    let from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }

    // Fall back to the query string (EventSource cannot set headers)
    req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
        };
        (status, message).into_response()
    }
}
