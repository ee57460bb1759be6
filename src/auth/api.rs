//! Token endpoint

use crate::auth::{
    jwt::JwtHandler,
    models::{Claims, TokenRequest, TokenResponse},
    user_store::UserStore,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

/// POST /token - exchange username/password for a bearer token.
pub async fn token(
    State(state): State<AuthState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AuthApiError> {
    info!("🔐 Token request: {}", payload.username);

    let valid = state
        .user_store
        .verify_password(&payload.username, &payload.password)
        .map_err(|_| AuthApiError::Internal)?;

    if !valid {
        warn!("❌ Failed credential exchange: {}", payload.username);
        return Err(AuthApiError::InvalidCredentials);
    }

    let user = state
        .user_store
        .get_by_username(&payload.username)
        .map_err(|_| AuthApiError::Internal)?
        .ok_or(AuthApiError::InvalidCredentials)?;

    let (access_token, expires_in) = state
        .jwt_handler
        .issue(&user)
        .map_err(|_| AuthApiError::Internal)?;

    info!("✅ Token issued: {} ({})", user.username, user.role.as_str());

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in,
        role: user.role,
    }))
}

/// GET /me - identity behind the current token.
pub async fn me(Extension(claims): Extension<Claims>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "id": claims.sub,
        "username": claims.username,
        "role": claims.role,
    }))
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Internal,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid username or password")
            }
            AuthApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };
        (status, message).into_response()
    }
}
