//! Bearer token minting and validation (HS256)

use crate::auth::models::{Claims, User};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

const TOKEN_LIFETIME_HOURS: i64 = 12;

pub struct JwtHandler {
    secret: String,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Returns the encoded token and its lifetime in seconds.
    pub fn issue(&self, user: &User) -> Result<(String, usize)> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::hours(TOKEN_LIFETIME_HOURS))
            .context("invalid expiry timestamp")?
            .timestamp() as usize;

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role,
            exp: expiration,
        };

        debug!("Issuing token for {} ({})", user.username, user.id);

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("token encode")?;

        Ok((token, (TOKEN_LIFETIME_HOURS * 3600) as usize))
    }

    pub fn validate(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;
        Ok(decoded.claims)
    }
}
