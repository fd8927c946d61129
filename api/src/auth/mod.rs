use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::AppState;
use crate::db;
use crate::error::AppError;
use crate::types::UserId;

/// Authenticated user extracted from the Authorization header.
///
/// The header must be `Bearer <token>` where the token was issued by
/// register/login. Only the SHA-256 of a token is stored, so a leaked
/// sessions table cannot be replayed.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    /// Hash of the presented token, used by logout.
    pub token_hash: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".into()))?;
        let token = bearer_token(header)?;
        authenticate(&state.pool, token).await
    }
}

pub(crate) async fn authenticate(pool: &db::Db, token: &str) -> Result<AuthenticatedUser, AppError> {
    let token_hash = hash_token(token);
    let user_id = db::sessions::get_session_user(pool, &token_hash)
        .await?
        .ok_or_else(|| AppError::Unauthorized("session expired or invalid".into()))?;
    Ok(AuthenticatedUser {
        user_id,
        token_hash,
    })
}

pub(crate) fn bearer_token(header: &str) -> Result<&str, AppError> {
    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "authorization must be a bearer token".into(),
        ));
    }
    Ok(token.trim())
}

/// New random session token (256 bits, base64url).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("failed to encode salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("stored password hash is unreadable: {e}");
            false
        }
    }
}

/// Minimum requirements for a new password.
pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 8 {
        return Err(AppError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

/// Issues a session for `user_id` and returns the plaintext token.
pub async fn start_session(
    pool: &db::Db,
    user_id: &UserId,
    ttl_hours: i64,
) -> Result<String, AppError> {
    let token = generate_token();
    let expires_at = chrono::Utc::now() + chrono::Duration::hours(ttl_hours);
    db::sessions::create_session(pool, &hash_token(&token), user_id, expires_at).await?;
    Ok(token)
}
