//! Identity gate.
//!
//! Resolves a bearer token to the stable [`UserId`] of its owner. Only the
//! SHA-256 digest of each token is stored.

use crate::models::user::UserId;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid or unknown token")]
    InvalidToken,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve the caller behind `bearer`, or fail as unauthenticated.
    async fn authenticate(&self, bearer: Option<&str>) -> Result<UserId, AuthError>;
}

/// Looks tokens up in the `api_tokens` table.
#[derive(Clone)]
pub struct SqliteIdentity {
    db: Arc<SqlitePool>,
}

impl SqliteIdentity {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Mint a new token for `user`. The raw token is returned once and never
    /// stored.
    pub async fn issue_token(&self, user: UserId) -> Result<String, AuthError> {
        let token = format!(
            "ubk_{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );

        sqlx::query("INSERT INTO api_tokens (token_hash, user_id, created_at) VALUES (?, ?, ?)")
            .bind(hash_token(&token))
            .bind(user.as_uuid())
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;

        tracing::info!(user_id = %user, "issued api token");
        Ok(token)
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentity {
    async fn authenticate(&self, bearer: Option<&str>) -> Result<UserId, AuthError> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let user_id = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM api_tokens WHERE token_hash = ?")
            .bind(hash_token(token))
            .fetch_optional(&*self.db)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        Ok(UserId(user_id))
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extract the credentials from an `Authorization: Bearer ...` header value.
/// The scheme is matched case-insensitively.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}
