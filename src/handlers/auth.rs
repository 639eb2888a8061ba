//! Request extractor for the identity gate.

use crate::{
    errors::AppError, models::user::UserId, services::identity::parse_bearer, state::AppState,
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

/// The authenticated caller. Extracting it rejects the request with 401
/// before the handler body runs.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer);

        let user = state.identity.authenticate(bearer).await?;
        Ok(AuthUser(user))
    }
}
