//! HTTP handlers for upload sessions and the caller's object listing.

use crate::{
    errors::AppError,
    handlers::auth::AuthUser,
    models::{
        credential::UploadSession,
        object::{CreateObjectRequest, ListObjectsResponse, ObjectListing},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use futures::future::join_all;

/// `POST /api/objects`: record metadata and return a write credential.
pub async fn create_object(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateObjectRequest>, JsonRejection>,
) -> Result<Json<UploadSession>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected create-object body");
        AppError::bad_request("Missing required fields: name, size_bytes, mime_type")
    })?;

    let session = state.coordinator.create_upload_session(user, request).await?;
    Ok(Json(session))
}

/// `GET /api/objects`: the caller's objects, newest first. Photos carry a
/// short-lived preview URL when one can be minted.
pub async fn list_objects(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ListObjectsResponse>, AppError> {
    let rows = state.metadata.list_by_owner(user).await?;

    let objects = join_all(rows.into_iter().map(|metadata| {
        let issuer = state.issuer.clone();
        async move {
            let preview_url = if metadata.is_photo() {
                match issuer.issue_read_credential(metadata.id).await {
                    Ok(credential) => Some(credential.target_url),
                    Err(err) => {
                        tracing::warn!(id = %metadata.id, error = %err, "could not mint preview URL");
                        None
                    }
                }
            } else {
                None
            };
            ObjectListing {
                metadata,
                preview_url,
            }
        }
    }))
    .await;

    Ok(Json(ListObjectsResponse { objects }))
}
