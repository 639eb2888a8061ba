//! Direct-to-storage endpoints of the local object store.
//! Request bodies are streamed to disk and responses streamed from it;
//! access is decided solely by the storage token.

use crate::{
    errors::AppError,
    models::credential::StorageOp,
    services::identity::parse_bearer,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub token: Option<String>,
}

/// `PUT /storage/objects/{id}`: write the payload once, authorized by a
/// bearer write token.
pub async fn put_object(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .ok_or_else(AppError::unauthorized)?;
    state.signer.verify(token, StorageOp::Put, id, Utc::now())?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let stored = state.objects.put_stream(id, stream).await?;
    tracing::info!(%id, size_bytes = stored.size_bytes, "object uploaded");

    let mut resp_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", stored.etag)) {
        resp_headers.insert(header::ETAG, value);
    }
    Ok((StatusCode::CREATED, resp_headers))
}

/// `GET /storage/objects/{id}?token=...`: stream the payload, authorized by
/// a read token in the query string.
pub async fn get_object(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReadQuery>,
) -> Result<Response, AppError> {
    let token = query.token.ok_or_else(AppError::unauthorized)?;
    state.signer.verify(&token, StorageOp::Get, id, Utc::now())?;

    let (file, len) = state.objects.open(id).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-store"));
    Ok(response)
}
