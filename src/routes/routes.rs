//! Defines routes for upload sessions and the direct storage channel.
//!
//! ## Structure
//! - **Session endpoints** (bearer API token)
//!   - `POST /api/objects` - create an upload session
//!   - `GET  /api/objects` - list the caller's objects, newest first
//!
//! - **Storage endpoints** (storage token)
//!   - `PUT  /storage/objects/{id}` - direct upload, `Authorization: Bearer <upload token>`
//!   - `GET  /storage/objects/{id}?token=...` - preview download
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        session_handlers::{create_object, list_objects},
        storage_handlers::{get_object, put_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router. Shared state is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/objects", get(list_objects).post(create_object))
        .route("/storage/objects/{id}", put(put_object).get(get_object))
}
