//! Represents an uploadable object's metadata row and the request that creates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::user::UserId;

/// Metadata describing one uploadable asset.
///
/// A row exists as soon as the upload session is created; it says nothing
/// about whether the bytes have reached the object store yet.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ObjectMetadata {
    /// Join key between this row and the storage-side object key.
    pub id: Uuid,

    /// Authenticated user who created the session. Never changes.
    pub owner_id: Uuid,

    /// Caller-supplied display name.
    pub name: String,

    /// Caller-declared size. Not checked against the bytes actually stored.
    pub size_bytes: i64,

    /// Caller-declared MIME type.
    pub mime_type: String,

    /// Assigned by the metadata store at insert time.
    pub created_at: DateTime<Utc>,
}

impl ObjectMetadata {
    /// True for rows that can be previewed inline (photos).
    pub fn is_photo(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A metadata row before it is persisted. The id is generated up front so it
/// can key the upload credential as well.
#[derive(Clone, Debug)]
pub struct ObjectMetadataDraft {
    pub id: Uuid,
    pub owner_id: UserId,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

/// Body of `POST /api/objects`.
///
/// Every field is optional here so that a missing field surfaces as a
/// validation error rather than a deserialization failure.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateObjectRequest {
    pub name: Option<String>,
    pub size_bytes: Option<i64>,
    pub mime_type: Option<String>,
}

impl CreateObjectRequest {
    pub fn new(name: impl Into<String>, size_bytes: i64, mime_type: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            size_bytes: Some(size_bytes),
            mime_type: Some(mime_type.into()),
        }
    }
}

/// One entry of `GET /api/objects`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectListing {
    #[serde(flatten)]
    pub metadata: ObjectMetadata,

    /// Short-lived read URL, only minted for photos.
    pub preview_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ListObjectsResponse {
    pub objects: Vec<ObjectListing>,
}
