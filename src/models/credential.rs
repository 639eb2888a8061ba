//! Scoped storage credentials and the upload-session response that carries one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::object::ObjectMetadata;

/// Operation a storage credential authorizes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageOp {
    Put,
    Get,
}

impl StorageOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOp::Put => "put",
            StorageOp::Get => "get",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "put" => Some(StorageOp::Put),
            "get" => Some(StorageOp::Get),
            _ => None,
        }
    }

    /// HTTP method a client must use with this credential.
    pub fn http_method(&self) -> &'static str {
        match self {
            StorageOp::Put => "PUT",
            StorageOp::Get => "GET",
        }
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability to perform one operation on one object until `expires_at`.
/// Never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadCredential {
    pub target_url: String,
    pub token: String,
    pub method: String,
    pub expires_at: DateTime<Utc>,
}

/// Successful response of `POST /api/objects`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadSession {
    pub metadata: ObjectMetadata,
    pub upload_target: String,
    pub upload_token: String,
    pub upload_method: String,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(metadata: ObjectMetadata, credential: UploadCredential) -> Self {
        Self {
            metadata,
            upload_target: credential.target_url,
            upload_token: credential.token,
            upload_method: credential.method,
            expires_at: credential.expires_at,
        }
    }

    /// The credential part of the session, as the client presents it to storage.
    pub fn credential(&self) -> UploadCredential {
        UploadCredential {
            target_url: self.upload_target.clone(),
            token: self.upload_token.clone(),
            method: self.upload_method.clone(),
            expires_at: self.expires_at,
        }
    }
}
