//! Client upload driver.
//!
//! Runs on the uploader's side: validates the selected file, asks the broker
//! for an upload session, then writes the bytes straight to storage with the
//! returned credential.
//!
//! ```text
//! Idle -> Validating -> CreatingSession -> Uploading -> Succeeded
//!            |               |                 |
//!            +---------------+-----------------+--> Failed(reason)
//! ```
//!
//! A storage failure is never reported back to the broker; the metadata row
//! created for the session stays in place.

use crate::models::{
    credential::{UploadCredential, UploadSession},
    object::CreateObjectRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file picked for upload, fully loaded.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let mime_type = mime_type.into();
        Self {
            name: name.into(),
            mime_type: if mime_type.is_empty() {
                FALLBACK_MIME.to_string()
            } else {
                mime_type
            },
            bytes: bytes.into(),
        }
    }

    /// Load a file from disk, guessing its MIME type from the extension.
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn size(&self) -> i64 {
        self.bytes.len() as i64
    }
}

/// Failure reported by an [`UploadApi`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiFailure {
    /// The remote side answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// The request never got an answer.
    #[error("{0}")]
    Transport(String),
}

impl ApiFailure {
    /// HTTP status of a rejection; `None` when nothing came back.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiFailure::Rejected { status, .. } => Some(*status),
            ApiFailure::Transport(_) => None,
        }
    }
}

/// The two remote calls the driver makes.
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn create_session(&self, request: &CreateObjectRequest) -> Result<UploadSession, ApiFailure>;

    async fn put_object(
        &self,
        credential: &UploadCredential,
        mime_type: &str,
        body: Bytes,
    ) -> Result<(), ApiFailure>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadFailure {
    #[error("no file selected")]
    NoFileSelected,
    #[error("server rejected the upload: {0}")]
    ServerRejected(String),
    #[error("storage rejected the upload: {0}")]
    StorageRejected(String),
}

impl UploadFailure {
    /// Short message for display next to the upload form.
    pub fn user_message(&self) -> String {
        match self {
            UploadFailure::NoFileSelected => "Please choose a file to upload.".into(),
            UploadFailure::ServerRejected(msg) if msg.is_empty() => {
                "Failed to create object".into()
            }
            UploadFailure::ServerRejected(msg) => msg.clone(),
            UploadFailure::StorageRejected(_) => {
                "The file could not be transferred to storage. Please try again.".into()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Idle,
    Validating,
    CreatingSession,
    Uploading,
    Succeeded(UploadSession),
    Failed(UploadFailure),
}

/// Fieldless view of [`UploadState`], used for the transition history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Validating,
    CreatingSession,
    Uploading,
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn phase(&self) -> UploadPhase {
        match self {
            UploadState::Idle => UploadPhase::Idle,
            UploadState::Validating => UploadPhase::Validating,
            UploadState::CreatingSession => UploadPhase::CreatingSession,
            UploadState::Uploading => UploadPhase::Uploading,
            UploadState::Succeeded(_) => UploadPhase::Succeeded,
            UploadState::Failed(_) => UploadPhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Succeeded(_) | UploadState::Failed(_))
    }
}

pub struct UploadDriver<A, F> {
    api: A,
    on_success: F,
    selected: Option<LocalFile>,
    state: UploadState,
    history: Vec<UploadPhase>,
}

impl<A, F> UploadDriver<A, F>
where
    A: UploadApi,
    F: FnMut(&UploadSession),
{
    pub fn new(api: A, on_success: F) -> Self {
        Self {
            api,
            on_success,
            selected: None,
            state: UploadState::Idle,
            history: vec![UploadPhase::Idle],
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Every phase entered since construction, in order.
    pub fn history(&self) -> &[UploadPhase] {
        &self.history
    }

    pub fn selected(&self) -> Option<&LocalFile> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, file: Option<LocalFile>) {
        self.selected = file;
    }

    /// Drop the selection. Only possible before submission; a submitted
    /// upload runs to a terminal state.
    pub fn cancel(&mut self) -> bool {
        if matches!(self.state, UploadState::Idle) || self.state.is_terminal() {
            self.selected = None;
            self.transition(UploadState::Idle);
            true
        } else {
            false
        }
    }

    fn transition(&mut self, next: UploadState) {
        tracing::debug!(from = ?self.state.phase(), to = ?next.phase(), "upload state change");
        self.history.push(next.phase());
        self.state = next;
    }

    fn fail(&mut self, failure: UploadFailure) -> &UploadState {
        tracing::warn!(error = %failure, "upload failed");
        self.transition(UploadState::Failed(failure));
        &self.state
    }

    /// Run one upload attempt for the current selection. The form stays
    /// usable afterwards: a failure keeps the selection for another try, a
    /// success clears it.
    pub async fn submit(&mut self) -> &UploadState {
        self.transition(UploadState::Validating);
        let file = match self.selected.clone() {
            Some(file) if !file.bytes.is_empty() => file,
            _ => return self.fail(UploadFailure::NoFileSelected),
        };

        self.transition(UploadState::CreatingSession);
        let request = CreateObjectRequest::new(file.name.clone(), file.size(), file.mime_type.clone());
        let session = match self.api.create_session(&request).await {
            Ok(session) => session,
            Err(err) => {
                tracing::debug!(status = ?err.status(), "session request refused");
                return self.fail(UploadFailure::ServerRejected(err.to_string()));
            }
        };

        self.transition(UploadState::Uploading);
        if let Err(err) = self
            .api
            .put_object(&session.credential(), &file.mime_type, file.bytes.clone())
            .await
        {
            tracing::debug!(status = ?err.status(), "storage write refused");
            return self.fail(UploadFailure::StorageRejected(err.to_string()));
        }

        tracing::info!(id = %session.metadata.id, name = %session.metadata.name, "upload complete");
        self.selected = None;
        (self.on_success)(&session);
        self.transition(UploadState::Succeeded(session));
        &self.state
    }
}
