//! Upload session coordinator.
//!
//! Creates an upload session in two forward steps across two independent
//! systems: record the metadata row, then mint a write credential keyed by
//! the row's id. If the second step fails the row is deleted again, so the
//! only state a failed call can leave behind is none at all. The whole
//! sequence runs once per call with no internal retry.

use crate::{
    models::{
        credential::UploadSession,
        object::{CreateObjectRequest, ObjectMetadataDraft},
        user::UserId,
    },
    services::{
        credentials::{CredentialIssuer, IssuerError},
        metadata_store::{MetadataStore, StoreError},
    },
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to record object metadata: {0}")]
    Persistence(#[source] StoreError),
    #[error("failed to issue upload credential: {0}")]
    Credential(#[source] IssuerError),
}

/// Validated fields of a create request.
#[derive(Debug, Clone, PartialEq)]
struct UploadFields {
    name: String,
    size_bytes: i64,
    mime_type: String,
}

fn validate(request: CreateObjectRequest) -> Result<UploadFields, CoordinatorError> {
    const MISSING: &str = "Missing required fields: name, size_bytes, mime_type";

    let name = request
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CoordinatorError::Validation(MISSING.into()))?;
    let size_bytes = request
        .size_bytes
        .ok_or_else(|| CoordinatorError::Validation(MISSING.into()))?;
    let mime_type = request
        .mime_type
        .filter(|m| !m.is_empty())
        .ok_or_else(|| CoordinatorError::Validation(MISSING.into()))?;

    if size_bytes < 0 {
        return Err(CoordinatorError::Validation(
            "size_bytes must not be negative".into(),
        ));
    }

    Ok(UploadFields {
        name,
        size_bytes,
        mime_type,
    })
}

#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn MetadataStore>,
    issuer: Arc<dyn CredentialIssuer>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn MetadataStore>, issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Record metadata for a new object owned by `owner` and return it
    /// together with a write credential for the same id.
    ///
    /// Errors:
    /// - `Validation` before any side effect.
    /// - `Persistence` if the insert fails; no credential is requested.
    /// - `Credential` if issuance fails; the inserted row is deleted first.
    ///   A failed delete is logged and does not change the returned error.
    pub async fn create_upload_session(
        &self,
        owner: UserId,
        request: CreateObjectRequest,
    ) -> Result<UploadSession, CoordinatorError> {
        let fields = validate(request)?;
        let id = Uuid::new_v4();

        let metadata = self
            .store
            .insert(ObjectMetadataDraft {
                id,
                owner_id: owner,
                name: fields.name,
                size_bytes: fields.size_bytes,
                mime_type: fields.mime_type,
            })
            .await
            .map_err(|err| {
                tracing::error!(%id, owner = %owner, error = %err, "metadata insert failed");
                CoordinatorError::Persistence(err)
            })?;

        match self.issuer.issue_upload_credential(id).await {
            Ok(credential) => {
                tracing::info!(%id, owner = %owner, size_bytes = metadata.size_bytes, "upload session created");
                Ok(UploadSession::new(metadata, credential))
            }
            Err(err) => {
                tracing::warn!(%id, error = %err, "credential issuance failed, rolling back metadata");
                if let Err(compensation) = self.store.delete_by_id(id).await {
                    tracing::error!(
                        %id,
                        error = %compensation,
                        "compensation failed: metadata row left without credential"
                    );
                }
                Err(CoordinatorError::Credential(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        credentials::SignedUrlIssuer,
        metadata_store::SqliteMetadataStore,
        signing::UrlSigner,
        testing::{CountingStore, FailingIssuer, OrderCheckingIssuer, memory_pool},
    };
    use std::collections::HashSet;

    fn healthy_issuer() -> Arc<dyn CredentialIssuer> {
        Arc::new(SignedUrlIssuer::new(
            UrlSigner::new("secret").unwrap(),
            "http://storage.test",
            900,
            3600,
        ))
    }

    async fn sqlite_store() -> Arc<SqliteMetadataStore> {
        Arc::new(SqliteMetadataStore::new(memory_pool().await))
    }

    fn owner() -> UserId {
        UserId(Uuid::new_v4())
    }

    #[tokio::test]
    async fn success_pairs_row_and_credential_by_id() {
        let store = sqlite_store().await;
        let coordinator = UploadCoordinator::new(store.clone(), healthy_issuer());
        let user = owner();

        let session = coordinator
            .create_upload_session(user, CreateObjectRequest::new("cat.png", 2048, "image/png"))
            .await
            .unwrap();

        assert_eq!(session.metadata.size_bytes, 2048);
        assert_eq!(session.metadata.owner_id, user.as_uuid());
        assert!(!session.upload_token.is_empty());
        assert!(
            session
                .upload_target
                .ends_with(&session.metadata.id.to_string())
        );

        let stored = store.find_by_id(session.metadata.id).await.unwrap();
        assert_eq!(stored, Some(session.metadata));
    }

    #[tokio::test]
    async fn credential_failure_rolls_back_the_row() {
        let store = sqlite_store().await;
        let issuer = Arc::new(FailingIssuer::default());
        let coordinator = UploadCoordinator::new(store.clone(), issuer.clone());

        let err = coordinator
            .create_upload_session(owner(), CreateObjectRequest::new("cat.png", 10, "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Credential(_)));

        let attempted = issuer.attempted_ids();
        assert_eq!(attempted.len(), 1);
        assert!(store.find_by_id(attempted[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_compensation_still_reports_credential_error() {
        let store = Arc::new(CountingStore::new(sqlite_store().await).failing_deletes());
        let issuer = Arc::new(FailingIssuer::default());
        let coordinator = UploadCoordinator::new(store.clone(), issuer.clone());

        let err = coordinator
            .create_upload_session(owner(), CreateObjectRequest::new("cat.png", 10, "image/png"))
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::Credential(_)));
        assert_eq!(store.deletes(), 1);
    }

    #[tokio::test]
    async fn issuer_only_sees_ids_that_are_already_stored() {
        let store = sqlite_store().await;
        let issuer = Arc::new(OrderCheckingIssuer::new(store.clone()));
        let coordinator = UploadCoordinator::new(store.clone(), issuer.clone());

        for i in 0..5 {
            coordinator
                .create_upload_session(owner(), CreateObjectRequest::new(format!("{i}.png"), i, "image/png"))
                .await
                .unwrap();
        }

        assert_eq!(issuer.calls(), 5);
        assert_eq!(issuer.violations(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_skips_credential_request() {
        let store = Arc::new(CountingStore::new(sqlite_store().await).failing_inserts());
        let issuer = Arc::new(OrderCheckingIssuer::new(store.clone()));
        let coordinator = UploadCoordinator::new(store.clone(), issuer.clone());

        let err = coordinator
            .create_upload_session(owner(), CreateObjectRequest::new("cat.png", 10, "image/png"))
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::Persistence(_)));
        assert_eq!(store.inserts(), 1);
        assert_eq!(store.deletes(), 0);
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_input_touches_nothing() {
        let store = Arc::new(CountingStore::new(sqlite_store().await));
        let issuer = Arc::new(OrderCheckingIssuer::new(store.clone()));
        let coordinator = UploadCoordinator::new(store.clone(), issuer.clone());

        let invalid = [
            CreateObjectRequest::new("", 10, "image/png"),
            CreateObjectRequest::new("cat.png", 10, ""),
            CreateObjectRequest::new("cat.png", -1, "image/png"),
            CreateObjectRequest {
                size_bytes: None,
                ..CreateObjectRequest::new("cat.png", 0, "image/png")
            },
            CreateObjectRequest::default(),
        ];

        for request in invalid {
            let err = coordinator
                .create_upload_session(owner(), request)
                .await
                .unwrap_err();
            assert!(matches!(err, CoordinatorError::Validation(_)));
        }

        assert_eq!(store.inserts(), 0);
        assert_eq!(store.deletes(), 0);
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn whitespace_name_and_mime_are_not_empty() {
        let store = sqlite_store().await;
        let coordinator = UploadCoordinator::new(store.clone(), healthy_issuer());

        let session = coordinator
            .create_upload_session(owner(), CreateObjectRequest::new("   ", 10, " "))
            .await
            .unwrap();

        assert_eq!(session.metadata.name, "   ");
        assert_eq!(session.metadata.mime_type, " ");
        assert!(store.find_by_id(session.metadata.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_byte_declaration_is_accepted() {
        let coordinator = UploadCoordinator::new(sqlite_store().await, healthy_issuer());
        let session = coordinator
            .create_upload_session(owner(), CreateObjectRequest::new("empty.txt", 0, "text/plain"))
            .await
            .unwrap();
        assert_eq!(session.metadata.size_bytes, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_get_distinct_ids() {
        let store = sqlite_store().await;
        let issuer = Arc::new(OrderCheckingIssuer::new(store.clone()));
        let coordinator = UploadCoordinator::new(store.clone(), issuer.clone());
        let user = owner();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .create_upload_session(user, CreateObjectRequest::new(format!("{i}.png"), i, "image/png"))
                        .await
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            ids.insert(session.metadata.id);
        }

        assert_eq!(ids.len(), 32);
        assert_eq!(store.list_by_owner(user).await.unwrap().len(), 32);
        assert_eq!(issuer.distinct_ids(), 32);
        assert_eq!(issuer.violations(), 0);
    }
}
