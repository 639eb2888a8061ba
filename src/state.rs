//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        coordinator::UploadCoordinator,
        credentials::{CredentialIssuer, SignedUrlIssuer},
        identity::{IdentityProvider, SqliteIdentity},
        metadata_store::{MetadataStore, SqliteMetadataStore},
        object_store::LocalObjectStore,
        signing::UrlSigner,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite pool, used directly only by the readiness probe.
    pub db: Arc<SqlitePool>,
    pub identity: Arc<dyn IdentityProvider>,
    pub metadata: Arc<dyn MetadataStore>,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub coordinator: UploadCoordinator,
    pub objects: LocalObjectStore,
    pub signer: UrlSigner,
}

impl AppState {
    /// Wire the bundled SQLite and local-disk collaborators together.
    pub fn from_config(cfg: &AppConfig, db: Arc<SqlitePool>) -> anyhow::Result<Self> {
        let signer = UrlSigner::new(&cfg.signing_secret)?;
        let issuer = SignedUrlIssuer::new(
            signer.clone(),
            cfg.public_url.clone(),
            cfg.upload_ttl_secs,
            cfg.read_ttl_secs,
        );
        Ok(Self::from_parts(
            db.clone(),
            Arc::new(SqliteIdentity::new(db.clone())),
            Arc::new(SqliteMetadataStore::new(db)),
            Arc::new(issuer),
            LocalObjectStore::new(&cfg.storage_dir),
            signer,
        ))
    }

    pub fn from_parts(
        db: Arc<SqlitePool>,
        identity: Arc<dyn IdentityProvider>,
        metadata: Arc<dyn MetadataStore>,
        issuer: Arc<dyn CredentialIssuer>,
        objects: LocalObjectStore,
        signer: UrlSigner,
    ) -> Self {
        let coordinator = UploadCoordinator::new(metadata.clone(), issuer.clone());
        Self {
            db,
            identity,
            metadata,
            issuer,
            coordinator,
            objects,
            signer,
        }
    }
}
