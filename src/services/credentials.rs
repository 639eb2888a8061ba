//! Credential issuer adapter.
//!
//! Mints short-lived, single-object, method-scoped storage credentials. The
//! issuer never touches the metadata store.

use crate::{
    models::credential::{StorageOp, UploadCredential},
    services::signing::UrlSigner,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("object store refused to issue a credential: {0}")]
    Refused(String),
    #[error("invalid credential lifetime: {0}s")]
    InvalidLifetime(u64),
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync + 'static {
    /// Write-scoped credential for exactly one object.
    async fn issue_upload_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError>;

    /// Read-scoped credential used for previews.
    async fn issue_read_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError>;
}

/// Issues HMAC-signed URLs for the bundled local object store.
#[derive(Clone, Debug)]
pub struct SignedUrlIssuer {
    signer: UrlSigner,
    public_base_url: String,
    upload_ttl_secs: u64,
    read_ttl_secs: u64,
}

impl SignedUrlIssuer {
    pub fn new(
        signer: UrlSigner,
        public_base_url: impl Into<String>,
        upload_ttl_secs: u64,
        read_ttl_secs: u64,
    ) -> Self {
        Self {
            signer,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            upload_ttl_secs,
            read_ttl_secs,
        }
    }

    pub fn object_url(&self, object_id: Uuid) -> String {
        format!("{}/storage/objects/{}", self.public_base_url, object_id)
    }

    fn issue(&self, op: StorageOp, object_id: Uuid, ttl_secs: u64) -> Result<UploadCredential, IssuerError> {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .ok_or(IssuerError::InvalidLifetime(ttl_secs))?;
        let expires_at = Utc::now() + ttl;
        let token = self.signer.sign(op, object_id, expires_at);

        let target_url = match op {
            StorageOp::Put => self.object_url(object_id),
            StorageOp::Get => format!("{}?token={}", self.object_url(object_id), token),
        };

        Ok(UploadCredential {
            target_url,
            token,
            method: op.http_method().to_string(),
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialIssuer for SignedUrlIssuer {
    async fn issue_upload_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        self.issue(StorageOp::Put, object_id, self.upload_ttl_secs)
    }

    async fn issue_read_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        self.issue(StorageOp::Get, object_id, self.read_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> (SignedUrlIssuer, UrlSigner) {
        let signer = UrlSigner::new("test-secret").unwrap();
        (
            SignedUrlIssuer::new(signer.clone(), "http://localhost:3000/", 900, 3600),
            signer,
        )
    }

    #[tokio::test]
    async fn upload_credential_is_scoped_to_put_on_one_object() {
        let (issuer, signer) = issuer();
        let id = Uuid::new_v4();
        let cred = issuer.issue_upload_credential(id).await.unwrap();

        assert_eq!(cred.target_url, format!("http://localhost:3000/storage/objects/{id}"));
        assert_eq!(cred.method, "PUT");
        assert!(cred.expires_at > Utc::now());
        assert!(signer.verify(&cred.token, StorageOp::Put, id, Utc::now()).is_ok());
        assert!(signer.verify(&cred.token, StorageOp::Get, id, Utc::now()).is_err());
    }

    #[tokio::test]
    async fn read_credential_embeds_token_in_url() {
        let (issuer, signer) = issuer();
        let id = Uuid::new_v4();
        let cred = issuer.issue_read_credential(id).await.unwrap();

        assert_eq!(cred.method, "GET");
        assert!(cred.target_url.ends_with(&format!("?token={}", cred.token)));
        assert!(signer.verify(&cred.token, StorageOp::Get, id, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn zero_lifetime_is_refused() {
        let issuer = SignedUrlIssuer::new(UrlSigner::new("s").unwrap(), "http://x", 0, 60);
        let err = issuer.issue_upload_credential(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, IssuerError::InvalidLifetime(0)));
    }
}
