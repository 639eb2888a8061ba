//! HMAC-SHA256 storage tokens.
//!
//! A token is `base64url(op|object_id|expires_unix) "." hex(hmac)`. It binds
//! exactly one object id, one operation and one expiry; anything else is
//! rejected by [`UrlSigner::verify`].

use crate::models::credential::StorageOp;
use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed storage token")]
    Malformed,
    #[error("storage token signature mismatch")]
    BadSignature,
    #[error("storage token expired")]
    Expired,
    #[error("storage token is not valid for this object")]
    WrongObject,
    #[error("storage token does not allow `{0}`")]
    WrongOperation(StorageOp),
}

/// Signs and verifies storage tokens with a shared secret.
#[derive(Clone)]
pub struct UrlSigner {
    /// Keyed once; cloned for every token.
    mac: HmacSha256,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_ref()).context("invalid signing secret")?;
        Ok(Self { mac })
    }

    pub fn sign(&self, op: StorageOp, object_id: Uuid, expires_at: DateTime<Utc>) -> String {
        let payload = format!("{}|{}|{}", op, object_id, expires_at.timestamp());
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("{}.{}", URL_SAFE_NO_PAD.encode(payload), signature)
    }

    /// Check that `token` authorizes `op` on `object_id` at time `now`.
    pub fn verify(
        &self,
        token: &str,
        op: StorageOp,
        object_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let (encoded, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| TokenError::Malformed)?;
        let mut parts = payload.splitn(3, '|');
        let (Some(token_op), Some(token_id), Some(expires)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };
        let token_op = StorageOp::parse(token_op).ok_or(TokenError::Malformed)?;
        let token_id = Uuid::parse_str(token_id).map_err(|_| TokenError::Malformed)?;
        let expires: i64 = expires.parse().map_err(|_| TokenError::Malformed)?;

        if token_op != op {
            return Err(TokenError::WrongOperation(op));
        }
        if token_id != object_id {
            return Err(TokenError::WrongObject);
        }
        if now.timestamp() >= expires {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}
